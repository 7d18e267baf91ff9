use super::Thunkable;
use generic_array::{typenum::Unsigned, ArrayLength, GenericArray};

/// A closure that generates a thunk of a size known at compile time.
pub struct FixedThunk<N: ArrayLength<u8>>(Box<dyn Fn(usize) -> GenericArray<u8, N>>);

impl<N: ArrayLength<u8>> FixedThunk<N> {
  /// Constructs a new thunk with a specific closure.
  pub fn new<T: Fn(usize) -> GenericArray<u8, N> + 'static>(callback: T) -> Self {
    FixedThunk(Box::new(callback))
  }
}

/// Thunks implement the thunkable interface.
impl<N: ArrayLength<u8>> Thunkable for FixedThunk<N> {
  fn generate(&self, address: usize) -> Vec<u8> {
    self.0(address).to_vec()
  }

  fn len(&self) -> usize {
    <N as Unsigned>::to_usize()
  }
}
