//! Position-independent code assembly.
//!
//! Generated code is described as a list of thunks, each with a size that is
//! known up front, and only turned into bytes once the address it will live
//! at is known. This lets callers ask how large a sequence is before picking
//! where to write it.
pub use self::emitter::CodeEmitter;
pub use self::thunk::FixedThunk;

mod emitter;
mod thunk;

/// An interface for generating PIC thunks.
pub trait Thunkable {
  /// Generates the code at the specified address.
  fn generate(&self, address: usize) -> Vec<u8>;

  /// Returns the size of a generated thunk.
  fn len(&self) -> usize;
}

/// Thunkable implementation for static data
impl Thunkable for Vec<u8> {
  /// Generates a static thunk assumed to be PIC
  fn generate(&self, _address: usize) -> Vec<u8> {
    self.clone()
  }

  /// Returns the size of a generated thunk
  fn len(&self) -> usize {
    self.len()
  }
}

/// Returns a static thunk holding a little-endian pointer of `width` bytes.
pub fn pointer(value: usize, width: usize) -> Box<dyn Thunkable> {
  Box::new((value as u64).to_le_bytes()[..width].to_vec())
}

#[cfg(test)]
mod tests {
  use super::*;
  use generic_array::{typenum, GenericArray};

  #[test]
  fn emitter_passes_each_thunk_its_own_address() {
    let mut emitter = CodeEmitter::new();
    emitter.add_bytes(&[0x90, 0x90]);
    emitter.add_thunk(Box::new(FixedThunk::<typenum::U4>::new(|source| {
      GenericArray::clone_from_slice(&(source as u32).to_le_bytes())
    })));

    assert_eq!(emitter.len(), 6);
    assert_eq!(emitter.emit(0x1000), vec![0x90, 0x90, 0x02, 0x10, 0x00, 0x00]);
  }

  #[test]
  fn pointer_respects_width() {
    assert_eq!(pointer(0x1122_3344, 4).generate(0), vec![0x44, 0x33, 0x22, 0x11]);
    assert_eq!(pointer(0x1122_3344, 8).len(), 8);
  }
}
