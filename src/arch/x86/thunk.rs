use crate::pic::{FixedThunk, Thunkable};
use generic_array::{typenum, GenericArray};
use std::mem;

const CALL: u8 = 0xE8;
const JMP: u8 = 0xE9;

#[repr(packed)]
struct JumpAbs {
  // jmp [rip+0]
  opcode0: u8,
  opcode1: u8,
  dummy0: u32,
  // destination
  address: u64,
  // int3; int3
  padding: [u8; 2],
}

/// Constructs either a relative jump or call.
fn relative32(destination: usize, opcode: u8) -> Box<dyn Thunkable> {
  Box::new(FixedThunk::<typenum::U5>::new(move |source| {
    let mut code = [opcode, 0, 0, 0, 0];
    code[1..].copy_from_slice(&calculate_displacement(source, destination, 5).to_le_bytes());
    GenericArray::clone_from_slice(&code)
  }))
}

/// Constructs a relative call operation.
pub fn call_rel32(destination: usize) -> Box<dyn Thunkable> {
  relative32(destination, CALL)
}

/// Constructs a relative jump operation.
pub fn jmp_rel32(destination: usize) -> Box<dyn Thunkable> {
  relative32(destination, JMP)
}

/// Constructs an absolute, 16 byte, x64 jump operation.
pub fn jmp_abs(destination: usize) -> Box<dyn Thunkable> {
  let code = JumpAbs {
    opcode0: 0xFF,
    opcode1: 0x25,
    dummy0: 0x0000_0000,
    address: (destination as u64).to_le(),
    padding: [0xCC, 0xCC],
  };

  let slice: [u8; 16] = unsafe { mem::transmute(code) };
  Box::new(slice.to_vec())
}

/// Calculates the relative displacement for an instruction.
///
/// The displacement wraps at 32 bits, which is exact on x86 and only valid
/// on x64 for destinations within +/- 2GB.
pub fn calculate_displacement(source: usize, destination: usize, instruction_size: usize) -> u32 {
  (destination as i64).wrapping_sub(source as i64 + instruction_size as i64) as u32
}
