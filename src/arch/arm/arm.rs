use super::is_within_range;
use crate::arch::{CodeGen, InstructionSet, Prologue};
use crate::pic::{self, CodeEmitter, FixedThunk, Thunkable};
use generic_array::{typenum, GenericArray};

// push {r0-r7}
const PUSH_R0_R7: u32 = 0xE92D_00FF;
// push {r8-r12, lr}
const PUSH_R8_R12_LR: u32 = 0xE92D_5F00;
// mrs r0, apsr
const MRS_R0_APSR: u32 = 0xE10F_0000;
// str r0, [sp, #-4]!
const PUSH_R0: u32 = 0xE52D_0004;
// mov r1, sp
const MOV_R1_SP: u32 = 0xE1A0_100D;
// blx r4
const BLX_R4: u32 = 0xE12F_FF34;
// ldr r0, [sp], #4
const POP_R0: u32 = 0xE49D_0004;
// msr apsr_nzcvq, r0
const MSR_APSR_R0: u32 = 0xE128_F000;
// pop {r8-r12, lr}
const POP_R8_R12_LR: u32 = 0xE8BD_5F00;
// pop {r0-r7}
const POP_R0_R7: u32 = 0xE8BD_00FF;

const R0: u32 = 0;
const R4: u32 = 4;
const PC: u32 = 15;

/// Code generator for the 32-bit ARM state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Arm;

impl CodeGen for Arm {
  fn instruction_set(&self) -> InstructionSet {
    InstructionSet::Arm
  }

  fn prologue(&self, callback: usize, parameter: usize) -> Prologue {
    let mut emitter = CodeEmitter::new();

    // Data fields read back by the literal loads below
    let callback_slot = emitter.len();
    emitter.add_thunk(pic::pointer(callback, 4));
    let parameter_slot = emitter.len();
    emitter.add_thunk(pic::pointer(parameter, 4));

    let entry = emitter.len();
    for &opcode in &[PUSH_R0_R7, PUSH_R8_R12_LR, MRS_R0_APSR, PUSH_R0, MOV_R1_SP] {
      emitter.add_thunk(word(opcode));
    }

    let offset = parameter_slot as isize - emitter.len() as isize;
    emitter.add_thunk(word(ldr_literal(R0, offset)));
    let offset = callback_slot as isize - emitter.len() as isize;
    emitter.add_thunk(word(ldr_literal(R4, offset)));

    for &opcode in &[BLX_R4, POP_R0, MSR_APSR_R0, POP_R8_R12_LR, POP_R0_R7] {
      emitter.add_thunk(word(opcode));
    }

    Prologue { emitter, entry }
  }

  fn jump(&self, from: usize, to: usize) -> CodeEmitter {
    let mut emitter = CodeEmitter::new();

    if self.can_jump_directly(from, to) {
      emitter.add_thunk(branch(to));
    } else {
      // ldr pc, [pc, #-4]; .word to
      emitter.add_thunk(word(ldr_literal(PC, 4)));
      emitter.add_thunk(pic::pointer(to, 4));
    }

    emitter
  }

  fn can_jump_directly(&self, from: usize, to: usize) -> bool {
    is_within_range(from, to)
  }
}

fn word(opcode: u32) -> Box<dyn Thunkable> {
  Box::new(opcode.to_le_bytes().to_vec())
}

/// Encodes `ldr rt, [pc, #imm]` for a literal `offset` bytes away from the
/// instruction itself.
fn ldr_literal(rt: u32, offset: isize) -> u32 {
  // The PC reads two instructions ahead
  let imm = offset - 8;
  let up = if imm >= 0 { 1 << 23 } else { 0 };
  0xE51F_0000 | up | (rt << 12) | (imm.unsigned_abs() as u32 & 0xFFF)
}

/// Constructs an unconditional relative branch (`b <to>`).
fn branch(to: usize) -> Box<dyn Thunkable> {
  Box::new(FixedThunk::<typenum::U4>::new(move |source| {
    let displacement = (to as i64).wrapping_sub(source as i64 + 8) >> 2;
    let opcode = 0xEA00_0000 | (displacement as u32 & 0x00FF_FFFF);
    GenericArray::clone_from_slice(&opcode.to_le_bytes())
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
      .chunks(4)
      .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect()
  }

  #[test]
  fn prologue_loads_its_data_fields() {
    let (code, entry) = Arm.generate_prologue(0x8000, 0x1234_5678, 0xCAFE_BABE);
    let code = words(&code);

    assert_eq!(entry, 0x8008);
    assert_eq!(code[0], 0x1234_5678);
    assert_eq!(code[1], 0xCAFE_BABE);
    // ldr r0, [pc, #-0x20] and ldr r4, [pc, #-0x28]
    assert_eq!(code[7], 0xE51F_0020);
    assert_eq!(code[8], 0xE51F_4028);
    assert_eq!(code[9], BLX_R4);
    assert_eq!(code.len(), 14);
  }

  #[test]
  fn direct_branch_encodes_word_offset() {
    assert_eq!(words(&Arm.generate_jump(0x1000, 0x1008)), vec![0xEA00_0000]);
    assert_eq!(words(&Arm.generate_jump(0x1000, 0x1000)), vec![0xEAFF_FFFE]);
    assert_eq!(Arm.jump_size(0x1000, 0x2000), 4);
  }

  #[test]
  fn far_jump_uses_literal_pool() {
    let (from, to) = (0x1000_0000, 0x2000_0000);
    assert!(!Arm.can_jump_directly(from, to));
    assert_eq!(Arm.jump_size(from, to), 8);
    assert_eq!(words(&Arm.generate_jump(from, to)), vec![0xE51F_F004, to as u32]);
  }
}
