use super::is_within_range;
use crate::arch::{CodeGen, InstructionSet, Prologue};
use crate::pic::{self, CodeEmitter, FixedThunk, Thunkable};
use generic_array::{typenum, GenericArray};

// push {r0-r7}
const PUSH_R0_R7: u16 = 0xB4FF;
// push.w {r8-r12, lr}
const PUSH_R8_R12_LR: (u16, u16) = (0xE92D, 0x5F00);
// mrs r0, apsr
const MRS_R0_APSR: (u16, u16) = (0xF3EF, 0x8000);
// push {r0}
const PUSH_R0: u16 = 0xB401;
// mov r1, sp
const MOV_R1_SP: u16 = 0x4669;
// blx r4
const BLX_R4: u16 = 0x47A0;
// pop {r0}
const POP_R0: u16 = 0xBC01;
// msr apsr_nzcvq, r0
const MSR_APSR_R0: (u16, u16) = (0xF380, 0x8800);
// pop.w {r8-r12, lr}
const POP_R8_R12_LR: (u16, u16) = (0xE8BD, 0x5F00);
// pop {r0-r7}
const POP_R0_R7: u16 = 0xBCFF;
// nop
const NOP: u16 = 0xBF00;

const R0: u16 = 0;
const R4: u16 = 4;
const PC: u16 = 15;

/// Code generator for the Thumb state.
///
/// Addresses handed to the generator may carry the Thumb bit. The trampoline
/// itself must start on a word boundary, since the prologue's literal loads
/// are computed from the word-aligned PC.
#[derive(Debug, Default, Clone, Copy)]
pub struct Thumb;

impl CodeGen for Thumb {
  fn instruction_set(&self) -> InstructionSet {
    InstructionSet::Thumb
  }

  fn prologue(&self, callback: usize, parameter: usize) -> Prologue {
    let mut emitter = CodeEmitter::new();

    let callback_slot = emitter.len();
    emitter.add_thunk(pic::pointer(callback, 4));
    let parameter_slot = emitter.len();
    emitter.add_thunk(pic::pointer(parameter, 4));

    let entry = emitter.len();
    emitter.add_thunk(narrow(PUSH_R0_R7));
    emitter.add_thunk(wide(PUSH_R8_R12_LR));
    emitter.add_thunk(wide(MRS_R0_APSR));
    emitter.add_thunk(narrow(PUSH_R0));
    emitter.add_thunk(narrow(MOV_R1_SP));

    let position = emitter.len();
    emitter.add_thunk(wide(ldr_literal(R0, position, parameter_slot)));
    let position = emitter.len();
    emitter.add_thunk(wide(ldr_literal(R4, position, callback_slot)));

    emitter.add_thunk(narrow(BLX_R4));
    emitter.add_thunk(narrow(POP_R0));
    emitter.add_thunk(wide(MSR_APSR_R0));
    emitter.add_thunk(wide(POP_R8_R12_LR));
    emitter.add_thunk(narrow(POP_R0_R7));

    Prologue { emitter, entry }
  }

  fn jump(&self, from: usize, to: usize) -> CodeEmitter {
    let mut emitter = CodeEmitter::new();

    if self.can_jump_directly(from, to) {
      emitter.add_thunk(branch(to & !1));
    } else {
      // The literal must be word aligned
      let code = from & !1;
      if code % 4 != 0 {
        emitter.add_thunk(narrow(NOP));
      }

      // ldr.w pc, [pc, #0]; .word to | 1
      emitter.add_thunk(wide(ldr_literal(PC, 0, 4)));
      emitter.add_thunk(pic::pointer(to | 1, 4));
    }

    emitter
  }

  fn can_jump_directly(&self, from: usize, to: usize) -> bool {
    is_within_range(from, to)
  }
}

fn narrow(opcode: u16) -> Box<dyn Thunkable> {
  Box::new(opcode.to_le_bytes().to_vec())
}

fn wide((first, second): (u16, u16)) -> Box<dyn Thunkable> {
  let mut bytes = first.to_le_bytes().to_vec();
  bytes.extend_from_slice(&second.to_le_bytes());
  Box::new(bytes)
}

/// Encodes `ldr.w rt, [pc, #imm]` placed at `position` that loads the word at
/// `literal`. Both are offsets from a word-aligned base.
fn ldr_literal(rt: u16, position: usize, literal: usize) -> (u16, u16) {
  let pc = (position + 4) & !3;
  let imm = literal as isize - pc as isize;
  let up = if imm >= 0 { 1 << 7 } else { 0 };
  (0xF85F | up, (rt << 12) | (imm.unsigned_abs() as u16 & 0xFFF))
}

/// Constructs an unconditional wide branch (`b.w <to>`).
fn branch(to: usize) -> Box<dyn Thunkable> {
  Box::new(FixedThunk::<typenum::U4>::new(move |source| {
    let offset = (to as i64).wrapping_sub(source as i64 + 4) as u32;
    let (first, second) = encode_branch_offset(offset);

    let mut code = [0u8; 4];
    code[..2].copy_from_slice(&first.to_le_bytes());
    code[2..].copy_from_slice(&second.to_le_bytes());
    GenericArray::clone_from_slice(&code)
  }))
}

// The T4 encoding stores bits 23 and 22 of the offset as J1 and J2, which
// are determined by negating them and XOR'ing them with the sign bit.
fn encode_branch_offset(offset: u32) -> (u16, u16) {
  let sign = (offset >> 24) & 1;
  let i1 = (offset >> 23) & 1;
  let i2 = (offset >> 22) & 1;
  let j1 = (!i1 & 1) ^ sign;
  let j2 = (!i2 & 1) ^ sign;
  let imm10 = (offset >> 12) & 0x3FF;
  let imm11 = (offset >> 1) & 0x7FF;

  (
    (0xF000 | (sign << 10) | imm10) as u16,
    (0x9000 | (j1 << 13) | (j2 << 11) | imm11) as u16,
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn halfwords(bytes: &[u8]) -> Vec<u16> {
    bytes
      .chunks(2)
      .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
      .collect()
  }

  #[test]
  fn prologue_loads_are_pc_aligned() {
    let (code, entry) = Thumb.generate_prologue(0x4000, 0x1111_2222, 0x3333_4444);
    let code = halfwords(&code);

    assert_eq!(entry, 0x4008);
    assert_eq!(&code[..4], &[0x2222, 0x1111, 0x4444, 0x3333]);
    // ldr.w r0, [pc, #-20] at +22, ldr.w r4, [pc, #-28] at +26
    assert_eq!(&code[11..13], &[0xF85F, 0x0014]);
    assert_eq!(&code[13..15], &[0xF85F, 0x401C]);
    assert_eq!(code[15], BLX_R4);
  }

  #[test]
  fn zero_offset_branch() {
    assert_eq!(encode_branch_offset(0), (0xF000, 0xB800));
    assert_eq!(encode_branch_offset(-4i32 as u32), (0xF7FF, 0xBFFE));
  }

  #[test]
  fn branch_ignores_mode_bits() {
    let code = Thumb.generate_jump(0x1001, 0x2001);
    assert_eq!(code.len(), 4);
    assert_eq!(halfwords(&code), halfwords(&Thumb.generate_jump(0x1000, 0x2000)));
  }

  #[test]
  fn far_jump_keeps_literal_aligned() {
    let to = 0x2000_0000;

    assert_eq!(Thumb.jump_size(0x1000_0001, to), 8);
    assert_eq!(
      halfwords(&Thumb.generate_jump(0x1000_0001, to)),
      vec![0xF8DF, 0xF000, 0x0001, 0x2000]
    );

    assert_eq!(Thumb.jump_size(0x1000_0003, to), 10);
    assert_eq!(
      halfwords(&Thumb.generate_jump(0x1000_0003, to)),
      vec![NOP, 0xF8DF, 0xF000, 0x0001, 0x2000]
    );
  }
}
