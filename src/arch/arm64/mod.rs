//! AArch64 code generation.
//!
//! The prologue saves every general purpose register in pairs, finishing
//! with the link register and the condition flags:
//!
//! ```text
//! stp x0, x1, [sp, #-16]!     ; slots 30, 31
//! stp x2, x3, [sp, #-16]!     ; slots 28, 29
//! ...
//! stp x28, x29, [sp, #-16]!   ; slots 2, 3
//! mrs x1, nzcv
//! stp x30, x1, [sp, #-16]!    ; slots 0, 1
//! ```
use super::{CodeGen, InstructionSet, Prologue, SavedContext};
use crate::error::Result;
use crate::pic::{self, CodeEmitter, FixedThunk, Thunkable};
use generic_array::{typenum, GenericArray};

/// The reach of an unconditional `b` (128 MiB).
const BRANCH_RANGE: i64 = 0x800_0000;

const X0: u32 = 0;
const X1: u32 = 1;
const X9: u32 = 9;
const X16: u32 = 16;
const X30: u32 = 30;
const SP: u32 = 31;

// mrs x1, nzcv
const MRS_X1_NZCV: u32 = 0xD53B_4201;
// msr nzcv, x1
const MSR_NZCV_X1: u32 = 0xD51B_4201;
// mov x1, sp
const MOV_X1_SP: u32 = 0x9100_03E1;

/// Doubleword slot of each saved register, counted from the context pointer.
mod slot {
  pub const X30: usize = 0;
  pub const NZCV: usize = 1;

  /// Slot of `x{index}` for index 0 through 29.
  pub const fn x(index: usize) -> usize {
    // Pairs are pushed from x0/x1 upwards, so x0/x1 end up deepest.
    let pair = index / 2;
    30 - 2 * pair + index % 2
  }

  /// Total number of saved doublewords.
  pub const COUNT: usize = 32;
}

/// Returns true if a single `b` at `from` can reach `to`.
pub fn is_within_branch_range(from: usize, to: usize) -> bool {
  let distance = (to as i64).wrapping_sub(from as i64);
  distance % 4 == 0 && (-BRANCH_RANGE..BRANCH_RANGE).contains(&distance)
}

/// Code generator for AArch64.
#[derive(Debug, Default, Clone, Copy)]
pub struct Arm64;

impl CodeGen for Arm64 {
  fn instruction_set(&self) -> InstructionSet {
    InstructionSet::Arm64
  }

  fn prologue(&self, callback: usize, parameter: usize) -> Prologue {
    let mut emitter = CodeEmitter::new();

    let callback_slot = emitter.len();
    emitter.add_thunk(pic::pointer(callback, 8));
    let parameter_slot = emitter.len();
    emitter.add_thunk(pic::pointer(parameter, 8));

    let entry = emitter.len();
    for pair in 0..15 {
      emitter.add_thunk(word(stp_pre(pair * 2, pair * 2 + 1)));
    }
    emitter.add_thunk(word(MRS_X1_NZCV));
    emitter.add_thunk(word(stp_pre(X30, X1)));
    emitter.add_thunk(word(MOV_X1_SP));

    let offset = parameter_slot as isize - emitter.len() as isize;
    emitter.add_thunk(word(ldr_literal(X0, offset)));
    let offset = callback_slot as isize - emitter.len() as isize;
    emitter.add_thunk(word(ldr_literal(X9, offset)));
    emitter.add_thunk(word(blr(X9)));

    emitter.add_thunk(word(ldp_post(X30, X1)));
    emitter.add_thunk(word(MSR_NZCV_X1));
    for pair in (0..15).rev() {
      emitter.add_thunk(word(ldp_post(pair * 2, pair * 2 + 1)));
    }

    Prologue { emitter, entry }
  }

  fn jump(&self, from: usize, to: usize) -> CodeEmitter {
    let mut emitter = CodeEmitter::new();

    if self.can_jump_directly(from, to) {
      emitter.add_thunk(branch(to));
    } else {
      // ldr x16, #8; br x16; .quad to
      emitter.add_thunk(word(ldr_literal(X16, 8)));
      emitter.add_thunk(word(br(X16)));
      emitter.add_thunk(pic::pointer(to, 8));
    }

    emitter
  }

  fn can_jump_directly(&self, from: usize, to: usize) -> bool {
    is_within_branch_range(from, to)
  }
}

fn word(opcode: u32) -> Box<dyn Thunkable> {
  Box::new(opcode.to_le_bytes().to_vec())
}

/// Encodes `stp rt, rt2, [sp, #-16]!`.
fn stp_pre(rt: u32, rt2: u32) -> u32 {
  let imm7 = (-2i32 as u32) & 0x7F;
  0xA980_0000 | (imm7 << 15) | (rt2 << 10) | (SP << 5) | rt
}

/// Encodes `ldp rt, rt2, [sp], #16`.
fn ldp_post(rt: u32, rt2: u32) -> u32 {
  0xA8C0_0000 | (2 << 15) | (rt2 << 10) | (SP << 5) | rt
}

/// Encodes a 64-bit `ldr rt, <literal>` located `offset` bytes away.
fn ldr_literal(rt: u32, offset: isize) -> u32 {
  let imm19 = ((offset >> 2) as u32) & 0x7FFFF;
  0x5800_0000 | (imm19 << 5) | rt
}

fn blr(rn: u32) -> u32 {
  0xD63F_0000 | (rn << 5)
}

fn br(rn: u32) -> u32 {
  0xD61F_0000 | (rn << 5)
}

/// Constructs an unconditional relative branch (`b <to>`).
fn branch(to: usize) -> Box<dyn Thunkable> {
  Box::new(FixedThunk::<typenum::U4>::new(move |source| {
    let imm26 = ((to as i64).wrapping_sub(source as i64) >> 2) as u32 & 0x03FF_FFFF;
    GenericArray::clone_from_slice(&(0x1400_0000 | imm26).to_le_bytes())
  }))
}

/// Registers saved by the AArch64 prologue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Arm64Registers {
  /// x0 through x29; x29 is the frame pointer.
  pub x: [u64; 30],
  /// The link register (x30).
  pub lr: u64,
  /// Condition flags.
  pub nzcv: u64,
}

impl Arm64Registers {
  /// Size of the saved register frame in bytes.
  pub const FRAME_SIZE: usize = slot::COUNT * 8;

  /// Decodes a snapshot of the stack taken at the context pointer.
  pub fn read(context: &[u8]) -> Result<Self> {
    SavedContext::new(context, 8, slot::COUNT).map(|saved| Self::decode(&saved))
  }

  /// Decodes the frame at the context pointer handed to a callback.
  ///
  /// # Safety
  ///
  /// `context` must point at a frame saved by an AArch64 prologue.
  pub unsafe fn from_context(context: *const u8) -> Self {
    Self::decode(&SavedContext::from_raw(context, 8, slot::COUNT))
  }

  /// Returns the frame pointer (x29).
  pub fn fp(&self) -> u64 {
    self.x[29]
  }

  fn decode(saved: &SavedContext) -> Self {
    let mut x = [0u64; 30];
    for (index, value) in x.iter_mut().enumerate() {
      *value = saved.slot(slot::x(index));
    }

    Arm64Registers {
      x,
      lr: saved.slot(slot::X30),
      nzcv: saved.slot(slot::NZCV),
    }
  }
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
  fn prologue_literal_loads() {
    let (code, entry) = Arm64.generate_prologue(0x10_0000, 0xAAAA, 0xBBBB);
    assert_eq!(entry, 0x10_0010);
    assert_eq!(&code[..8], &0xAAAAu64.to_le_bytes());
    assert_eq!(&code[8..16], &0xBBBBu64.to_le_bytes());

    let code = words(&code[16..]);
    assert_eq!(code[0], 0xA9BF_07E0); // stp x0, x1, [sp, #-16]!
    assert_eq!(code[16], 0xA9BF_07FE); // stp x30, x1, [sp, #-16]!
    assert_eq!(code[18], 0x58FF_FD80); // ldr x0, #-80
    assert_eq!(code[19], 0x58FF_FD29); // ldr x9, #-92
    assert_eq!(code[20], 0xD63F_0120); // blr x9
    assert_eq!(code[37], 0xA8C1_07E0); // ldp x0, x1, [sp], #16
    assert_eq!(code.len(), 38);
  }

  #[test]
  fn reachable_targets_use_a_single_branch() {
    assert!(Arm64.can_jump_directly(0x1000_0000, 0x1000_0000 + 0x7FF_FFFC));
    assert_eq!(Arm64.jump_size(0x1000_0000, 0x1000_0000 - 0x800_0000), 4);
    assert_eq!(words(&Arm64.generate_jump(0x1000, 0x1004)), vec![0x1400_0001]);
    assert_eq!(words(&Arm64.generate_jump(0x1004, 0x1000)), vec![0x17FF_FFFF]);
  }

  #[test]
  fn unreachable_targets_use_a_register_branch() {
    let (from, to) = (0x1000_0000usize, 0x9000_0000usize);

    assert!(!Arm64.can_jump_directly(from, to));
    assert_eq!(Arm64.jump_size(from, to), 16);

    let code = Arm64.generate_jump(from, to);
    assert_eq!(words(&code[..8]), vec![0x5800_0050, 0xD61F_0200]);
    assert_eq!(&code[8..], &(to as u64).to_le_bytes());
  }

  #[test]
  fn misaligned_distance_is_not_direct() {
    assert!(!Arm64.can_jump_directly(0x1000, 0x1002));
  }

  #[test]
  fn slots_match_push_order() {
    // Replay the prologue's stores on a synthetic stack.
    let mut stack = vec![0u64; slot::COUNT];
    let mut sp = slot::COUNT;
    for pair in 0..15u64 {
      sp -= 2;
      stack[sp] = 0x100 + pair * 2;
      stack[sp + 1] = 0x100 + pair * 2 + 1;
    }
    sp -= 2;
    stack[sp] = 0x100 + 30;
    stack[sp + 1] = 0x6000_0000;
    assert_eq!(sp, 0);

    let bytes: Vec<u8> = stack.iter().flat_map(|value| value.to_le_bytes().to_vec()).collect();
    let regs = Arm64Registers::read(&bytes).unwrap();

    for (index, value) in regs.x.iter().enumerate() {
      assert_eq!(*value, 0x100 + index as u64);
    }
    assert_eq!(regs.lr, 0x100 + 30);
    assert_eq!(regs.nzcv, 0x6000_0000);
    assert_eq!(regs.fp(), 0x100 + 29);
  }
}
