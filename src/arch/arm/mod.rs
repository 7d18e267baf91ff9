//! 32-bit ARM code generation, for both the ARM and the Thumb state.
//!
//! Both generators save the same registers in the same order, so a single
//! register record serves them:
//!
//! ```text
//! push {r0-r7}          ; r0..r7   -> slots 7..14
//! push {r8-r12, lr}     ; r8..lr   -> slots 1..6
//! mrs  r0, apsr
//! push {r0}             ; apsr     -> slot 0
//! ```
pub use self::arm::Arm;
pub use self::thumb::Thumb;

use super::SavedContext;
use crate::error::Result;

mod arm;
mod thumb;

/// The furthest distance a direct branch is used for (8 MiB).
const BRANCH_RANGE: i64 = 0x80_0000;

/// Word slot of each saved register, counted from the context pointer.
mod slot {
  pub const APSR: usize = 0;
  pub const R8: usize = 1;
  pub const R9: usize = 2;
  pub const R10: usize = 3;
  pub const R11: usize = 4;
  pub const R12: usize = 5;
  pub const LR: usize = 6;
  pub const R0: usize = 7;
  pub const R1: usize = 8;
  pub const R2: usize = 9;
  pub const R3: usize = 10;
  pub const R4: usize = 11;
  pub const R5: usize = 12;
  pub const R6: usize = 13;
  pub const R7: usize = 14;

  /// Total number of saved words.
  pub const COUNT: usize = 15;
}

/// Returns true if a relative branch can cover the distance.
///
/// Both addresses are normalized to carry the Thumb bit so that mixing a
/// Thumb and an ARM address does not skew the distance.
fn is_within_range(from: usize, to: usize) -> bool {
  let distance = ((to | 1) as i64).wrapping_sub((from | 1) as i64);
  (-BRANCH_RANGE..BRANCH_RANGE).contains(&distance)
}

/// Registers saved by the ARM and Thumb prologues.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArmRegisters {
  pub r0: u32,
  pub r1: u32,
  pub r2: u32,
  pub r3: u32,
  pub r4: u32,
  pub r5: u32,
  pub r6: u32,
  pub r7: u32,
  pub r8: u32,
  pub r9: u32,
  pub r10: u32,
  pub r11: u32,
  pub r12: u32,
  /// The link register (r14).
  pub lr: u32,
  /// Application status flags.
  pub apsr: u32,
}

impl ArmRegisters {
  /// Size of the saved register frame in bytes.
  pub const FRAME_SIZE: usize = slot::COUNT * 4;

  /// Decodes a snapshot of the stack taken at the context pointer.
  pub fn read(context: &[u8]) -> Result<Self> {
    SavedContext::new(context, 4, slot::COUNT).map(|saved| Self::decode(&saved))
  }

  /// Decodes the frame at the context pointer handed to a callback.
  ///
  /// # Safety
  ///
  /// `context` must point at a frame saved by an ARM or Thumb prologue.
  pub unsafe fn from_context(context: *const u8) -> Self {
    Self::decode(&SavedContext::from_raw(context, 4, slot::COUNT))
  }

  fn decode(saved: &SavedContext) -> Self {
    let word = |index| saved.slot(index) as u32;
    ArmRegisters {
      r0: word(slot::R0),
      r1: word(slot::R1),
      r2: word(slot::R2),
      r3: word(slot::R3),
      r4: word(slot::R4),
      r5: word(slot::R5),
      r6: word(slot::R6),
      r7: word(slot::R7),
      r8: word(slot::R8),
      r9: word(slot::R9),
      r10: word(slot::R10),
      r11: word(slot::R11),
      r12: word(slot::R12),
      lr: word(slot::LR),
      apsr: word(slot::APSR),
    }
  }
}
