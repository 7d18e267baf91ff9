//! The underlying disassembler should be opaque to the outside.
use crate::arch::RelocationHazard;
use std::marker::PhantomData;
use std::mem;

/// Bytes remaining to be fed to the disassembler.
struct Input {
  bytes: *const u8,
  remaining: usize,
}

/// A x86/x64 disassembler reading from a byte slice.
struct Disassembler<'a> {
  ud: udis::ud,
  // Referenced by the input hook, so it must not move
  _input: Box<Input>,
  _bytes: PhantomData<&'a [u8]>,
}

impl<'a> Disassembler<'a> {
  /// Creates a disassembler for code of the given bitness.
  fn new(code: &'a [u8], bits: u8) -> Self {
    let mut input = Box::new(Input {
      bytes: code.as_ptr(),
      remaining: code.len(),
    });

    unsafe {
      let mut ud = mem::zeroed();
      udis::ud_init(&mut ud);
      udis::ud_set_mode(&mut ud, bits);
      udis::ud_set_input_hook(&mut ud, Some(Self::udis_read_input));
      udis::ud_set_user_opaque_data(&mut ud, &mut *input as *mut Input as *mut _);

      Disassembler {
        ud,
        _input: input,
        _bytes: PhantomData,
      }
    }
  }

  /// Reads one byte from the input and advances it.
  unsafe extern "C" fn udis_read_input(ud: *mut udis::ud) -> libc::c_int {
    // UD_EOI
    const END_OF_INPUT: libc::c_int = -1;

    let input = &mut *(udis::ud_get_user_opaque_data(ud) as *mut Input);
    if input.remaining == 0 {
      return END_OF_INPUT;
    }

    let result = *input.bytes;
    input.bytes = input.bytes.offset(1);
    input.remaining -= 1;
    libc::c_int::from(result)
  }

  /// Decodes the next instruction.
  fn next(&mut self) -> Option<Instruction> {
    unsafe {
      let length = udis::ud_disassemble(&mut self.ud) as usize;
      if length == 0 {
        return None;
      }

      Some(Instruction {
        length,
        mnemonic: udis::ud_insn_mnemonic(&self.ud),
        operands: self.ud.operand.to_vec(),
      })
    }
  }
}

/// Safe wrapper around a decoded instruction.
struct Instruction {
  length: usize,
  mnemonic: udis::ud_mnemonic_code,
  operands: Vec<udis::ud_operand>,
}

impl Instruction {
  /// Returns true if the instruction could not be decoded.
  fn is_invalid(&self) -> bool {
    self.mnemonic == udis::ud_mnemonic_code::UD_Iinvalid
  }

  /// Returns true if the instruction has a relative branch operand.
  fn has_relative_branch(&self) -> bool {
    self
      .operands
      .iter()
      .any(|op| op.otype == udis::ud_type::UD_OP_JIMM)
  }

  /// Returns true if the instruction addresses memory relative to RIP.
  fn has_rip_operand(&self) -> bool {
    self
      .operands
      .iter()
      .any(|op| op.otype == udis::ud_type::UD_OP_MEM && op.base == udis::ud_type::UD_R_RIP)
  }
}

/// Scans the first `copied` bytes of `code` for instructions that change
/// meaning once moved away from `address`.
///
/// Bytes past `copied` are lookahead, used to tell whether the last copied
/// instruction is cut in half.
pub fn scan(code: &[u8], copied: usize, bits: u8, address: usize) -> Vec<RelocationHazard> {
  let mut hazards = Vec::new();
  let mut disasm = Disassembler::new(code, bits);
  let mut offset = 0;

  while offset < copied {
    let instruction = match disasm.next() {
      Some(instruction) if !instruction.is_invalid() => instruction,
      _ => {
        hazards.push(RelocationHazard::Truncated(offset));
        break;
      },
    };

    if instruction.has_relative_branch() {
      hazards.push(RelocationHazard::RelativeBranch(offset));
    }

    if instruction.has_rip_operand() {
      hazards.push(RelocationHazard::RipRelative(offset));
    }

    if offset + instruction.length > copied {
      hazards.push(RelocationHazard::Truncated(offset));
    }

    offset += instruction.length;
  }

  if !hazards.is_empty() {
    log::trace!(
      "{} relocation hazard(s) in {:02x?} at {:#x}",
      hazards.len(),
      &code[..copied.min(code.len())],
      address
    );
  }

  hazards
}
