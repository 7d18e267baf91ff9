//! The inline hook engine.
use crate::arch::{self, CodeGen, RelocationHazard};
use crate::error::{Error, Result};
use crate::host::{Host, Proximity};
use crate::registry::HookRecord;
use crate::session::Session;
use log::{debug, info, warn};
use std::fmt::{self, Write};

/// Bytes read past the relocated region when looking for split instructions.
const LOOKAHEAD: usize = 16;

/// Where a custom patcher's code will live.
pub struct PatchSite<'a> {
  /// The hooked address.
  pub target: usize,
  /// The trampoline address the patch code is written to, right after the
  /// prologue.
  pub position: usize,
  /// The number of bytes the jump at the target overwrites.
  pub jump_size: usize,
  /// The generator of the hook being installed.
  pub generator: &'a dyn CodeGen,
  /// Read access to the address space.
  pub memory: &'a dyn Host,
}

/// The result of a custom patcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
  /// Code placed after the prologue, responsible for resuming the target.
  pub code: Vec<u8>,
  /// The target bytes to restore on uninstall. Must cover at least the
  /// jump size.
  pub original: Vec<u8>,
}

/// Produces the trampoline tail in place of the default byte copy.
pub trait Patcher {
  fn patch(&mut self, site: &PatchSite) -> Result<Patch>;
}

impl<F> Patcher for F
where
  F: FnMut(&PatchSite) -> Result<Patch>,
{
  fn patch(&mut self, site: &PatchSite) -> Result<Patch> {
    self(site)
  }
}

/// A hook that is ready to be installed.
pub struct InlineHooker {
  target: usize,
  callback: usize,
  parameter: usize,
  trampoline: Option<usize>,
  generator: Box<dyn CodeGen>,
  patcher: Option<Box<dyn Patcher>>,
}

impl InlineHooker {
  /// Creates a hook of `target` that calls `callback` with `parameter`.
  pub fn new(generator: Box<dyn CodeGen>, target: usize, callback: usize, parameter: usize) -> Self {
    InlineHooker {
      target,
      callback,
      parameter,
      trampoline: None,
      generator,
      patcher: None,
    }
  }

  /// Uses caller provided memory for the trampoline instead of the pool.
  pub fn with_trampoline(mut self, address: usize) -> Self {
    self.trampoline = Some(address);
    self
  }

  /// Replaces the default relocation with a custom patcher.
  pub fn with_patcher(mut self, patcher: Box<dyn Patcher>) -> Self {
    self.patcher = Some(patcher);
    self
  }

  /// Returns the generator code is emitted with.
  pub fn generator(&self) -> &dyn CodeGen {
    &*self.generator
  }

  pub fn target(&self) -> usize {
    self.target
  }

  /// Installs the hook.
  ///
  /// The trampoline is written first and the target is patched last, so a
  /// failure leaves the target untouched.
  pub fn install<H: Host>(mut self, session: &mut Session<H>) -> Result<Hook> {
    if self.target == 0 {
      Err(Error::MissingInput("target"))?;
    }

    if self.callback == 0 {
      Err(Error::MissingInput("callback"))?;
    }

    let set = self.generator.instruction_set();
    let target_code = set.code_address(self.target);

    // ARM and Thumb entries of one address share their bytes
    let (host, pool, registry, config) = session.parts();
    if registry.contains(target_code) {
      Err(Error::AlreadyHooked(self.target))?;
    }

    let trampoline = match self.trampoline {
      Some(address) => address,
      None => pool.allocate(
        host,
        config.trampoline_capacity,
        Some(Proximity {
          origin: target_code,
          max_distance: config.proximity,
        }),
      )?,
    };

    // Literal loads assume a word aligned trampoline
    if trampoline % 4 != 0 {
      Err(Error::MisalignedTrampoline(trampoline))?;
    }

    let prologue = self.generator.prologue(self.callback, self.parameter);
    let trampoline_code = trampoline + prologue.entry;
    let position = trampoline + prologue.emitter.len();
    let jump_size = self.generator.jump_size(self.target, trampoline_code);

    let (tail, original, hazards) = match self.patcher.as_mut() {
      None => {
        let original = host.read_vec(target_code, jump_size)?;
        let hazards = match host.read_vec(target_code, jump_size + LOOKAHEAD) {
          Ok(code) => arch::relocation_hazards(set, &code, jump_size, target_code),
          Err(_) => arch::relocation_hazards(set, &original, jump_size, target_code),
        };

        // Resume at the first instruction that was not overwritten
        let mut tail = original.clone();
        let resume = self.target + original.len();
        tail.extend(self.generator.generate_jump(position + original.len(), resume));
        (tail, original, hazards)
      },
      Some(patcher) => {
        let site = PatchSite {
          target: self.target,
          position,
          jump_size,
          generator: &*self.generator,
          memory: &*host,
        };

        let patch = patcher.patch(&site)?;
        if patch.original.len() < jump_size {
          Err(Error::IncompletePatch {
            expected: jump_size,
            actual: patch.original.len(),
          })?;
        }
        (patch.code, patch.original, Vec::new())
      },
    };

    let mut code = prologue.emitter.emit(trampoline);
    code.extend(tail);

    if code.len() > config.trampoline_capacity {
      Err(Error::TrampolineOverflow {
        needed: code.len(),
        capacity: config.trampoline_capacity,
      })?;
    }

    for hazard in &hazards {
      warn!("hook at {:#x} relocates {:?} verbatim", self.target, hazard);
    }

    host.write_code(trampoline, &code)?;

    // Both ends are fixed now, so the jump has its final size
    let jump = self.generator.generate_jump(self.target, trampoline_code);
    debug_assert_eq!(jump.len(), jump_size);
    host.write_code(target_code, &jump)?;

    registry.insert(HookRecord {
      target: self.target,
      code: target_code,
      callback: self.callback,
      trampoline,
      trampoline_code,
      original: original.clone(),
    })?;

    let mut hook = Hook {
      target: self.target,
      callback: self.callback,
      parameter: self.parameter,
      trampoline,
      trampoline_code,
      size: code.len(),
      trampoline_size: (code.len() + 3) & !3,
      original,
      hazards,
      debug: String::new(),
    };

    hook.debug = hook.describe(&*host, target_code, config.dump_padding);

    info!(
      "hooked {:#x} through trampoline {:#x} ({} bytes)",
      hook.target, hook.trampoline, hook.size
    );
    debug!("{}", hook.debug);
    Ok(hook)
  }
}

impl fmt::Debug for InlineHooker {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("InlineHooker")
      .field("target", &format_args!("{:#x}", self.target))
      .field("callback", &format_args!("{:#x}", self.callback))
      .field("instruction_set", &self.generator.instruction_set())
      .field("custom_patcher", &self.patcher.is_some())
      .finish()
  }
}

/// An installed hook.
#[derive(Debug, Clone)]
pub struct Hook {
  target: usize,
  callback: usize,
  parameter: usize,
  trampoline: usize,
  trampoline_code: usize,
  size: usize,
  trampoline_size: usize,
  original: Vec<u8>,
  hazards: Vec<RelocationHazard>,
  debug: String,
}

impl Hook {
  /// Returns the hooked address.
  pub fn target(&self) -> usize {
    self.target
  }

  pub fn callback(&self) -> usize {
    self.callback
  }

  pub fn parameter(&self) -> usize {
    self.parameter
  }

  /// Returns the base of the trampoline memory.
  pub fn trampoline(&self) -> usize {
    self.trampoline
  }

  /// Returns where the save/call/restore sequence begins.
  pub fn trampoline_code(&self) -> usize {
    self.trampoline_code
  }

  /// Returns the number of bytes written to the trampoline.
  pub fn size(&self) -> usize {
    self.size
  }

  /// Returns the trampoline size rounded up to a multiple of 4.
  pub fn trampoline_size(&self) -> usize {
    self.trampoline_size
  }

  /// Returns the bytes the jump overwrote.
  pub fn original_bytes(&self) -> &[u8] {
    &self.original
  }

  /// Returns the position dependent instructions that were copied verbatim.
  pub fn hazards(&self) -> &[RelocationHazard] {
    &self.hazards
  }

  /// Returns the addresses and memory dumps recorded at install.
  pub fn debug_info(&self) -> &str {
    &self.debug
  }

  /// Renders the addresses of the hook, and both code regions with some
  /// trailing context when it is readable.
  fn describe(&self, memory: &dyn Host, target_code: usize, padding: usize) -> String {
    let dump = |address: usize, size: usize| {
      memory
        .read_vec(address, size + padding)
        .or_else(|_| memory.read_vec(address, size))
        .unwrap_or_default()
    };

    let mut text = String::new();
    let _ = writeln!(text, "target = {:#x}", self.target);
    let _ = writeln!(text, "callback = {:#x}", self.callback);
    let _ = writeln!(text, "trampoline = {:#x}", self.trampoline);
    let _ = writeln!(text, "trampoline_code = {:#x}", self.trampoline_code);
    let _ = writeln!(text, "trampoline_size = {}", self.size);
    let _ = writeln!(text, "original_code = {}", hex(&dump(target_code, self.original.len())));
    let _ = write!(text, "trampoline_data = {}", hex(&dump(self.trampoline, self.size)));
    text
  }
}

fn hex(bytes: &[u8]) -> String {
  let bytes: Vec<String> = bytes.iter().map(|byte| format!("{:02x}", byte)).collect();
  format!("[{}]", bytes.join(" "))
}
