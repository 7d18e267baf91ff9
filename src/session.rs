//! Ownership of everything hooks share.
use crate::alloc::TrampolinePool;
use crate::arch::Arch;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::factory;
use crate::hooker::{Hook, InlineHooker};
use crate::host::Host;
use crate::registry::HookRegistry;
use log::{info, warn};

/// A hooking session over one address space.
///
/// The session owns the trampoline pool and the hook registry; hooks
/// installed through it are restored when it is dropped.
pub struct Session<H: Host> {
  host: H,
  pool: TrampolinePool,
  registry: HookRegistry,
  config: Config,
}

impl<H: Host> Session<H> {
  /// Creates a session with the default configuration.
  pub fn new(host: H) -> Self {
    Self::with_config(host, Config::default())
  }

  pub fn with_config(host: H, config: Config) -> Self {
    Session {
      host,
      pool: TrampolinePool::new(),
      registry: HookRegistry::new(),
      config,
    }
  }

  /// Prepares a hook of `target` with a generator for the host's
  /// architecture.
  pub fn hooker(&self, target: usize, callback: usize, parameter: usize) -> InlineHooker {
    factory::build(self.host.arch(), target, callback, parameter, None, None)
  }

  /// Installs a hook of `target` that calls `callback` with `parameter`.
  pub fn install(&mut self, target: usize, callback: usize, parameter: usize) -> Result<Hook> {
    self.hooker(target, callback, parameter).install(self)
  }

  /// Restores the original code at `target`.
  ///
  /// The hook stays registered if the restore fails.
  pub fn uninstall(&mut self, target: usize) -> Result<()> {
    // The target may carry the Thumb bit
    let code = match self.host.arch() {
      Arch::Arm => target & !1,
      _ => target,
    };

    let original = match self.registry.get(code) {
      Some(hook) => hook.original.clone(),
      None => Err(Error::NotHooked(target))?,
    };

    self.host.write_code(code, &original)?;
    self.registry.remove(code);

    info!("restored {:#x}", target);
    Ok(())
  }

  /// Restores every installed hook.
  ///
  /// Each hook is attempted regardless of earlier failures, which are
  /// reported together.
  pub fn restore_all(&mut self) -> Result<()> {
    let targets: Vec<usize> = self.registry.iter().map(|hook| hook.target).collect();
    let mut failures = Vec::new();

    for target in targets {
      if let Err(error) = self.uninstall(target) {
        warn!("could not restore {:#x}: {}", target, error);
        failures.push((target, error));
      }
    }

    if failures.is_empty() {
      Ok(())
    } else {
      Err(Error::RestoreFailed(failures))
    }
  }

  pub fn host(&self) -> &H {
    &self.host
  }

  pub fn host_mut(&mut self) -> &mut H {
    &mut self.host
  }

  pub fn pool(&self) -> &TrampolinePool {
    &self.pool
  }

  pub fn registry(&self) -> &HookRegistry {
    &self.registry
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Splits the session into the parts an install needs.
  pub(crate) fn parts(
    &mut self,
  ) -> (&mut H, &mut TrampolinePool, &mut HookRegistry, &Config) {
    (&mut self.host, &mut self.pool, &mut self.registry, &self.config)
  }
}

impl<H: Host> Drop for Session<H> {
  fn drop(&mut self) {
    if self.registry.is_empty() {
      return;
    }

    // Hooks left in place still jump into their trampolines
    if let Err(error) = self.restore_all() {
      warn!("hooks left in place: {}", error);
      self.host.leak_pages();
    }
  }
}
