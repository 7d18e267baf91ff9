//! Trampoline-based inline hooking for ARM, Thumb, ARM64, x86 and x64.
//!
//! ## Intro
//!
//! An inline hook overwrites the first instructions of a target with a jump
//! into a trampoline. The trampoline saves every general purpose register,
//! calls a callback with an opaque parameter and a pointer to the saved
//! registers, restores the registers, executes the overwritten instructions
//! and jumps back to the rest of the target.
//!
//! ```text
//! target:                        trampoline:
//!   jmp trampoline_code  ---->     .data callback, parameter   (ARM only)
//!   <rest of target>     <--+    trampoline_code:
//!                           |      save registers
//!                           |      callback(parameter, context)
//!                           |      restore registers
//!                           |      <overwritten instructions>
//!                           +----  jmp target + n
//! ```
//!
//! ## Sessions
//!
//! All state lives in a [`Session`], which owns:
//!
//! - a [`Host`], the address space hooks are installed into; either the
//!   running process ([`ProcessHost`]) or an in-memory one
//!   ([`ScratchHost`]).
//! - a [`TrampolinePool`] that bump-allocates trampolines from executable
//!   pages.
//! - a [`HookRegistry`] preventing two hooks on the same address.
//!
//! Dropping a session restores every hook it still has installed.
//!
//! ## Callbacks
//!
//! Callbacks share one signature on every architecture, see
//! [`HookCallback`]. The context pointer can be decoded with the register
//! record of the architecture, e.g. [`X64Registers::from_context`].
//!
//! ## Caveats
//!
//! The overwritten instructions are copied verbatim. Instructions addressing
//! memory relative to their own location will misbehave once moved; on x86
//! hosts these are reported by [`Hook::hazards`].
//!
//! ## Example
//!
//! ```no_run
//! use inline_hook::{HookCallback, ProcessHost, Session, X64Registers};
//! use std::ffi::c_void;
//!
//! unsafe extern "C" fn on_call(_parameter: *mut c_void, context: *const u8) {
//!   let registers = X64Registers::from_context(context);
//!   println!("rdi = {:#x}", registers.rdi);
//! }
//!
//! # fn main() -> inline_hook::Result<()> {
//! # let target = 0usize;
//! let mut session = Session::new(unsafe { ProcessHost::new()? });
//! let hook = session.install(target, on_call as HookCallback as usize, 0)?;
//! println!("{}", hook.debug_info());
//! session.uninstall(target)?;
//! # Ok(())
//! # }
//! ```
pub use crate::alloc::{Page, TrampolinePool};
pub use crate::arch::{
  relocation_hazards, Arch, Arm, Arm64, Arm64Registers, ArmRegisters, CodeGen, InstructionSet,
  Prologue, RelocationHazard, Thumb, X64Registers, X86Registers, X64, X86,
};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::hooker::{Hook, InlineHooker, Patch, PatchSite, Patcher};
pub use crate::host::{Host, ProcessHost, Proximity, ScratchHost};
pub use crate::registry::{HookRecord, HookRegistry};
pub use crate::session::Session;

mod alloc;
mod arch;
mod config;
mod error;
pub mod factory;
mod hooker;
mod host;
pub mod pic;
mod registry;
mod session;

/// The signature of a hook callback.
///
/// `parameter` is the value given at install. `context` points at the
/// registers the trampoline saved, lowest slot first.
pub type HookCallback = unsafe extern "C" fn(parameter: *mut std::ffi::c_void, context: *const u8);
