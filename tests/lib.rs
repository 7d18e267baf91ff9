use inline_hook::{Arch, CodeGen, Host, ScratchHost, Session, X86};

/// Hooks through a scratch address space, where every architecture can be
/// exercised regardless of the host.
#[test]
fn offline_hooks_round_trip_on_every_architecture() -> inline_hook::Result<()> {
  let targets = [
    (Arch::Arm, 0x8000),
    (Arch::Arm, 0x8001),
    (Arch::Arm64, 0x8000),
    (Arch::Ia32, 0x8000),
    (Arch::X64, 0x8000),
  ];

  for &(arch, target) in &targets {
    let code: Vec<u8> = (0..32).collect();
    let mut host = ScratchHost::new(arch, 0x4000_0000);
    host.map(target & !1, &code);

    let mut session = Session::new(host);
    let hook = session.install(target, 0xC0DE_0000, 0)?;
    assert_eq!(hook.trampoline_size() % 4, 0);
    assert_ne!(session.host().read_vec(target & !1, 32)?, code);

    session.uninstall(target)?;
    assert_eq!(session.host().read_vec(target & !1, 32)?, code);
  }

  Ok(())
}

#[test]
fn x86_jumps_are_always_five_bytes() {
  for &(from, to) in &[(0x1000, 0x2000), (0x7000_0000, 0x1000), (0x1000, 0xFFFF_F000)] {
    assert!(X86.can_jump_directly(from, to));
    assert_eq!(X86.jump_size(from, to), 5);
    assert_eq!(X86.generate_jump(from, to).len(), 5);
  }
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
mod live {
  use inline_hook::{CodeGen, HookCallback, Host, ProcessHost, Result, Session, X64Registers, X64};
  use std::arch::global_asm;
  use std::ffi::c_void;
  use std::sync::atomic::{AtomicUsize, Ordering};

  // A five byte instruction followed by padding, so that even an absolute
  // jump fits before the `ret`.
  global_asm!(
    ".text",
    ".p2align 4",
    ".global inline_hook_return_five",
    "inline_hook_return_five:",
    "mov eax, 5",
    ".rept 11",
    "nop",
    ".endr",
    "ret",
  );

  extern "C" {
    fn inline_hook_return_five(argument: usize) -> i32;
  }

  static CALLS: AtomicUsize = AtomicUsize::new(0);
  static PARAMETER: AtomicUsize = AtomicUsize::new(0);
  static CONTEXT: AtomicUsize = AtomicUsize::new(0);
  static RDI: AtomicUsize = AtomicUsize::new(0);
  static RFLAGS: AtomicUsize = AtomicUsize::new(0);

  unsafe extern "C" fn on_call(parameter: *mut c_void, context: *const u8) {
    let registers = X64Registers::from_context(context);
    PARAMETER.store(parameter as usize, Ordering::SeqCst);
    CONTEXT.store(context as usize, Ordering::SeqCst);
    RDI.store(registers.rdi as usize, Ordering::SeqCst);
    RFLAGS.store(registers.rflags as usize, Ordering::SeqCst);
    CALLS.fetch_add(1, Ordering::SeqCst);
  }

  // Patching `.text` is process wide, so this is the only live test.
  #[test]
  fn hooks_a_function_of_this_process() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let target = inline_hook_return_five as usize;
    let mut session = Session::new(unsafe { ProcessHost::new()? });
    let before = session.host().read_vec(target, 17)?;
    assert_eq!(unsafe { inline_hook_return_five(0) }, 5);

    let hook = session.install(target, on_call as HookCallback as usize, 0xFEED)?;
    assert_eq!(X64.jump_size(target, hook.trampoline_code()), 5);
    assert_eq!(hook.original_bytes(), &before[..5]);
    assert!(hook.hazards().is_empty());

    // The target now starts with `jmp rel32` into the trampoline
    let patched = session.host().read_vec(target, 5)?;
    let displacement = i32::from_le_bytes([patched[1], patched[2], patched[3], patched[4]]);
    assert_eq!(patched[0], 0xE9);
    assert_eq!((target as i64 + 5 + i64::from(displacement)) as usize, hook.trampoline_code());

    assert_eq!(unsafe { inline_hook_return_five(0x1234_5678) }, 5);
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(PARAMETER.load(Ordering::SeqCst), 0xFEED);
    assert_eq!(RDI.load(Ordering::SeqCst), 0x1234_5678);
    // Bit 1 of RFLAGS is always set
    assert_eq!(RFLAGS.load(Ordering::SeqCst) & 0x2, 0x2);

    // The saved registers live on this thread's stack
    let local = 0u8;
    let stack = &local as *const u8 as usize;
    let context = CONTEXT.load(Ordering::SeqCst);
    assert!(context < stack && stack - context < 0x1_0000);

    session.uninstall(target)?;
    assert_eq!(session.host().read_vec(target, 17)?, before);
    assert_eq!(unsafe { inline_hook_return_five(0) }, 5);
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    Ok(())
  }
}
