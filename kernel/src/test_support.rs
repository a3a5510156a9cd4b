//! Test scaffolding.
//!
//! Kernel state is global, so tests that boot the kernel serialize on a
//! single lock and rebuild every subsystem from scratch. Hold the
//! returned handle for the duration of the test.

use spin::{Mutex, MutexGuard};

static BOOT_LOCK: Mutex<()> = Mutex::new(());

pub(crate) struct BootConfig {
    pub mlfqs: bool,
    pub frames: usize,
    pub swap_slots: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            mlfqs: false,
            frames: 64,
            swap_slots: 64,
        }
    }
}

pub(crate) struct KernelHandle {
    _guard: MutexGuard<'static, ()>,
}

/// Boot a fresh kernel for this test, adopting the calling thread as
/// "main".
pub(crate) fn boot_with(cfg: BootConfig) -> KernelHandle {
    let guard = BOOT_LOCK.lock();

    crate::interrupt::reset();
    crate::sched::scheduler::reset();
    crate::sched::thread::reset();
    crate::sched::mlfq::reset();
    crate::sched::context::reset();
    crate::timer::reset();
    crate::fs::reset();
    crate::process::reset();
    crate::syscall::reset();
    crate::config::set_mlfqs(cfg.mlfqs);
    crate::mm::frame::init(cfg.frames);
    crate::mm::swap::init(cfg.swap_slots);

    crate::sched::init();
    crate::sched::start();

    KernelHandle { _guard: guard }
}

pub(crate) fn boot_default() -> KernelHandle {
    boot_with(BootConfig::default())
}

pub(crate) fn boot_mlfqs() -> KernelHandle {
    boot_with(BootConfig {
        mlfqs: true,
        ..BootConfig::default()
    })
}
