//! Context hand-off seam.
//!
//! `schedule()` updates descriptor state and then calls [`hand_off`] to
//! transfer the CPU. The machine-level register save/restore belongs to
//! the platform layer; this module only defines the seam.
//!
//! Host test builds implement the seam with one parked OS thread per
//! kernel thread. Exactly one of them is unparked at any time, so the
//! cooperative single-CPU semantics (blocking primitives, wake ordering,
//! preemption points) are executed for real by the test suite.

use alloc::sync::Arc;

use super::thread::Thread;

#[cfg(test)]
mod host {
    use alloc::collections::BTreeMap;
    use alloc::format;
    use alloc::sync::Arc;

    use spin::Mutex;

    use crate::sched::thread::{self, Thread};

    /// One-shot turnstile: `open` lets the owning thread pass one `wait`.
    pub struct Gate {
        flag: std::sync::Mutex<bool>,
        cv: std::sync::Condvar,
    }

    impl Gate {
        fn new() -> Gate {
            Gate {
                flag: std::sync::Mutex::new(false),
                cv: std::sync::Condvar::new(),
            }
        }

        pub fn open(&self) {
            let mut opened = self.flag.lock().unwrap();
            *opened = true;
            self.cv.notify_all();
        }

        pub fn wait(&self) {
            let mut opened = self.flag.lock().unwrap();
            while !*opened {
                opened = self.cv.wait(opened).unwrap();
            }
            *opened = false;
        }
    }

    static GATES: Mutex<BTreeMap<u64, Arc<Gate>>> = Mutex::new(BTreeMap::new());

    pub fn register(tid: u64) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        GATES.lock().insert(tid, gate.clone());
        gate
    }

    pub fn gate_of(tid: u64) -> Arc<Gate> {
        GATES.lock().get(&tid).expect("no gate for thread").clone()
    }

    pub fn clear() {
        GATES.lock().clear();
    }

    pub fn spawn(thread: &Arc<Thread>) {
        let gate = register(thread.tid.0);
        let t = thread.clone();
        std::thread::Builder::new()
            .name(format!("{}#{}", t.name(), t.tid))
            .spawn(move || {
                gate.wait();
                // A freshly scheduled thread starts with interrupts on.
                crate::interrupt::enable();
                if let Some(entry) = t.take_entry() {
                    entry();
                }
                // The entry may already have exited (e.g. via the process
                // layer); exiting twice would act on whichever thread is
                // current by now.
                if t.state() != crate::sched::ThreadState::Dying {
                    thread::exit();
                }
            })
            .expect("failed to spawn host thread");
    }
}

/// Register the calling OS thread as the execution context of `thread`
/// (boot thread adoption).
pub(crate) fn adopt(thread: &Arc<Thread>) {
    #[cfg(test)]
    {
        host::register(thread.tid.0);
    }
    let _ = thread;
}

/// Provide an execution context for a freshly created thread. The entry
/// closure stays in the descriptor until the thread is first scheduled.
pub(crate) fn spawn(thread: &Arc<Thread>) {
    #[cfg(test)]
    {
        host::spawn(thread);
    }
    let _ = thread;
}

/// Transfer the CPU from `prev` to `next`.
///
/// On a real machine the platform layer saves `prev`'s register frame and
/// restores `next`'s here. When `prev_dying` is set, `prev` never resumes;
/// its descriptor is freed by a later `schedule()`.
pub(crate) fn hand_off(prev: &Arc<Thread>, next: &Arc<Thread>, prev_dying: bool) {
    #[cfg(test)]
    {
        host::gate_of(next.tid.0).open();
        if !prev_dying {
            host::gate_of(prev.tid.0).wait();
        }
        return;
    }
    #[cfg(not(test))]
    {
        // Seam for the architecture context switch; descriptor state has
        // already been updated by the scheduler.
        let _ = (prev, next, prev_dying);
    }
}

/// Pause briefly inside busy-wait loops (the idle thread).
pub(crate) fn cpu_relax() {
    #[cfg(test)]
    std::thread::yield_now();
    #[cfg(not(test))]
    core::hint::spin_loop();
}

#[cfg(test)]
pub(crate) fn reset() {
    host::clear();
}
