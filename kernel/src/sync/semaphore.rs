//! Counting semaphores.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::interrupt;
use crate::sched::thread::{self, Tid};
use crate::sched::scheduler;

/// A counting semaphore with a priority-aware waiter list.
pub struct Semaphore {
    value: AtomicUsize,
    waiters: Mutex<Vec<Tid>>,
}

impl Semaphore {
    pub const fn new(value: usize) -> Semaphore {
        Semaphore {
            value: AtomicUsize::new(value),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Current counter value.
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    /// Down ("P"): wait until the counter is positive, then decrement.
    ///
    /// May block, so it must not be called from an interrupt handler. The
    /// loop re-checks after every wakeup; another thread may have taken
    /// the permit first.
    pub fn down(&self) {
        assert!(
            !interrupt::in_external_handler(),
            "semaphore down in interrupt context"
        );
        let _g = interrupt::disable_guard();
        while self.value.load(Ordering::Acquire) == 0 {
            self.waiters.lock().push(scheduler::current_tid());
            thread::block();
        }
        self.value.fetch_sub(1, Ordering::AcqRel);
    }

    /// Down without blocking. Returns whether the permit was taken.
    pub fn try_down(&self) -> bool {
        let _g = interrupt::disable_guard();
        if self.value.load(Ordering::Acquire) > 0 {
            self.value.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// Up ("V"): increment the counter and wake the highest-priority
    /// waiter (FIFO among equals), preempting if it outranks the caller.
    ///
    /// Safe to call from interrupt context; preemption is then deferred
    /// to the handler epilogue.
    pub fn up(&self) {
        let woken = {
            let _g = interrupt::disable_guard();
            let woken = {
                let mut waiters = self.waiters.lock();
                pick_max_priority(&mut waiters)
            };
            self.value.fetch_add(1, Ordering::AcqRel);
            if let Some(tid) = woken {
                thread::unblock(tid);
            }
            woken
        };
        if woken.is_some() {
            scheduler::preempt();
        }
    }

    /// Highest priority among the blocked waiters, if any.
    pub(crate) fn max_waiter_priority(&self) -> Option<u8> {
        self.waiters
            .lock()
            .iter()
            .map(|&t| thread::priority_of(t))
            .max()
    }
}

/// Remove and return the first waiter of maximal priority.
fn pick_max_priority(waiters: &mut Vec<Tid>) -> Option<Tid> {
    if waiters.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..waiters.len() {
        if thread::priority_of(waiters[i]) > thread::priority_of(waiters[best]) {
            best = i;
        }
    }
    Some(waiters.remove(best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::PRI_DEFAULT;
    use crate::test_support;
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    #[test]
    fn down_up_pair_preserves_the_counter() {
        let _k = test_support::boot_default();
        let sema = Semaphore::new(1);
        sema.down();
        assert_eq!(sema.value(), 0);
        sema.up();
        assert_eq!(sema.value(), 1);
    }

    #[test]
    fn try_down_fails_on_zero() {
        let _k = test_support::boot_default();
        let sema = Semaphore::new(1);
        assert!(sema.try_down());
        assert!(!sema.try_down());
        sema.up();
        assert!(sema.try_down());
    }

    #[test]
    fn down_blocks_until_another_thread_ups() {
        let _k = test_support::boot_default();
        let sema = Arc::new(Semaphore::new(0));
        let s = sema.clone();
        thread::create("upper", PRI_DEFAULT, Box::new(move || s.up())).unwrap();

        // Blocks; the equal-priority "upper" runs and releases us.
        sema.down();
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn up_wakes_the_highest_priority_waiter_first() {
        let _k = test_support::boot_default();
        let sema = Arc::new(Semaphore::new(0));
        let order = Arc::new(spin::Mutex::new(Vec::new()));

        for (name, pri, tag) in [("lo", 20, 1u32), ("hi", 40, 2), ("mid", 30, 3)] {
            let s = sema.clone();
            let o = order.clone();
            thread::create(
                name,
                pri,
                Box::new(move || {
                    s.down();
                    o.lock().push(tag);
                }),
            )
            .unwrap();
        }
        // All three outrank nobody yet; let them block on the semaphore.
        crate::sched::thread::set_priority(10);

        sema.up();
        sema.up();
        sema.up();
        assert_eq!(*order.lock(), [2, 3, 1]);
        crate::sched::thread::set_priority(PRI_DEFAULT);
    }
}
