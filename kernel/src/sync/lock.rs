//! Locks with priority donation.
//!
//! A lock is a binary semaphore plus a holder. When a thread blocks on a
//! held lock it donates its effective priority to the holder, recursively
//! along the chain of locks the holder itself is waiting on, so a
//! high-priority thread is never stalled behind a preempted low-priority
//! lock holder. Donation is recomputed when a lock is released and is
//! disabled entirely under MLFQ.
//!
//! Locks have identity: they are shared as `Arc<Lock>` and a holder's
//! owned-locks list stores those Arcs.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use super::Semaphore;
use crate::config;
use crate::interrupt;
use crate::sched::thread::{self, Thread, Tid};

/// Donation chains longer than this indicate a design problem in the
/// caller; propagation stops there.
const MAX_DONATION_DEPTH: usize = 8;

/// A sleeping mutual-exclusion lock.
pub struct Lock {
    /// Tid of the holder; 0 when free.
    holder: AtomicU64,
    sema: Semaphore,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    pub const fn new() -> Lock {
        Lock {
            holder: AtomicU64::new(0),
            sema: Semaphore::new(1),
        }
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<Tid> {
        match self.holder.load(Ordering::Acquire) {
            0 => None,
            t => Some(Tid(t)),
        }
    }

    /// Whether the calling thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        self.holder() == Some(thread::current().tid)
    }

    /// Acquire the lock, blocking until it is free.
    ///
    /// If the lock is held, the caller records it as the lock it waits on
    /// and donates its priority down the holder chain before sleeping.
    pub fn acquire(self: &Arc<Self>) {
        assert!(
            !interrupt::in_external_handler(),
            "lock acquire in interrupt context"
        );
        let curr = thread::current();
        assert!(!self.held_by_current(), "lock already held by this thread");

        let _g = interrupt::disable_guard();
        if !config::mlfqs_enabled() && self.holder().is_some() {
            *curr.waiting_on.lock() = Some(self.clone());
            donate_along_chain(&curr, self);
        }
        self.sema.down();

        self.holder.store(curr.tid.0, Ordering::Release);
        *curr.waiting_on.lock() = None;
        curr.held_locks.lock().push(self.clone());
    }

    /// Acquire without blocking. Returns whether the lock was taken.
    pub fn try_acquire(self: &Arc<Self>) -> bool {
        let curr = thread::current();
        let _g = interrupt::disable_guard();
        if !self.sema.try_down() {
            return false;
        }
        self.holder.store(curr.tid.0, Ordering::Release);
        curr.held_locks.lock().push(self.clone());
        true
    }

    /// Release the lock, recompute the holder's priority from its
    /// remaining locks, and wake the highest-priority waiter.
    pub fn release(self: &Arc<Self>) {
        let curr = thread::current();
        assert!(self.held_by_current(), "releasing a lock we do not hold");

        let _g = interrupt::disable_guard();
        curr.held_locks.lock().retain(|l| !Arc::ptr_eq(l, self));
        self.holder.store(0, Ordering::Release);
        if !config::mlfqs_enabled() {
            refresh_priority(&curr);
        }
        self.sema.up();
    }

    /// Highest priority among the threads blocked on this lock.
    pub(crate) fn max_waiter_priority(&self) -> Option<u8> {
        self.sema.max_waiter_priority()
    }
}

/// Propagate `donor`'s priority along the chain of lock holders starting
/// at `lock`. Stops as soon as a holder already outranks the donor, at a
/// thread that is not itself waiting, or at the depth bound.
fn donate_along_chain(donor: &Arc<Thread>, lock: &Arc<Lock>) {
    let priority = donor.priority();
    let mut lock = lock.clone();
    for _ in 0..MAX_DONATION_DEPTH {
        let holder = match lock.holder().and_then(thread::get) {
            Some(h) => h,
            None => return,
        };
        assert!(holder.tid != donor.tid, "circular lock wait");
        if priority <= holder.priority() {
            return;
        }
        holder.set_effective_priority(priority);
        let next = holder.waiting_on.lock().clone();
        match next {
            Some(l) => lock = l,
            None => return,
        }
    }
}

/// Recompute a thread's effective priority as the maximum of its base
/// priority and the best waiter on any lock it still holds.
pub(crate) fn refresh_priority(t: &Arc<Thread>) {
    let mut priority = t.base_priority();
    for lock in t.held_locks.lock().iter() {
        if let Some(w) = lock.max_waiter_priority() {
            priority = priority.max(w);
        }
    }
    t.set_effective_priority(priority);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{thread::set_priority, PRI_DEFAULT};
    use crate::test_support;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    #[test]
    fn uncontended_acquire_release() {
        let _k = test_support::boot_default();
        let lock = Arc::new(Lock::new());
        assert!(lock.holder().is_none());
        lock.acquire();
        assert!(lock.held_by_current());
        assert!(thread::current()
            .held_locks
            .lock()
            .iter()
            .any(|l| Arc::ptr_eq(l, &lock)));
        lock.release();
        assert!(lock.holder().is_none());
        assert!(thread::current().held_locks.lock().is_empty());
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let _k = test_support::boot_default();
        let lock = Arc::new(Lock::new());
        assert!(lock.try_acquire());
        let l = lock.clone();
        let failed = alloc::sync::Arc::new(core::sync::atomic::AtomicBool::new(false));
        let f = failed.clone();
        thread::create(
            "contender",
            PRI_DEFAULT,
            Box::new(move || {
                f.store(!l.try_acquire(), core::sync::atomic::Ordering::SeqCst);
            }),
        )
        .unwrap();
        thread::yield_now();
        assert!(failed.load(core::sync::atomic::Ordering::SeqCst));
        lock.release();
    }

    #[test]
    fn waiter_donates_priority_to_holder() {
        let _k = test_support::boot_default();
        set_priority(31);
        let lock = Arc::new(Lock::new());
        lock.acquire();

        let l = lock.clone();
        thread::create(
            "donor",
            45,
            Box::new(move || {
                l.acquire();
                l.release();
            }),
        )
        .unwrap();

        // The donor preempted us, blocked on the lock, and donated.
        assert_eq!(thread::get_priority(), 45);
        lock.release();
        // Donation is gone once the lock is handed over.
        assert_eq!(thread::get_priority(), 31);
        set_priority(PRI_DEFAULT);
    }

    #[test]
    fn donation_takes_the_maximum_waiter() {
        let _k = test_support::boot_default();
        set_priority(31);
        let lock = Arc::new(Lock::new());
        lock.acquire();

        for (name, pri) in [("d40", 40u8), ("d50", 50), ("d35", 35)] {
            let l = lock.clone();
            thread::create(
                name,
                pri,
                Box::new(move || {
                    l.acquire();
                    l.release();
                }),
            )
            .unwrap();
        }
        assert_eq!(thread::get_priority(), 50);
        lock.release();
        assert_eq!(thread::get_priority(), 31);
        set_priority(PRI_DEFAULT);
    }

    #[test]
    fn donation_is_disabled_under_mlfq() {
        let _k = test_support::boot_mlfqs();
        let lock = Arc::new(Lock::new());
        lock.acquire();
        let before = thread::get_priority();

        let l = lock.clone();
        thread::create(
            "would-be-donor",
            PRI_DEFAULT,
            Box::new(move || {
                l.acquire();
                l.release();
            }),
        )
        .unwrap();
        thread::yield_now();
        assert_eq!(thread::get_priority(), before);
        lock.release();
        thread::yield_now();
    }

    #[test]
    fn release_wakes_waiters_in_priority_order() {
        let _k = test_support::boot_default();
        set_priority(31);
        let lock = Arc::new(Lock::new());
        let order = Arc::new(spin::Mutex::new(Vec::new()));
        lock.acquire();

        for (name, pri, tag) in [("w1", 35u8, 35u32), ("w2", 45, 45), ("w3", 40, 40)] {
            let l = lock.clone();
            let o = order.clone();
            thread::create(
                name,
                pri,
                Box::new(move || {
                    l.acquire();
                    o.lock().push(tag);
                    l.release();
                }),
            )
            .unwrap();
        }

        lock.release();
        thread::yield_now();
        assert_eq!(*order.lock(), [45, 40, 35]);
        set_priority(PRI_DEFAULT);
    }
}
