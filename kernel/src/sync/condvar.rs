//! Condition variables.
//!
//! Each waiter blocks on a private, per-call semaphore queued on the
//! condition. Signalling wakes the waiter whose blocked thread has the
//! highest priority; the comparator looks at the single thread inside
//! each per-call semaphore.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::{Lock, Semaphore};
use crate::interrupt;
use crate::sched::PRI_MIN;

struct Waiter {
    sema: Semaphore,
}

/// A condition variable, used together with a [`Lock`].
pub struct Condition {
    waiters: Mutex<Vec<Arc<Waiter>>>,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    pub const fn new() -> Condition {
        Condition {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Atomically release `lock` and sleep until signalled; reacquires
    /// `lock` before returning.
    pub fn wait(&self, lock: &Arc<Lock>) {
        assert!(
            !interrupt::in_external_handler(),
            "condition wait in interrupt context"
        );
        assert!(lock.held_by_current(), "condition wait without the lock");

        let waiter = Arc::new(Waiter {
            sema: Semaphore::new(0),
        });
        self.waiters.lock().push(waiter.clone());

        lock.release();
        waiter.sema.down();
        lock.acquire();
    }

    /// Wake the highest-priority waiter, if any. The caller must hold
    /// `lock`.
    pub fn signal(&self, lock: &Arc<Lock>) {
        assert!(lock.held_by_current(), "condition signal without the lock");
        let woken = {
            let _g = interrupt::disable_guard();
            let mut waiters = self.waiters.lock();
            pick_max_priority(&mut waiters)
        };
        if let Some(w) = woken {
            w.sema.up();
        }
    }

    /// Wake every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Arc<Lock>) {
        assert!(lock.held_by_current(), "condition broadcast without the lock");
        let drained: Vec<Arc<Waiter>> = {
            let _g = interrupt::disable_guard();
            core::mem::take(&mut *self.waiters.lock())
        };
        for w in drained {
            w.sema.up();
        }
    }

    /// Number of threads currently waiting.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// Remove and return the first waiter whose blocked thread has maximal
/// priority. A waiter whose thread has not yet blocked counts as minimal.
fn pick_max_priority(waiters: &mut Vec<Arc<Waiter>>) -> Option<Arc<Waiter>> {
    if waiters.is_empty() {
        return None;
    }
    let key = |w: &Arc<Waiter>| w.sema.max_waiter_priority().unwrap_or(PRI_MIN);
    let mut best = 0;
    for i in 1..waiters.len() {
        if key(&waiters[i]) > key(&waiters[best]) {
            best = i;
        }
    }
    Some(waiters.remove(best))
}
