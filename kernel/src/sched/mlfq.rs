//! Multi-level feedback queue governor.
//!
//! Priorities are recomputed from observed CPU usage instead of being set
//! by threads:
//!
//! ```text
//! priority   = PRI_MAX - recent_cpu/4 - nice*2        (every slice)
//! load_avg   = (59/60)*load_avg + (1/60)*ready_cnt    (every second)
//! recent_cpu = (2*load_avg)/(2*load_avg + 1)*recent_cpu + nice
//! ```
//!
//! All state is 17.14 fixed point. The running thread's `recent_cpu`
//! gains 1.0 per tick unless the CPU is idle.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI64, Ordering};

use super::thread::{self, Thread};
use super::{scheduler, PRI_MAX, PRI_MIN, TIME_SLICE};
use crate::fixed_point::Fixed;
use crate::timer::TIMER_FREQ;

/// System load average, 17.14 raw bits.
static LOAD_AVG: AtomicI64 = AtomicI64::new(0);

/// Current load average.
pub fn load_avg() -> Fixed {
    Fixed::from_raw(LOAD_AVG.load(Ordering::Acquire))
}

/// Per-tick governor work, called from the timer hook.
pub(crate) fn on_tick(now: u64) {
    let curr = thread::current();
    let idle = scheduler::idle_tid();

    if Some(curr.tid) != idle {
        curr.set_recent_cpu(curr.recent_cpu().add_int(1));
    }

    if now % TIMER_FREQ == 0 {
        on_second();
    }
    if now % TIME_SLICE == 0 {
        recompute_all_priorities();
    }
}

/// Once-per-second recomputation of `load_avg` and every thread's
/// `recent_cpu`. Runs with interrupts disabled (timer context).
pub fn on_second() {
    let idle = scheduler::idle_tid();
    let curr = scheduler::current_tid();

    let mut ready = scheduler::ready_len() as i64;
    if Some(curr) != idle {
        ready += 1;
    }

    let load = load_avg().mul_int(59).div_int(60) + Fixed::from_int(ready).div_int(60);
    LOAD_AVG.store(load.raw(), Ordering::Release);

    let twice = load.mul_int(2);
    let coef = twice.div(twice.add_int(1));
    for tid in thread::all_tids() {
        if Some(tid) == idle {
            continue;
        }
        if let Some(t) = thread::get(tid) {
            let decayed = coef.mul(t.recent_cpu()).add_int(t.nice() as i64);
            t.set_recent_cpu(decayed);
        }
    }
}

/// Recompute every thread's priority (every slice boundary).
pub(crate) fn recompute_all_priorities() {
    let idle = scheduler::idle_tid();
    for tid in thread::all_tids() {
        if Some(tid) == idle {
            continue;
        }
        if let Some(t) = thread::get(tid) {
            recompute_priority(&t);
        }
    }
}

/// `PRI_MAX - recent_cpu/4 - nice*2`, clamped to the priority range.
pub(crate) fn recompute_priority(t: &Arc<Thread>) {
    let p = PRI_MAX as i64 - t.recent_cpu().div_int(4).to_int() - 2 * t.nice() as i64;
    let p = p.clamp(PRI_MIN as i64, PRI_MAX as i64) as u8;
    t.set_effective_priority(p);
    t.set_base_priority(p);
}

#[cfg(test)]
pub(crate) fn reset() {
    LOAD_AVG.store(0, Ordering::Release);
}
