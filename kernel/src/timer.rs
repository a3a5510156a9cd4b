//! Tick clock and sleep queue.
//!
//! The external timer interrupt calls [`tick`] once per tick. The hook
//! advances the monotonic counter, wakes sleepers whose deadline elapsed
//! (in insertion order among equal deadlines), runs the MLFQ governor,
//! accounts the running thread's time slice, and finally performs any
//! preemption latched during the handler. It returns the next wake
//! deadline so the caller can program its timer, `u64::MAX` when nobody
//! sleeps.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::config;
use crate::interrupt;
use crate::sched::queue::SleepQueue;
use crate::sched::{mlfq, scheduler, thread};

/// Timer interrupts per second.
pub const TIMER_FREQ: u64 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Ticks spent in the idle thread.
static IDLE_TICKS: AtomicU64 = AtomicU64::new(0);
/// Ticks spent in kernel threads.
static KERNEL_TICKS: AtomicU64 = AtomicU64::new(0);

static SLEEPERS: Mutex<SleepQueue> = Mutex::new(SleepQueue::new());

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Acquire)
}

/// Timer interrupt hook. Returns the next wake deadline.
pub fn tick() -> u64 {
    interrupt::enter_external();
    let next_wake = {
        let _g = interrupt::disable_guard();
        let now = TICKS.fetch_add(1, Ordering::AcqRel) + 1;

        let current = scheduler::current_tid();
        let idle = scheduler::idle_tid();
        if Some(current) == idle {
            IDLE_TICKS.fetch_add(1, Ordering::Relaxed);
        } else {
            KERNEL_TICKS.fetch_add(1, Ordering::Relaxed);
        }

        // Wake sleepers first so a thread whose deadline elapsed this tick
        // can reach the CPU before the next user instruction.
        let next_wake = wake_sleepers(now);

        if config::mlfqs_enabled() {
            mlfq::on_tick(now);
        }

        if scheduler::note_tick() {
            interrupt::yield_on_return();
        }
        next_wake
    };
    interrupt::exit_external();

    // Interrupt epilogue: perform the preemption latched above.
    if interrupt::take_yield_request() && scheduler::is_started() {
        thread::yield_now();
    }
    next_wake
}

/// Wake every sleeper whose deadline has passed; returns the next
/// deadline.
fn wake_sleepers(now: u64) -> u64 {
    let woken = SLEEPERS.lock().pop_expired(now);
    let current_priority = thread::priority_of(scheduler::current_tid());
    for tid in woken {
        if let Some(t) = thread::get(tid) {
            t.set_wake_tick(u64::MAX);
            thread::unblock(tid);
            if t.priority() > current_priority {
                interrupt::yield_on_return();
            }
        }
    }
    SLEEPERS.lock().next_deadline()
}

/// Once-per-second governor hook, invoked by [`tick`] at `TIMER_FREQ`
/// boundaries with interrupts disabled.
pub fn second() {
    mlfq::on_second();
}

/// Sleep until the given tick.
pub fn sleep_until(wake_tick: u64) {
    assert!(interrupt::are_enabled(), "sleep with interrupts disabled");
    if wake_tick <= ticks() {
        return;
    }
    let curr = thread::current();
    let _g = interrupt::disable_guard();
    curr.set_wake_tick(wake_tick);
    SLEEPERS.lock().insert(wake_tick, curr.tid);
    thread::block();
}

/// Sleep for at least `duration` ticks.
pub fn sleep(duration: u64) {
    sleep_until(ticks() + duration);
}

/// Number of threads currently sleeping.
pub fn sleeper_count() -> usize {
    SLEEPERS.lock().len()
}

/// Log tick statistics (idle vs. kernel time).
pub fn print_stats() {
    log::info!(
        target: "timer",
        "{} ticks total, {} idle, {} kernel",
        ticks(),
        IDLE_TICKS.load(Ordering::Relaxed),
        KERNEL_TICKS.load(Ordering::Relaxed)
    );
}

#[cfg(test)]
pub(crate) fn reset() {
    TICKS.store(0, Ordering::Release);
    IDLE_TICKS.store(0, Ordering::Release);
    KERNEL_TICKS.store(0, Ordering::Release);
    *SLEEPERS.lock() = SleepQueue::new();
}
