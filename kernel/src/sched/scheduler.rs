//! Core scheduler.
//!
//! Single CPU, strict priority with round-robin among equals. The ready
//! queue holds tids; priorities are read through the all-threads table at
//! selection time so donation and MLFQ recomputation take effect without
//! requeueing. `schedule()` is the only place the running thread changes.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use spin::Mutex;

use super::queue::ReadyQueue;
use super::thread::{self, Thread, ThreadState, Tid};
use super::{context, PRI_MIN, TIME_SLICE};
use crate::interrupt;

struct Scheduler {
    /// Currently running thread.
    current: Option<Tid>,
    /// Idle thread, run when the ready queue is empty.
    idle: Option<Tid>,
    ready: ReadyQueue,
    /// Descriptors of dying threads, freed at the top of the next
    /// schedule. A dying thread must not free its own stack.
    destruction_req: Vec<Tid>,
    /// Ticks since the last switch; at TIME_SLICE the thread is preempted
    /// on interrupt return.
    thread_ticks: u64,
    started: bool,
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler {
    current: None,
    idle: None,
    ready: ReadyQueue::new(),
    destruction_req: Vec::new(),
    thread_ticks: 0,
    started: false,
});

/// Tid of the running thread.
pub fn current_tid() -> Tid {
    SCHEDULER.lock().current.expect("scheduler not initialized")
}

/// Whether preemptive scheduling has been started.
pub fn is_started() -> bool {
    SCHEDULER.lock().started
}

/// Number of threads on the ready queue.
pub fn ready_len() -> usize {
    SCHEDULER.lock().ready.len()
}

pub(crate) fn ready_push(tid: Tid) {
    let mut s = SCHEDULER.lock();
    debug_assert!(Some(tid) != s.idle, "idle thread on ready queue");
    s.ready.push_back(tid);
}

pub(crate) fn ready_remove(tid: Tid) -> bool {
    SCHEDULER.lock().ready.remove(tid)
}

pub(crate) fn idle_tid() -> Option<Tid> {
    SCHEDULER.lock().idle
}

pub(crate) fn init_with(boot: Tid) {
    let mut s = SCHEDULER.lock();
    s.current = Some(boot);
    s.thread_ticks = 0;
}

/// Create the idle thread and enable interrupts.
pub(crate) fn start() {
    let idle = thread::create(
        "idle",
        PRI_MIN,
        alloc::boxed::Box::new(|| loop {
            {
                let _g = interrupt::disable_guard();
                thread::block();
            }
            context::cpu_relax();
        }),
    )
    .expect("failed to create idle thread");

    {
        let mut s = SCHEDULER.lock();
        // The idle thread is selected directly when the ready queue is
        // empty; it is never queued.
        s.ready.remove(idle);
        s.idle = Some(idle);
        s.started = true;
    }
    if let Some(t) = thread::get(idle) {
        t.set_state(ThreadState::Blocked);
        // Under MLFQ creation inherits the creator's attributes; the idle
        // thread must stay at the floor regardless.
        t.set_effective_priority(PRI_MIN);
        t.set_base_priority(PRI_MIN);
    }
    interrupt::enable();
    log::info!(target: "sched", "scheduler started, idle thread is tid {}", idle);
}

/// Account one timer tick against the running thread's slice. Returns
/// whether the slice has expired.
pub(crate) fn note_tick() -> bool {
    let mut s = SCHEDULER.lock();
    if !s.started {
        return false;
    }
    s.thread_ticks += 1;
    s.thread_ticks >= TIME_SLICE
}

/// Yield if a ready thread outranks the running one.
///
/// From an external interrupt handler this only latches a deferred yield;
/// the handler epilogue performs the preemption.
pub fn preempt() {
    if interrupt::in_external_handler() {
        interrupt::yield_on_return();
        return;
    }
    let higher = {
        let s = SCHEDULER.lock();
        if !s.started {
            return;
        }
        let cur = match s.current {
            Some(t) => thread::priority_of(t),
            None => return,
        };
        s.ready
            .max_priority_by(thread::priority_of)
            .map(|m| m > cur)
            .unwrap_or(false)
    };
    if higher {
        thread::yield_now();
    }
}

/// Requeue the current thread (the idle thread is never queued) and
/// reschedule. Interrupts must be off.
pub(crate) fn yield_current() {
    debug_assert!(!interrupt::are_enabled());
    {
        let mut s = SCHEDULER.lock();
        let cur = s.current.expect("yield before init");
        let t = thread::get(cur).expect("current thread vanished");
        if Some(cur) != s.idle {
            s.ready.push_back(cur);
            t.set_state(ThreadState::Ready);
        } else {
            t.set_state(ThreadState::Blocked);
        }
    }
    schedule();
}

/// Mark the current thread Dying and schedule away. Does not return on a
/// real machine; in the host harness the caller's stack unwinds after the
/// hand-off.
pub(crate) fn exit_current() {
    debug_assert!(!interrupt::are_enabled());
    thread::current().set_state(ThreadState::Dying);
    schedule();
}

/// Switch to the best runnable thread.
///
/// The caller has already moved the current thread out of the Running
/// state (Ready, Blocked or Dying) and disabled interrupts. Descriptors
/// queued for destruction by previously dying threads are freed here,
/// before anything else.
pub(crate) fn schedule() {
    debug_assert!(!interrupt::are_enabled(), "schedule() with interrupts enabled");

    let (prev, next, prev_dying): (Arc<Thread>, Arc<Thread>, bool) = {
        let mut s = SCHEDULER.lock();

        let doomed = mem::take(&mut s.destruction_req);
        for tid in doomed {
            if let Some(t) = thread::table_remove(tid) {
                log::trace!(target: "sched", "reclaimed thread {} '{}'", tid, t.name());
            }
        }

        let prev_tid = s.current.expect("schedule before init");
        let prev = thread::get(prev_tid).expect("current thread vanished");
        assert!(prev.is_valid(), "thread descriptor corrupted (stack overflow?)");
        debug_assert!(
            prev.state() != ThreadState::Running,
            "schedule() with the current thread still Running"
        );

        let next_tid = s
            .ready
            .pop_max_by(thread::priority_of)
            .or(s.idle)
            .unwrap_or(prev_tid);
        let next = thread::get(next_tid).expect("next thread vanished");
        assert!(next.is_valid());

        let prev_dying = prev_tid != next_tid && prev.state() == ThreadState::Dying;
        if prev_dying {
            s.destruction_req.push(prev_tid);
        }

        next.set_state(ThreadState::Running);
        s.current = Some(next_tid);
        s.thread_ticks = 0;
        (prev, next, prev_dying)
    };

    if prev.tid != next.tid {
        log::trace!(
            target: "sched",
            "switch {} '{}' -> {} '{}'",
            prev.tid,
            prev.name(),
            next.tid,
            next.name()
        );
        context::hand_off(&prev, &next, prev_dying);
    }
}

#[cfg(test)]
pub(crate) fn reset() {
    let mut s = SCHEDULER.lock();
    s.current = None;
    s.idle = None;
    s.ready = ReadyQueue::new();
    s.destruction_req = Vec::new();
    s.thread_ticks = 0;
    s.started = false;
}
