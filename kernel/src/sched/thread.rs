//! Thread descriptors and lifecycle operations.
//!
//! Every thread lives in the all-threads table as an `Arc<Thread>`; the
//! ready queue, sleep queue and semaphore waiter lists refer to threads by
//! [`Tid`]. A descriptor is created Blocked, made Ready by [`unblock`],
//! oscillates Ready/Running under the scheduler, and ends Dying; the
//! descriptor itself is unlinked from the table at the top of the next
//! scheduling operation, never by the dying thread.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicI32, AtomicI64, AtomicI8, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use spin::Mutex;

use super::{context, scheduler, NICE_DEFAULT, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, THREAD_NAME_MAX};
use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::fixed_point::Fixed;
use crate::interrupt;
use crate::mm::page_directory::PageDirectory;
use crate::mm::spt::SupplementalPageTable;
use crate::process::fd_table::FdTable;
use crate::sync::{Lock, Semaphore};

/// Value stamped into every descriptor; a mismatch means the kernel stack
/// overflowed into the descriptor.
const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Upper bound on simultaneously live threads.
const MAX_THREADS: usize = 256;

/// Thread identifier. Unique, positive, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u64);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running = 0,
    Ready = 1,
    Blocked = 2,
    Dying = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> ThreadState {
        match v {
            0 => ThreadState::Running,
            1 => ThreadState::Ready,
            2 => ThreadState::Blocked,
            _ => ThreadState::Dying,
        }
    }
}

/// Entry function run when a created thread is first scheduled in.
pub type ThreadFunc = Box<dyn FnOnce() + Send + 'static>;

/// Thread descriptor.
pub struct Thread {
    pub tid: Tid,
    name: String,
    magic: u32,

    state: AtomicU8,
    /// Effective priority (after donation).
    priority: AtomicU8,
    /// Priority before donation.
    base_priority: AtomicU8,
    nice: AtomicI8,
    /// MLFQ CPU-usage accumulator, 17.14 raw bits.
    recent_cpu: AtomicI64,
    /// Tick at which to wake; `u64::MAX` while not sleeping.
    wake_tick: AtomicU64,
    exit_status: AtomicI32,
    /// User stack pointer stashed at syscall entry, for kernel-mode faults.
    user_rsp: AtomicUsize,

    pub parent: Option<Tid>,
    pub children: Mutex<Vec<Tid>>,

    /// Locks this thread currently holds.
    pub(crate) held_locks: Mutex<Vec<Arc<Lock>>>,
    /// The lock this thread is blocked on, if any. Its holder is the
    /// donation target.
    pub(crate) waiting_on: Mutex<Option<Arc<Lock>>>,

    /// Upped on exit so the parent's `wait` completes.
    pub wait_sema: Semaphore,
    /// Downed after exit until the parent permits final cleanup.
    pub reap_sema: Semaphore,

    entry: Mutex<Option<ThreadFunc>>,

    /// Hardware page table for this thread's user address space.
    pub pagedir: Mutex<PageDirectory>,
    /// Supplemental page table: the authoritative VA → backing map.
    pub spt: Mutex<SupplementalPageTable>,
    /// Open file descriptors.
    pub fd_table: Mutex<FdTable>,
}

impl Thread {
    fn new(tid: Tid, name: &str, priority: u8, parent: Option<Tid>, entry: Option<ThreadFunc>) -> Thread {
        Thread {
            tid,
            name: truncate_name(name),
            magic: THREAD_MAGIC,
            state: AtomicU8::new(ThreadState::Blocked as u8),
            priority: AtomicU8::new(priority),
            base_priority: AtomicU8::new(priority),
            nice: AtomicI8::new(NICE_DEFAULT),
            recent_cpu: AtomicI64::new(0),
            wake_tick: AtomicU64::new(u64::MAX),
            exit_status: AtomicI32::new(0),
            user_rsp: AtomicUsize::new(0),
            parent,
            children: Mutex::new(Vec::new()),
            held_locks: Mutex::new(Vec::new()),
            waiting_on: Mutex::new(None),
            wait_sema: Semaphore::new(0),
            reap_sema: Semaphore::new(0),
            entry: Mutex::new(entry),
            pagedir: Mutex::new(PageDirectory::new()),
            spt: Mutex::new(SupplementalPageTable::new()),
            fd_table: Mutex::new(FdTable::new_standard()),
        }
    }

    /// Whether the descriptor looks intact (stack overflow check).
    pub fn is_valid(&self) -> bool {
        self.magic == THREAD_MAGIC
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, s: ThreadState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Effective priority.
    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_effective_priority(&self, p: u8) {
        self.priority.store(p, Ordering::Release);
    }

    pub fn base_priority(&self) -> u8 {
        self.base_priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_base_priority(&self, p: u8) {
        self.base_priority.store(p, Ordering::Release);
    }

    pub fn nice(&self) -> i8 {
        self.nice.load(Ordering::Acquire)
    }

    pub(crate) fn set_nice_raw(&self, n: i8) {
        self.nice.store(n, Ordering::Release);
    }

    pub fn recent_cpu(&self) -> Fixed {
        Fixed::from_raw(self.recent_cpu.load(Ordering::Acquire))
    }

    pub(crate) fn set_recent_cpu(&self, v: Fixed) {
        self.recent_cpu.store(v.raw(), Ordering::Release);
    }

    pub fn wake_tick(&self) -> u64 {
        self.wake_tick.load(Ordering::Acquire)
    }

    pub(crate) fn set_wake_tick(&self, tick: u64) {
        self.wake_tick.store(tick, Ordering::Release);
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
    }

    pub fn user_rsp(&self) -> usize {
        self.user_rsp.load(Ordering::Acquire)
    }

    /// Stash the user stack pointer on syscall entry so kernel-mode page
    /// faults can still judge stack growth.
    pub fn set_user_rsp(&self, rsp: usize) {
        self.user_rsp.store(rsp, Ordering::Release);
    }

    pub(crate) fn take_entry(&self) -> Option<ThreadFunc> {
        self.entry.lock().take()
    }
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(THREAD_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

// ---------------------------------------------------------------------------
// All-threads table and tid allocation
// ---------------------------------------------------------------------------

static THREADS: Mutex<alloc::collections::BTreeMap<u64, Arc<Thread>>> =
    Mutex::new(alloc::collections::BTreeMap::new());

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

fn alloc_tid() -> Tid {
    Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Look up a live thread by tid.
pub fn get(tid: Tid) -> Option<Arc<Thread>> {
    THREADS.lock().get(&tid.0).cloned()
}

/// Effective priority of a thread, or `PRI_MIN` if it is gone.
pub fn priority_of(tid: Tid) -> u8 {
    get(tid).map(|t| t.priority()).unwrap_or(super::PRI_MIN)
}

/// Tids of every live thread.
pub fn all_tids() -> Vec<Tid> {
    THREADS.lock().keys().map(|&t| Tid(t)).collect()
}

/// Number of live threads.
pub fn count() -> usize {
    THREADS.lock().len()
}

fn table_insert(thread: &Arc<Thread>) -> KernelResult<()> {
    let mut table = THREADS.lock();
    if table.len() >= MAX_THREADS {
        return Err(KernelError::OutOfResource { resource: "threads" });
    }
    let prev = table.insert(thread.tid.0, thread.clone());
    debug_assert!(prev.is_none(), "tid reused");
    Ok(())
}

pub(crate) fn table_remove(tid: Tid) -> Option<Arc<Thread>> {
    THREADS.lock().remove(&tid.0)
}

/// The currently running thread.
pub fn current() -> Arc<Thread> {
    let tid = scheduler::current_tid();
    let t = get(tid).expect("current thread missing from table");
    assert!(t.is_valid(), "thread descriptor corrupted (stack overflow?)");
    t
}

// ---------------------------------------------------------------------------
// Lifecycle operations
// ---------------------------------------------------------------------------

/// Create a new thread.
///
/// The thread is born Blocked, inserted into the all-threads table, given
/// a standard FD table, and then unblocked. If it outranks the creator,
/// the creator yields immediately. Under MLFQ the new thread inherits the
/// creator's nice, recent_cpu and priority instead of the argument.
pub fn create(name: &str, priority: u8, func: ThreadFunc) -> KernelResult<Tid> {
    assert!(priority <= PRI_MAX, "priority out of range");
    let creator = current();
    let tid = alloc_tid();

    let thread = Thread::new(tid, name, priority, Some(creator.tid), Some(func));
    if config::mlfqs_enabled() {
        thread.set_nice_raw(creator.nice());
        thread.set_recent_cpu(creator.recent_cpu());
        thread.set_effective_priority(creator.priority());
        thread.set_base_priority(creator.priority());
    }
    let thread = Arc::new(thread);

    table_insert(&thread)?;
    creator.children.lock().push(tid);
    context::spawn(&thread);
    log::debug!(target: "sched", "created thread {} '{}' priority {}", tid, thread.name(), thread.priority());

    unblock(tid);
    if thread.priority() > creator.priority() && !interrupt::in_external_handler() {
        yield_now();
    }
    Ok(tid)
}

/// Tear down a half-constructed thread when a later step of an operation
/// such as fork fails. The embryo must never have run.
pub(crate) fn destroy_embryo(tid: Tid) {
    let _g = interrupt::disable_guard();
    scheduler::ready_remove(tid);
    if let Some(t) = table_remove(tid) {
        t.set_state(ThreadState::Dying);
        if let Some(parent) = t.parent.and_then(get) {
            parent.children.lock().retain(|&c| c != tid);
        }
    }
}

/// Block the current thread. Interrupts must already be disabled; the
/// caller is responsible for arranging the wakeup.
pub fn block() {
    assert!(!interrupt::are_enabled(), "block() with interrupts enabled");
    assert!(!interrupt::in_external_handler(), "block() in interrupt context");
    current().set_state(ThreadState::Blocked);
    scheduler::schedule();
}

/// Move a blocked thread to the ready queue.
///
/// Does not preempt: the caller may be in the middle of an atomic update
/// and can decide to preempt afterwards.
pub fn unblock(tid: Tid) {
    let t = get(tid).expect("unblock of unknown thread");
    assert!(t.is_valid());
    let _g = interrupt::disable_guard();
    assert_eq!(t.state(), ThreadState::Blocked, "unblock of non-blocked thread");
    scheduler::ready_push(tid);
    t.set_state(ThreadState::Ready);
}

/// Yield the CPU. The current thread goes back to the ready queue and the
/// scheduler picks the best runnable thread (possibly the same one).
pub fn yield_now() {
    assert!(!interrupt::in_external_handler(), "yield in interrupt context");
    let _g = interrupt::disable_guard();
    scheduler::yield_current();
}

/// Terminate the current thread.
///
/// Children are released for self-reaping (their reap semaphores are
/// upped), the thread is marked Dying and scheduled away. The descriptor
/// is unlinked at the top of the next scheduling operation, never here: a
/// dying thread must not free its own stack. Process-level teardown (exit
/// status, FD table, address space, parent handshake) is layered above in
/// `process::exit`.
pub fn exit() {
    let curr = current();
    assert!(curr.is_valid());

    let children: Vec<Tid> = curr.children.lock().clone();
    for child in children {
        if let Some(c) = get(child) {
            c.reap_sema.up();
        }
    }

    log::debug!(target: "sched", "thread {} '{}' exiting", curr.tid, curr.name());
    // The dying path keeps interrupts off permanently; the next thread's
    // own guards manage the level from here on.
    interrupt::disable();
    scheduler::exit_current();
}

// ---------------------------------------------------------------------------
// Priority and MLFQ accessors
// ---------------------------------------------------------------------------

fn clamp_priority(p: u8) -> u8 {
    p.min(PRI_MAX)
}

fn clamp_nice(n: i8) -> i8 {
    n.clamp(NICE_MIN, NICE_MAX)
}

/// Set the current thread's base priority and recompute the effective one
/// from the donation set. Yields if the effective priority dropped.
///
/// A no-op under MLFQ.
pub fn set_priority(priority: u8) {
    if config::mlfqs_enabled() {
        return;
    }
    let priority = clamp_priority(priority);
    let curr = current();
    let old = curr.priority();
    {
        let _g = interrupt::disable_guard();
        curr.set_base_priority(priority);
        crate::sync::lock::refresh_priority(&curr);
    }
    if curr.priority() < old {
        yield_now();
    }
}

/// Effective priority of the current thread.
pub fn get_priority() -> u8 {
    current().priority()
}

/// Set the current thread's niceness, recompute its MLFQ priority, and
/// yield if it no longer has the highest priority.
pub fn set_nice(nice: i8) {
    let nice = clamp_nice(nice);
    let curr = current();
    curr.set_nice_raw(nice);
    if config::mlfqs_enabled() {
        let _g = interrupt::disable_guard();
        super::mlfq::recompute_priority(&curr);
    }
    scheduler::preempt();
}

/// Niceness of the current thread.
pub fn get_nice() -> i8 {
    current().nice()
}

/// 100 × the current thread's recent_cpu, rounded.
pub fn get_recent_cpu() -> i64 {
    current().recent_cpu().mul_int(100).to_int()
}

/// 100 × the system load average, rounded.
pub fn get_load_avg() -> i64 {
    super::mlfq::load_avg().mul_int(100).to_int()
}

// ---------------------------------------------------------------------------
// Boot
// ---------------------------------------------------------------------------

/// Adopt the boot thread of the machine as the running "main" thread.
pub(crate) fn init_boot_thread() {
    let tid = alloc_tid();
    let t = Arc::new(Thread::new(tid, "main", PRI_DEFAULT, None, None));
    t.set_state(ThreadState::Running);
    table_insert(&t).expect("thread table full at boot");
    context::adopt(&t);
    scheduler::init_with(tid);
    log::info!(target: "sched", "boot thread adopted as tid {}", tid);
}

#[cfg(test)]
pub(crate) fn reset() {
    THREADS.lock().clear();
}
