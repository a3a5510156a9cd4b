//! CairnOS kernel core.
//!
//! The thread subsystem (strict-priority scheduler with donation, MLFQ
//! governor, sleeping clock), blocking synchronization primitives, the
//! process lifecycle with its FD table, and the demand-paged virtual
//! memory layer. Architecture concerns (context switch, trap entry,
//! drivers, the disk filesystem) are consumed through seams.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// Host builds run the test suite with the system allocator; bare metal
// brings its own heap.
#[cfg(test)]
extern crate std;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub mod config;
pub mod error;
pub mod fixed_point;
pub mod fs;
pub mod interrupt;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{KernelError, KernelResult};
pub use sched::{PRI_DEFAULT, PRI_MAX, PRI_MIN};

/// Initialize the kernel with the boot command line. Interrupts must be
/// disabled; the calling thread becomes the running "main" thread.
pub fn init(cmdline: &str) {
    config::parse_command_line(cmdline);
    mm::init(mm::DEFAULT_FRAME_CAPACITY, mm::DEFAULT_SWAP_SLOTS);
    sched::init();
    log::info!(target: "boot", "kernel initialized");
}

/// Start preemptive scheduling (creates the idle thread, enables
/// interrupts).
pub fn start() {
    sched::start();
}

/// Heap allocation failure is unrecoverable in the kernel.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
