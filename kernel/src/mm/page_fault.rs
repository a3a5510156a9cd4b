//! Page fault handling.
//!
//! The architecture trap handler collects a [`PageFaultInfo`] and
//! delegates here. Resolvable faults are demand loads (the page is
//! registered but not resident) and stack growth (an access just below
//! the user stack pointer inside the stack region). Everything else is
//! reported to the caller, which terminates the offending process.

use alloc::sync::Arc;

use super::{is_user_vaddr, page_round_down, vm, Vpage, STACK_LIMIT, USER_STACK};
use crate::error::{KernelError, KernelResult};
use crate::sched::thread::Thread;

/// Description of a fault, as delivered by the trap layer.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// Faulting virtual address.
    pub addr: usize,
    /// Whether the access was a write.
    pub write: bool,
    /// Whether the fault came from user mode.
    pub user: bool,
    /// Whether the page was absent (as opposed to a rights violation).
    pub not_present: bool,
    /// Stack pointer recorded in the trap frame.
    pub rsp: usize,
}

/// Try to resolve a fault. An error means the access was illegal and the
/// process should die with status -1.
pub fn handle_fault(thread: &Arc<Thread>, info: &PageFaultInfo) -> KernelResult<()> {
    if info.addr == 0 {
        return Err(KernelError::Protection { addr: 0 });
    }
    if info.user && !is_user_vaddr(info.addr) {
        return Err(KernelError::Protection { addr: info.addr });
    }
    if !info.not_present {
        // Present page, so this is a write to a read-only mapping.
        return Err(KernelError::Protection { addr: info.addr });
    }

    // A fault taken in the kernel (during a syscall) uses the stack
    // pointer stashed at syscall entry, not the trap frame's.
    let rsp = if info.user { info.rsp } else { thread.user_rsp() };

    let vpage = Vpage::containing(info.addr);
    let registered = thread.spt.lock().find(vpage).map(|p| p.writable());

    match registered {
        Some(writable) => {
            if info.write && !writable {
                return Err(KernelError::Protection { addr: info.addr });
            }
            vm::claim(thread, info.addr)
        }
        None if is_stack_growth(info.addr, rsp) => {
            log::debug!(
                target: "vm",
                "growing stack of thread {} to {:#x}",
                thread.tid,
                page_round_down(info.addr)
            );
            vm::alloc_anon_page(thread, page_round_down(info.addr), true)?;
            vm::claim(thread, info.addr)
        }
        None => Err(KernelError::UnresolvedFault { addr: info.addr }),
    }
}

/// An access is stack growth when it lands at most one machine word
/// below the stack pointer (the `push` instruction faults at rsp - 8)
/// and inside the stack region.
fn is_stack_growth(addr: usize, rsp: usize) -> bool {
    if rsp == 0 {
        return false;
    }
    addr >= rsp.saturating_sub(8) && addr < USER_STACK && addr >= USER_STACK - STACK_LIMIT
}
