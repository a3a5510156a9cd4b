//! Virtual memory operations: page registration, claiming, user memory
//! access, and address-space copy/teardown.
//!
//! Operations take the owning thread explicitly so fork can populate the
//! child's tables while running in the parent.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::frame;
use super::page::{zero_initializer, BackingKind, InitAux, Initializer, Page};
use super::page_fault::{self, PageFaultInfo};
use super::{is_user_vaddr, page_offset, Vpage, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::sched::thread::Thread;

/// Register a lazily-initialized page at `addr`.
///
/// Nothing is allocated yet: the first fault claims a frame and runs the
/// initializer. Fails if the page is already occupied.
pub fn alloc_page_with_initializer(
    thread: &Arc<Thread>,
    target: BackingKind,
    addr: usize,
    writable: bool,
    init: Initializer,
    aux: InitAux,
) -> KernelResult<()> {
    assert_eq!(page_offset(addr), 0, "unaligned page registration");
    if !is_user_vaddr(addr) {
        return Err(KernelError::InvalidArgument { what: "kernel address" });
    }
    if target == BackingKind::File && aux.seg.is_none() {
        return Err(KernelError::InvalidArgument { what: "file page without a segment" });
    }
    let vpage = Vpage::containing(addr);
    thread
        .spt
        .lock()
        .insert(Page::new_uninit(vpage, writable, target, init, aux))
}

/// Register an anonymous, zero-filled page at `addr`.
pub fn alloc_anon_page(thread: &Arc<Thread>, addr: usize, writable: bool) -> KernelResult<()> {
    alloc_page_with_initializer(
        thread,
        BackingKind::Anon,
        addr,
        writable,
        zero_initializer,
        InitAux { seg: None, span: 0 },
    )
}

/// Bind the page at `addr` to a frame and install its hardware mapping.
///
/// A no-op if the page is already resident. On failure the frame is
/// released and the supplemental entry is left in place so the next
/// fault can retry.
pub fn claim(thread: &Arc<Thread>, addr: usize) -> KernelResult<()> {
    let vpage = Vpage::containing(addr);

    {
        let spt = thread.spt.lock();
        let page = spt.find(vpage).ok_or(KernelError::NotFound { resource: "page" })?;
        if page.frame().is_some() {
            return Ok(());
        }
    }

    // The frame allocator may evict other pages of this very thread; the
    // supplemental table must not be locked across it.
    let fid = frame::allocate((thread.tid, vpage))?;

    let result = {
        let mut spt = thread.spt.lock();
        match spt.find_mut(vpage) {
            None => Err(KernelError::NotFound { resource: "page" }),
            Some(page) => {
                page.set_frame(Some(fid));
                thread.pagedir.lock().set_page(vpage, fid, page.writable());
                frame::with_frame(fid, |data| page.swap_in(data))
            }
        }
    };

    if let Err(e) = result {
        let mut spt = thread.spt.lock();
        if let Some(page) = spt.find_mut(vpage) {
            page.set_frame(None);
        }
        thread.pagedir.lock().clear_page(vpage);
        frame::free(fid);
        log::debug!(target: "vm", "claim of {:#x} failed: {}", addr, e);
        return Err(e);
    }
    Ok(())
}

/// Resolve a user access, faulting the page in on demand.
fn resolve_for_access(
    thread: &Arc<Thread>,
    addr: usize,
    write: bool,
) -> KernelResult<super::page_directory::Pte> {
    let vpage = Vpage::containing(addr);
    for _ in 0..2 {
        if let Some(pte) = thread.pagedir.lock().lookup(vpage) {
            if write && !pte.is_writable() {
                return Err(KernelError::Protection { addr });
            }
            return Ok(pte);
        }
        page_fault::handle_fault(
            thread,
            &PageFaultInfo {
                addr,
                write,
                user: true,
                not_present: true,
                rsp: thread.user_rsp(),
            },
        )?;
    }
    Err(KernelError::UnresolvedFault { addr })
}

/// Copy `data` into the thread's user address space at `addr`, faulting
/// pages in and setting hardware dirty bits as a store would.
pub fn user_write(thread: &Arc<Thread>, addr: usize, data: &[u8]) -> KernelResult<()> {
    let mut done = 0;
    while done < data.len() {
        let a = addr + done;
        let vpage = Vpage::containing(a);
        let chunk = (PAGE_SIZE - page_offset(a)).min(data.len() - done);

        let pte = resolve_for_access(thread, a, true)?;
        frame::with_frame(pte.frame, |frame_data| {
            let off = page_offset(a);
            frame_data[off..off + chunk].copy_from_slice(&data[done..done + chunk]);
        });
        frame::mark_referenced(pte.frame);
        thread.pagedir.lock().set_dirty(vpage);
        done += chunk;
    }
    Ok(())
}

/// Copy from the thread's user address space at `addr` into `buf`.
pub fn user_read(thread: &Arc<Thread>, addr: usize, buf: &mut [u8]) -> KernelResult<()> {
    let mut done = 0;
    while done < buf.len() {
        let a = addr + done;
        let chunk = (PAGE_SIZE - page_offset(a)).min(buf.len() - done);

        let pte = resolve_for_access(thread, a, false)?;
        frame::with_frame(pte.frame, |frame_data| {
            let off = page_offset(a);
            buf[done..done + chunk].copy_from_slice(&frame_data[off..off + chunk]);
        });
        frame::mark_referenced(pte.frame);
        done += chunk;
    }
    Ok(())
}

enum CopyPlan {
    Uninit {
        target: BackingKind,
        init: Initializer,
        aux: InitAux,
        writable: bool,
    },
    Materialized {
        writable: bool,
    },
}

/// Duplicate the parent's supplemental page table into the child.
///
/// Uninit pages are re-registered with a deep-copied aux (file handles
/// re-duplicated) and claimed immediately so the child binds to the same
/// backing; materialized pages become private anonymous copies of the
/// parent's current frame contents. Writable flags mirror the parent's.
pub fn copy_address_space(parent: &Arc<Thread>, child: &Arc<Thread>) -> KernelResult<()> {
    let vpages: Vec<Vpage> = parent.spt.lock().vpages();

    for vpage in vpages {
        let plan = {
            let spt = parent.spt.lock();
            let page = match spt.find(vpage) {
                Some(p) => p,
                None => continue,
            };
            match page.uninit_parts() {
                Some((target, init, aux)) => CopyPlan::Uninit {
                    target,
                    init,
                    aux,
                    writable: page.writable(),
                },
                None => CopyPlan::Materialized {
                    writable: page.writable(),
                },
            }
        };

        let addr = vpage.base();
        match plan {
            CopyPlan::Uninit {
                target,
                init,
                aux,
                writable,
            } => {
                alloc_page_with_initializer(child, target, addr, writable, init, aux)?;
                claim(child, addr)?;
            }
            CopyPlan::Materialized { writable } => {
                alloc_anon_page(child, addr, writable)?;
                copy_frame_contents(parent, child, vpage)?;
            }
        }
    }
    Ok(())
}

/// Claim both sides and copy the parent's frame bytes into the child's.
/// Either claim may evict the other's frame in a tiny pool; retry once.
fn copy_frame_contents(parent: &Arc<Thread>, child: &Arc<Thread>, vpage: Vpage) -> KernelResult<()> {
    let addr = vpage.base();
    for _ in 0..2 {
        claim(parent, addr)?;
        claim(child, addr)?;
        let src = parent.spt.lock().find(vpage).and_then(|p| p.frame());
        let dst = child.spt.lock().find(vpage).and_then(|p| p.frame());
        if let (Some(src), Some(dst)) = (src, dst) {
            frame::copy(src, dst);
            return Ok(());
        }
    }
    Err(KernelError::OutOfResource { resource: "frames" })
}

/// Release everything the thread's address space holds: supplemental
/// pages (with writeback), hardware mappings, frames and swap slots.
pub fn destroy_address_space(thread: &Arc<Thread>) {
    thread.spt.lock().destroy_all(thread);
    let leftovers = thread.pagedir.lock().drain();
    for (_, pte) in leftovers {
        frame::free(pte.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::thread;
    use crate::test_support;

    #[test]
    fn alloc_rejects_duplicates_and_kernel_addresses() {
        let _k = test_support::boot_default();
        let curr = thread::current();
        alloc_anon_page(&curr, 0x400000, true).unwrap();
        assert!(matches!(
            alloc_anon_page(&curr, 0x400000, true),
            Err(KernelError::AlreadyMapped { .. })
        ));
        assert!(matches!(
            alloc_anon_page(&curr, crate::mm::USER_LIMIT, true),
            Err(KernelError::InvalidArgument { .. })
        ));
        destroy_address_space(&curr);
    }

    #[test]
    fn claim_installs_mapping_and_is_idempotent() {
        let _k = test_support::boot_default();
        let curr = thread::current();
        alloc_anon_page(&curr, 0x400000, true).unwrap();

        assert!(curr.pagedir.lock().lookup(Vpage::containing(0x400000)).is_none());
        claim(&curr, 0x400000).unwrap();
        let pte = curr.pagedir.lock().lookup(Vpage::containing(0x400000)).unwrap();
        assert!(pte.is_writable());

        // Claim of a resident page changes nothing.
        claim(&curr, 0x400000).unwrap();
        assert_eq!(frame::used_frames(), 1);
        destroy_address_space(&curr);
        assert_eq!(frame::used_frames(), 0);
    }

    #[test]
    fn claim_of_unregistered_page_fails() {
        let _k = test_support::boot_default();
        let curr = thread::current();
        assert!(matches!(
            claim(&curr, 0x500000),
            Err(KernelError::NotFound { .. })
        ));
    }

    #[test]
    fn user_write_then_read_round_trips() {
        let _k = test_support::boot_default();
        let curr = thread::current();
        // Two pages so the copy crosses a page boundary.
        alloc_anon_page(&curr, 0x400000, true).unwrap();
        alloc_anon_page(&curr, 0x401000, true).unwrap();

        let data: Vec<u8> = (0..64).map(|i| i as u8).collect();
        user_write(&curr, 0x400FE0, &data).unwrap();

        let mut back = alloc::vec![0u8; 64];
        user_read(&curr, 0x400FE0, &mut back).unwrap();
        assert_eq!(back, data);

        // The store set the hardware dirty bit on both touched pages.
        assert!(curr.pagedir.lock().is_dirty(Vpage::containing(0x400000)));
        assert!(curr.pagedir.lock().is_dirty(Vpage::containing(0x401000)));
        destroy_address_space(&curr);
    }

    #[test]
    fn user_write_to_read_only_page_is_a_protection_error() {
        let _k = test_support::boot_default();
        let curr = thread::current();
        alloc_anon_page(&curr, 0x400000, false).unwrap();

        assert!(matches!(
            user_write(&curr, 0x400000, b"x"),
            Err(KernelError::Protection { .. })
        ));
        // Reading is fine.
        let mut buf = [1u8; 4];
        user_read(&curr, 0x400000, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
        destroy_address_space(&curr);
    }
}
