//! Memory-mapped files.
//!
//! `do_mmap` registers one lazily-loaded file page per mapped page; the
//! file handle is reopened so closing the mapped descriptor afterwards is
//! safe. The first page records the mapping's page count so `do_munmap`
//! knows how far to walk. Unmap order per page: write back if dirty,
//! clear the dirty bit, clear the hardware mapping, destroy the entry.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::page::{segment_initializer, BackingKind, FileSegment, InitAux};
use super::{is_user_vaddr, page_offset, vm, Vpage, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::fs::File;
use crate::sched::thread::Thread;

/// Map `length` bytes of `file` starting at `offset` to `addr`.
/// Returns the mapped address.
pub fn do_mmap(
    thread: &Arc<Thread>,
    addr: usize,
    length: usize,
    writable: bool,
    file: &File,
    offset: u64,
) -> KernelResult<usize> {
    if addr == 0 || page_offset(addr) != 0 {
        return Err(KernelError::InvalidArgument { what: "unaligned mmap address" });
    }
    if offset as usize % PAGE_SIZE != 0 {
        return Err(KernelError::InvalidArgument { what: "unaligned mmap offset" });
    }
    if length == 0 {
        return Err(KernelError::InvalidArgument { what: "empty mapping" });
    }
    if !is_user_vaddr(addr) || !is_user_vaddr(addr + length - 1) {
        return Err(KernelError::InvalidArgument { what: "mapping outside user space" });
    }
    if file.length() == 0 {
        return Err(KernelError::InvalidArgument { what: "mmap of empty file" });
    }

    let page_count = length.div_ceil(PAGE_SIZE);
    {
        let spt = thread.spt.lock();
        for i in 0..page_count {
            if spt.find(Vpage::containing(addr + i * PAGE_SIZE)).is_some() {
                return Err(KernelError::AlreadyMapped { addr: addr + i * PAGE_SIZE });
            }
        }
    }

    // Private handle: the mapping survives a close of the caller's fd.
    let handle = file.reopen();

    let mut remaining = (file.length() as usize).min(length);
    let mut file_offset = offset;
    for i in 0..page_count {
        let read_bytes = remaining.min(PAGE_SIZE);
        let zero_bytes = PAGE_SIZE - read_bytes;
        let aux = InitAux {
            seg: Some(FileSegment {
                file: handle.duplicate(),
                offset: file_offset,
                read_bytes,
                zero_bytes,
            }),
            span: if i == 0 { page_count } else { 0 },
        };
        if let Err(e) = vm::alloc_page_with_initializer(
            thread,
            BackingKind::File,
            addr + i * PAGE_SIZE,
            writable,
            segment_initializer,
            aux,
        ) {
            // Roll back the pages registered so far.
            let mut spt = thread.spt.lock();
            for j in 0..i {
                if let Some(mut page) = spt.remove(Vpage::containing(addr + j * PAGE_SIZE)) {
                    page.destroy(thread);
                }
            }
            return Err(e);
        }
        remaining -= read_bytes;
        file_offset += read_bytes as u64;
    }

    log::debug!(
        target: "vm",
        "mmapped {} pages at {:#x} for thread {}",
        page_count,
        addr,
        thread.tid
    );
    Ok(addr)
}

/// Unmap the mapping that starts at `addr`.
pub fn do_munmap(thread: &Arc<Thread>, addr: usize) -> KernelResult<()> {
    if page_offset(addr) != 0 {
        return Err(KernelError::InvalidArgument { what: "unaligned munmap address" });
    }
    let first = Vpage::containing(addr);

    let span = {
        let spt = thread.spt.lock();
        let page = spt
            .find(first)
            .ok_or(KernelError::NotFound { resource: "mapping" })?;
        page.mapping_span()
    };
    if span == 0 {
        return Err(KernelError::InvalidArgument { what: "not the start of a mapping" });
    }

    let mut spt = thread.spt.lock();
    let mut removed: Vec<super::page::Page> = Vec::new();
    for i in 0..span {
        if let Some(page) = spt.remove(Vpage(first.0 + i)) {
            removed.push(page);
        }
    }
    drop(spt);
    for mut page in removed {
        page.destroy(thread);
    }

    log::debug!(target: "vm", "unmapped {} pages at {:#x}", span, addr);
    Ok(())
}
