//! Per-process hardware page table, as consumed by the VM layer.
//!
//! The real MMU is architecture property; the kernel core manipulates it
//! through this map of user virtual page → page table entry. Installing,
//! clearing, querying and dirty-bit maintenance are the only operations
//! the VM layer needs.

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use super::frame::FrameId;
use super::Vpage;

bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// Writes permitted.
        const WRITABLE = 1 << 0;
        /// Page has been written since the bit was last cleared.
        const DIRTY = 1 << 1;
    }
}

/// A page table entry: the backing frame plus flags.
#[derive(Debug, Clone, Copy)]
pub struct Pte {
    pub frame: FrameId,
    pub flags: PteFlags,
}

impl Pte {
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::WRITABLE)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PteFlags::DIRTY)
    }
}

/// One process's page table.
#[derive(Default)]
pub struct PageDirectory {
    entries: BTreeMap<Vpage, Pte>,
}

impl PageDirectory {
    pub const fn new() -> PageDirectory {
        PageDirectory {
            entries: BTreeMap::new(),
        }
    }

    /// Install a mapping. The page must not already be mapped.
    pub fn set_page(&mut self, vpage: Vpage, frame: FrameId, writable: bool) {
        let mut flags = PteFlags::empty();
        if writable {
            flags |= PteFlags::WRITABLE;
        }
        let prev = self.entries.insert(vpage, Pte { frame, flags });
        debug_assert!(prev.is_none(), "page {:#x} double-mapped", vpage.base());
    }

    /// Remove a mapping, returning the old entry.
    pub fn clear_page(&mut self, vpage: Vpage) -> Option<Pte> {
        self.entries.remove(&vpage)
    }

    pub fn lookup(&self, vpage: Vpage) -> Option<Pte> {
        self.entries.get(&vpage).copied()
    }

    pub fn is_dirty(&self, vpage: Vpage) -> bool {
        self.entries
            .get(&vpage)
            .map(|pte| pte.is_dirty())
            .unwrap_or(false)
    }

    pub fn set_dirty(&mut self, vpage: Vpage) {
        if let Some(pte) = self.entries.get_mut(&vpage) {
            pte.flags |= PteFlags::DIRTY;
        }
    }

    pub fn clear_dirty(&mut self, vpage: Vpage) {
        if let Some(pte) = self.entries.get_mut(&vpage) {
            pte.flags -= PteFlags::DIRTY;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tear down every mapping, returning them for frame reclamation.
    pub fn drain(&mut self) -> alloc::vec::Vec<(Vpage, Pte)> {
        let old = core::mem::take(&mut self.entries);
        old.into_iter().collect()
    }
}
