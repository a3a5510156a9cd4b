//! Supplemental page table.
//!
//! The kernel's authoritative per-process map from user virtual page to
//! page entry, orthogonal to the hardware page table. The hardware table
//! only knows resident pages; this one knows every page the process has,
//! including uninitialized and evicted ones.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::page::Page;
use super::Vpage;
use crate::error::{KernelError, KernelResult};
use crate::sched::thread::Thread;

#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<Vpage, Page>,
}

impl SupplementalPageTable {
    pub const fn new() -> SupplementalPageTable {
        SupplementalPageTable {
            pages: BTreeMap::new(),
        }
    }

    pub fn find(&self, vpage: Vpage) -> Option<&Page> {
        self.pages.get(&vpage)
    }

    pub fn find_mut(&mut self, vpage: Vpage) -> Option<&mut Page> {
        self.pages.get_mut(&vpage)
    }

    /// Insert a page; the virtual page must be unoccupied.
    pub fn insert(&mut self, page: Page) -> KernelResult<()> {
        let vpage = page.vpage();
        if self.pages.contains_key(&vpage) {
            return Err(KernelError::AlreadyMapped { addr: vpage.base() });
        }
        self.pages.insert(vpage, page);
        Ok(())
    }

    /// Unlink a page without destroying it.
    pub fn remove(&mut self, vpage: Vpage) -> Option<Page> {
        self.pages.remove(&vpage)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Every mapped virtual page, in address order.
    pub fn vpages(&self) -> Vec<Vpage> {
        self.pages.keys().copied().collect()
    }

    /// Destroy every page: write back dirty file contents, clear the
    /// hardware mappings, release frames and swap slots.
    pub fn destroy_all(&mut self, owner: &Arc<Thread>) {
        let pages = core::mem::take(&mut self.pages);
        for (_, mut page) in pages {
            page.destroy(owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page::{zero_initializer, BackingKind, InitAux};

    fn anon_page(vpage: Vpage) -> Page {
        Page::new_uninit(
            vpage,
            true,
            BackingKind::Anon,
            zero_initializer,
            InitAux { seg: None, span: 0 },
        )
    }

    #[test]
    fn insert_then_find() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(anon_page(Vpage(5))).unwrap();
        assert!(spt.find(Vpage(5)).is_some());
        assert!(spt.find(Vpage(6)).is_none());
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn double_insert_is_rejected() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(anon_page(Vpage(5))).unwrap();
        assert_eq!(
            spt.insert(anon_page(Vpage(5))).unwrap_err(),
            KernelError::AlreadyMapped {
                addr: Vpage(5).base()
            }
        );
    }

    #[test]
    fn remove_unlinks() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(anon_page(Vpage(7))).unwrap();
        assert!(spt.remove(Vpage(7)).is_some());
        assert!(spt.remove(Vpage(7)).is_none());
        assert!(spt.is_empty());
    }

    #[test]
    fn vpages_come_back_sorted() {
        let mut spt = SupplementalPageTable::new();
        for n in [9usize, 3, 7] {
            spt.insert(anon_page(Vpage(n))).unwrap();
        }
        assert_eq!(spt.vpages(), [Vpage(3), Vpage(7), Vpage(9)]);
    }
}
