//! Supplemental page entries.
//!
//! A page starts Uninit, carrying the initializer that will populate its
//! first frame, and morphs into its target kind (Anon or File) exactly
//! once, on the first fault. Anonymous pages go to swap when evicted;
//! file pages write dirty contents back to their backing segment. The
//! writable flag lives here; the hardware entry only gets it at claim
//! time.

use alloc::sync::Arc;

use super::frame::{self, FrameId};
use super::swap::{self, SwapSlot};
use super::Vpage;
use crate::error::{KernelError, KernelResult};
use crate::fs::File;
use crate::sched::thread::Thread;

/// A contiguous slice of a file backing one page.
pub struct FileSegment {
    pub file: File,
    pub offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl FileSegment {
    /// Deep copy with a re-duplicated file handle (private cursor).
    pub fn duplicate(&self) -> FileSegment {
        FileSegment {
            file: self.file.duplicate(),
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
        }
    }
}

/// Lazy initializer run on the first fault, with the page's aux data and
/// the freshly allocated frame.
pub type Initializer = fn(Option<&mut FileSegment>, &mut [u8]) -> KernelResult<()>;

/// Zero-fill (anonymous pages).
pub fn zero_initializer(_seg: Option<&mut FileSegment>, frame: &mut [u8]) -> KernelResult<()> {
    frame.fill(0);
    Ok(())
}

/// Seek to the segment offset, read `read_bytes`, zero the tail.
pub fn segment_initializer(seg: Option<&mut FileSegment>, frame: &mut [u8]) -> KernelResult<()> {
    let seg = seg.ok_or(KernelError::InvalidArgument {
        what: "file page without a segment",
    })?;
    load_segment(seg, frame)
}

fn load_segment(seg: &mut FileSegment, frame: &mut [u8]) -> KernelResult<()> {
    seg.file.seek(seg.offset);
    let n = seg.file.read(&mut frame[..seg.read_bytes])?;
    if n != seg.read_bytes {
        return Err(KernelError::InvalidArgument {
            what: "short read from backing file",
        });
    }
    frame[seg.read_bytes..].fill(0);
    Ok(())
}

/// What an Uninit page will become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    Anon,
    File,
}

/// Opaque argument carried by an Uninit page for its initializer.
pub struct InitAux {
    pub seg: Option<FileSegment>,
    /// Page count of the whole mapping; nonzero only on the first page.
    pub span: usize,
}

impl InitAux {
    /// Deep copy for fork; the file handle inside is re-duplicated.
    pub fn duplicate(&self) -> InitAux {
        InitAux {
            seg: self.seg.as_ref().map(FileSegment::duplicate),
            span: self.span,
        }
    }
}

enum PageKind {
    Uninit {
        target: BackingKind,
        init: Initializer,
        aux: InitAux,
    },
    Anon {
        /// Swap slot while evicted.
        slot: Option<SwapSlot>,
    },
    File {
        seg: FileSegment,
        span: usize,
    },
}

/// A supplemental page entry.
pub struct Page {
    vpage: Vpage,
    writable: bool,
    frame: Option<FrameId>,
    kind: PageKind,
}

impl Page {
    pub fn new_uninit(
        vpage: Vpage,
        writable: bool,
        target: BackingKind,
        init: Initializer,
        aux: InitAux,
    ) -> Page {
        debug_assert!(
            target != BackingKind::File || aux.seg.is_some(),
            "file page without a segment"
        );
        Page {
            vpage,
            writable,
            frame: None,
            kind: PageKind::Uninit { target, init, aux },
        }
    }

    pub fn vpage(&self) -> Vpage {
        self.vpage
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: Option<FrameId>) {
        self.frame = frame;
    }

    pub fn is_uninit(&self) -> bool {
        matches!(self.kind, PageKind::Uninit { .. })
    }

    /// The page's kind after initialization (for Uninit, the target).
    pub fn backing_kind(&self) -> BackingKind {
        match &self.kind {
            PageKind::Uninit { target, .. } => *target,
            PageKind::Anon { .. } => BackingKind::Anon,
            PageKind::File { .. } => BackingKind::File,
        }
    }

    /// Page count of the mapping this page heads, 0 elsewhere.
    pub fn mapping_span(&self) -> usize {
        match &self.kind {
            PageKind::Uninit { aux, .. } => aux.span,
            PageKind::File { span, .. } => *span,
            PageKind::Anon { .. } => 0,
        }
    }

    /// Initializer and deep-copied aux of an Uninit page (fork).
    pub(crate) fn uninit_parts(&self) -> Option<(BackingKind, Initializer, InitAux)> {
        match &self.kind {
            PageKind::Uninit { target, init, aux } => Some((*target, *init, aux.duplicate())),
            _ => None,
        }
    }

    /// Populate a freshly allocated frame from the page's backing store.
    ///
    /// For Uninit pages this runs the lazy initializer and morphs the
    /// page into its target kind; on failure the page stays Uninit so a
    /// later fault can retry.
    pub(crate) fn swap_in(&mut self, frame: &mut [u8]) -> KernelResult<()> {
        if self.is_uninit() {
            let old = core::mem::replace(&mut self.kind, PageKind::Anon { slot: None });
            let (target, init, mut aux) = match old {
                PageKind::Uninit { target, init, aux } => (target, init, aux),
                _ => unreachable!(),
            };
            return match init(aux.seg.as_mut(), frame) {
                Ok(()) => {
                    self.kind = match target {
                        BackingKind::Anon => PageKind::Anon { slot: None },
                        BackingKind::File => {
                            let span = aux.span;
                            let seg = aux.seg.expect("file page without a segment");
                            PageKind::File { seg, span }
                        }
                    };
                    Ok(())
                }
                Err(e) => {
                    self.kind = PageKind::Uninit { target, init, aux };
                    Err(e)
                }
            };
        }
        match &mut self.kind {
            PageKind::Anon { slot } => match slot.take() {
                Some(s) => swap::take(s, frame),
                None => {
                    frame.fill(0);
                    Ok(())
                }
            },
            PageKind::File { seg, .. } => load_segment(seg, frame),
            PageKind::Uninit { .. } => unreachable!(),
        }
    }

    /// Evict the page's contents from `data` to its backing store and
    /// clear the hardware mapping. The caller reuses the frame.
    pub(crate) fn swap_out(&mut self, owner: &Arc<Thread>, data: &[u8]) -> KernelResult<()> {
        match &mut self.kind {
            PageKind::Anon { slot } => {
                debug_assert!(slot.is_none());
                *slot = Some(swap::store(data)?);
            }
            PageKind::File { seg, .. } => {
                let mut pagedir = owner.pagedir.lock();
                if pagedir.is_dirty(self.vpage) {
                    seg.file.write_at(seg.offset, &data[..seg.read_bytes])?;
                    pagedir.clear_dirty(self.vpage);
                }
            }
            PageKind::Uninit { .. } => unreachable!("uninit page holds no frame"),
        }
        owner.pagedir.lock().clear_page(self.vpage);
        self.frame = None;
        Ok(())
    }

    /// Final teardown: write back dirty file contents, then clear the
    /// hardware mapping, then release the frame or swap slot. This order
    /// is load-bearing.
    pub(crate) fn destroy(&mut self, owner: &Arc<Thread>) {
        if let PageKind::File { seg, .. } = &self.kind {
            let mut pagedir = owner.pagedir.lock();
            if self.frame.is_some() && pagedir.is_dirty(self.vpage) {
                if let Err(e) = seg.file.write_at(seg.offset, read_back(self.frame, seg.read_bytes).as_slice())
                {
                    log::warn!(target: "vm", "writeback of page {:#x} failed: {}", self.vpage.base(), e);
                }
                pagedir.clear_dirty(self.vpage);
            }
        }
        if let PageKind::Anon { slot: Some(s) } = &self.kind {
            swap::free(*s);
        }
        owner.pagedir.lock().clear_page(self.vpage);
        if let Some(f) = self.frame.take() {
            frame::free(f);
        }
    }
}

fn read_back(frame: Option<FrameId>, len: usize) -> alloc::vec::Vec<u8> {
    let mut buf = alloc::vec![0u8; len];
    if let Some(f) = frame {
        frame::with_frame(f, |data| buf.copy_from_slice(&data[..len]));
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PAGE_SIZE;

    #[test]
    fn zero_initializer_clears_the_frame() {
        let mut data = [0xFFu8; PAGE_SIZE];
        zero_initializer(None, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn segment_initializer_reads_and_zero_fills() {
        let _k = crate::test_support::boot_default();
        crate::fs::create("seg", 0).unwrap();
        let mut f = crate::fs::open("seg").unwrap();
        f.write(b"hello").unwrap();

        let mut seg = FileSegment {
            file: f.reopen(),
            offset: 1,
            read_bytes: 4,
            zero_bytes: PAGE_SIZE - 4,
        };
        let mut data = [0xFFu8; PAGE_SIZE];
        segment_initializer(Some(&mut seg), &mut data).unwrap();
        assert_eq!(&data[..4], b"ello");
        assert!(data[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn segment_initializer_rejects_short_reads() {
        let _k = crate::test_support::boot_default();
        crate::fs::create("short", 2).unwrap();
        let f = crate::fs::open("short").unwrap();

        let mut seg = FileSegment {
            file: f,
            offset: 0,
            read_bytes: 10,
            zero_bytes: PAGE_SIZE - 10,
        };
        let mut data = [0u8; PAGE_SIZE];
        assert!(segment_initializer(Some(&mut seg), &mut data).is_err());
    }

    #[test]
    fn uninit_page_morphs_once_on_swap_in() {
        let mut page = Page::new_uninit(
            Vpage(0x400),
            true,
            BackingKind::Anon,
            zero_initializer,
            InitAux { seg: None, span: 0 },
        );
        assert!(page.is_uninit());
        assert_eq!(page.backing_kind(), BackingKind::Anon);

        let mut data = [0xAAu8; PAGE_SIZE];
        page.swap_in(&mut data).unwrap();
        assert!(!page.is_uninit());
        assert_eq!(page.backing_kind(), BackingKind::Anon);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn failed_initializer_leaves_the_page_uninit() {
        let _k = crate::test_support::boot_default();
        crate::fs::create("tiny", 1).unwrap();
        let f = crate::fs::open("tiny").unwrap();

        let mut page = Page::new_uninit(
            Vpage(0x500),
            false,
            BackingKind::File,
            segment_initializer,
            InitAux {
                seg: Some(FileSegment {
                    file: f,
                    offset: 0,
                    read_bytes: 100,
                    zero_bytes: PAGE_SIZE - 100,
                }),
                span: 1,
            },
        );
        let mut data = [0u8; PAGE_SIZE];
        assert!(page.swap_in(&mut data).is_err());
        // Still Uninit: the next fault may retry.
        assert!(page.is_uninit());
        assert_eq!(page.mapping_span(), 1);
    }
}
