//! Frame table: physical page bookkeeping for the user pool.
//!
//! The pool holds a fixed number of frames. When it is exhausted, allocation
//! picks a victim by second chance (a frame's reference bit, set at claim
//! time, buys it one pass of the clock hand), swaps the victim's page out
//! through its supplemental page entry, and reuses the frame. Every
//! allocated frame carries a backpointer to the (thread, page) that owns
//! it so eviction can find the page metadata.

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Mutex;

use super::{Vpage, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::sched::thread::{self, Tid};

/// Index into the frame table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub usize);

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    owner: (Tid, Vpage),
    /// Second-chance reference bit.
    referenced: bool,
}

struct FrameTable {
    slots: Vec<Option<Frame>>,
    capacity: usize,
    /// Clock hand for victim selection.
    hand: usize,
    used: usize,
}

static FRAMES: Mutex<FrameTable> = Mutex::new(FrameTable {
    slots: Vec::new(),
    capacity: 0,
    hand: 0,
    used: 0,
});

/// Size the user pool to `capacity` frames, discarding previous contents.
pub fn init(capacity: usize) {
    let mut t = FRAMES.lock();
    t.slots = Vec::new();
    t.capacity = capacity;
    t.hand = 0;
    t.used = 0;
}

/// Allocate a zeroed frame for `owner`, evicting a victim if the pool is
/// full.
pub fn allocate(owner: (Tid, Vpage)) -> KernelResult<FrameId> {
    let mut t = FRAMES.lock();

    if t.used < t.capacity {
        let frame = Frame {
            data: Box::new([0u8; PAGE_SIZE]),
            owner,
            referenced: true,
        };
        let id = match t.slots.iter().position(|s| s.is_none()) {
            Some(i) => {
                t.slots[i] = Some(frame);
                i
            }
            None => {
                t.slots.push(Some(frame));
                t.slots.len() - 1
            }
        };
        t.used += 1;
        return Ok(FrameId(id));
    }

    let victim = pick_victim(&mut t).ok_or(KernelError::OutOfResource { resource: "frames" })?;
    evict(&mut t, victim)?;

    let frame = t.slots[victim.0].as_mut().expect("victim frame vanished");
    frame.data.fill(0);
    frame.owner = owner;
    frame.referenced = true;
    Ok(victim)
}

/// Second chance: clear each referenced bit once, take the first frame
/// found unreferenced.
fn pick_victim(t: &mut FrameTable) -> Option<FrameId> {
    if t.slots.is_empty() {
        return None;
    }
    let n = t.slots.len();
    for _ in 0..2 * n {
        let i = t.hand;
        t.hand = (t.hand + 1) % n;
        if let Some(frame) = t.slots[i].as_mut() {
            if frame.referenced {
                frame.referenced = false;
            } else {
                return Some(FrameId(i));
            }
        }
    }
    None
}

/// Swap the victim's page out and unlink it from its owner.
fn evict(t: &mut FrameTable, victim: FrameId) -> KernelResult<()> {
    let (tid, vpage) = t.slots[victim.0].as_ref().expect("empty victim slot").owner;
    let owner = thread::get(tid).ok_or(KernelError::DeadThread { tid: tid.0 })?;

    log::debug!(
        target: "vm",
        "evicting frame {} (page {:#x} of thread {})",
        victim.0,
        vpage.base(),
        tid
    );

    let data = &t.slots[victim.0].as_ref().expect("empty victim slot").data[..];
    let mut spt = owner.spt.lock();
    let page = spt
        .find_mut(vpage)
        .expect("frame owner has no supplemental page entry");
    page.swap_out(&owner, data)
}

/// Return a frame to the pool.
pub fn free(id: FrameId) {
    let mut t = FRAMES.lock();
    if let Some(slot) = t.slots.get_mut(id.0) {
        if slot.take().is_some() {
            t.used -= 1;
        }
    }
}

/// Run `f` over the frame's contents.
pub fn with_frame<R>(id: FrameId, f: impl FnOnce(&mut [u8]) -> R) -> R {
    let mut t = FRAMES.lock();
    let frame = t
        .slots
        .get_mut(id.0)
        .and_then(|s| s.as_mut())
        .expect("access to unallocated frame");
    f(&mut frame.data[..])
}

/// Copy one frame's contents into another (fork).
pub fn copy(src: FrameId, dst: FrameId) {
    let mut buf = [0u8; PAGE_SIZE];
    with_frame(src, |s| buf.copy_from_slice(s));
    with_frame(dst, |d| d.copy_from_slice(&buf));
}

/// Give a frame another pass of the clock (set its reference bit).
pub fn mark_referenced(id: FrameId) {
    let mut t = FRAMES.lock();
    if let Some(frame) = t.slots.get_mut(id.0).and_then(|s| s.as_mut()) {
        frame.referenced = true;
    }
}

/// Frames currently allocated.
pub fn used_frames() -> usize {
    FRAMES.lock().used
}

/// Pool capacity in frames.
pub fn capacity() -> usize {
    FRAMES.lock().capacity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::scheduler;

    #[test]
    fn allocate_zeroes_and_tracks_usage() {
        let _k = crate::test_support::boot_default();
        let owner = (scheduler::current_tid(), Vpage(1));
        let id = allocate(owner).unwrap();
        assert_eq!(used_frames(), 1);
        with_frame(id, |data| {
            assert!(data.iter().all(|&b| b == 0));
            data[0] = 0x55;
        });
        with_frame(id, |data| assert_eq!(data[0], 0x55));
        free(id);
        assert_eq!(used_frames(), 0);
    }

    #[test]
    fn copy_duplicates_contents() {
        let _k = crate::test_support::boot_default();
        let tid = scheduler::current_tid();
        let a = allocate((tid, Vpage(1))).unwrap();
        let b = allocate((tid, Vpage(2))).unwrap();
        with_frame(a, |d| d[100] = 42);
        copy(a, b);
        with_frame(b, |d| assert_eq!(d[100], 42));
        free(a);
        free(b);
    }

    #[test]
    fn double_free_is_harmless() {
        let _k = crate::test_support::boot_default();
        let id = allocate((scheduler::current_tid(), Vpage(3))).unwrap();
        free(id);
        free(id);
        assert_eq!(used_frames(), 0);
    }
}
