//! Swap device.
//!
//! A slot allocator over page-sized blocks, standing in for the disk
//! swap partition. Slots are volatile; nothing survives a reboot.

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Mutex;

use super::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};

/// Index of an allocated swap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSlot(pub usize);

struct SwapDevice {
    slots: Vec<Option<Box<[u8; PAGE_SIZE]>>>,
    capacity: usize,
    used: usize,
}

static SWAP: Mutex<SwapDevice> = Mutex::new(SwapDevice {
    slots: Vec::new(),
    capacity: 0,
    used: 0,
});

/// Size the device to `capacity` slots, discarding previous contents.
pub fn init(capacity: usize) {
    let mut dev = SWAP.lock();
    dev.slots = Vec::new();
    dev.capacity = capacity;
    dev.used = 0;
}

/// Write a page out, allocating a slot.
pub fn store(data: &[u8]) -> KernelResult<SwapSlot> {
    assert_eq!(data.len(), PAGE_SIZE);
    let mut dev = SWAP.lock();
    if dev.used >= dev.capacity {
        return Err(KernelError::OutOfResource { resource: "swap slots" });
    }

    let mut block = Box::new([0u8; PAGE_SIZE]);
    block.copy_from_slice(data);

    let idx = dev.slots.iter().position(|s| s.is_none());
    let idx = match idx {
        Some(i) => {
            dev.slots[i] = Some(block);
            i
        }
        None => {
            dev.slots.push(Some(block));
            dev.slots.len() - 1
        }
    };
    dev.used += 1;
    Ok(SwapSlot(idx))
}

/// Read a page back in and release its slot.
pub fn take(slot: SwapSlot, out: &mut [u8]) -> KernelResult<()> {
    assert_eq!(out.len(), PAGE_SIZE);
    let mut dev = SWAP.lock();
    let block = dev
        .slots
        .get_mut(slot.0)
        .and_then(|s| s.take())
        .ok_or(KernelError::NotFound { resource: "swap slot" })?;
    out.copy_from_slice(&block[..]);
    dev.used -= 1;
    Ok(())
}

/// Release a slot without reading it (page destroyed while evicted).
pub fn free(slot: SwapSlot) {
    let mut dev = SWAP.lock();
    if let Some(s) = dev.slots.get_mut(slot.0) {
        if s.take().is_some() {
            dev.used -= 1;
        }
    }
}

/// Number of slots in use.
pub fn used_slots() -> usize {
    SWAP.lock().used
}
