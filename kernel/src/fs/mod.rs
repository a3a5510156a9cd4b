//! Filesystem interface.
//!
//! The disk filesystem proper is an external collaborator; the kernel
//! core consumes it through the [`Inode`] trait and a path registry with
//! `create`/`open`/`remove`. The in-memory implementation here backs the
//! syscall layer and the mmap engine.

pub mod file;

pub use file::File;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;

use spin::RwLock;

use crate::error::{KernelError, KernelResult};

/// A file's storage object: positionless reads and writes plus a length.
/// Cursor state lives in [`File`].
pub trait Inode: Send + Sync {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> KernelResult<usize>;
    fn write_at(&self, pos: u64, data: &[u8]) -> KernelResult<usize>;
    fn length(&self) -> u64;
}

/// In-memory inode.
pub struct MemInode {
    data: RwLock<alloc::vec::Vec<u8>>,
}

impl MemInode {
    pub fn with_size(size: usize) -> MemInode {
        MemInode {
            data: RwLock::new(vec![0; size]),
        }
    }
}

impl Inode for MemInode {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let data = self.data.read();
        let pos = pos as usize;
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        Ok(n)
    }

    fn write_at(&self, pos: u64, src: &[u8]) -> KernelResult<usize> {
        let mut data = self.data.write();
        let pos = pos as usize;
        let end = pos + src.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(src);
        Ok(src.len())
    }

    fn length(&self) -> u64 {
        self.data.read().len() as u64
    }
}

static ROOT: RwLock<BTreeMap<String, Arc<MemInode>>> = RwLock::new(BTreeMap::new());

/// Create a file of the given initial size. Fails if the path exists.
pub fn create(path: &str, initial_size: u64) -> KernelResult<()> {
    if path.is_empty() {
        return Err(KernelError::InvalidArgument { what: "empty path" });
    }
    let mut root = ROOT.write();
    if root.contains_key(path) {
        return Err(KernelError::InvalidArgument { what: "file already exists" });
    }
    root.insert(String::from(path), Arc::new(MemInode::with_size(initial_size as usize)));
    log::debug!(target: "fs", "created '{}' ({} bytes)", path, initial_size);
    Ok(())
}

/// Open a file, producing a fresh cursor at position 0.
pub fn open(path: &str) -> KernelResult<File> {
    let root = ROOT.read();
    let node = root.get(path).ok_or(KernelError::NotFound { resource: "file" })?;
    Ok(File::new(node.clone()))
}

/// Remove a file from the namespace. Handles already open keep working;
/// the storage is reclaimed when the last one closes.
pub fn remove(path: &str) -> KernelResult<()> {
    ROOT.write()
        .remove(path)
        .map(|_| ())
        .ok_or(KernelError::NotFound { resource: "file" })
}

pub fn exists(path: &str) -> bool {
    ROOT.read().contains_key(path)
}

#[cfg(test)]
pub(crate) fn reset() {
    ROOT.write().clear();
}
