//! Per-process file descriptor table.
//!
//! Open files live in a bounded arena of slots; the descriptor map points
//! either at a slot or at one of the standard-stream sentinels. Fork
//! clones the table structurally, duplicating each file handle through
//! the filesystem so cursors are private afterwards.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::fs::File;

/// Descriptor number of standard input.
pub const STDIN_FD: i32 = 0;
/// Descriptor number of standard output.
pub const STDOUT_FD: i32 = 1;

/// Bound on open files per process.
const MAX_OPEN_FILES: usize = 128;

/// What a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdEntry {
    Stdin,
    Stdout,
    /// Index into the file arena.
    File(usize),
}

/// A process's descriptor table.
pub struct FdTable {
    files: Vec<Option<File>>,
    fds: BTreeMap<i32, FdEntry>,
}

impl FdTable {
    /// A table with the standard streams installed.
    pub fn new_standard() -> FdTable {
        let mut fds = BTreeMap::new();
        fds.insert(STDIN_FD, FdEntry::Stdin);
        fds.insert(STDOUT_FD, FdEntry::Stdout);
        FdTable {
            files: Vec::new(),
            fds,
        }
    }

    /// Install an open file, returning its new descriptor (lowest free,
    /// starting above the standard streams).
    pub fn install(&mut self, file: File) -> KernelResult<i32> {
        if self.files.iter().filter(|s| s.is_some()).count() >= MAX_OPEN_FILES {
            return Err(KernelError::OutOfResource { resource: "file descriptors" });
        }
        let slot = match self.files.iter().position(|s| s.is_none()) {
            Some(i) => {
                self.files[i] = Some(file);
                i
            }
            None => {
                self.files.push(Some(file));
                self.files.len() - 1
            }
        };

        let mut fd = 2;
        while self.fds.contains_key(&fd) {
            fd += 1;
        }
        self.fds.insert(fd, FdEntry::File(slot));
        Ok(fd)
    }

    /// What a descriptor points at.
    pub fn entry(&self, fd: i32) -> Option<FdEntry> {
        self.fds.get(&fd).copied()
    }

    /// The open file behind a descriptor, if it is a file.
    pub fn file(&self, fd: i32) -> Option<&File> {
        match self.fds.get(&fd)? {
            FdEntry::File(slot) => self.files.get(*slot)?.as_ref(),
            _ => None,
        }
    }

    pub fn file_mut(&mut self, fd: i32) -> Option<&mut File> {
        match self.fds.get(&fd)? {
            FdEntry::File(slot) => self.files.get_mut(*slot)?.as_mut(),
            _ => None,
        }
    }

    /// Close a descriptor. Closing a standard stream removes the
    /// sentinel only.
    pub fn close(&mut self, fd: i32) -> KernelResult<()> {
        let entry = self
            .fds
            .remove(&fd)
            .ok_or(KernelError::NotFound { resource: "file descriptor" })?;
        if let FdEntry::File(slot) = entry {
            self.files[slot] = None;
        }
        Ok(())
    }

    /// Structural clone for fork: same descriptor layout, each file
    /// handle duplicated with a private cursor.
    pub fn duplicate(&self) -> KernelResult<FdTable> {
        let files = self
            .files
            .iter()
            .map(|s| s.as_ref().map(File::duplicate))
            .collect();
        Ok(FdTable {
            files,
            fds: self.fds.clone(),
        })
    }

    /// Drop every open file (process exit).
    pub fn close_all(&mut self) {
        self.files.clear();
        self.fds.clear();
    }

    /// Number of open file descriptors, standard streams included.
    pub fn open_count(&self) -> usize {
        self.fds.len()
    }
}
