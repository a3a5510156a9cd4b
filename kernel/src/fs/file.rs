//! Open file objects.

use alloc::sync::Arc;

use super::Inode;
use crate::error::KernelResult;

/// An open file: an inode plus a cursor.
///
/// `reopen` yields an independent handle with a fresh cursor (used by
/// mmap so closing the mapped fd is safe); `duplicate` clones the cursor
/// as well (used by fork).
pub struct File {
    node: Arc<dyn Inode>,
    pos: u64,
}

impl File {
    pub fn new(node: Arc<dyn Inode>) -> File {
        File { node, pos: 0 }
    }

    /// Read from the cursor, advancing it.
    pub fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        let n = self.node.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the cursor, advancing it.
    pub fn write(&mut self, data: &[u8]) -> KernelResult<usize> {
        let n = self.node.write_at(self.pos, data)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Read at an absolute position without moving the cursor.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> KernelResult<usize> {
        self.node.read_at(pos, buf)
    }

    /// Write at an absolute position without moving the cursor.
    pub fn write_at(&self, pos: u64, data: &[u8]) -> KernelResult<usize> {
        self.node.write_at(pos, data)
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn length(&self) -> u64 {
        self.node.length()
    }

    /// New handle on the same inode with the cursor rewound.
    pub fn reopen(&self) -> File {
        File {
            node: self.node.clone(),
            pos: 0,
        }
    }

    /// New handle on the same inode with the cursor preserved. Cursors
    /// move independently afterwards.
    pub fn duplicate(&self) -> File {
        File {
            node: self.node.clone(),
            pos: self.pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemInode;

    fn file_with(contents: &[u8]) -> File {
        let node = Arc::new(MemInode::with_size(0));
        node.write_at(0, contents).unwrap();
        File::new(node)
    }

    #[test]
    fn sequential_reads_advance_the_cursor() {
        let mut f = file_with(b"abcdef");
        let mut buf = [0u8; 3];
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(f.tell(), 3);
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(f.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_and_tell() {
        let mut f = file_with(b"abcdef");
        f.seek(4);
        assert_eq!(f.tell(), 4);
        let mut buf = [0u8; 4];
        assert_eq!(f.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn reopen_rewinds_duplicate_preserves() {
        let mut f = file_with(b"abcdef");
        let mut buf = [0u8; 2];
        f.read(&mut buf).unwrap();
        assert_eq!(f.tell(), 2);

        assert_eq!(f.reopen().tell(), 0);
        let mut dup = f.duplicate();
        assert_eq!(dup.tell(), 2);

        // Cursors are independent after duplication.
        dup.read(&mut buf).unwrap();
        assert_eq!(dup.tell(), 4);
        assert_eq!(f.tell(), 2);
    }

    #[test]
    fn handles_share_the_inode_contents() {
        let mut f = file_with(b"000000");
        let dup = f.duplicate();
        f.write(b"zz").unwrap();

        let mut buf = [0u8; 6];
        dup.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"zz0000");
    }
}
