//! System call operations.
//!
//! The register-convention dispatch table lives in the architecture
//! layer; these are the operations it dispatches to, with kernel errors
//! flattened to POSIX-style return values. A syscall that touches user
//! memory through a bad pointer terminates the process with status -1,
//! after printing the usual exit line.

use alloc::vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::KernelResult;
use crate::fs;
use crate::mm::{mmap, vm};
use crate::process::{self, fd_table::FdEntry};
use crate::sched::thread::{self, Tid};

/// Tid value returned to user space on failure.
pub const TID_ERROR: i64 = -1;

static HALT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Terminate the calling process after an illegal user access.
fn fault_exit() -> i64 {
    process::exit(-1);
    -1
}

fn ok_or_minus_one(r: KernelResult<i64>) -> i64 {
    r.unwrap_or(-1)
}

/// Power off the machine. The actual poweroff belongs to the platform;
/// the core only records and reports the request.
pub fn sys_halt() {
    log::info!(target: "kernel", "halt requested, powering off");
    HALT_REQUESTED.store(true, Ordering::Release);
}

/// Whether `halt` has been requested.
pub fn halt_requested() -> bool {
    HALT_REQUESTED.load(Ordering::Acquire)
}

/// Terminate the calling process.
pub fn sys_exit(status: i32) {
    process::exit(status);
}

/// Clone the calling process. Returns the child tid, or [`TID_ERROR`].
pub fn sys_fork(name: &str) -> i64 {
    process::fork(name).map(|tid| tid.0 as i64).unwrap_or(TID_ERROR)
}

/// Replace the process image. Returns only on failure.
pub fn sys_exec(path: &str) -> i64 {
    match process::exec(path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Wait for a direct child; returns its exit status, or -1.
pub fn sys_wait(tid: i64) -> i64 {
    if tid <= 0 {
        return -1;
    }
    ok_or_minus_one(process::wait(Tid(tid as u64)).map(|s| s as i64))
}

/// Create a file. Returns success.
pub fn sys_create(path: &str, initial_size: u64) -> bool {
    fs::create(path, initial_size).is_ok()
}

/// Remove a file. Returns success.
pub fn sys_remove(path: &str) -> bool {
    fs::remove(path).is_ok()
}

/// Open a file, returning a new descriptor or -1.
pub fn sys_open(path: &str) -> i64 {
    let file = match fs::open(path) {
        Ok(f) => f,
        Err(_) => return -1,
    };
    let curr = thread::current();
    let fd = curr.fd_table.lock().install(file);
    ok_or_minus_one(fd.map(|fd| fd as i64))
}

/// Size of the file behind a descriptor, or -1.
pub fn sys_filesize(fd: i32) -> i64 {
    let curr = thread::current();
    let table = curr.fd_table.lock();
    table.file(fd).map(|f| f.length() as i64).unwrap_or(-1)
}

/// Read up to `len` bytes from a descriptor into user memory at `buf`.
/// Returns the byte count, or -1.
pub fn sys_read(fd: i32, buf: usize, len: usize) -> i64 {
    let curr = thread::current();

    match curr.fd_table.lock().entry(fd) {
        Some(FdEntry::Stdin) => return 0, // no input driver in the core
        Some(FdEntry::Stdout) => return -1,
        Some(FdEntry::File(_)) => {}
        None => return -1,
    }

    let data = {
        let mut table = curr.fd_table.lock();
        let file = match table.file_mut(fd) {
            Some(f) => f,
            None => return -1,
        };
        let mut tmp = vec![0u8; len];
        match file.read(&mut tmp) {
            Ok(n) => {
                tmp.truncate(n);
                tmp
            }
            Err(_) => return -1,
        }
    };

    match vm::user_write(&curr, buf, &data) {
        Ok(()) => data.len() as i64,
        Err(_) => fault_exit(),
    }
}

/// Write `len` bytes from user memory at `buf` to a descriptor. Returns
/// the byte count, or -1. Descriptor 1 goes to the console.
pub fn sys_write(fd: i32, buf: usize, len: usize) -> i64 {
    let curr = thread::current();

    let entry = match curr.fd_table.lock().entry(fd) {
        Some(FdEntry::Stdin) | None => return -1,
        Some(e) => e,
    };

    let mut data = vec![0u8; len];
    if vm::user_read(&curr, buf, &mut data).is_err() {
        return fault_exit();
    }

    match entry {
        FdEntry::Stdout => {
            log::info!(target: "console", "{}", core::str::from_utf8(&data).unwrap_or("<binary>"));
            len as i64
        }
        FdEntry::File(_) => {
            let mut table = curr.fd_table.lock();
            let file = match table.file_mut(fd) {
                Some(f) => f,
                None => return -1,
            };
            match file.write(&data) {
                Ok(n) => n as i64,
                Err(_) => -1,
            }
        }
        FdEntry::Stdin => -1,
    }
}

/// Move a descriptor's cursor.
pub fn sys_seek(fd: i32, position: u64) {
    let curr = thread::current();
    let mut table = curr.fd_table.lock();
    if let Some(file) = table.file_mut(fd) {
        file.seek(position);
    }
}

/// Current cursor of a descriptor, or -1.
pub fn sys_tell(fd: i32) -> i64 {
    let curr = thread::current();
    let table = curr.fd_table.lock();
    table.file(fd).map(|f| f.tell() as i64).unwrap_or(-1)
}

/// Close a descriptor.
pub fn sys_close(fd: i32) -> i64 {
    let curr = thread::current();
    let closed = curr.fd_table.lock().close(fd);
    ok_or_minus_one(closed.map(|_| 0))
}

/// Map a file into user memory. Returns the mapped address, 0 on
/// failure.
pub fn sys_mmap(addr: usize, length: usize, writable: bool, fd: i32, offset: u64) -> usize {
    let curr = thread::current();
    let table = curr.fd_table.lock();
    let file = match table.file(fd) {
        Some(f) => f,
        None => return 0,
    };
    match mmap::do_mmap(&curr, addr, length, writable, file, offset) {
        Ok(mapped) => mapped,
        Err(_) => 0,
    }
}

/// Unmap the mapping starting at `addr`.
pub fn sys_munmap(addr: usize) {
    let curr = thread::current();
    let _ = mmap::do_munmap(&curr, addr);
}

#[cfg(test)]
pub(crate) fn reset() {
    HALT_REQUESTED.store(false, Ordering::Release);
}
