//! Process lifecycle: exit, wait, fork, exec.
//!
//! Threads and processes share descriptors; a "process" is a thread with
//! user state (address space, FD table). The parent/child handshake uses
//! each child's `wait_sema`/`reap_sema` pair: the child announces its
//! death on `wait_sema` and then parks on `reap_sema` until the parent
//! has read its exit status, so the parent controls reap timing.

pub mod fd_table;

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::fs::{self, File};
use crate::mm::vm;
use crate::sched::thread::{self, Thread, Tid};

/// Hook that loads a program image into the current thread. The real
/// loader (ELF parsing, argument passing) lives outside the core.
pub type ProgramLoader = fn(&mut File, &Arc<Thread>) -> KernelResult<()>;

static LOADER: Mutex<Option<ProgramLoader>> = Mutex::new(None);

/// Register the program loader used by [`exec`].
pub fn set_program_loader(loader: ProgramLoader) {
    *LOADER.lock() = Some(loader);
}

/// Terminate the current process with the given status.
///
/// Prints the conventional termination line, closes the FD table,
/// destroys the address space (writing dirty file pages back), signals
/// the parent and parks until reaped, then dies.
pub fn exit(status: i32) {
    let curr = thread::current();
    curr.set_exit_status(status);
    log::info!(target: "process", "{}: exit({})", curr.name(), status);

    curr.fd_table.lock().close_all();
    vm::destroy_address_space(&curr);

    curr.wait_sema.up();
    if curr.parent.is_some() {
        curr.reap_sema.down();
    }
    thread::exit();
}

/// Wait for a direct child to exit and return its status.
///
/// Fails for non-children and for children already waited for. After a
/// successful wait the child may free itself.
pub fn wait(child: Tid) -> KernelResult<i32> {
    let curr = thread::current();
    if !curr.children.lock().contains(&child) {
        return Err(KernelError::NotFound { resource: "child" });
    }
    let child_thread = thread::get(child).ok_or(KernelError::DeadThread { tid: child.0 })?;

    child_thread.wait_sema.down();
    let status = child_thread.exit_status();
    curr.children.lock().retain(|&c| c != child);
    child_thread.reap_sema.up();
    Ok(status)
}

/// Clone the current process.
///
/// The child gets a duplicated FD table (private cursors) and a copy of
/// the supplemental page table per the copy rules in `vm`. On any
/// failure the half-built child is torn down and the parent is left
/// untouched.
pub fn fork(name: &str) -> KernelResult<Tid> {
    let parent = thread::current();

    // The child "returns" 0 from the fork boundary; with no user image to
    // resume in this core, that is an immediate clean exit.
    let child_tid = thread::create(name, parent.priority(), Box::new(|| exit(0)))?;
    let child = thread::get(child_tid).ok_or(KernelError::DeadThread { tid: child_tid.0 })?;

    match parent.fd_table.lock().duplicate() {
        Ok(table) => *child.fd_table.lock() = table,
        Err(e) => {
            thread::destroy_embryo(child_tid);
            return Err(e);
        }
    }

    if let Err(e) = vm::copy_address_space(&parent, &child) {
        vm::destroy_address_space(&child);
        thread::destroy_embryo(child_tid);
        return Err(e);
    }

    log::debug!(
        target: "process",
        "forked {} '{}' from {} '{}'",
        child_tid,
        name,
        parent.tid,
        parent.name()
    );
    Ok(child_tid)
}

/// Replace the current process image with the program at `path`.
///
/// The old address space is destroyed first; loading is delegated to the
/// registered [`ProgramLoader`]. Without a loader, exec fails and the
/// caller terminates the process.
pub fn exec(path: &str) -> KernelResult<()> {
    let curr = thread::current();
    let mut file = fs::open(path)?;

    vm::destroy_address_space(&curr);

    let loader = *LOADER.lock();
    match loader {
        Some(load) => load(&mut file, &curr),
        None => Err(KernelError::NotFound { resource: "program loader" }),
    }
}

#[cfg(test)]
pub(crate) fn reset() {
    *LOADER.lock() = None;
}
