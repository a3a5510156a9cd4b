//! Kernel error types.
//!
//! Every fallible kernel operation returns [`KernelResult`]. The syscall
//! layer flattens these into POSIX-style return values (-1 / false); inside
//! the kernel they propagate with `?`. Invariant violations (corrupted
//! thread descriptors, double-running, self-deadlock) are assertions, not
//! errors.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A finite kernel resource ran out (frames, swap slots, tids, fd
    /// slots).
    OutOfResource { resource: &'static str },

    /// A caller-supplied argument was rejected (bad user pointer,
    /// non-child tid, unaligned mapping, fd out of range).
    InvalidArgument { what: &'static str },

    /// An access violated page protection (write to a read-only page,
    /// kernel address from user mode).
    Protection { addr: usize },

    /// A named resource does not exist (fd absent, file missing, no such
    /// page).
    NotFound { resource: &'static str },

    /// The target thread has already terminated.
    DeadThread { tid: u64 },

    /// A mapping already exists at the given user page.
    AlreadyMapped { addr: usize },

    /// A page fault could not be resolved by demand paging or stack
    /// growth.
    UnresolvedFault { addr: usize },
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfResource { resource } => {
                write!(f, "out of {}", resource)
            }
            Self::InvalidArgument { what } => write!(f, "invalid argument: {}", what),
            Self::Protection { addr } => write!(f, "protection violation at {:#x}", addr),
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::DeadThread { tid } => write!(f, "thread {} is dead", tid),
            Self::AlreadyMapped { addr } => write!(f, "page at {:#x} already mapped", addr),
            Self::UnresolvedFault { addr } => write!(f, "unresolved page fault at {:#x}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        extern crate std;
        use std::string::ToString;

        let e = KernelError::Protection { addr: 0x4000_0000 };
        assert_eq!(e.to_string(), "protection violation at 0x40000000");

        let e = KernelError::OutOfResource { resource: "frames" };
        assert_eq!(e.to_string(), "out of frames");
    }

    #[test]
    fn errors_compare_structurally() {
        assert_eq!(
            KernelError::NotFound { resource: "file" },
            KernelError::NotFound { resource: "file" }
        );
        assert_ne!(
            KernelError::AlreadyMapped { addr: 0x1000 },
            KernelError::AlreadyMapped { addr: 0x2000 }
        );
    }
}
