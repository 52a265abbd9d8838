//! Error types for the kernel interface and the fork layer

use thiserror::Error;

use crate::types::VirtAddr;

/// Kernel error codes
///
/// System calls report failure as the negated code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum KernError {
    #[error("unspecified or unknown problem")]
    Unspecified = 1,

    #[error("bad environment")]
    BadEnv = 2,

    #[error("invalid parameter")]
    Inval = 3,

    #[error("out of memory")]
    NoMem = 4,

    #[error("out of environments")]
    NoFreeEnv = 5,

    #[error("segmentation fault")]
    Fault = 6,
}

impl KernError {
    /// Negative return code as seen at the system call boundary
    pub const fn code(self) -> i32 {
        -(self as i32)
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Unspecified),
            -2 => Some(Self::BadEnv),
            -3 => Some(Self::Inval),
            -4 => Some(Self::NoMem),
            -5 => Some(Self::NoFreeEnv),
            -6 => Some(Self::Fault),
            _ => None,
        }
    }
}

pub type KernResult<T> = Result<T, KernError>;

/// Failures of the fork layer
///
/// None of these is recoverable below the top-level `fork` call: the
/// fault resolver terminates the environment, and `fork` hands the error
/// back with the child left not runnable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    #[error("page fault at {va} is not a write (err {err:#x})")]
    NotWriteFault { va: VirtAddr, err: u32 },

    #[error("write fault at {va} on a page that is not copy-on-write (pte {pte:#010x})")]
    NotCopyOnWrite { va: VirtAddr, pte: u32 },

    #[error("page directory entry for {va} is not present")]
    DirectoryAbsent { va: VirtAddr },

    #[error("no page fault handler registered for fault at {va}")]
    NoHandler { va: VirtAddr },

    #[error("unhandled page fault at {va} (err {err:#x})")]
    Unhandled { va: VirtAddr, err: u32 },

    #[error("memory fault at {va} while copying page")]
    MemoryFault { va: VirtAddr },

    #[error("{op}: {err}")]
    Syscall { op: &'static str, err: KernError },

    #[error("{0} not implemented")]
    NotImplemented(&'static str),
}

impl ForkError {
    /// Wrap a failed system call, naming the operation
    pub fn sys(op: &'static str) -> impl FnOnce(KernError) -> ForkError {
        move |err| ForkError::Syscall { op, err }
    }

    /// Kernel code carried by a system call failure
    pub fn kern_error(&self) -> Option<KernError> {
        match self {
            ForkError::Syscall { err, .. } => Some(*err),
            _ => None,
        }
    }
}
