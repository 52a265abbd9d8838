//! exofork - user-level copy-on-write fork for an exokernel
//!
//! The kernel exports a handful of primitives (create an empty
//! environment, map and unmap pages, register a page fault upcall, set an
//! environment's status). Everything else about `fork` happens in user
//! space: the parent shares its pages with the child copy-on-write, and a
//! user-level page fault handler gives each side a private copy on its
//! first write.
//!
//! With the `sim` feature the crate also carries an in-memory kernel that
//! implements those primitives, plus a small inspection monitor.

#![no_std]

extern crate alloc;

// Core types
pub mod memlayout;
pub mod mmu;
pub mod types;

pub mod console;
pub mod error;
pub mod runtime;
pub mod syscall;
pub mod trap;

// Copy-on-write fork
pub mod cow;

#[cfg(feature = "sim")]
pub mod monitor;
#[cfg(feature = "sim")]
pub mod sim;

pub use cow::{duppage, fork, pgfault, sfork};
pub use error::{ForkError, KernError, KernResult};
pub use mmu::{Pte, PteFlags};
pub use runtime::Runtime;
pub use syscall::{EnvInfo, EnvPriority, EnvStatus, ForkOutcome, SelfView, Syscalls};
pub use trap::{FaultCode, UTrapframe};
pub use types::{EnvId, VirtAddr, Vpn};
