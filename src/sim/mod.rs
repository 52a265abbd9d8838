//! Simulated exokernel
//!
//! A complete in-memory kernel behind the `Syscalls` and `SelfView`
//! traits: reference-counted frames, per-environment page tables, the
//! environment table and page fault delivery. Used by the demo binary and
//! the integration tests.

pub mod frame;
pub mod machine;
pub mod process;

use alloc::sync::Arc;

use spin::Mutex;

pub use machine::{FailPoint, Machine, MachineConfig, SyscallOp};
pub use process::{Process, SharedMachine};

/// Power on a machine that process handles can share
pub fn boot(config: MachineConfig) -> SharedMachine {
    Arc::new(Mutex::new(Machine::new(config)))
}
