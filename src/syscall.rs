//! Kernel interface consumed by the fork layer
//!
//! `Syscalls` is the privileged-primitive contract: each call is
//! synchronous and either succeeds or reports a `KernError`. `SelfView` is
//! the read-only window every environment has onto its own page tables
//! and the environment table, plus ordinary loads and stores.
//!
//! In both traits `EnvId::SELF` names the calling environment.

use crate::error::KernResult;
use crate::mmu::{Pde, Pte, PteFlags};
use crate::trap::{UTrapframe, UpcallEntry};
use crate::types::{EnvId, VirtAddr, Vpn};

// ============================================================================
// Environment State
// ============================================================================

/// Environment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum EnvStatus {
    /// Slot unused
    #[default]
    Free = 0,
    /// Eligible to run
    Runnable = 2,
    /// Exists but must not be scheduled
    NotRunnable = 4,
}

/// Scheduling priority (stored by the kernel, never consulted by fork)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u32)]
pub enum EnvPriority {
    Low = 0,
    #[default]
    Default = 1,
    High = 2,
}

impl EnvPriority {
    pub fn value(self) -> u32 {
        self as u32
    }
}

/// One record of the read-only environment table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub priority: EnvPriority,
}

/// Result of a fork-like call, which returns once in each environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Returned in the parent, carrying the child's id
    Parent(EnvId),
    /// Returned in the child
    Child,
}

impl ForkOutcome {
    pub fn child_id(self) -> Option<EnvId> {
        match self {
            ForkOutcome::Parent(id) => Some(id),
            ForkOutcome::Child => None,
        }
    }
}

// ============================================================================
// System Calls
// ============================================================================

/// Privileged kernel primitives
pub trait Syscalls {
    /// Id of the calling environment
    fn getenvid(&self) -> EnvId;

    /// Create a paused register-state copy of the caller with an empty
    /// address space
    ///
    /// Returns `Parent(child)` in the caller; the child, once resumed,
    /// observes `Child` from the same call.
    fn exofork(&mut self) -> KernResult<ForkOutcome>;

    /// Map a fresh zeroed frame at `va` in `env`
    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> KernResult<()>;

    /// Map the frame at `src_va` in `src` at `dst_va` in `dst`
    fn page_map(
        &mut self,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> KernResult<()>;

    /// Remove the mapping at `va` in `env`, if any
    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> KernResult<()>;

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> KernResult<()>;

    /// Register the entry point the kernel enters on a fault in `env`
    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry) -> KernResult<()>;

    fn env_set_priority(&mut self, env: EnvId, priority: EnvPriority) -> KernResult<()>;

    fn env_destroy(&mut self, env: EnvId) -> KernResult<()>;
}

// ============================================================================
// Read-only Self View
// ============================================================================

/// An environment's view of itself
pub trait SelfView {
    /// Entry `vpn` of the linear page-table view (`uvpt`); empty when the
    /// covering directory entry is absent
    fn uvpt(&self, vpn: Vpn) -> Pte;

    /// Entry `pdx` of the page directory view (`uvpd`)
    fn uvpd(&self, pdx: usize) -> Pde;

    /// Slot of the read-only environment table
    fn uenv(&self, slot: usize) -> Option<EnvInfo>;

    /// Load bytes from the caller's memory, faulting like the hardware would
    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), UTrapframe>;

    /// Store bytes into the caller's memory, faulting like the hardware would
    fn write(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), UTrapframe>;
}
