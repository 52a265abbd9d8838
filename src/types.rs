//! Common types used across exofork
//!
//! Environment identifiers and the typed page/address arithmetic the
//! fork layer uses instead of raw pointer math.

use core::fmt;

use crate::memlayout::{ENVGENSHIFT, NENV, NPTENTRIES, PDXSHIFT, PGSHIFT, PGSIZE};

// ============================================================================
// Environment Identifiers
// ============================================================================

/// Environment identifier
///
/// Kernel-assigned ids carry a generation above `ENVGENSHIFT` and the
/// environment-table slot below it. The value 0 is reserved and means
/// "the calling environment" in every system call.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EnvId(pub u32);

impl EnvId {
    /// The calling environment
    pub const SELF: Self = Self(0);

    /// Build an id from a generation and a table slot
    pub const fn new(generation: u32, slot: usize) -> Self {
        Self((generation << ENVGENSHIFT) | (slot as u32 & (NENV as u32 - 1)))
    }

    /// Slot of this environment in the read-only environment table
    pub const fn slot(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    pub const fn generation(self) -> u32 {
        self.0 >> ENVGENSHIFT
    }

    pub const fn is_self(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ============================================================================
// Addresses and Page Numbers
// ============================================================================

/// User virtual address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Page containing this address
    pub const fn vpn(self) -> Vpn {
        Vpn(self.0 >> PGSHIFT)
    }

    /// Page directory index
    pub const fn pdx(self) -> usize {
        self.0 >> PDXSHIFT
    }

    /// Offset within the page
    pub const fn page_offset(self) -> usize {
        self.0 & (PGSIZE - 1)
    }

    pub const fn round_down(self) -> Self {
        Self(self.0 & !(PGSIZE - 1))
    }

    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    /// `offset`, or `None` if the address would wrap
    pub const fn checked_offset(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Virtual page number (`va >> PGSHIFT`), an index into the linear
/// page-table view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vpn(pub usize);

impl Vpn {
    /// First address of the page
    pub const fn addr(self) -> VirtAddr {
        VirtAddr(self.0 << PGSHIFT)
    }

    /// Page directory index covering this page
    pub const fn pdx(self) -> usize {
        self.0 / NPTENTRIES
    }

    /// First page covered by a page directory entry
    pub const fn first_of_pdx(pdx: usize) -> Self {
        Self(pdx * NPTENTRIES)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}
