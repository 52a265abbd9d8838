//! Page table entries and permission bits
//!
//! A `Pte` is the raw 32-bit entry an environment sees through its
//! read-only page-table view: a frame number above `PGSHIFT` and the
//! permission bits below it. `PTE_COW` lives in the bits the hardware
//! leaves to software and is tested independently of `W`.

use core::fmt;

use bitflags::bitflags;

use crate::memlayout::PGSHIFT;

bitflags! {
    /// Page table / page directory entry permission bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PteFlags: u32 {
        /// Present
        const P = 0x001;
        /// Writeable
        const W = 0x002;
        /// User
        const U = 0x004;
        /// Write-through
        const PWT = 0x008;
        /// Cache-disable
        const PCD = 0x010;
        /// Accessed
        const A = 0x020;
        /// Dirty
        const D = 0x040;
        /// Page size
        const PS = 0x080;
        /// Global
        const G = 0x100;
        /// Available for software use
        const AVAIL = 0xE00;
        /// Copy-on-write (one of the AVAIL bits)
        const COW = 0x800;
    }
}

impl PteFlags {
    /// Bits user environments may pass to page system calls
    pub const SYSCALL: Self = Self::from_bits_retain(0xE07);

    /// Mapping installed on both sides of a shared writable page
    pub const COW_SHARED: Self = Self::from_bits_retain(0x805);

    /// Private writable user mapping
    pub const USER_RW: Self = Self::from_bits_retain(0x007);

    pub fn is_cow(self) -> bool {
        self.contains(Self::COW)
    }

    /// Logically writable: hardware-writable or copy-on-write
    pub fn is_logically_writable(self) -> bool {
        self.intersects(Self::W | Self::COW)
    }
}

impl fmt::Display for PteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::P, "P"),
            (Self::W, "W"),
            (Self::U, "U"),
            (Self::A, "A"),
            (Self::D, "D"),
            (Self::COW, "COW"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// Physical frame number
pub type FrameNumber = u32;

/// Page table entry
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pte(u32);

/// Page directory entries share the entry format
pub type Pde = Pte;

impl Pte {
    pub const EMPTY: Self = Self(0);

    pub const fn new(frame: FrameNumber, flags: PteFlags) -> Self {
        Self((frame << PGSHIFT) | (flags.bits() & 0xFFF))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn frame(self) -> FrameNumber {
        self.0 >> PGSHIFT
    }

    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::P)
    }

    /// Present and reachable from user mode
    pub fn is_user_present(self) -> bool {
        self.flags().contains(PteFlags::P | PteFlags::U)
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pte({:#07x} [{}])", self.frame(), self.flags())
    }
}
