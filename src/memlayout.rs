//! User address-space layout
//!
//! Fixed addresses shared by the kernel and every environment. The user
//! half ends at `UTOP`; the exception stack is the single page just below
//! `UXSTACKTOP`, and `PFTEMP` is the scratch page the fault resolver maps
//! while copying.
//!
//! ```text
//!    UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                        |     user exception stack     |  PGSIZE
//!                        +------------------------------+ 0xeebff000
//!                        |         empty guard          |  PGSIZE
//!           USTACKTOP -> +------------------------------+ 0xeebfe000
//!                        |      normal user stack       |
//!                        +------------------------------+
//!                        ~                              ~
//!               UTEXT -> +------------------------------+ 0x00800000
//!              PFTEMP -> |       fault scratch page     |  PGSIZE
//!                        +------------------------------+
//!               UTEMP -> +------------------------------+ 0x00400000
//! ```

use crate::types::VirtAddr;

// ============================================================================
// Paging Geometry
// ============================================================================

/// Page size in bytes
pub const PGSIZE: usize = 4096;

/// log2(PGSIZE)
pub const PGSHIFT: usize = 12;

/// Page table entries per page table
pub const NPTENTRIES: usize = 1024;

/// Bytes mapped by one page directory entry
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;

/// Shift of the page directory index within an address
pub const PDXSHIFT: usize = 22;

// ============================================================================
// Environment Table
// ============================================================================

/// log2 of the environment table size
pub const LOG2NENV: usize = 10;

/// Environment table size
pub const NENV: usize = 1 << LOG2NENV;

/// Generation bits start here in an environment id
pub const ENVGENSHIFT: u32 = 12;

// ============================================================================
// Fixed User Addresses
// ============================================================================

/// Read-only environment table
pub const UENVS: usize = 0xEEC0_0000;

/// Top of user-accessible memory
pub const UTOP: usize = UENVS;

/// Top of the one-page user exception stack
pub const UXSTACKTOP: usize = UTOP;

/// Top of the normal user stack (one guard page below the exception stack)
pub const USTACKTOP: usize = UTOP - 2 * PGSIZE;

/// Where user programs are linked
pub const UTEXT: usize = 2 * PTSIZE;

/// Temporary mapping area for user code
pub const UTEMP: usize = PTSIZE;

/// Scratch page the fault resolver copies through
pub const PFTEMP: usize = UTEMP + PTSIZE - PGSIZE;

/// Bottom of the exception stack; the fork duplication loop stops here
pub const fn uxstack_bottom() -> VirtAddr {
    VirtAddr::new(UXSTACKTOP - PGSIZE)
}

pub const fn pftemp() -> VirtAddr {
    VirtAddr::new(PFTEMP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_ordering() {
        assert!(PFTEMP < UTEXT);
        assert!(UTEXT < USTACKTOP);
        assert!(USTACKTOP < UXSTACKTOP - PGSIZE);
        assert_eq!(UXSTACKTOP, UTOP);
    }

    #[test]
    fn test_layout_alignment() {
        assert!(pftemp().is_page_aligned());
        assert!(uxstack_bottom().is_page_aligned());
        assert_eq!(PTSIZE, 1 << PDXSHIFT);
        assert_eq!(PGSIZE, 1 << PGSHIFT);
    }
}
