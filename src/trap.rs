//! User trap interface - page fault records and the fault upcall
//!
//! When an environment faults, the kernel switches it onto its exception
//! stack and enters the registered upcall with a `UTrapframe`. The upcall
//! trampoline hands the record to the environment's own handler and
//! resumes at the faulting instruction once the handler returns.

use bitflags::bitflags;

use crate::types::VirtAddr;

bitflags! {
    /// Page fault error code
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FaultCode: u32 {
        /// Protection violation (page was present)
        const PR = 0x1;
        /// Fault caused by a write
        const WR = 0x2;
        /// Fault occurred in user mode
        const U = 0x4;
    }
}

/// Fault record delivered to the user-level handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    /// Faulting virtual address
    pub fault_va: VirtAddr,
    /// Error code
    pub err: FaultCode,
}

impl UTrapframe {
    pub fn new(fault_va: VirtAddr, err: FaultCode) -> Self {
        Self { fault_va, err }
    }

    pub fn is_write(&self) -> bool {
        self.err.contains(FaultCode::WR)
    }

    pub fn page_was_present(&self) -> bool {
        self.err.contains(FaultCode::PR)
    }
}

/// Entry point the kernel enters on a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpcallEntry(pub usize);

/// The page fault trampoline every forked environment is given
pub const PGFAULT_UPCALL: UpcallEntry = UpcallEntry(0x0080_0020);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_code_queries() {
        let utf = UTrapframe::new(VirtAddr::new(0x1000), FaultCode::PR | FaultCode::WR | FaultCode::U);
        assert!(utf.is_write());
        assert!(utf.page_was_present());

        let utf = UTrapframe::new(VirtAddr::new(0x1000), FaultCode::U);
        assert!(!utf.is_write());
        assert!(!utf.page_was_present());
    }
}
