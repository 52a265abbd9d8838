//! Per-page duplication into a child environment

use log::trace;

use crate::error::ForkError;
use crate::mmu::PteFlags;
use crate::runtime::Runtime;
use crate::syscall::{SelfView, Syscalls};
use crate::types::{EnvId, Vpn};

/// Map our page `vpn` into `envid` at the same address
///
/// A writable or copy-on-write page is mapped copy-on-write into the
/// child and then remapped copy-on-write into ourselves. The second map is
/// required even when our entry is already COW: until it happens we may
/// still hold a writable entry for a frame the child now shares.
/// Read-only pages are shared with their permissions unchanged.
pub fn duppage<K: Syscalls + SelfView>(
    rt: &mut Runtime<K>,
    envid: EnvId,
    vpn: Vpn,
) -> Result<(), ForkError> {
    let va = vpn.addr();
    let flags = rt.kernel().uvpt(vpn).flags();
    let kernel = rt.kernel_mut();

    if flags.is_logically_writable() {
        kernel
            .page_map(EnvId::SELF, va, envid, va, PteFlags::COW_SHARED)
            .map_err(ForkError::sys("sys_page_map"))?;
        kernel
            .page_map(EnvId::SELF, va, EnvId::SELF, va, PteFlags::COW_SHARED)
            .map_err(ForkError::sys("sys_page_map"))?;
        trace!("duppage {} -> {} cow", va, envid);
    } else {
        kernel
            .page_map(EnvId::SELF, va, envid, va, flags & PteFlags::SYSCALL)
            .map_err(ForkError::sys("sys_page_map"))?;
        trace!("duppage {} -> {} shared [{}]", va, envid, flags);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cow::mock::{Call, MockKernel};
    use crate::error::KernError;
    use crate::types::VirtAddr;

    const ME: EnvId = EnvId::new(1, 0);
    const CHILD: EnvId = EnvId::new(1, 1);

    fn runtime_with(va: usize, flags: PteFlags) -> Runtime<MockKernel> {
        let mut kernel = MockKernel::new(ME);
        kernel.map(va, flags);
        Runtime::new(kernel)
    }

    #[test]
    fn test_writable_page_is_cow_on_both_sides() {
        let mut rt = runtime_with(0x0080_1000, PteFlags::USER_RW);
        duppage(&mut rt, CHILD, Vpn(0x801)).unwrap();

        let va = VirtAddr::new(0x0080_1000);
        assert_eq!(
            rt.kernel().calls,
            [
                Call::PageMap(EnvId::SELF, va, CHILD, va, PteFlags::COW_SHARED),
                Call::PageMap(EnvId::SELF, va, EnvId::SELF, va, PteFlags::COW_SHARED),
            ]
        );
    }

    #[test]
    fn test_cow_page_is_remarked_in_parent() {
        let mut rt = runtime_with(0x0080_1000, PteFlags::COW_SHARED);
        duppage(&mut rt, CHILD, Vpn(0x801)).unwrap();

        let va = VirtAddr::new(0x0080_1000);
        assert_eq!(rt.kernel().calls.len(), 2);
        assert_eq!(
            rt.kernel().calls[1],
            Call::PageMap(EnvId::SELF, va, EnvId::SELF, va, PteFlags::COW_SHARED)
        );
    }

    #[test]
    fn test_read_only_page_keeps_permissions() {
        let flags = PteFlags::P | PteFlags::U | PteFlags::A;
        let mut rt = runtime_with(0x0080_0000, flags);
        duppage(&mut rt, CHILD, Vpn(0x800)).unwrap();

        let va = VirtAddr::new(0x0080_0000);
        assert_eq!(
            rt.kernel().calls,
            [Call::PageMap(EnvId::SELF, va, CHILD, va, PteFlags::P | PteFlags::U)]
        );
    }

    #[test]
    fn test_child_map_failure_skips_parent_remap() {
        let mut rt = runtime_with(0x0080_1000, PteFlags::USER_RW);
        rt.kernel_mut().fail_at = Some((0, KernError::NoMem));

        let err = duppage(&mut rt, CHILD, Vpn(0x801)).unwrap_err();
        assert_eq!(err.kern_error(), Some(KernError::NoMem));
        assert_eq!(rt.kernel().calls.len(), 1);
    }
}
