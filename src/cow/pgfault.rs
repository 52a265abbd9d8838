//! Copy-on-write fault resolution
//!
//! Runs on the faulting environment's exception stack. Only a write to a
//! present copy-on-write page is legitimate; anything else is a bug in the
//! program and is reported as an error the trampoline turns into
//! termination.

use alloc::vec;

use log::trace;

use crate::error::ForkError;
use crate::memlayout::{pftemp, PGSIZE};
use crate::mmu::PteFlags;
use crate::runtime::Runtime;
use crate::syscall::{SelfView, Syscalls};
use crate::trap::UTrapframe;
use crate::types::EnvId;

/// Replace the copy-on-write page under `utf.fault_va` with a private,
/// writable copy
///
/// Uses one new frame, staged at `PFTEMP`. The old mapping is superseded
/// by the final `sys_page_map`; the sibling's mapping of the old frame
/// stays copy-on-write.
pub fn pgfault<K: Syscalls + SelfView>(
    rt: &mut Runtime<K>,
    utf: &UTrapframe,
) -> Result<(), ForkError> {
    let va = utf.fault_va;

    if !utf.is_write() {
        return Err(ForkError::NotWriteFault {
            va,
            err: utf.err.bits(),
        });
    }

    let pte = rt.kernel().uvpt(va.vpn());
    if !pte.is_present() || !pte.flags().is_cow() {
        return Err(ForkError::NotCopyOnWrite { va, pte: pte.raw() });
    }

    if !rt.kernel().uvpd(va.pdx()).is_present() {
        return Err(ForkError::DirectoryAbsent { va });
    }

    let page = va.round_down();
    let scratch = pftemp();
    let kernel = rt.kernel_mut();

    kernel
        .page_alloc(EnvId::SELF, scratch, PteFlags::USER_RW)
        .map_err(ForkError::sys("sys_page_alloc"))?;

    let mut contents = vec![0u8; PGSIZE];
    kernel
        .read(page, &mut contents)
        .map_err(|f| ForkError::MemoryFault { va: f.fault_va })?;
    kernel
        .write(scratch, &contents)
        .map_err(|f| ForkError::MemoryFault { va: f.fault_va })?;

    kernel
        .page_map(EnvId::SELF, scratch, EnvId::SELF, page, PteFlags::USER_RW)
        .map_err(ForkError::sys("sys_page_map"))?;
    kernel
        .page_unmap(EnvId::SELF, scratch)
        .map_err(ForkError::sys("sys_page_unmap"))?;

    trace!("[{}] privatized {}", rt.this_env(), page);
    Ok(())
}
