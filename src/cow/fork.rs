//! Fork orchestration
//!
//! The order of the parent's steps matters: the child is made runnable
//! only after its address space, exception stack and fault upcall are all
//! in place, because a fault taken before that could not be resolved.

use log::{debug, info, warn};

use crate::cow::{duppage, pgfault};
use crate::error::ForkError;
use crate::memlayout::{uxstack_bottom, NPTENTRIES};
use crate::mmu::PteFlags;
use crate::runtime::Runtime;
use crate::syscall::{EnvStatus, ForkOutcome, SelfView, Syscalls};
use crate::trap::PGFAULT_UPCALL;
use crate::types::{EnvId, Vpn};

/// User-level fork with copy-on-write
///
/// Returns `Parent(child)` in the parent and `Child` in the child. On
/// failure the child, if one was created, is never marked runnable.
pub fn fork<K: Syscalls + SelfView>(rt: &mut Runtime<K>) -> Result<ForkOutcome, ForkError> {
    rt.set_pgfault_handler(pgfault::<K>)?;

    let child = match rt.kernel_mut().exofork().map_err(ForkError::sys("sys_exofork"))? {
        ForkOutcome::Child => {
            // The cached identity was copied from the parent.
            let me = rt.kernel().getenvid();
            rt.set_this_env(me);
            return Ok(ForkOutcome::Child);
        }
        ForkOutcome::Parent(child) => child,
    };

    debug!("[{}] exofork -> {}", rt.this_env(), child);

    if let Err(err) = populate(rt, child) {
        warn!("[{}] fork of {} failed: {}", rt.this_env(), child, err);
        if let Err(destroy_err) = rt.kernel_mut().env_destroy(child) {
            warn!("[{}] could not reclaim {}: {}", rt.this_env(), child, destroy_err);
        }
        return Err(err);
    }

    info!("[{}] forked {}", rt.this_env(), child);
    Ok(ForkOutcome::Parent(child))
}

/// Shared-memory fork
///
/// Not supported: always fails without touching the kernel.
pub fn sfork<K: Syscalls + SelfView>(_rt: &mut Runtime<K>) -> Result<ForkOutcome, ForkError> {
    Err(ForkError::NotImplemented("sfork"))
}

/// Parent side of fork, run while the child is still not runnable
fn populate<K: Syscalls + SelfView>(rt: &mut Runtime<K>, child: EnvId) -> Result<(), ForkError> {
    let shared = duplicate_address_space(rt, child)?;
    debug!("[{}] shared {} pages with {}", rt.this_env(), shared, child);

    let kernel = rt.kernel_mut();
    kernel
        .page_alloc(child, uxstack_bottom(), PteFlags::USER_RW)
        .map_err(ForkError::sys("sys_page_alloc"))?;
    kernel
        .env_set_pgfault_upcall(child, PGFAULT_UPCALL)
        .map_err(ForkError::sys("sys_env_set_pgfault_upcall"))?;
    kernel
        .env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::sys("sys_env_set_status"))?;
    Ok(())
}

/// Apply `duppage` to every present user page below the exception stack
///
/// Directory entries that are absent or not user-accessible are skipped
/// whole. Returns the number of pages duplicated.
fn duplicate_address_space<K: Syscalls + SelfView>(
    rt: &mut Runtime<K>,
    child: EnvId,
) -> Result<usize, ForkError> {
    let limit = uxstack_bottom().vpn();
    let mut count = 0;

    for pdx in 0..=limit.pdx() {
        if !rt.kernel().uvpd(pdx).is_user_present() {
            continue;
        }
        let first = Vpn::first_of_pdx(pdx);
        let end = Vpn((first.0 + NPTENTRIES).min(limit.0));
        let mut vpn = first;
        while vpn < end {
            if rt.kernel().uvpt(vpn).is_user_present() {
                duppage(rt, child, vpn)?;
                count += 1;
            }
            vpn = vpn.next();
        }
    }

    Ok(count)
}
