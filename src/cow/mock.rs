//! Recording kernel for unit tests
//!
//! Answers page-table queries from a small table and logs every system
//! call, so tests can assert exactly which calls a path made and in what
//! order.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use crate::error::{KernError, KernResult};
use crate::memlayout::PGSIZE;
use crate::mmu::{Pde, Pte, PteFlags};
use crate::syscall::{EnvInfo, EnvPriority, EnvStatus, ForkOutcome, SelfView, Syscalls};
use crate::trap::{FaultCode, UTrapframe, UpcallEntry};
use crate::types::{EnvId, VirtAddr, Vpn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Exofork,
    PageAlloc(EnvId, VirtAddr, PteFlags),
    PageMap(EnvId, VirtAddr, EnvId, VirtAddr, PteFlags),
    PageUnmap(EnvId, VirtAddr),
    SetStatus(EnvId, EnvStatus),
    SetUpcall(EnvId, UpcallEntry),
    SetPriority(EnvId, EnvPriority),
    Destroy(EnvId),
}

pub struct MockKernel {
    pub id: EnvId,
    pub ptes: BTreeMap<Vpn, Pte>,
    pub pdes: BTreeSet<usize>,
    pub calls: Vec<Call>,
    pub exofork_result: KernResult<ForkOutcome>,
    /// Fail the n-th system call (0-based) with the given error
    pub fail_at: Option<(usize, KernError)>,
}

impl MockKernel {
    pub fn new(id: EnvId) -> Self {
        Self {
            id,
            ptes: BTreeMap::new(),
            pdes: BTreeSet::new(),
            calls: Vec::new(),
            exofork_result: Ok(ForkOutcome::Parent(EnvId::new(1, 1))),
            fail_at: None,
        }
    }

    pub fn map(&mut self, va: usize, flags: PteFlags) {
        let va = VirtAddr::new(va);
        self.ptes.insert(va.vpn(), Pte::new(0x100 + va.vpn().0 as u32, flags));
        self.pdes.insert(va.pdx());
    }

    fn record(&mut self, call: Call) -> KernResult<()> {
        let index = self.calls.len();
        self.calls.push(call);
        match self.fail_at {
            Some((at, err)) if at == index => Err(err),
            _ => Ok(()),
        }
    }
}

impl Syscalls for MockKernel {
    fn getenvid(&self) -> EnvId {
        self.id
    }

    fn exofork(&mut self) -> KernResult<ForkOutcome> {
        self.record(Call::Exofork)?;
        self.exofork_result
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> KernResult<()> {
        self.record(Call::PageAlloc(env, va, perm))
    }

    fn page_map(
        &mut self,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> KernResult<()> {
        self.record(Call::PageMap(src, src_va, dst, dst_va, perm))
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> KernResult<()> {
        self.record(Call::PageUnmap(env, va))
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> KernResult<()> {
        self.record(Call::SetStatus(env, status))
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry) -> KernResult<()> {
        self.record(Call::SetUpcall(env, entry))
    }

    fn env_set_priority(&mut self, env: EnvId, priority: EnvPriority) -> KernResult<()> {
        self.record(Call::SetPriority(env, priority))
    }

    fn env_destroy(&mut self, env: EnvId) -> KernResult<()> {
        self.record(Call::Destroy(env))
    }
}

impl SelfView for MockKernel {
    fn uvpt(&self, vpn: Vpn) -> Pte {
        self.ptes.get(&vpn).copied().unwrap_or_default()
    }

    fn uvpd(&self, pdx: usize) -> Pde {
        if self.pdes.contains(&pdx) {
            Pte::new(0, PteFlags::USER_RW)
        } else {
            Pte::EMPTY
        }
    }

    fn uenv(&self, slot: usize) -> Option<EnvInfo> {
        (slot == self.id.slot()).then_some(EnvInfo {
            id: self.id,
            parent_id: EnvId::SELF,
            status: EnvStatus::Runnable,
            priority: EnvPriority::Default,
        })
    }

    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), UTrapframe> {
        match self.ptes.get(&va.vpn()) {
            Some(pte) if pte.is_user_present() && va.page_offset() + buf.len() <= PGSIZE => {
                buf.fill(pte.frame() as u8);
                Ok(())
            }
            _ => Err(UTrapframe::new(va, FaultCode::U)),
        }
    }

    fn write(&mut self, _va: VirtAddr, _data: &[u8]) -> Result<(), UTrapframe> {
        Ok(())
    }
}
