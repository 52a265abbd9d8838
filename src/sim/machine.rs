//! In-memory exokernel
//!
//! Implements the kernel side of every primitive the fork layer consumes,
//! with the same argument checks a real kernel makes, plus the user
//! load/store path that raises page faults.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use log::{debug, warn};

use crate::error::{ForkError, KernError, KernResult};
use crate::memlayout::{uxstack_bottom, NENV, PGSIZE, UTOP};
use crate::mmu::{FrameNumber, Pde, Pte, PteFlags};
use crate::sim::frame::FrameTable;
use crate::syscall::{EnvInfo, EnvPriority, EnvStatus};
use crate::trap::{FaultCode, UTrapframe, UpcallEntry};
use crate::types::{EnvId, VirtAddr, Vpn};

// ============================================================================
// Configuration
// ============================================================================

/// Size of the simulated machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Usable environment slots (at most `NENV`)
    pub nenv: usize,
    /// Physical frames
    pub npages: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            nenv: NENV,
            npages: 1024,
        }
    }
}

// ============================================================================
// Failure Injection
// ============================================================================

/// Kernel primitive, for failure injection and accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOp {
    Exofork,
    PageAlloc,
    PageMap,
    PageUnmap,
    EnvSetStatus,
    EnvSetPgfaultUpcall,
    EnvSetPriority,
    EnvDestroy,
}

/// One-shot failure: the next matching call fails with `err`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailPoint {
    pub op: SyscallOp,
    /// Only match calls targeting this address (destination for maps)
    pub va: Option<VirtAddr>,
    pub err: KernError,
}

impl FailPoint {
    pub fn new(op: SyscallOp, err: KernError) -> Self {
        Self { op, va: None, err }
    }

    pub fn at(mut self, va: VirtAddr) -> Self {
        self.va = Some(va);
        self
    }

    fn matches(&self, op: SyscallOp, va: Option<VirtAddr>) -> bool {
        self.op == op && (self.va.is_none() || self.va == va)
    }
}

// ============================================================================
// Environments
// ============================================================================

struct Env {
    info: EnvInfo,
    pgdir: BTreeMap<Vpn, Pte>,
    /// Directory entries, created on first use and kept
    pdes: BTreeSet<usize>,
    upcall: Option<UpcallEntry>,
    faults: u64,
}

impl Env {
    fn new(id: EnvId, parent_id: EnvId) -> Self {
        Self {
            info: EnvInfo {
                id,
                parent_id,
                status: EnvStatus::NotRunnable,
                priority: EnvPriority::Default,
            },
            pgdir: BTreeMap::new(),
            pdes: BTreeSet::new(),
            upcall: None,
            faults: 0,
        }
    }
}

/// The simulated machine: environments and physical memory
pub struct Machine {
    config: MachineConfig,
    envs: Vec<Option<Env>>,
    generations: Vec<u32>,
    frames: FrameTable,
    failpoints: Vec<FailPoint>,
    syscalls: u64,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let nenv = config.nenv.min(NENV);
        let mut envs = Vec::with_capacity(nenv);
        envs.resize_with(nenv, || None);
        Self {
            config: MachineConfig { nenv, ..config },
            envs,
            generations: alloc::vec![0; nenv],
            frames: FrameTable::new(config.npages),
            failpoints: Vec::new(),
            syscalls: 0,
        }
    }

    pub fn config(&self) -> MachineConfig {
        self.config
    }

    /// Create a runnable environment with no parent and an empty address
    /// space (what the kernel does for the first user program)
    pub fn create_env(&mut self) -> KernResult<EnvId> {
        let id = self.env_alloc(EnvId::SELF)?;
        self.env_mut(id)?.info.status = EnvStatus::Runnable;
        Ok(id)
    }

    /// Arm a one-shot failure
    pub fn inject(&mut self, point: FailPoint) {
        self.failpoints.push(point);
    }

    fn check_failpoint(&mut self, op: SyscallOp, va: Option<VirtAddr>) -> KernResult<()> {
        self.syscalls += 1;
        match self.failpoints.iter().position(|p| p.matches(op, va)) {
            Some(index) => {
                let point = self.failpoints.remove(index);
                debug!("injected failure: {:?} -> {}", op, point.err);
                Err(point.err)
            }
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Environment table
    // ------------------------------------------------------------------------

    fn env_alloc(&mut self, parent: EnvId) -> KernResult<EnvId> {
        let slot = self
            .envs
            .iter()
            .position(Option::is_none)
            .ok_or(KernError::NoFreeEnv)?;
        self.generations[slot] += 1;
        let id = EnvId::new(self.generations[slot], slot);
        self.envs[slot] = Some(Env::new(id, parent));
        Ok(id)
    }

    fn env(&self, id: EnvId) -> KernResult<&Env> {
        match self.envs.get(id.slot()) {
            Some(Some(env)) if env.info.id == id => Ok(env),
            _ => Err(KernError::BadEnv),
        }
    }

    fn env_mut(&mut self, id: EnvId) -> KernResult<&mut Env> {
        match self.envs.get_mut(id.slot()) {
            Some(Some(env)) if env.info.id == id => Ok(env),
            _ => Err(KernError::BadEnv),
        }
    }

    /// Resolve `envid` as seen by `caller`
    ///
    /// With `checkperm`, the target must be the caller or its immediate
    /// child.
    fn envid2env(&self, caller: EnvId, envid: EnvId, checkperm: bool) -> KernResult<EnvId> {
        let caller_env = self.env(caller)?;
        if envid.is_self() {
            return Ok(caller);
        }
        let target = self.env(envid)?;
        if checkperm && target.info.id != caller && target.info.parent_id != caller_env.info.id {
            return Err(KernError::BadEnv);
        }
        Ok(envid)
    }

    fn check_user_va(va: VirtAddr) -> KernResult<()> {
        if va.as_usize() >= UTOP || !va.is_page_aligned() {
            return Err(KernError::Inval);
        }
        Ok(())
    }

    fn check_perm(perm: PteFlags) -> KernResult<()> {
        if !perm.contains(PteFlags::P | PteFlags::U) || !PteFlags::SYSCALL.contains(perm) {
            return Err(KernError::Inval);
        }
        Ok(())
    }

    /// Install `frame` at `va`, replacing whatever was there
    fn page_insert(&mut self, id: EnvId, va: VirtAddr, frame: FrameNumber, perm: PteFlags) -> KernResult<()> {
        self.env(id)?;
        // Take the new reference first so remapping a frame onto itself
        // never frees it.
        self.frames.incref(frame);
        let env = self.env_mut(id)?;
        let old = env.pgdir.insert(va.vpn(), Pte::new(frame, perm));
        env.pdes.insert(va.pdx());
        if let Some(old) = old {
            self.frames.decref(old.frame());
        }
        Ok(())
    }

    fn page_remove(&mut self, id: EnvId, va: VirtAddr) -> KernResult<()> {
        let old = self.env_mut(id)?.pgdir.remove(&va.vpn());
        if let Some(old) = old {
            self.frames.decref(old.frame());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // System calls
    // ------------------------------------------------------------------------

    pub fn sys_exofork(&mut self, caller: EnvId) -> KernResult<EnvId> {
        self.check_failpoint(SyscallOp::Exofork, None)?;
        self.env(caller)?;
        let id = self.env_alloc(caller)?;
        debug!("[{}] new env {}", caller, id);
        Ok(id)
    }

    pub fn sys_page_alloc(&mut self, caller: EnvId, envid: EnvId, va: VirtAddr, perm: PteFlags) -> KernResult<()> {
        self.check_failpoint(SyscallOp::PageAlloc, Some(va))?;
        let target = self.envid2env(caller, envid, true)?;
        Self::check_user_va(va)?;
        Self::check_perm(perm)?;
        let frame = self.frames.alloc()?;
        self.page_insert(target, va, frame, perm)
    }

    pub fn sys_page_map(
        &mut self,
        caller: EnvId,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> KernResult<()> {
        self.check_failpoint(SyscallOp::PageMap, Some(dst_va))?;
        let src = self.envid2env(caller, src, true)?;
        let dst = self.envid2env(caller, dst, true)?;
        Self::check_user_va(src_va)?;
        Self::check_user_va(dst_va)?;
        Self::check_perm(perm)?;

        let pte = match self.env(src)?.pgdir.get(&src_va.vpn()) {
            Some(pte) if pte.is_present() => *pte,
            _ => return Err(KernError::Inval),
        };
        if perm.contains(PteFlags::W) && !pte.flags().contains(PteFlags::W) {
            return Err(KernError::Inval);
        }
        self.page_insert(dst, dst_va, pte.frame(), perm)
    }

    pub fn sys_page_unmap(&mut self, caller: EnvId, envid: EnvId, va: VirtAddr) -> KernResult<()> {
        self.check_failpoint(SyscallOp::PageUnmap, Some(va))?;
        let target = self.envid2env(caller, envid, true)?;
        Self::check_user_va(va)?;
        self.page_remove(target, va)
    }

    pub fn sys_env_set_status(&mut self, caller: EnvId, envid: EnvId, status: EnvStatus) -> KernResult<()> {
        self.check_failpoint(SyscallOp::EnvSetStatus, None)?;
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(KernError::Inval);
        }
        let target = self.envid2env(caller, envid, true)?;
        self.env_mut(target)?.info.status = status;
        Ok(())
    }

    pub fn sys_env_set_pgfault_upcall(&mut self, caller: EnvId, envid: EnvId, entry: UpcallEntry) -> KernResult<()> {
        self.check_failpoint(SyscallOp::EnvSetPgfaultUpcall, None)?;
        let target = self.envid2env(caller, envid, true)?;
        self.env_mut(target)?.upcall = Some(entry);
        Ok(())
    }

    pub fn sys_env_set_priority(&mut self, caller: EnvId, envid: EnvId, priority: EnvPriority) -> KernResult<()> {
        self.check_failpoint(SyscallOp::EnvSetPriority, None)?;
        let target = self.envid2env(caller, envid, true)?;
        self.env_mut(target)?.info.priority = priority;
        Ok(())
    }

    pub fn sys_env_destroy(&mut self, caller: EnvId, envid: EnvId) -> KernResult<()> {
        self.check_failpoint(SyscallOp::EnvDestroy, None)?;
        let target = self.envid2env(caller, envid, true)?;
        self.env_free(target);
        Ok(())
    }

    fn env_free(&mut self, id: EnvId) {
        if self.env(id).is_err() {
            return;
        }
        if let Some(env) = self.envs.get_mut(id.slot()).and_then(Option::take) {
            for pte in env.pgdir.values() {
                self.frames.decref(pte.frame());
            }
            debug!("free env {}", id);
        }
    }

    // ------------------------------------------------------------------------
    // User memory and fault delivery
    // ------------------------------------------------------------------------

    /// Load from `id`'s memory through its page tables
    pub fn user_read(&self, id: EnvId, va: VirtAddr, buf: &mut [u8]) -> Result<(), UTrapframe> {
        let mut done = 0;
        while done < buf.len() {
            let cur = va.offset(done);
            let frame = self.user_frame(id, cur, false)?;
            let off = cur.page_offset();
            let n = (PGSIZE - off).min(buf.len() - done);
            let data = self
                .frames
                .data(frame)
                .ok_or(UTrapframe::new(cur, FaultCode::U))?;
            buf[done..done + n].copy_from_slice(&data[off..off + n]);
            done += n;
        }
        Ok(())
    }

    /// Store into `id`'s memory through its page tables
    ///
    /// Every page is checked before any byte is written, so a faulting
    /// store leaves memory untouched.
    pub fn user_write(&mut self, id: EnvId, va: VirtAddr, data: &[u8]) -> Result<(), UTrapframe> {
        let mut targets = Vec::new();
        let mut done = 0;
        while done < data.len() {
            let cur = va.offset(done);
            let frame = self.user_frame(id, cur, true)?;
            let off = cur.page_offset();
            let n = (PGSIZE - off).min(data.len() - done);
            targets.push((frame, off, done, n));
            done += n;
        }
        for (frame, off, start, n) in targets {
            if let Some(page) = self.frames.data_mut(frame) {
                page[off..off + n].copy_from_slice(&data[start..start + n]);
            }
        }
        Ok(())
    }

    fn user_frame(&self, id: EnvId, va: VirtAddr, write: bool) -> Result<FrameNumber, UTrapframe> {
        let mut err = FaultCode::U;
        if write {
            err |= FaultCode::WR;
        }
        if va.as_usize() >= UTOP {
            return Err(UTrapframe::new(va, err));
        }
        let pte = self
            .env(id)
            .ok()
            .and_then(|env| env.pgdir.get(&va.vpn()).copied())
            .unwrap_or_default();
        if !pte.is_present() {
            return Err(UTrapframe::new(va, err));
        }
        err |= FaultCode::PR;
        if !pte.flags().contains(PteFlags::U) || (write && !pte.flags().contains(PteFlags::W)) {
            return Err(UTrapframe::new(va, err));
        }
        Ok(pte.frame())
    }

    /// Kernel side of a user page fault
    ///
    /// The environment is destroyed when it has no upcall or no writable
    /// exception stack; otherwise the fault may be handed to its handler.
    pub fn deliver_fault(&mut self, id: EnvId, utf: &UTrapframe) -> Result<(), ForkError> {
        let unhandled = ForkError::Unhandled {
            va: utf.fault_va,
            err: utf.err.bits(),
        };
        let env = self.env_mut(id).map_err(|_| unhandled)?;
        env.faults += 1;

        let uxstack_ok = env
            .pgdir
            .get(&uxstack_bottom().vpn())
            .is_some_and(|pte| pte.flags().contains(PteFlags::USER_RW));
        if env.upcall.is_none() || !uxstack_ok {
            warn!("[{}] user fault va {} err {:#x}: no handler", id, utf.fault_va, utf.err.bits());
            self.env_free(id);
            return Err(unhandled);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------------

    /// Page table entry as `id` sees it through `uvpt`
    pub fn pte(&self, id: EnvId, vpn: Vpn) -> Option<Pte> {
        self.env(id).ok()?.pgdir.get(&vpn).copied()
    }

    /// Directory entry as `id` sees it through `uvpd`
    pub fn pde(&self, id: EnvId, pdx: usize) -> Pde {
        match self.env(id) {
            Ok(env) if env.pdes.contains(&pdx) => Pte::new(0, PteFlags::USER_RW),
            _ => Pte::EMPTY,
        }
    }

    /// All mappings of `id`, in address order
    pub fn mappings(&self, id: EnvId) -> Vec<(Vpn, Pte)> {
        match self.env(id) {
            Ok(env) => env.pgdir.iter().map(|(vpn, pte)| (*vpn, *pte)).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        self.env(id).ok().map(|env| env.info)
    }

    /// Environment table record by slot
    pub fn env_at_slot(&self, slot: usize) -> Option<EnvInfo> {
        self.envs.get(slot)?.as_ref().map(|env| env.info)
    }

    /// Live environments, in slot order
    pub fn envs(&self) -> impl Iterator<Item = EnvInfo> + '_ {
        self.envs.iter().flatten().map(|env| env.info)
    }

    pub fn upcall(&self, id: EnvId) -> Option<UpcallEntry> {
        self.env(id).ok()?.upcall
    }

    /// Page faults delivered to `id`
    pub fn faults(&self, id: EnvId) -> u64 {
        self.env(id).map(|env| env.faults).unwrap_or(0)
    }

    /// Copy out `id`'s memory without permission checks
    pub fn peek(&self, id: EnvId, va: VirtAddr, buf: &mut [u8]) -> KernResult<()> {
        let env = self.env(id)?;
        let mut done = 0;
        while done < buf.len() {
            let cur = va.offset(done);
            let pte = env.pgdir.get(&cur.vpn()).ok_or(KernError::Fault)?;
            let data = self.frames.data(pte.frame()).ok_or(KernError::Fault)?;
            let off = cur.page_offset();
            let n = (PGSIZE - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&data[off..off + n]);
            done += n;
        }
        Ok(())
    }

    pub fn frame_refs(&self, frame: FrameNumber) -> u32 {
        self.frames.refs(frame)
    }

    pub fn frames_in_use(&self) -> usize {
        self.frames.in_use()
    }

    pub fn frames_total(&self) -> usize {
        self.frames.capacity()
    }

    /// System calls issued so far
    pub fn syscalls(&self) -> u64 {
        self.syscalls
    }

    /// Frames mapped writable (and not COW) by more than one environment
    pub fn single_writer_violations(&self) -> Vec<FrameNumber> {
        let mut writers: BTreeMap<FrameNumber, BTreeSet<EnvId>> = BTreeMap::new();
        for env in self.envs.iter().flatten() {
            for pte in env.pgdir.values() {
                let flags = pte.flags();
                if flags.contains(PteFlags::W) && !flags.is_cow() {
                    writers.entry(pte.frame()).or_default().insert(env.info.id);
                }
            }
        }
        writers
            .into_iter()
            .filter(|(_, envs)| envs.len() > 1)
            .map(|(frame, _)| frame)
            .collect()
    }
}
