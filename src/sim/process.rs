//! Per-environment handle onto the simulated machine
//!
//! A `Process` is what user code running in one environment holds: every
//! call it makes is issued as that environment, and `EnvId::SELF` resolves
//! to it.

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{ForkError, KernResult};
use crate::memlayout::PGSIZE;
use crate::mmu::{Pde, Pte, PteFlags};
use crate::runtime::Runtime;
use crate::sim::machine::Machine;
use crate::syscall::{EnvInfo, EnvPriority, EnvStatus, ForkOutcome, SelfView, Syscalls};
use crate::trap::{UTrapframe, UpcallEntry};
use crate::types::{EnvId, VirtAddr, Vpn};

/// Machine shared by every process handle
pub type SharedMachine = Arc<Mutex<Machine>>;

/// User-side handle for one environment
pub struct Process {
    machine: SharedMachine,
    env: EnvId,
    /// Next `exofork` returns `Child` (this handle is a resumed child)
    resume_as_child: bool,
}

impl Process {
    /// Create a new top-level environment and return its handle
    pub fn boot(machine: &SharedMachine) -> KernResult<Self> {
        let env = machine.lock().create_env()?;
        Ok(Self::attach(machine, env))
    }

    /// Handle for an existing environment
    pub fn attach(machine: &SharedMachine, env: EnvId) -> Self {
        Self {
            machine: Arc::clone(machine),
            env,
            resume_as_child: false,
        }
    }

    /// Handle for a child created by `exofork`, resuming inside that call
    pub fn resume_child(&self, child: EnvId) -> Self {
        Self {
            machine: Arc::clone(&self.machine),
            env: child,
            resume_as_child: true,
        }
    }

    pub fn env(&self) -> EnvId {
        self.env
    }

    pub fn machine(&self) -> &SharedMachine {
        &self.machine
    }

    /// Whether this environment still exists
    pub fn is_alive(&self) -> bool {
        self.machine.lock().env_info(self.env).is_some()
    }
}

impl Syscalls for Process {
    fn getenvid(&self) -> EnvId {
        self.env
    }

    fn exofork(&mut self) -> KernResult<ForkOutcome> {
        if self.resume_as_child {
            self.resume_as_child = false;
            return Ok(ForkOutcome::Child);
        }
        self.machine
            .lock()
            .sys_exofork(self.env)
            .map(ForkOutcome::Parent)
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> KernResult<()> {
        self.machine.lock().sys_page_alloc(self.env, env, va, perm)
    }

    fn page_map(
        &mut self,
        src: EnvId,
        src_va: VirtAddr,
        dst: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> KernResult<()> {
        self.machine
            .lock()
            .sys_page_map(self.env, src, src_va, dst, dst_va, perm)
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> KernResult<()> {
        self.machine.lock().sys_page_unmap(self.env, env, va)
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> KernResult<()> {
        self.machine.lock().sys_env_set_status(self.env, env, status)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry) -> KernResult<()> {
        self.machine
            .lock()
            .sys_env_set_pgfault_upcall(self.env, env, entry)
    }

    fn env_set_priority(&mut self, env: EnvId, priority: EnvPriority) -> KernResult<()> {
        self.machine
            .lock()
            .sys_env_set_priority(self.env, env, priority)
    }

    fn env_destroy(&mut self, env: EnvId) -> KernResult<()> {
        self.machine.lock().sys_env_destroy(self.env, env)
    }
}

impl SelfView for Process {
    fn uvpt(&self, vpn: Vpn) -> Pte {
        self.machine.lock().pte(self.env, vpn).unwrap_or_default()
    }

    fn uvpd(&self, pdx: usize) -> Pde {
        self.machine.lock().pde(self.env, pdx)
    }

    fn uenv(&self, slot: usize) -> Option<EnvInfo> {
        self.machine.lock().env_at_slot(slot)
    }

    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), UTrapframe> {
        self.machine.lock().user_read(self.env, va, buf)
    }

    fn write(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), UTrapframe> {
        self.machine.lock().user_write(self.env, va, data)
    }
}

// ============================================================================
// Faulting Loads and Stores
// ============================================================================

impl Runtime<Process> {
    /// Store `data` at `va`, taking page faults the way hardware would
    ///
    /// A fault is delivered to the kernel and then to the registered
    /// handler, after which the store is retried. The environment is
    /// destroyed if the kernel cannot deliver the fault, the handler fails,
    /// or the same fault repeats.
    pub fn store(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), ForkError> {
        self.access(|process| process.write(va, data))
    }

    /// Load into `buf` from `va`, taking page faults the way hardware would
    pub fn load(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), ForkError> {
        self.access(|process| process.read(va, buf))
    }

    fn access<F>(&mut self, mut op: F) -> Result<(), ForkError>
    where
        F: FnMut(&mut Process) -> Result<(), UTrapframe>,
    {
        let mut previous: Option<UTrapframe> = None;
        loop {
            let utf = match op(self.kernel_mut()) {
                Ok(()) => return Ok(()),
                Err(utf) => utf,
            };

            let env = self.kernel().env();
            self.kernel().machine.lock().deliver_fault(env, &utf)?;

            if previous == Some(utf) {
                return Err(self.panic(ForkError::Unhandled {
                    va: utf.fault_va,
                    err: utf.err.bits(),
                }));
            }
            if let Err(err) = self.handle_fault(&utf) {
                return Err(self.panic(err));
            }
            previous = Some(utf);
        }
    }

    /// Map `data` at page-aligned `va` as fresh memory, read-only unless
    /// `writable` (a minimal program loader)
    pub fn load_segment(&mut self, va: VirtAddr, data: &[u8], writable: bool) -> Result<(), ForkError> {
        let pages = data.len().div_ceil(PGSIZE).max(1);
        let kernel = self.kernel_mut();
        for i in 0..pages {
            let page = va.offset(i * PGSIZE);
            kernel
                .page_alloc(EnvId::SELF, page, PteFlags::USER_RW)
                .map_err(ForkError::sys("sys_page_alloc"))?;
        }
        kernel
            .write(va, data)
            .map_err(|f| ForkError::MemoryFault { va: f.fault_va })?;
        if !writable {
            for i in 0..pages {
                let page = va.offset(i * PGSIZE);
                kernel
                    .page_map(EnvId::SELF, page, EnvId::SELF, page, PteFlags::P | PteFlags::U)
                    .map_err(ForkError::sys("sys_page_map"))?;
            }
        }
        Ok(())
    }
}
