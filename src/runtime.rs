//! Per-environment user runtime
//!
//! Holds the state a user environment keeps about itself: the kernel
//! handle it issues calls through, its cached identity (`this_env`) and its
//! registered page fault handler. A child created by `fork` starts with a
//! verbatim copy of this state and must correct `this_env` before relying
//! on it.

use log::{debug, error};

use crate::error::ForkError;
use crate::memlayout::uxstack_bottom;
use crate::mmu::PteFlags;
use crate::syscall::{EnvInfo, SelfView, Syscalls};
use crate::trap::{UTrapframe, PGFAULT_UPCALL};
use crate::types::EnvId;

/// User-level page fault handler
pub type PgfaultHandler<K> = fn(&mut Runtime<K>, &UTrapframe) -> Result<(), ForkError>;

/// Execution context of one environment
pub struct Runtime<K> {
    kernel: K,
    this_env: EnvId,
    pgfault_handler: Option<PgfaultHandler<K>>,
}

impl<K: Syscalls + SelfView> Runtime<K> {
    /// Start-up for a freshly loaded environment
    pub fn new(kernel: K) -> Self {
        let this_env = kernel.getenvid();
        Self {
            kernel,
            this_env,
            pgfault_handler: None,
        }
    }

    /// State a child resumes with after `exofork`: everything inherited
    /// verbatim from this runtime, including the now-stale `this_env`
    pub fn continuation(&self, kernel: K) -> Self {
        Self {
            kernel,
            this_env: self.this_env,
            pgfault_handler: self.pgfault_handler,
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    /// Cached identity of this environment
    pub fn this_env(&self) -> EnvId {
        self.this_env
    }

    pub(crate) fn set_this_env(&mut self, id: EnvId) {
        self.this_env = id;
    }

    /// Record of this environment in the read-only environment table
    pub fn thisenv(&self) -> Option<EnvInfo> {
        self.kernel.uenv(self.this_env.slot())
    }

    pub fn pgfault_handler(&self) -> Option<PgfaultHandler<K>> {
        self.pgfault_handler
    }

    /// Register the user-level page fault handler
    ///
    /// The first registration also gives this environment an exception
    /// stack and points the kernel at the fault trampoline; later calls only
    /// swap the handler.
    pub fn set_pgfault_handler(&mut self, handler: PgfaultHandler<K>) -> Result<(), ForkError> {
        if self.pgfault_handler.is_none() {
            self.kernel
                .page_alloc(EnvId::SELF, uxstack_bottom(), PteFlags::USER_RW)
                .map_err(ForkError::sys("sys_page_alloc"))?;
            self.kernel
                .env_set_pgfault_upcall(EnvId::SELF, PGFAULT_UPCALL)
                .map_err(ForkError::sys("sys_env_set_pgfault_upcall"))?;
            debug!("[{}] exception stack at {}", self.this_env, uxstack_bottom());
        }
        self.pgfault_handler = Some(handler);
        Ok(())
    }

    /// Body of the fault trampoline: run the registered handler
    pub fn handle_fault(&mut self, utf: &UTrapframe) -> Result<(), ForkError> {
        match self.pgfault_handler {
            Some(handler) => handler(self, utf),
            None => Err(ForkError::NoHandler { va: utf.fault_va }),
        }
    }

    /// Destroy this environment
    pub fn exit(&mut self) {
        if let Err(err) = self.kernel.env_destroy(EnvId::SELF) {
            error!("[{}] sys_env_destroy: {}", self.this_env, err);
        }
    }

    /// Terminate this environment with a diagnostic, handing the error back
    pub fn panic(&mut self, err: ForkError) -> ForkError {
        error!("[{}] user panic: {}", self.this_env, err);
        self.exit();
        err
    }
}
