//! # Simulated Kernel
//!
//! An exokernel-style kernel core that runs in-process: an environment
//! registry with generation-checked identifiers, per-environment two-level
//! address spaces over a reference-counted frame pool, a validating syscall
//! gate, rendezvous IPC and page-fault upcalls that let user code implement
//! copy-on-write itself.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing system behavior without hardware:
//! - Runs under `cargo test`
//! - Deterministic (single CPU, harness-driven scheduling)
//! - Inspectable (all state is accessible)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! The kernel supplies mechanism only. Policy such as how to fork, what to
//! do on a write to a shared page, or how long to retry a send lives in
//! user code (see the `user_lib` crate), which talks to this kernel through
//! the same `kernel_api` traits a hardware kernel would sit behind.
//!
//! ## Running user code
//!
//! There is no instruction stream. A harness "runs" an environment by
//! taking a [`UserEnv`] for it with [`SimulatedKernel::run`] and calling
//! syscalls and memory accesses on it. Switching to a different
//! environment's [`UserEnv`] is a context switch.

pub mod address_space;
pub mod config;
pub mod console;
pub mod env;
pub mod fault_injection;
pub mod ipc;
pub mod phys;
pub mod sched;
pub mod syscall_gate;
pub mod test_utils;
pub mod trap;
pub mod user_env;

pub use config::{ConfigError, KernelConfig};
pub use console::{BufferConsole, Console};
pub use env::{Env, EnvTable, IpcMailbox};
pub use phys::{Frame, FrameNumber, PhysMem};
pub use sched::{RoundRobin, Scheduler};
pub use syscall_gate::{SyscallAuditLog, SyscallEvent, SyscallOutcome};
pub use user_env::UserEnv;

use core_types::{EnvId, EnvStatus, PteFlags, Trapframe, VirtAddr, PGSIZE, USTACKTOP, UTEXT};
use fault_injection::{FaultInjector, FaultPlan};
use kernel_api::{FaultUpcall, SysError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only per-environment summary for diagnostic tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSummary {
    pub id: EnvId,
    pub parent: EnvId,
    pub status: EnvStatus,
    pub runs: u32,
    pub mapped_pages: usize,
    pub pgfault_upcall: Option<VirtAddr>,
    pub ipc_recving: bool,
}

/// One leaf mapping, as seen from outside the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub frame: FrameNumber,
    pub flags: PteFlags,
    /// Mappings sharing the frame, across all environments
    pub refs: usize,
}

/// Simulated kernel state
///
/// This maintains all the state needed to simulate a kernel.
/// Unlike a real kernel, this state is directly accessible for testing.
pub struct SimulatedKernel {
    config: KernelConfig,
    phys: PhysMem,
    envs: EnvTable,
    /// Environment on the CPU, if any
    curenv: Option<EnvId>,
    scheduler: Box<dyn Scheduler>,
    console: Box<dyn Console>,
    /// Fault upcalls by the user address they are loaded at
    user_text: BTreeMap<VirtAddr, FaultUpcall>,
    syscall_audit: SyscallAuditLog,
}

impl SimulatedKernel {
    /// Creates a new simulated kernel with the default configuration
    pub fn new() -> Self {
        Self::build(KernelConfig::default())
    }

    /// Creates a kernel after checking `config`
    ///
    /// A table larger than the id layout can address is rejected here
    /// rather than surfacing later as aliased ids.
    pub fn with_config(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: KernelConfig) -> Self {
        Self {
            phys: PhysMem::new(config.phys_frames),
            envs: EnvTable::new(config.max_envs),
            curenv: None,
            scheduler: Box::new(RoundRobin),
            console: Box::new(BufferConsole::new()),
            user_text: BTreeMap::new(),
            syscall_audit: SyscallAuditLog::new(),
            config,
        }
    }

    /// Applies a fault plan to physical frame allocation
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.phys.set_fault_injector(FaultInjector::new(plan));
        self
    }

    pub fn with_console(mut self, console: impl Console + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn phys(&self) -> &PhysMem {
        &self.phys
    }

    pub fn envs(&self) -> &EnvTable {
        &self.envs
    }

    /// Live environment with exactly this id
    pub fn env(&self, id: EnvId) -> Option<&Env> {
        self.envs.get(id)
    }

    pub fn curenv(&self) -> Option<EnvId> {
        self.curenv
    }

    /// Returns the syscall audit log (test-only)
    pub fn syscall_audit(&self) -> &SyscallAuditLog {
        &self.syscall_audit
    }

    /// Clears the syscall audit log (test-only)
    pub fn clear_syscall_audit(&mut self) {
        self.syscall_audit.clear();
    }

    /// Makes fault upcalls callable at the given user addresses
    pub fn load_user_text(&mut self, entries: &[(VirtAddr, FaultUpcall)]) {
        for (va, upcall) in entries {
            self.user_text.insert(*va, *upcall);
        }
    }

    /// Boots a parentless environment with one stack page
    ///
    /// The environment starts runnable, with its saved instruction pointer at
    /// `UTEXT` and its stack pointer at `USTACKTOP`.
    pub fn create_env(&mut self) -> Result<EnvId, SysError> {
        let id = self.envs.alloc(EnvId::CURRENT, &mut self.phys)?;

        let stack = match self.phys.alloc(true) {
            Some(frame) => frame,
            None => {
                self.envs.free(id, EnvId::CURRENT);
                return Err(SysError::NoMem);
            }
        };
        let mapped = syscall_gate::space_of_mut(&mut self.envs, id).and_then(|space| {
            space.insert(&mut self.phys, USTACKTOP - PGSIZE, stack, PteFlags::user_write())
        });
        if let Err(err) = mapped {
            self.envs.free(id, EnvId::CURRENT);
            return Err(err);
        }

        if let Some(env) = self.envs.get_mut(id) {
            env.tf = Trapframe::user(UTEXT, USTACKTOP);
            env.set_status(EnvStatus::Runnable);
        }
        Ok(id)
    }

    /// Puts `id` on the CPU and hands back its execution context
    pub fn run(&mut self, id: EnvId) -> Result<UserEnv<'_>, SysError> {
        self.ensure_running(id)?;
        Ok(UserEnv::new(self, id))
    }

    /// Gives the CPU to whichever environment the scheduler picks next
    ///
    /// Returns the environment now running, `None` if nothing can run.
    pub fn sched_yield(&mut self) -> Option<EnvId> {
        self.schedule_after(self.curenv)
    }

    fn schedule_after(&mut self, current: Option<EnvId>) -> Option<EnvId> {
        match self.scheduler.pick_next(&self.envs, current) {
            Some(next) => {
                self.env_run(next);
                Some(next)
            }
            None => {
                log::warn!("No runnable environments in the system!");
                let still_running = self
                    .curenv
                    .and_then(|id| self.envs.get(id))
                    .is_some_and(|env| env.status() == EnvStatus::Running);
                if !still_running {
                    self.curenv = None;
                }
                None
            }
        }
    }

    /// Context switch to `id`
    fn env_run(&mut self, id: EnvId) {
        if let Some(prev) = self.curenv.filter(|prev| *prev != id) {
            if let Some(env) = self.envs.get_mut(prev) {
                if env.status() == EnvStatus::Running {
                    env.set_status(EnvStatus::Runnable);
                }
            }
        }
        if let Some(env) = self.envs.get_mut(id) {
            env.mark_run();
            self.curenv = Some(id);
        }
    }

    /// Makes `id` the running environment if it is allowed to run
    pub(crate) fn ensure_running(&mut self, id: EnvId) -> Result<(), SysError> {
        let status = self.envs.get(id).ok_or(SysError::BadEnv)?.status();
        match status {
            EnvStatus::Running if self.curenv == Some(id) => Ok(()),
            EnvStatus::Runnable => {
                self.env_run(id);
                Ok(())
            }
            _ => Err(SysError::BadEnv),
        }
    }

    /// Tears down `id`; `by` is the environment responsible, for the log
    ///
    /// Destroying the running environment reschedules.
    pub fn env_destroy(&mut self, id: EnvId, by: EnvId) {
        if self.envs.free(id, by).is_none() {
            return;
        }
        if self.curenv == Some(id) {
            self.curenv = None;
            self.schedule_after(Some(id));
        }
    }

    /// The mapping at `va` in `env`, if any
    pub fn page(&self, env: EnvId, va: VirtAddr) -> Option<PageInfo> {
        let pte = self.envs.get(env)?.space()?.lookup(va)?;
        Some(PageInfo {
            frame: pte.frame().number(),
            flags: pte.flags(),
            refs: pte.frame().ref_count(),
        })
    }

    /// Bytes at `va` in `env`, read regardless of permissions
    pub fn peek(&self, env: EnvId, va: VirtAddr, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.envs.get(env)?.space()?.read_bytes(va, &mut buf).ok()?;
        Some(buf)
    }

    /// Snapshot of every live environment
    pub fn env_summaries(&self) -> Vec<EnvSummary> {
        self.envs
            .iter()
            .map(|env| EnvSummary {
                id: env.id(),
                parent: env.parent(),
                status: env.status(),
                runs: env.runs(),
                mapped_pages: env.space().map_or(0, |space| space.mapped_pages()),
                pgfault_upcall: env.pgfault_upcall(),
                ipc_recving: env.ipc().recving,
            })
            .collect()
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}
