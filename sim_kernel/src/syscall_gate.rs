//! Syscall gate for the user/kernel boundary.
//!
//! Every request from an environment enters here, either as the raw
//! five-word wire form ([`SimulatedKernel::dispatch_raw`]) or already
//! decoded ([`SimulatedKernel::dispatch`]). The wire opcode is decoded into
//! the closed [`Syscall`] enum exactly once, at the outermost boundary; past
//! that point dispatch is an exhaustive match.
//!
//! Each handler validates all of its arguments before touching any state, so
//! a rejected call leaves the kernel exactly as it found it.

use crate::address_space::AddressSpace;
use crate::env::EnvTable;
use crate::SimulatedKernel;
use core_types::{EnvId, EnvStatus, PteFlags, Trapframe, VirtAddr, PGSIZE};
use kernel_api::{RawSyscall, SysError, Syscall, SyscallNo};
use serde::{Deserialize, Serialize};

/// How a syscall left the calling environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Completed; the value is also in the caller's saved `eax`
    Return(i32),
    /// The caller is parked until another environment wakes it
    Blocked,
    /// The caller no longer exists
    CallerDestroyed,
}

impl SyscallOutcome {
    /// The wire return value, if the call returned
    pub fn value(self) -> Option<i32> {
        match self {
            SyscallOutcome::Return(v) => Some(v),
            SyscallOutcome::Blocked | SyscallOutcome::CallerDestroyed => None,
        }
    }
}

/// Handler-level result before it is folded into a [`SyscallOutcome`]
pub(crate) enum Flow {
    Return(u32),
    Blocked,
    CallerDestroyed,
}

pub(crate) type HandlerResult = Result<Flow, SysError>;

/// Syscall audit event (for testing and verification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallEvent {
    /// Syscall was invoked
    Invoked { caller: EnvId, syscall: SyscallNo },
    /// Syscall returned a non-negative value
    Completed {
        caller: EnvId,
        syscall: SyscallNo,
        ret: u32,
    },
    /// Syscall was rejected with an error code
    Rejected {
        caller: EnvId,
        syscall: SyscallNo,
        error: SysError,
    },
    /// Caller parked waiting for a message
    Blocked { caller: EnvId, syscall: SyscallNo },
    /// Caller was destroyed by its own call
    CallerDestroyed { caller: EnvId, syscall: SyscallNo },
    /// Wire opcode outside the syscall table
    Unhandled { caller: EnvId, no: u32 },
}

impl SyscallEvent {
    pub fn caller(&self) -> EnvId {
        match self {
            SyscallEvent::Invoked { caller, .. }
            | SyscallEvent::Completed { caller, .. }
            | SyscallEvent::Rejected { caller, .. }
            | SyscallEvent::Blocked { caller, .. }
            | SyscallEvent::CallerDestroyed { caller, .. }
            | SyscallEvent::Unhandled { caller, .. } => *caller,
        }
    }
}

/// Audit log for syscall operations.
#[derive(Debug, Clone, Default)]
pub struct SyscallAuditLog {
    events: Vec<SyscallEvent>,
}

impl SyscallAuditLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: SyscallEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SyscallEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

/// `va` is a page-aligned user address
pub(crate) fn check_user_page(va: VirtAddr) -> Result<(), SysError> {
    if va.is_user() && va.is_page_aligned() {
        Ok(())
    } else {
        Err(SysError::Inval)
    }
}

/// `perm` is acceptable for a mapping at `va`
///
/// The exception stack must stay privately writable, so COW is refused there.
pub(crate) fn check_perm(va: VirtAddr, perm: PteFlags) -> Result<(), SysError> {
    if !perm.is_valid_user_perm() || (perm.is_cow() && va.is_exception_stack()) {
        return Err(SysError::Inval);
    }
    Ok(())
}

pub(crate) fn space_of(envs: &EnvTable, id: EnvId) -> Result<&AddressSpace, SysError> {
    envs.get(id)
        .and_then(|env| env.space.as_ref())
        .ok_or(SysError::BadEnv)
}

pub(crate) fn space_of_mut(envs: &mut EnvTable, id: EnvId) -> Result<&mut AddressSpace, SysError> {
    envs.get_mut(id)
        .and_then(|env| env.space.as_mut())
        .ok_or(SysError::BadEnv)
}

impl SimulatedKernel {
    /// Decodes and executes a wire-format syscall
    ///
    /// The result is written to the caller's saved `eax` as well as returned.
    pub fn dispatch_raw(&mut self, caller: EnvId, raw: RawSyscall) -> SyscallOutcome {
        let call = match raw.decode() {
            Ok(call) => call,
            Err(err) => {
                log::warn!("[{}] unhandled syscall {}", caller, raw.no);
                self.audit(SyscallEvent::Unhandled {
                    caller,
                    no: raw.no,
                });
                self.set_return(caller, err.code());
                return SyscallOutcome::Return(err.code());
            }
        };

        let outcome = self.dispatch(caller, call);
        if let SyscallOutcome::Return(value) = outcome {
            self.set_return(caller, value);
        }
        outcome
    }

    /// Executes a decoded syscall on behalf of the running environment
    pub fn dispatch(&mut self, caller: EnvId, call: Syscall) -> SyscallOutcome {
        let syscall = call.number();

        let running = self.curenv == Some(caller)
            && self
                .envs
                .get(caller)
                .is_some_and(|env| env.status() == EnvStatus::Running);
        if !running {
            log::warn!("[{}] syscall {} from an environment not on the cpu", caller, syscall);
            self.audit(SyscallEvent::Rejected {
                caller,
                syscall,
                error: SysError::BadEnv,
            });
            return SyscallOutcome::Return(SysError::BadEnv.code());
        }

        log::trace!("[{}] syscall {:?}", caller, call);
        self.audit(SyscallEvent::Invoked { caller, syscall });

        let result = match call {
            Syscall::Cputs { va, len } => self.sys_cputs(caller, va, len),
            Syscall::Cgetc => Ok(self.sys_cgetc()),
            Syscall::GetEnvId => Ok(Flow::Return(caller.to_raw() as u32)),
            Syscall::EnvDestroy { env } => self.sys_env_destroy(caller, env),
            Syscall::PageAlloc { env, va, perm } => self.sys_page_alloc(caller, env, va, perm),
            Syscall::PageMap {
                src_env,
                src_va,
                dst_env,
                dst_va,
                perm,
            } => self.sys_page_map(caller, src_env, src_va, dst_env, dst_va, perm),
            Syscall::PageUnmap { env, va } => self.sys_page_unmap(caller, env, va),
            Syscall::Exofork => self.sys_exofork(caller),
            Syscall::EnvSetStatus { env, status } => self.sys_env_set_status(caller, env, status),
            Syscall::EnvSetPgfaultUpcall { env, entry } => {
                self.sys_env_set_pgfault_upcall(caller, env, entry)
            }
            Syscall::Yield => Ok(self.sys_yield()),
            Syscall::IpcTrySend {
                env,
                value,
                src_va,
                perm,
            } => self.sys_ipc_try_send(caller, env, value, src_va, perm),
            Syscall::IpcRecv { dst_va } => self.sys_ipc_recv(caller, dst_va),
            Syscall::EnvSetTrapframe { env, tf } => self.sys_env_set_trapframe(caller, env, tf),
        };

        match result {
            Ok(Flow::Return(ret)) => {
                self.audit(SyscallEvent::Completed {
                    caller,
                    syscall,
                    ret,
                });
                SyscallOutcome::Return(ret as i32)
            }
            Ok(Flow::Blocked) => {
                self.audit(SyscallEvent::Blocked { caller, syscall });
                SyscallOutcome::Blocked
            }
            Ok(Flow::CallerDestroyed) => {
                self.audit(SyscallEvent::CallerDestroyed { caller, syscall });
                SyscallOutcome::CallerDestroyed
            }
            Err(error) => {
                log::debug!("[{}] {} failed: {}", caller, syscall, error);
                self.audit(SyscallEvent::Rejected {
                    caller,
                    syscall,
                    error,
                });
                SyscallOutcome::Return(error.code())
            }
        }
    }

    pub(crate) fn audit(&mut self, event: SyscallEvent) {
        if self.config.audit_syscalls {
            self.syscall_audit.record(event);
        }
    }

    fn set_return(&mut self, caller: EnvId, value: i32) {
        if let Some(env) = self.envs.get_mut(caller) {
            env.tf.regs.eax = value as u32;
        }
    }

    /// Destroys `caller` for handing the kernel memory it may not touch
    pub(crate) fn user_mem_violation(&mut self, caller: EnvId, va: VirtAddr) -> Flow {
        log::warn!(
            "[{}] user_mem_check assertion failure for va {}",
            caller,
            va
        );
        self.env_destroy(caller, caller);
        Flow::CallerDestroyed
    }

    /// Prints `[va, va + len)` one validated page at a time
    ///
    /// Output of the pages before a bad one has already reached the console
    /// when the caller is destroyed.
    fn sys_cputs(&mut self, caller: EnvId, va: VirtAddr, len: u32) -> HandlerResult {
        let Some(end) = va.as_u32().checked_add(len) else {
            return Ok(self.user_mem_violation(caller, va));
        };

        let mut cur = va.as_u32();
        while cur < end {
            let page_end = (VirtAddr(cur).round_down().as_u32())
                .saturating_add(PGSIZE)
                .min(end);
            let chunk_len = page_end - cur;
            let space = space_of(&self.envs, caller)?;
            if let Err(bad) = space.check_user_range(VirtAddr(cur), chunk_len, PteFlags::USER) {
                return Ok(self.user_mem_violation(caller, bad));
            }
            let mut chunk = vec![0u8; chunk_len as usize];
            if let Err(bad) = space.read_bytes(VirtAddr(cur), &mut chunk) {
                return Ok(self.user_mem_violation(caller, bad));
            }
            self.console.write(&chunk);
            cur = page_end;
        }
        Ok(Flow::Return(0))
    }

    fn sys_cgetc(&mut self) -> Flow {
        Flow::Return(self.console.read_nonblocking().map_or(0, u32::from))
    }

    fn sys_env_destroy(&mut self, caller: EnvId, env: EnvId) -> HandlerResult {
        let target = self.envs.resolve(env, caller, true)?;
        if target == caller {
            log::info!("[{}] exiting gracefully", caller);
        } else {
            log::info!("[{}] destroying {}", caller, target);
        }
        self.env_destroy(target, caller);

        if target == caller {
            Ok(Flow::CallerDestroyed)
        } else {
            Ok(Flow::Return(0))
        }
    }

    fn sys_page_alloc(
        &mut self,
        caller: EnvId,
        env: EnvId,
        va: VirtAddr,
        perm: PteFlags,
    ) -> HandlerResult {
        let target = self.envs.resolve(env, caller, true)?;
        check_user_page(va)?;
        check_perm(va, perm)?;

        let frame = self.phys.alloc(true).ok_or(SysError::NoMem)?;
        // a failed insert drops `frame`, which frees it
        space_of_mut(&mut self.envs, target)?.insert(&mut self.phys, va, frame, perm)?;
        Ok(Flow::Return(0))
    }

    fn sys_page_map(
        &mut self,
        caller: EnvId,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> HandlerResult {
        let src = self.envs.resolve(src_env, caller, true)?;
        let dst = self.envs.resolve(dst_env, caller, true)?;
        check_user_page(src_va)?;
        check_user_page(dst_va)?;
        check_perm(dst_va, perm)?;

        let pte = space_of(&self.envs, src)?
            .lookup(src_va)
            .ok_or(SysError::Inval)?;
        if perm.is_writable() && !pte.flags().is_writable() {
            return Err(SysError::Inval);
        }
        let frame = pte.frame().clone();

        space_of_mut(&mut self.envs, dst)?
            .insert(&mut self.phys, dst_va, frame, perm)
            .map_err(|_| SysError::NoMem)?;
        Ok(Flow::Return(0))
    }

    fn sys_page_unmap(&mut self, caller: EnvId, env: EnvId, va: VirtAddr) -> HandlerResult {
        let target = self.envs.resolve(env, caller, true)?;
        check_user_page(va)?;
        drop(space_of_mut(&mut self.envs, target)?.remove(va));
        Ok(Flow::Return(0))
    }

    fn sys_exofork(&mut self, caller: EnvId) -> HandlerResult {
        let tf = *self.envs.get(caller).ok_or(SysError::BadEnv)?.tf();
        let child = self.envs.alloc(caller, &mut self.phys)?;
        let env = self.envs.get_mut(child).ok_or(SysError::BadEnv)?;
        env.tf = tf;
        env.tf.regs.eax = 0;
        Ok(Flow::Return(child.to_raw() as u32))
    }

    fn sys_env_set_status(&mut self, caller: EnvId, env: EnvId, status: u32) -> HandlerResult {
        let status = EnvStatus::from_raw(status)
            .filter(|s| matches!(s, EnvStatus::Runnable | EnvStatus::NotRunnable))
            .ok_or(SysError::Inval)?;
        let target = self.envs.resolve(env, caller, true)?;
        if target == caller {
            // the caller is on the cpu; runnable already holds
            if status == EnvStatus::NotRunnable {
                if let Some(env) = self.envs.get_mut(target) {
                    env.set_status(status);
                }
                self.sched_yield();
            }
        } else if let Some(env) = self.envs.get_mut(target) {
            env.set_status(status);
        }
        Ok(Flow::Return(0))
    }

    fn sys_env_set_pgfault_upcall(
        &mut self,
        caller: EnvId,
        env: EnvId,
        entry: VirtAddr,
    ) -> HandlerResult {
        let target = self.envs.resolve(env, caller, true)?;
        if let Some(env) = self.envs.get_mut(target) {
            env.pgfault_upcall = (entry != VirtAddr::NULL).then_some(entry);
        }
        Ok(Flow::Return(0))
    }

    fn sys_yield(&mut self) -> Flow {
        self.sched_yield();
        Flow::Return(0)
    }

    /// Installs a register snapshot read from the caller's memory
    fn sys_env_set_trapframe(&mut self, caller: EnvId, env: EnvId, tf_va: VirtAddr) -> HandlerResult {
        let target = self.envs.resolve(env, caller, true)?;

        let mut bytes = vec![0u8; Trapframe::SIZE];
        let space = space_of(&self.envs, caller)?;
        if let Err(bad) = space.check_user_range(tf_va, Trapframe::SIZE as u32, PteFlags::USER) {
            return Ok(self.user_mem_violation(caller, bad));
        }
        if let Err(bad) = space.read_bytes(tf_va, &mut bytes) {
            return Ok(self.user_mem_violation(caller, bad));
        }
        let mut tf = Trapframe::from_bytes(&bytes).ok_or(SysError::Inval)?;
        tf.force_user_mode();

        if let Some(env) = self.envs.get_mut(target) {
            env.tf = tf;
        }
        Ok(Flow::Return(0))
    }
}
