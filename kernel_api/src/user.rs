//! User-side view of the kernel.
//!
//! [`Syscalls`] wraps every syscall in a typed stub over a single transport
//! method, and [`UserView`] covers what user code reads directly instead of
//! asking the kernel: its own memory, the read-only environment table and the
//! read-only page-table view. Together they form [`UserEnvironment`], the
//! surface the user library is written against, so the same library code runs
//! against the simulated kernel or a test double.

use crate::error::{decode_return, AccessError, SysError, UserPanic};
use crate::syscalls::{RawSyscall, Syscall};
use core_types::{EnvId, EnvStatus, PteFlags, UTrapframe, VirtAddr};
use serde::{Deserialize, Serialize};

/// Typed syscall stubs
///
/// Implementors provide [`Syscalls::invoke`]; every other method marshals its
/// arguments through it.
pub trait Syscalls {
    /// Traps into the kernel with a raw syscall and returns the raw result
    fn invoke(&mut self, raw: RawSyscall) -> i32;

    fn syscall(&mut self, call: Syscall) -> Result<u32, SysError> {
        decode_return(self.invoke(call.encode()))
    }

    fn sys_cputs(&mut self, va: VirtAddr, len: u32) -> Result<(), SysError> {
        self.syscall(Syscall::Cputs { va, len }).map(drop)
    }

    /// Next console character, `None` if nothing is buffered
    fn sys_cgetc(&mut self) -> Option<u8> {
        match self.syscall(Syscall::Cgetc) {
            Ok(0) | Err(_) => None,
            Ok(c) => Some(c as u8),
        }
    }

    fn sys_getenvid(&mut self) -> EnvId {
        EnvId::from_raw(self.invoke(Syscall::GetEnvId.encode()))
    }

    fn sys_env_destroy(&mut self, env: EnvId) -> Result<(), SysError> {
        self.syscall(Syscall::EnvDestroy { env }).map(drop)
    }

    fn sys_page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<(), SysError> {
        self.syscall(Syscall::PageAlloc { env, va, perm }).map(drop)
    }

    fn sys_page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SysError> {
        self.syscall(Syscall::PageMap {
            src_env,
            src_va,
            dst_env,
            dst_va,
            perm,
        })
        .map(drop)
    }

    fn sys_page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), SysError> {
        self.syscall(Syscall::PageUnmap { env, va }).map(drop)
    }

    /// Child's id in the parent; [`EnvId::CURRENT`] in the child
    fn sys_exofork(&mut self) -> Result<EnvId, SysError> {
        self.syscall(Syscall::Exofork)
            .map(|raw| EnvId::from_raw(raw as i32))
    }

    fn sys_env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), SysError> {
        self.syscall(Syscall::EnvSetStatus {
            env,
            status: status.to_raw(),
        })
        .map(drop)
    }

    fn sys_env_set_pgfault_upcall(&mut self, env: EnvId, entry: VirtAddr) -> Result<(), SysError> {
        self.syscall(Syscall::EnvSetPgfaultUpcall { env, entry })
            .map(drop)
    }

    fn sys_yield(&mut self) -> Result<(), SysError> {
        self.syscall(Syscall::Yield).map(drop)
    }

    fn sys_ipc_try_send(
        &mut self,
        env: EnvId,
        value: u32,
        src_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SysError> {
        self.syscall(Syscall::IpcTrySend {
            env,
            value,
            src_va,
            perm,
        })
        .map(drop)
    }

    fn sys_ipc_recv(&mut self, dst_va: VirtAddr) -> Result<(), SysError> {
        self.syscall(Syscall::IpcRecv { dst_va }).map(drop)
    }

    fn sys_env_set_trapframe(&mut self, env: EnvId, tf: VirtAddr) -> Result<(), SysError> {
        self.syscall(Syscall::EnvSetTrapframe { env, tf }).map(drop)
    }
}

/// Read-only copy of an environment record, as user code sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvInfo {
    pub id: EnvId,
    pub parent: EnvId,
    pub status: EnvStatus,
    pub runs: u32,
    pub pgfault_upcall: Option<VirtAddr>,
    pub ipc_recving: bool,
    pub ipc_dstva: VirtAddr,
    pub ipc_from: EnvId,
    pub ipc_value: u32,
    pub ipc_perm: PteFlags,
}

/// What user code can see without a syscall
pub trait UserView {
    /// The calling environment's own record
    fn this_env(&self) -> EnvInfo;

    /// Record in the slot `id` names, if that slot is occupied
    fn env_info(&self, id: EnvId) -> Option<EnvInfo>;

    /// Whether the page directory entry covering `va` is present
    fn uvpd_present(&self, va: VirtAddr) -> bool;

    /// Flags of the page-table entry for `va`, `None` if unmapped
    fn uvpt(&self, va: VirtAddr) -> Option<PteFlags>;

    /// Load from the environment's own memory
    fn read_mem(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), AccessError>;

    /// Store to the environment's own memory; may fault
    fn write_mem(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), AccessError>;
}

/// Everything user code can do
pub trait UserEnvironment: Syscalls + UserView {}

impl<T: Syscalls + UserView + ?Sized> UserEnvironment for T {}

/// Page-fault upcall entry point
///
/// Runs in the faulting environment on its exception stack. Returning `Ok`
/// resumes the faulting access; returning an error destroys the environment.
pub type FaultUpcall = fn(&mut dyn UserEnvironment, &UTrapframe) -> Result<(), UserPanic>;
