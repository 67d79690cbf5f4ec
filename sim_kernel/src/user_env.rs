//! User environment context (simulation).
//!
//! A [`UserEnv`] is the kernel as seen from inside one environment: it traps
//! syscalls through the raw wire form and reads the environment's own
//! memory and the read-only environment and page tables. Holding one is the
//! simulation's equivalent of that environment executing on the CPU;
//! invoking a syscall through it first switches to the environment if
//! another one was scheduled in meanwhile.

use crate::syscall_gate::SyscallOutcome;
use crate::SimulatedKernel;
use core_types::{EnvId, EnvStatus, PteFlags, VirtAddr};
use kernel_api::{AccessError, EnvInfo, RawSyscall, Syscall, Syscalls, UserView};

/// Execution context of one environment
pub struct UserEnv<'k> {
    kernel: &'k mut SimulatedKernel,
    id: EnvId,
}

impl<'k> UserEnv<'k> {
    pub(crate) fn new(kernel: &'k mut SimulatedKernel, id: EnvId) -> Self {
        Self { kernel, id }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn kernel(&self) -> &SimulatedKernel {
        self.kernel
    }

    pub fn is_alive(&self) -> bool {
        self.kernel.env(self.id).is_some()
    }

    /// Issues a decoded syscall and reports how the environment came out of it
    pub fn dispatch(&mut self, call: Syscall) -> SyscallOutcome {
        if let Err(err) = self.kernel.ensure_running(self.id) {
            return SyscallOutcome::Return(err.code());
        }
        self.kernel.dispatch(self.id, call)
    }
}

impl Syscalls for UserEnv<'_> {
    fn invoke(&mut self, raw: RawSyscall) -> i32 {
        if let Err(err) = self.kernel.ensure_running(self.id) {
            return err.code();
        }
        match self.kernel.dispatch_raw(self.id, raw) {
            SyscallOutcome::Return(value) => value,
            // a parked receiver resumes with zero once a sender wakes it
            SyscallOutcome::Blocked | SyscallOutcome::CallerDestroyed => 0,
        }
    }
}

impl UserView for UserEnv<'_> {
    fn this_env(&self) -> EnvInfo {
        match self.kernel.envs().slot(self.id.index()) {
            Some(env) if env.id() == self.id => env.info(),
            _ => EnvInfo {
                id: self.id,
                parent: EnvId::CURRENT,
                status: EnvStatus::Free,
                runs: 0,
                pgfault_upcall: None,
                ipc_recving: false,
                ipc_dstva: VirtAddr::NULL,
                ipc_from: EnvId::CURRENT,
                ipc_value: 0,
                ipc_perm: PteFlags::empty(),
            },
        }
    }

    fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        self.kernel
            .envs()
            .slot(id.index())
            .filter(|env| env.is_alive())
            .map(|env| env.info())
    }

    fn uvpd_present(&self, va: VirtAddr) -> bool {
        self.kernel
            .env(self.id)
            .and_then(|env| env.space())
            .is_some_and(|space| space.pde_present(va))
    }

    fn uvpt(&self, va: VirtAddr) -> Option<PteFlags> {
        self.kernel
            .env(self.id)
            .and_then(|env| env.space())
            .and_then(|space| space.lookup(va))
            .map(|pte| pte.flags())
    }

    fn read_mem(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), AccessError> {
        self.kernel.user_read(self.id, va, buf)
    }

    fn write_mem(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), AccessError> {
        self.kernel.user_write(self.id, va, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestKernel;
    use core_types::{PGSIZE, USTACKTOP, UTEXT};
    use kernel_api::SysError;

    #[test]
    fn test_syscalls_through_wire() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let mut user = t.kernel.run(a).unwrap();
        assert_eq!(user.sys_getenvid(), a);
        user.sys_page_alloc(EnvId::CURRENT, UTEXT, PteFlags::user_write())
            .unwrap();
        assert_eq!(user.uvpt(UTEXT), Some(PteFlags::user_write()));
        assert!(user.uvpd_present(UTEXT));
        assert!(!user.uvpd_present(UTEXT + 64 * 1024 * 1024));
    }

    #[test]
    fn test_memory_roundtrip() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let mut user = t.kernel.run(a).unwrap();
        let va = USTACKTOP - 16;
        user.write_mem(va, b"stack").unwrap();
        let mut buf = [0u8; 5];
        user.read_mem(va, &mut buf).unwrap();
        assert_eq!(&buf, b"stack");
    }

    #[test]
    fn test_context_switch_on_invoke() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let b = t.spawn();
        t.kernel.run(a).unwrap();
        assert_eq!(t.kernel.curenv(), Some(a));

        let mut user_b = t.kernel.run(b).unwrap();
        assert_eq!(user_b.sys_getenvid(), b);
        assert_eq!(t.kernel.curenv(), Some(b));
        assert_eq!(t.kernel.env(a).unwrap().status(), EnvStatus::Runnable);
    }

    #[test]
    fn test_parked_env_cannot_run() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let child = t.exofork(a);
        assert_eq!(t.kernel.run(child).err(), Some(SysError::BadEnv));
    }

    #[test]
    fn test_env_info_sees_other_envs() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let child = t.exofork(a);
        let user = t.kernel.run(a).unwrap();
        let info = user.env_info(child).unwrap();
        assert_eq!(info.parent, a);
        assert_eq!(info.status, EnvStatus::NotRunnable);
        assert_eq!(user.this_env().id, a);
        assert_eq!(user.this_env().status, EnvStatus::Running);
    }

    #[test]
    fn test_this_env_after_exit() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let mut user = t.kernel.run(a).unwrap();
        user.sys_env_destroy(EnvId::CURRENT).unwrap();
        assert!(!user.is_alive());
        assert_eq!(user.this_env().status, EnvStatus::Free);
        let mut buf = [0u8; 1];
        assert_eq!(
            user.read_mem(UTEXT + PGSIZE, &mut buf),
            Err(AccessError::NotExecuting(a))
        );
    }
}
