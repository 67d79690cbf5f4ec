//! Test utilities for kernel and integration tests
//!
//! This module provides helper functions and a small harness for booting a
//! kernel, creating environments and issuing syscalls on their behalf.

use crate::config::KernelConfig;
use crate::console::BufferConsole;
use crate::fault_injection::FaultPlan;
use crate::syscall_gate::SyscallOutcome;
use crate::SimulatedKernel;
use core_types::{EnvId, VirtAddr};
use kernel_api::{SysError, Syscall, Syscalls, UserView};
use std::cell::RefCell;
use std::rc::Rc;

/// Kernel plus the console it writes to
pub struct TestKernel {
    pub kernel: SimulatedKernel,
    pub console: Rc<RefCell<BufferConsole>>,
}

impl TestKernel {
    /// A small kernel: 16 environment slots, 512 frames
    pub fn new() -> Self {
        Self::with_config(
            KernelConfig::default()
                .with_max_envs(16)
                .with_phys_frames(512),
        )
    }

    pub fn with_frames(frames: usize) -> Self {
        Self::with_config(
            KernelConfig::default()
                .with_max_envs(16)
                .with_phys_frames(frames),
        )
    }

    pub fn with_config(config: KernelConfig) -> Self {
        match SimulatedKernel::with_config(config) {
            Ok(kernel) => Self::from_kernel(kernel),
            Err(err) => panic!("bad test kernel config: {}", err),
        }
    }

    /// Wraps an already configured kernel, replacing its console
    pub fn from_kernel(kernel: SimulatedKernel) -> Self {
        let console = Rc::new(RefCell::new(BufferConsole::new()));
        Self {
            kernel: kernel.with_console(console.clone()),
            console,
        }
    }

    /// Applies a fault plan to frame allocation from here on
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.kernel = self.kernel.with_fault_plan(plan);
        self
    }

    /// Boots a runnable environment
    pub fn spawn(&mut self) -> EnvId {
        match self.kernel.create_env() {
            Ok(id) => id,
            Err(err) => panic!("create_env failed: {}", err),
        }
    }

    /// Runs `env` and issues `call` through the wire encoding
    pub fn call(&mut self, env: EnvId, call: Syscall) -> Result<u32, SysError> {
        self.kernel.run(env)?.syscall(call)
    }

    /// Like [`TestKernel::call`], panicking on an error return
    pub fn call_ok(&mut self, env: EnvId, call: Syscall) -> u32 {
        let name = call.name();
        match self.call(env, call) {
            Ok(ret) => ret,
            Err(err) => panic!("[{}] {} failed: {}", env, name, err),
        }
    }

    /// Has `parent` create a child and returns the child's id
    pub fn exofork(&mut self, parent: EnvId) -> EnvId {
        EnvId::from_raw(self.call_ok(parent, Syscall::Exofork) as i32)
    }

    /// Parks `env` in an IPC receive
    pub fn park_receiver(&mut self, env: EnvId, dst_va: VirtAddr) {
        let outcome = match self.kernel.run(env) {
            Ok(mut user) => user.dispatch(Syscall::IpcRecv { dst_va }),
            Err(err) => panic!("[{}] cannot run: {}", env, err),
        };
        assert_eq!(outcome, SyscallOutcome::Blocked);
    }

    /// Stores into `env`'s memory as the environment itself would
    pub fn write(&mut self, env: EnvId, va: VirtAddr, bytes: &[u8]) {
        let result = match self.kernel.run(env) {
            Ok(mut user) => user.write_mem(va, bytes),
            Err(err) => panic!("[{}] cannot run: {}", env, err),
        };
        if let Err(err) = result {
            panic!("[{}] store at {} failed: {}", env, va, err);
        }
    }

    /// Everything written to the console so far
    pub fn output(&self) -> String {
        self.console.borrow().output_string()
    }
}

impl Default for TestKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Boots one environment and puts it on the CPU
pub fn boot_single() -> (SimulatedKernel, EnvId) {
    let mut t = TestKernel::new();
    let id = t.spawn();
    if let Err(err) = t.kernel.run(id) {
        panic!("[{}] cannot run: {}", id, err);
    }
    (t.kernel, id)
}

/// Runs a test with a fault plan applied
///
/// # Example
///
/// ```
/// use sim_kernel::test_utils::with_fault_plan;
/// use sim_kernel::fault_injection::{FaultPlan, FrameFault};
///
/// with_fault_plan(
///     FaultPlan::new().with_frame_fault(FrameFault::FailNext { count: 1 }),
///     |t| {
///         assert!(t.kernel.create_env().is_err());
///     },
/// );
/// ```
pub fn with_fault_plan<F>(plan: FaultPlan, f: F)
where
    F: FnOnce(&mut TestKernel),
{
    let mut t = TestKernel::new().with_fault_plan(plan);
    f(&mut t);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_injection::FrameFault;
    use core_types::{EnvStatus, PteFlags, UTEXT};

    #[test]
    fn test_with_fault_plan() {
        with_fault_plan(
            FaultPlan::new().with_frame_fault(FrameFault::FailAfter { successes: 3 }),
            |t| {
                let a = t.spawn();
                let ret = t.call(
                    a,
                    Syscall::PageAlloc {
                        env: a,
                        va: UTEXT,
                        perm: PteFlags::user_write(),
                    },
                );
                assert_eq!(ret, Err(SysError::NoMem));
            },
        );
    }

    #[test]
    fn test_boot_single_is_running() {
        let (kernel, id) = boot_single();
        assert_eq!(kernel.curenv(), Some(id));
        assert_eq!(kernel.env(id).unwrap().status(), EnvStatus::Running);
    }

    #[test]
    fn test_output_capture() {
        let mut t = TestKernel::new();
        let a = t.spawn();
        let va = core_types::USTACKTOP - 8;
        t.write(a, va, b"ok");
        t.call_ok(a, Syscall::Cputs { va, len: 2 });
        assert_eq!(t.output(), "ok");
    }
}
