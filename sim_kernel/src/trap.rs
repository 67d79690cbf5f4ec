//! User memory access and page-fault upcalls
//!
//! Environment code never touches frames directly: every load and store
//! goes through [`SimulatedKernel::user_read`] / [`SimulatedKernel::user_write`],
//! which apply the same checks the MMU would (`P|U` for loads, `P|U|W` for
//! stores). A violation is reflected to the environment's registered fault
//! upcall on its exception stack; after the upcall returns, the access is
//! retried once.
//!
//! Fault upcalls are ordinary Rust functions registered at fixed user
//! addresses with [`SimulatedKernel::load_user_text`]. The address an
//! environment records with `set_pgfault_upcall` is looked up there when a
//! fault is delivered.

use crate::phys::Frame;
use crate::user_env::UserEnv;
use crate::SimulatedKernel;
use core_types::{
    EnvId, PteFlags, UTrapframe, VirtAddr, FEC_PR, FEC_U, FEC_WR, PGSIZE, ULIM, UXSTACKTOP,
};
use kernel_api::AccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Load,
    Store,
}

impl SimulatedKernel {
    /// Loads `buf.len()` bytes from `env`'s memory at `va`
    pub fn user_read(&mut self, env: EnvId, va: VirtAddr, buf: &mut [u8]) -> Result<(), AccessError> {
        self.ensure_running(env)
            .map_err(|_| AccessError::NotExecuting(env))?;

        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr(va.as_u32().wrapping_add(done as u32));
            let chunk = (PGSIZE as usize - cur.page_offset()).min(buf.len() - done);
            let frame = self.translate(env, cur, Access::Load)?;
            frame.read(cur.page_offset(), &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Stores `data` into `env`'s memory at `va`
    pub fn user_write(&mut self, env: EnvId, va: VirtAddr, data: &[u8]) -> Result<(), AccessError> {
        self.ensure_running(env)
            .map_err(|_| AccessError::NotExecuting(env))?;

        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr(va.as_u32().wrapping_add(done as u32));
            let chunk = (PGSIZE as usize - cur.page_offset()).min(data.len() - done);
            let frame = self.translate(env, cur, Access::Store)?;
            frame.write(cur.page_offset(), &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Resolves `va` to its frame, delivering at most one fault
    fn translate(&mut self, env: EnvId, va: VirtAddr, access: Access) -> Result<Frame, AccessError> {
        let err = match self.probe(env, va, access) {
            Ok(frame) => return Ok(frame),
            Err(err) => err,
        };

        self.page_fault(env, va, err)?;

        match self.probe(env, va, access) {
            Ok(frame) => Ok(frame),
            Err(_) => {
                log::warn!("[{}] fault at va {} not resolved by upcall", env, va);
                self.env_destroy(env, env);
                Err(AccessError::Destroyed { env, va })
            }
        }
    }

    /// Checks the mapping for `va`; on failure returns the fault error code
    fn probe(&self, env: EnvId, va: VirtAddr, access: Access) -> Result<Frame, u32> {
        let need = match access {
            Access::Load => PteFlags::PRESENT | PteFlags::USER,
            Access::Store => PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE,
        };
        let pte = self
            .envs
            .get(env)
            .and_then(|e| e.space.as_ref())
            .and_then(|space| space.lookup(va));

        match pte {
            Some(pte) if va < ULIM && pte.flags().contains(need) => Ok(pte.frame().clone()),
            _ => {
                let mut err = FEC_U;
                if access == Access::Store {
                    err |= FEC_WR;
                }
                if pte.is_some() {
                    err |= FEC_PR;
                }
                Err(err)
            }
        }
    }

    /// Reflects a fault to `env`'s upcall and runs it to completion
    ///
    /// Returns `Ok` once the upcall has returned and the trap-time state
    /// has been restored from the exception stack. Every failure destroys
    /// the environment.
    fn page_fault(&mut self, env: EnvId, va: VirtAddr, err: u32) -> Result<(), AccessError> {
        let destroyed = AccessError::Destroyed { env, va };
        let (tf, upcall) = match self.envs.get(env) {
            Some(e) => (*e.tf(), e.pgfault_upcall()),
            None => return Err(AccessError::NotExecuting(env)),
        };

        let Some(entry) = upcall else {
            log::warn!("[{}] user fault va {} ip {:08x}", env, va, tf.eip);
            self.env_destroy(env, env);
            return Err(destroyed);
        };
        let Some(handler) = self.user_text.get(&entry).copied() else {
            log::warn!(
                "[{}] user fault va {} ip {:08x}: no code at upcall {}",
                env,
                va,
                tf.eip,
                entry
            );
            self.env_destroy(env, env);
            return Err(destroyed);
        };

        // nested faults push below the current frame, leaving one word free
        let top = if VirtAddr(tf.esp).is_exception_stack() {
            tf.esp - 4
        } else {
            UXSTACKTOP.as_u32()
        };
        let frame_va = VirtAddr(top.wrapping_sub(UTrapframe::SIZE as u32));
        if !frame_va.is_exception_stack() {
            log::warn!("[{}] exception stack overflow at va {}", env, frame_va);
            self.env_destroy(env, env);
            return Err(destroyed);
        }

        let utf = UTrapframe {
            fault_va: va,
            err,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        };
        let Some(space) = self.envs.get(env).and_then(|e| e.space.as_ref()) else {
            return Err(AccessError::NotExecuting(env));
        };
        let pushed = space
            .check_user_range(
                frame_va,
                UTrapframe::SIZE as u32,
                PteFlags::USER | PteFlags::WRITABLE,
            )
            .and_then(|()| space.write_bytes(frame_va, &utf.to_bytes()));
        if let Err(bad) = pushed {
            log::warn!("[{}] user_mem_check assertion failure for va {}", env, bad);
            self.env_destroy(env, env);
            return Err(destroyed);
        }

        if let Some(e) = self.envs.get_mut(env) {
            e.tf.esp = frame_va.as_u32();
            e.tf.eip = entry.as_u32();
        }
        log::trace!("[{}] fault va {} err {:#x} -> upcall {}", env, va, err, entry);

        let result = {
            let mut user = UserEnv::new(self, env);
            handler(&mut user, &utf)
        };

        if let Err(panic) = result {
            log::error!("{}", panic);
            self.env_destroy(env, env);
            return Err(destroyed);
        }
        if self.envs.get(env).is_none() {
            return Err(destroyed);
        }

        // return through the frame as it now sits on the exception stack
        let mut bytes = vec![0u8; UTrapframe::SIZE];
        let readable = self
            .envs
            .get(env)
            .and_then(|e| e.space.as_ref())
            .is_some_and(|space| space.read_bytes(frame_va, &mut bytes).is_ok());
        let restored = if readable {
            UTrapframe::from_bytes(&bytes)
        } else {
            None
        };
        let Some(saved) = restored else {
            log::warn!("[{}] exception stack unreadable at va {}", env, frame_va);
            self.env_destroy(env, env);
            return Err(destroyed);
        };
        if let Some(e) = self.envs.get_mut(env) {
            e.tf.regs = saved.regs;
            e.tf.eip = saved.eip;
            e.tf.eflags = saved.eflags;
            e.tf.esp = saved.esp;
        }

        self.ensure_running(env)
            .map_err(|_| AccessError::NotExecuting(env))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestKernel;
    use core_types::{
        EnvId, PteFlags, UTrapframe, VirtAddr, FEC_PR, FEC_U, FEC_WR, PGSIZE, USTACKTOP, UTEXT,
        UXSTACKTOP,
    };
    use kernel_api::{AccessError, FaultUpcall, SysError, Syscall, UserEnvironment, UserPanic};

    const MAP_ON_FAULT: VirtAddr = VirtAddr(0x0080_0100);
    const IGNORE_FAULT: VirtAddr = VirtAddr(0x0080_0200);
    const PANIC_ON_FAULT: VirtAddr = VirtAddr(0x0080_0300);
    const NEST_FAULT: VirtAddr = VirtAddr(0x0080_0400);
    const RUNAWAY_FAULT: VirtAddr = VirtAddr(0x0080_0500);
    const XSTACK: VirtAddr = VirtAddr(UXSTACKTOP.0 - PGSIZE);

    fn sys_panic(env: &mut dyn UserEnvironment, err: SysError) -> UserPanic {
        UserPanic::new(env.sys_getenvid(), err.to_string())
    }

    fn map_on_fault(env: &mut dyn UserEnvironment, utf: &UTrapframe) -> Result<(), UserPanic> {
        env.sys_page_alloc(EnvId::CURRENT, utf.fault_va.round_down(), PteFlags::user_write())
            .map_err(|e| sys_panic(env, e))
    }

    fn ignore_fault(_env: &mut dyn UserEnvironment, _utf: &UTrapframe) -> Result<(), UserPanic> {
        Ok(())
    }

    fn panic_on_fault(env: &mut dyn UserEnvironment, utf: &UTrapframe) -> Result<(), UserPanic> {
        Err(UserPanic::new(
            env.sys_getenvid(),
            format!("unexpected fault at {}", utf.fault_va),
        ))
    }

    /// Touches a second page from inside the handler, then maps the first
    fn nest_fault(env: &mut dyn UserEnvironment, utf: &UTrapframe) -> Result<(), UserPanic> {
        let page = utf.fault_va.round_down();
        if page == UTEXT {
            env.sys_env_set_pgfault_upcall(EnvId::CURRENT, MAP_ON_FAULT)
                .map_err(|e| sys_panic(env, e))?;
            env.write_mem(UTEXT + PGSIZE, &[2])
                .map_err(|e| UserPanic::new(EnvId::CURRENT, e.to_string()))?;
        }
        map_on_fault(env, utf)
    }

    fn runaway_fault(env: &mut dyn UserEnvironment, utf: &UTrapframe) -> Result<(), UserPanic> {
        env.write_mem(utf.fault_va + PGSIZE, &[1])
            .map_err(|e| UserPanic::new(EnvId::CURRENT, e.to_string()))
    }

    const TEXT: [(VirtAddr, FaultUpcall); 5] = [
        (MAP_ON_FAULT, map_on_fault),
        (IGNORE_FAULT, ignore_fault),
        (PANIC_ON_FAULT, panic_on_fault),
        (NEST_FAULT, nest_fault),
        (RUNAWAY_FAULT, runaway_fault),
    ];

    fn setup(upcall: Option<VirtAddr>, xstack: Option<PteFlags>) -> (TestKernel, EnvId) {
        let mut t = TestKernel::new();
        t.kernel.load_user_text(&TEXT);
        let a = t.spawn();
        if let Some(perm) = xstack {
            t.call_ok(a, Syscall::PageAlloc { env: a, va: XSTACK, perm });
        }
        if let Some(entry) = upcall {
            t.call_ok(a, Syscall::EnvSetPgfaultUpcall { env: a, entry });
        }
        (t, a)
    }

    #[test]
    fn test_fault_without_upcall_destroys() {
        let (mut t, a) = setup(None, None);
        let err = t.kernel.user_write(a, UTEXT, &[1]).unwrap_err();
        assert_eq!(err, AccessError::Destroyed { env: a, va: UTEXT });
        assert!(t.kernel.env(a).is_none());
    }

    #[test]
    fn test_upcall_resolves_fault() {
        let (mut t, a) = setup(Some(MAP_ON_FAULT), Some(PteFlags::user_write()));
        t.kernel.user_write(a, UTEXT + 4, b"hi").unwrap();
        assert_eq!(t.kernel.peek(a, UTEXT + 4, 2).unwrap(), b"hi".to_vec());

        let env = t.kernel.env(a).unwrap();
        assert_eq!(env.tf().esp, USTACKTOP.as_u32());
        assert_eq!(env.tf().eip, UTEXT.as_u32());
    }

    #[test]
    fn test_trap_frame_pushed_on_exception_stack() {
        let (mut t, a) = setup(Some(MAP_ON_FAULT), Some(PteFlags::user_write()));
        t.kernel.user_write(a, UTEXT + 4, b"hi").unwrap();

        let at = UXSTACKTOP - UTrapframe::SIZE as u32;
        let bytes = t.kernel.peek(a, at, UTrapframe::SIZE).unwrap();
        let utf = UTrapframe::from_bytes(&bytes).unwrap();
        assert_eq!(utf.fault_va, UTEXT + 4);
        assert_eq!(utf.err, FEC_U | FEC_WR);
        assert_eq!(utf.esp, USTACKTOP.as_u32());
        assert!(utf.is_write());
    }

    #[test]
    fn test_write_to_read_only_reports_present() {
        let (mut t, a) = setup(Some(MAP_ON_FAULT), Some(PteFlags::user_write()));
        t.call_ok(a, Syscall::PageAlloc { env: a, va: UTEXT, perm: PteFlags::user_read() });
        t.kernel.user_write(a, UTEXT, &[7]).unwrap();

        let at = UXSTACKTOP - UTrapframe::SIZE as u32;
        let utf = UTrapframe::from_bytes(&t.kernel.peek(a, at, UTrapframe::SIZE).unwrap()).unwrap();
        assert_eq!(utf.err, FEC_U | FEC_WR | FEC_PR);
    }

    #[test]
    fn test_unloaded_upcall_destroys() {
        let (mut t, a) = setup(Some(VirtAddr(0x0090_0000)), Some(PteFlags::user_write()));
        assert!(t.kernel.user_write(a, UTEXT, &[1]).is_err());
        assert!(t.kernel.env(a).is_none());
    }

    #[test]
    fn test_missing_exception_stack_destroys() {
        let (mut t, a) = setup(Some(MAP_ON_FAULT), None);
        assert!(t.kernel.user_write(a, UTEXT, &[1]).is_err());
        assert!(t.kernel.env(a).is_none());
    }

    #[test]
    fn test_read_only_exception_stack_destroys() {
        let (mut t, a) = setup(Some(MAP_ON_FAULT), Some(PteFlags::user_read()));
        assert!(t.kernel.user_write(a, UTEXT, &[1]).is_err());
        assert!(t.kernel.env(a).is_none());
    }

    #[test]
    fn test_unresolved_fault_destroys() {
        let (mut t, a) = setup(Some(IGNORE_FAULT), Some(PteFlags::user_write()));
        let err = t.kernel.user_write(a, UTEXT, &[1]).unwrap_err();
        assert_eq!(err, AccessError::Destroyed { env: a, va: UTEXT });
        assert!(t.kernel.env(a).is_none());
    }

    #[test]
    fn test_handler_panic_destroys() {
        let (mut t, a) = setup(Some(PANIC_ON_FAULT), Some(PteFlags::user_write()));
        let mut buf = [0u8; 4];
        assert!(t.kernel.user_read(a, UTEXT, &mut buf).is_err());
        assert!(t.kernel.env(a).is_none());
    }

    #[test]
    fn test_nested_fault_in_handler() {
        let (mut t, a) = setup(Some(NEST_FAULT), Some(PteFlags::user_write()));
        t.kernel.user_write(a, UTEXT, &[1]).unwrap();
        assert!(t.kernel.page(a, UTEXT).is_some());
        assert_eq!(t.kernel.peek(a, UTEXT + PGSIZE, 1).unwrap(), vec![2]);

        // the inner frame sits one word below the outer one
        let outer = UXSTACKTOP - UTrapframe::SIZE as u32;
        let inner = outer - 4 - UTrapframe::SIZE as u32;
        let utf = UTrapframe::from_bytes(&t.kernel.peek(a, inner, UTrapframe::SIZE).unwrap()).unwrap();
        assert_eq!(utf.fault_va, UTEXT + PGSIZE);
        assert_eq!(utf.esp, outer.as_u32());
        assert_eq!(t.kernel.env(a).unwrap().tf().esp, USTACKTOP.as_u32());
    }

    #[test]
    fn test_exception_stack_overflow_destroys() {
        let (mut t, a) = setup(Some(RUNAWAY_FAULT), Some(PteFlags::user_write()));
        assert!(t.kernel.user_write(a, UTEXT, &[1]).is_err());
        assert!(t.kernel.env(a).is_none());
        assert_eq!(t.kernel.phys().in_use(), 0);
    }

    #[test]
    fn test_access_above_ulim_faults() {
        let (mut t, a) = setup(None, None);
        let mut buf = [0u8; 1];
        assert!(t.kernel.user_read(a, VirtAddr(0xf000_0000), &mut buf).is_err());
        assert!(t.kernel.env(a).is_none());
    }
}
