//! Rendezvous IPC
//!
//! A receiver parks itself with `ipc_recv`; a sender's `ipc_try_send`
//! succeeds only against a parked receiver and delivers one word plus,
//! optionally, one page. There is no queue: the first sender to find the
//! receiver waiting claims it, and every later sender gets
//! [`SysError::IpcNotRecv`] until the receiver parks again.

use crate::syscall_gate::{check_perm, space_of, space_of_mut, Flow, HandlerResult};
use crate::SimulatedKernel;
use core_types::{EnvId, EnvStatus, PteFlags, VirtAddr};
use kernel_api::SysError;

impl SimulatedKernel {
    /// Delivers `value` (and the page at `src_va`, if below `UTOP`) to `env`
    ///
    /// Any environment may send to any other. A page moves only when the
    /// receiver also asked for one; otherwise the receiver sees an empty
    /// permission.
    pub(crate) fn sys_ipc_try_send(
        &mut self,
        caller: EnvId,
        env: EnvId,
        value: u32,
        src_va: VirtAddr,
        perm: PteFlags,
    ) -> HandlerResult {
        let target = self.envs.resolve(env, caller, false)?;
        let mailbox = *self.envs.get(target).ok_or(SysError::BadEnv)?.ipc();
        if !mailbox.recving || !mailbox.from.is_current_alias() {
            return Err(SysError::IpcNotRecv);
        }

        let mut granted = PteFlags::empty();
        if src_va.is_user() {
            if !src_va.is_page_aligned() {
                return Err(SysError::Inval);
            }
            check_perm(src_va, perm)?;
            let pte = space_of(&self.envs, caller)?
                .lookup(src_va)
                .ok_or(SysError::Inval)?;
            if perm.is_writable() && !pte.flags().is_writable() {
                return Err(SysError::Inval);
            }

            if mailbox.dstva.is_user() {
                check_perm(mailbox.dstva, perm)?;
                let frame = pte.frame().clone();
                space_of_mut(&mut self.envs, target)?
                    .insert(&mut self.phys, mailbox.dstva, frame, perm)
                    .map_err(|_| SysError::NoMem)?;
                granted = perm;
            }
        }

        let receiver = self.envs.get_mut(target).ok_or(SysError::BadEnv)?;
        receiver.ipc.recving = false;
        receiver.ipc.from = caller;
        receiver.ipc.value = value;
        receiver.ipc.perm = granted;
        receiver.tf.regs.eax = 0;
        receiver.set_status(EnvStatus::Runnable);

        log::debug!("[{}] ipc to {} value {:#x} perm {}", caller, target, value, granted);
        Ok(Flow::Return(0))
    }

    /// Parks the caller until a sender delivers to it
    ///
    /// A `dst_va` below `UTOP` says where a transferred page should go.
    pub(crate) fn sys_ipc_recv(&mut self, caller: EnvId, dst_va: VirtAddr) -> HandlerResult {
        if dst_va.is_user() && !dst_va.is_page_aligned() {
            return Err(SysError::Inval);
        }

        let env = self.envs.get_mut(caller).ok_or(SysError::BadEnv)?;
        env.ipc.recving = true;
        env.ipc.dstva = dst_va;
        env.ipc.from = EnvId::CURRENT;
        env.ipc.value = 0;
        env.ipc.perm = PteFlags::empty();
        env.set_status(EnvStatus::NotRunnable);

        self.sched_yield();
        Ok(Flow::Blocked)
    }
}
