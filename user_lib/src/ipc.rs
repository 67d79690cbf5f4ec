//! IPC wrappers
//!
//! The kernel only offers a one-shot rendezvous; retrying against a busy or
//! absent receiver is the sender's business.

use core_types::{EnvId, PteFlags, VirtAddr, UTOP};
use kernel_api::{SysError, UserEnvironment, UserView};
use serde::{Deserialize, Serialize};

/// A delivered message as the receiver sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: EnvId,
    pub value: u32,
    /// Permissions of the transferred page; empty if none moved
    pub perm: PteFlags,
}

impl Message {
    pub fn has_page(&self) -> bool {
        !self.perm.is_empty()
    }
}

/// Sends `value`, and the page at `page` if given, retrying until `to`
/// accepts
///
/// Yields between attempts. Errors other than a receiver that isn't waiting
/// are returned as they come.
pub fn ipc_send<S: UserEnvironment + ?Sized>(
    sys: &mut S,
    to: EnvId,
    value: u32,
    page: Option<VirtAddr>,
    perm: PteFlags,
) -> Result<(), SysError> {
    let src_va = page.unwrap_or(UTOP);
    loop {
        match sys.sys_ipc_try_send(to, value, src_va, perm) {
            Err(SysError::IpcNotRecv) => sys.sys_yield()?,
            result => return result,
        }
    }
}

/// [`ipc_send`] that gives up after `attempts` tries
pub fn ipc_send_bounded<S: UserEnvironment + ?Sized>(
    sys: &mut S,
    to: EnvId,
    value: u32,
    page: Option<VirtAddr>,
    perm: PteFlags,
    attempts: usize,
) -> Result<(), SysError> {
    let src_va = page.unwrap_or(UTOP);
    for attempt in 0..attempts {
        match sys.sys_ipc_try_send(to, value, src_va, perm) {
            Err(SysError::IpcNotRecv) => {
                log::trace!("ipc to {} not accepted (attempt {})", to, attempt + 1);
                sys.sys_yield()?;
            }
            result => return result,
        }
    }
    Err(SysError::IpcNotRecv)
}

/// Waits for a message, accepting a page at `page` if given
///
/// Returns the message once one has been delivered. A caller that was
/// parked and has not been sent to yet gets `Ok(None)`; it can collect the
/// message with [`received`] after it is resumed.
pub fn ipc_recv<S: UserEnvironment + ?Sized>(
    sys: &mut S,
    page: Option<VirtAddr>,
) -> Result<Option<Message>, SysError> {
    sys.sys_ipc_recv(page.unwrap_or(UTOP))?;
    Ok(received(sys))
}

/// The last delivered message, read from the caller's own record
///
/// `None` while a receive is still armed.
pub fn received<S: UserView + ?Sized>(sys: &S) -> Option<Message> {
    let me = sys.this_env();
    if me.ipc_recving {
        return None;
    }
    Some(Message {
        from: me.ipc_from,
        value: me.ipc_value,
        perm: me.ipc_perm,
    })
}
