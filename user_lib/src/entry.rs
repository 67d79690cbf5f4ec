//! Program entry helpers

use kernel_api::{EnvInfo, UserEnvironment};
use core_types::EnvId;

/// The caller's own record, looked up by its id in the read-only table
pub fn this_env<S: UserEnvironment + ?Sized>(sys: &mut S) -> EnvInfo {
    let id = sys.sys_getenvid();
    match sys.env_info(id) {
        Some(info) if info.id == id => info,
        _ => sys.this_env(),
    }
}

/// Destroys the calling environment
pub fn exit<S: UserEnvironment + ?Sized>(sys: &mut S) {
    if let Err(err) = sys.sys_env_destroy(EnvId::CURRENT) {
        log::error!("exit failed: {}", err);
    }
}
