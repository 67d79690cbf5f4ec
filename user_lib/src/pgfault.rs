//! Copy-on-write page fault handling
//!
//! [`set_pgfault_handler`] gives the environment an exception stack and
//! registers an upcall; [`cow_upcall`] is the upcall `fork` installs. On a
//! write to a page marked COW it gives the environment a private writable
//! copy of that page, going through the `PFTEMP` scratch mapping.

use crate::error::PgfaultError;
use core_types::{EnvId, PteFlags, UTrapframe, VirtAddr, PFTEMP, PGSIZE, UXSTACKTOP};
use kernel_api::{AccessError, SysError, UserEnvironment, UserPanic};

/// Where [`cow_upcall`] is loaded
pub const PGFAULT_UPCALL: VirtAddr = VirtAddr(0x0080_0020);

/// Installs `entry` as the caller's fault upcall
///
/// The first installation also allocates the exception stack page.
pub fn set_pgfault_handler<S: UserEnvironment + ?Sized>(
    sys: &mut S,
    entry: VirtAddr,
) -> Result<(), SysError> {
    if sys.this_env().pgfault_upcall.is_none() {
        sys.sys_page_alloc(EnvId::CURRENT, UXSTACKTOP - PGSIZE, PteFlags::user_write())?;
    }
    sys.sys_env_set_pgfault_upcall(EnvId::CURRENT, entry)
}

/// Resolves a write fault on a copy-on-write page
///
/// The faulting page is replaced by a private, writable copy. Any other
/// fault is refused.
pub fn pgfault<S: UserEnvironment + ?Sized>(
    sys: &mut S,
    utf: &UTrapframe,
) -> Result<(), PgfaultError> {
    let va = utf.fault_va;
    if !utf.is_write() {
        return Err(PgfaultError::NotWrite { va, eip: utf.eip });
    }
    if !sys.uvpd_present(va) {
        return Err(PgfaultError::TableNotPresent { va });
    }
    let flags = sys.uvpt(va).unwrap_or_else(PteFlags::empty);
    if !flags.is_cow() {
        return Err(PgfaultError::NotCopyOnWrite { va, flags });
    }

    let page = va.round_down();
    let syscall = |op: &'static str| move |source: SysError| PgfaultError::Syscall { op, va, source };
    let access = |source: AccessError| PgfaultError::Access { va, source };

    sys.sys_page_alloc(EnvId::CURRENT, PFTEMP, PteFlags::user_write())
        .map_err(syscall("page_alloc"))?;
    let mut contents = vec![0u8; PGSIZE as usize];
    sys.read_mem(page, &mut contents).map_err(access)?;
    sys.write_mem(PFTEMP, &contents).map_err(access)?;
    sys.sys_page_map(EnvId::CURRENT, PFTEMP, EnvId::CURRENT, page, PteFlags::user_write())
        .map_err(syscall("page_map"))?;
    sys.sys_page_unmap(EnvId::CURRENT, PFTEMP)
        .map_err(syscall("page_unmap"))?;

    log::trace!("copied cow page {}", page);
    Ok(())
}

/// Fault upcall wrapping [`pgfault`]; a refused fault is fatal
pub fn cow_upcall(env: &mut dyn UserEnvironment, utf: &UTrapframe) -> Result<(), UserPanic> {
    pgfault(env, utf).map_err(|err| {
        let id = env.this_env().id;
        UserPanic::new(id, err.to_string())
    })
}
