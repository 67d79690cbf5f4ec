//! Process creation
//!
//! [`fork`] shares every page with the child copy-on-write and lets the
//! fault handler split pages lazily. [`dumbfork`] copies everything up front.

use crate::error::ForkError;
use crate::pgfault::{set_pgfault_handler, PGFAULT_UPCALL};
use core_types::{
    EnvId, EnvStatus, PteFlags, VirtAddr, PGSIZE, PTSIZE, USTACKTOP, UTEMP, UTEXT, UXSTACKTOP,
};
use kernel_api::UserEnvironment;

/// Which side of a fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    Parent { child: EnvId },
    Child,
}

/// Calls `f` for every mapped page in `[from, to)`, skipping absent tables
fn for_each_mapped_page<S, F>(sys: &mut S, from: VirtAddr, to: VirtAddr, mut f: F) -> Result<(), ForkError>
where
    S: UserEnvironment + ?Sized,
    F: FnMut(&mut S, VirtAddr) -> Result<(), ForkError>,
{
    let mut va = from;
    while va < to {
        if !sys.uvpd_present(va) {
            va = va.table_base() + PTSIZE;
            continue;
        }
        if sys.uvpt(va).is_some() {
            f(sys, va)?;
        }
        va = va + PGSIZE;
    }
    Ok(())
}

/// Maps the caller's page at `va` into `child` at the same address
///
/// Writable and copy-on-write pages become copy-on-write in both; the
/// child's mapping is made first, then the caller's own is downgraded.
/// Read-only pages are shared read-only.
pub fn duppage<S: UserEnvironment + ?Sized>(
    sys: &mut S,
    child: EnvId,
    va: VirtAddr,
) -> Result<(), ForkError> {
    let Some(flags) = sys.uvpt(va) else {
        return Ok(());
    };
    let err = |source| ForkError::Duppage { va, source };

    if flags.is_writable() || flags.is_cow() {
        sys.sys_page_map(EnvId::CURRENT, va, child, va, PteFlags::user_cow())
            .map_err(err)?;
        sys.sys_page_map(EnvId::CURRENT, va, EnvId::CURRENT, va, PteFlags::user_cow())
            .map_err(err)?;
    } else {
        sys.sys_page_map(EnvId::CURRENT, va, child, va, PteFlags::user_read())
            .map_err(err)?;
    }
    Ok(())
}

/// Copy-on-write fork
///
/// The parent gets the child's id; the child starts runnable with the same
/// memory, its own exception stack and the same fault upcall. If anything
/// fails once the child exists, the child is destroyed.
pub fn fork<S: UserEnvironment + ?Sized>(sys: &mut S) -> Result<ForkOutcome, ForkError> {
    set_pgfault_handler(sys, PGFAULT_UPCALL).map_err(ForkError::Handler)?;

    let child = sys.sys_exofork().map_err(ForkError::Exofork)?;
    if child.is_current_alias() {
        return Ok(ForkOutcome::Child);
    }

    if let Err(err) = populate_cow_child(sys, child) {
        log::warn!("fork of {} failed, destroying it: {}", child, err);
        if let Err(destroy) = sys.sys_env_destroy(child) {
            log::error!("cannot destroy half-built child {}: {}", child, destroy);
        }
        return Err(err);
    }

    log::debug!("forked {}", child);
    Ok(ForkOutcome::Parent { child })
}

fn populate_cow_child<S: UserEnvironment + ?Sized>(sys: &mut S, child: EnvId) -> Result<(), ForkError> {
    let xstack = UXSTACKTOP - PGSIZE;
    for_each_mapped_page(sys, VirtAddr::NULL, xstack, |sys, va| duppage(sys, child, va))?;

    sys.sys_page_alloc(child, xstack, PteFlags::user_write())
        .map_err(ForkError::ExceptionStack)?;
    let upcall = sys.this_env().pgfault_upcall.unwrap_or(PGFAULT_UPCALL);
    sys.sys_env_set_pgfault_upcall(child, upcall)
        .map_err(ForkError::Upcall)?;
    sys.sys_env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::Start)
}

/// Copies one page into `child` through the `UTEMP` scratch mapping
fn copy_page<S: UserEnvironment + ?Sized>(sys: &mut S, child: EnvId, va: VirtAddr) -> Result<(), ForkError> {
    let err = |source| ForkError::Copy { va, source };

    sys.sys_page_alloc(child, va, PteFlags::user_write())
        .map_err(err)?;
    sys.sys_page_map(child, va, EnvId::CURRENT, UTEMP, PteFlags::user_write())
        .map_err(err)?;

    let mut contents = vec![0u8; PGSIZE as usize];
    let copied = sys
        .read_mem(va, &mut contents)
        .and_then(|()| sys.write_mem(UTEMP, &contents))
        .map_err(|source| ForkError::Access { va, source });

    sys.sys_page_unmap(EnvId::CURRENT, UTEMP).map_err(err)?;
    copied
}

/// Eager fork: every page from `UTEXT` up to the normal stack is copied
pub fn dumbfork<S: UserEnvironment + ?Sized>(sys: &mut S) -> Result<ForkOutcome, ForkError> {
    let child = sys.sys_exofork().map_err(ForkError::Exofork)?;
    if child.is_current_alias() {
        return Ok(ForkOutcome::Child);
    }

    let populated = for_each_mapped_page(sys, UTEXT, USTACKTOP, |sys, va| copy_page(sys, child, va))
        .and_then(|()| {
            sys.sys_env_set_status(child, EnvStatus::Runnable)
                .map_err(ForkError::Start)
        });
    if let Err(err) = populated {
        log::warn!("dumbfork of {} failed, destroying it: {}", child, err);
        if let Err(destroy) = sys.sys_env_destroy(child) {
            log::error!("cannot destroy half-built child {}: {}", child, destroy);
        }
        return Err(err);
    }
    Ok(ForkOutcome::Parent { child })
}
