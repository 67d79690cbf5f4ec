//! User library errors

use core_types::{PteFlags, VirtAddr};
use kernel_api::{AccessError, SysError};
use thiserror::Error;

/// Why the copy-on-write fault handler refused a fault
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PgfaultError {
    #[error("faulting access at va {va} (ip {eip:08x}) was not a write")]
    NotWrite { va: VirtAddr, eip: u32 },

    #[error("no page table covers faulting va {va}")]
    TableNotPresent { va: VirtAddr },

    #[error("faulting va {va} is not copy-on-write (flags {flags})")]
    NotCopyOnWrite { va: VirtAddr, flags: PteFlags },

    #[error("{op} failed while copying va {va}")]
    Syscall {
        op: &'static str,
        va: VirtAddr,
        #[source]
        source: SysError,
    },

    #[error("copying va {va}")]
    Access {
        va: VirtAddr,
        #[source]
        source: AccessError,
    },
}

/// A fork that could not complete
///
/// Once the child exists, any failure destroys it before this is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForkError {
    #[error("installing the fault handler")]
    Handler(#[source] SysError),

    #[error("creating the child")]
    Exofork(#[source] SysError),

    #[error("sharing page {va} with the child")]
    Duppage {
        va: VirtAddr,
        #[source]
        source: SysError,
    },

    #[error("copying page {va} into the child")]
    Copy {
        va: VirtAddr,
        #[source]
        source: SysError,
    },

    #[error("reading page {va} for the child")]
    Access {
        va: VirtAddr,
        #[source]
        source: AccessError,
    },

    #[error("giving the child its exception stack")]
    ExceptionStack(#[source] SysError),

    #[error("registering the child's fault upcall")]
    Upcall(#[source] SysError),

    #[error("starting the child")]
    Start(#[source] SysError),
}
