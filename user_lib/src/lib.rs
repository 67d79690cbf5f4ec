//! # User Library
//!
//! The user-level half of the system: everything an environment does for
//! itself on top of the kernel's primitives.
//!
//! ## Philosophy
//!
//! - **Policy in user space**: The kernel only maps, unmaps and reflects
//!   faults. Copy-on-write, retry on a busy receiver and process creation are
//!   decided here.
//! - **Kernel-agnostic**: Every function is generic over
//!   [`kernel_api::UserEnvironment`], so the same code runs against the
//!   simulated kernel or a test double.
//!
//! ## Loading
//!
//! Fault upcalls live at fixed user addresses. A kernel that runs this
//! library must load [`user_text`] so those addresses resolve.

pub mod entry;
pub mod error;
pub mod fork;
pub mod ipc;
pub mod pgfault;

pub use entry::{exit, this_env};
pub use error::{ForkError, PgfaultError};
pub use fork::{dumbfork, duppage, fork, ForkOutcome};
pub use ipc::{ipc_recv, ipc_send, ipc_send_bounded, received, Message};
pub use pgfault::{cow_upcall, pgfault, set_pgfault_handler, PGFAULT_UPCALL};

use core_types::VirtAddr;
use kernel_api::FaultUpcall;

const USER_TEXT: [(VirtAddr, FaultUpcall); 1] = [(PGFAULT_UPCALL, cow_upcall)];

/// Code this library places in user memory, by entry address
pub fn user_text() -> &'static [(VirtAddr, FaultUpcall)] {
    &USER_TEXT
}
