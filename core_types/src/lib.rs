//! # Core Types
//!
//! This crate defines the fundamental types shared by the kernel and by
//! user-level code.
//!
//! ## Philosophy
//!
//! Core types are designed with these principles:
//! - **One layout, one truth**: every address constant lives here, so the kernel
//!   and the user library can never disagree about where things are.
//! - **Type safety first**: addresses, identifiers and permission bits are
//!   distinct types and cannot be confused with plain words.
//! - **Wire-stable**: every type has a fixed 32-bit representation that crosses
//!   the syscall boundary unchanged.
//!
//! ## Key Types
//!
//! - [`VirtAddr`]: A user or kernel virtual address
//! - [`PteFlags`]: Page-table entry permission bits
//! - [`EnvId`]: Generation-tagged environment identifier
//! - [`EnvStatus`]: Environment state machine states
//! - [`Trapframe`] / [`UTrapframe`]: Saved register state

pub mod env;
pub mod ids;
pub mod memory;
pub mod pte;

pub use env::{EnvStatus, PushRegs, Trapframe, UTrapframe, FEC_PR, FEC_U, FEC_WR};
pub use ids::{EnvId, ENVGENSHIFT, LOG2NENV, NENV};
pub use memory::{
    VirtAddr, NPDENTRIES, NPTENTRIES, PDXSHIFT, PFTEMP, PGSHIFT, PGSIZE, PTSIZE, UENVS, ULIM,
    UPAGES, USTACKTOP, UTEMP, UTEXT, UTOP, UVPT, UXSTACKTOP,
};
pub use pte::PteFlags;
