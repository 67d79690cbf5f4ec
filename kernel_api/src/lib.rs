//! # Kernel API
//!
//! This crate defines the interface between user-space code and the kernel.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Page-granular mapping primitives (not a memory allocator)
//! - A bare child-creation primitive (fork itself lives in user space)
//! - A one-slot rendezvous (no queues, no buffering)
//!
//! ## Design Goals
//!
//! 1. **Testability**: The user side is a pair of traits and can be mocked
//! 2. **Wire stability**: Opcodes, argument order and error codes are fixed
//! 3. **Type safety**: Only the boundary ever sees raw words
//! 4. **Simplicity**: Minimal surface area

pub mod error;
pub mod syscalls;
pub mod user;

pub use error::{decode_return, encode_return, AccessError, SysError, UserPanic};
pub use syscalls::{RawSyscall, Syscall, SyscallNo};
pub use user::{EnvInfo, FaultUpcall, Syscalls, UserEnvironment, UserView};
