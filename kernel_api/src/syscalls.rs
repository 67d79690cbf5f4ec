//! Syscall wire format.
//!
//! A syscall crosses the user/kernel boundary as one numeric opcode plus five
//! 32-bit argument words, and comes back as one signed word: negative values
//! are [`SysError`] codes, non-negative values are success payloads.
//!
//! Inside the kernel and the user library only the typed [`Syscall`] enum is
//! used. [`RawSyscall`] exists only at the boundary, where
//! [`RawSyscall::decode`] turns an unknown opcode into [`SysError::NoSys`].

use crate::SysError;
use core_types::{EnvId, PteFlags, VirtAddr};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Syscall opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SyscallNo {
    Cputs = 0,
    Cgetc = 1,
    GetEnvId = 2,
    EnvDestroy = 3,
    PageAlloc = 4,
    PageMap = 5,
    PageUnmap = 6,
    Exofork = 7,
    EnvSetStatus = 8,
    EnvSetPgfaultUpcall = 9,
    Yield = 10,
    IpcTrySend = 11,
    IpcRecv = 12,
    EnvSetTrapframe = 13,
}

impl SyscallNo {
    /// Number of defined syscalls
    pub const COUNT: u32 = 14;

    pub fn from_raw(raw: u32) -> Option<Self> {
        use SyscallNo::*;
        Some(match raw {
            0 => Cputs,
            1 => Cgetc,
            2 => GetEnvId,
            3 => EnvDestroy,
            4 => PageAlloc,
            5 => PageMap,
            6 => PageUnmap,
            7 => Exofork,
            8 => EnvSetStatus,
            9 => EnvSetPgfaultUpcall,
            10 => Yield,
            11 => IpcTrySend,
            12 => IpcRecv,
            13 => EnvSetTrapframe,
            _ => return None,
        })
    }

    pub const fn to_raw(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        use SyscallNo::*;
        match self {
            Cputs => "cputs",
            Cgetc => "cgetc",
            GetEnvId => "getenvid",
            EnvDestroy => "env_destroy",
            PageAlloc => "page_alloc",
            PageMap => "page_map",
            PageUnmap => "page_unmap",
            Exofork => "exofork",
            EnvSetStatus => "env_set_status",
            EnvSetPgfaultUpcall => "env_set_pgfault_upcall",
            Yield => "yield",
            IpcTrySend => "ipc_try_send",
            IpcRecv => "ipc_recv",
            EnvSetTrapframe => "env_set_trapframe",
        }
    }
}

impl fmt::Display for SyscallNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complete syscall set.
///
/// This is the ONLY interface through which user code may change page tables
/// or environment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Syscall {
    /// Print `len` bytes at `va` to the console
    Cputs { va: VirtAddr, len: u32 },
    /// Read a console character without blocking
    Cgetc,
    GetEnvId,
    EnvDestroy { env: EnvId },
    PageAlloc { env: EnvId, va: VirtAddr, perm: PteFlags },
    PageMap {
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    },
    PageUnmap { env: EnvId, va: VirtAddr },
    /// Create a not-runnable child with a copy of the caller's registers
    Exofork,
    /// `status` is the raw wire value; the handler rejects anything but
    /// runnable / not-runnable
    EnvSetStatus { env: EnvId, status: u32 },
    EnvSetPgfaultUpcall { env: EnvId, entry: VirtAddr },
    Yield,
    IpcTrySend {
        env: EnvId,
        value: u32,
        src_va: VirtAddr,
        perm: PteFlags,
    },
    /// `dst_va >= UTOP` means "value only, no page"
    IpcRecv { dst_va: VirtAddr },
    /// Install the trap frame stored at `tf` in the caller's memory
    EnvSetTrapframe { env: EnvId, tf: VirtAddr },
}

impl Syscall {
    pub fn number(&self) -> SyscallNo {
        match self {
            Syscall::Cputs { .. } => SyscallNo::Cputs,
            Syscall::Cgetc => SyscallNo::Cgetc,
            Syscall::GetEnvId => SyscallNo::GetEnvId,
            Syscall::EnvDestroy { .. } => SyscallNo::EnvDestroy,
            Syscall::PageAlloc { .. } => SyscallNo::PageAlloc,
            Syscall::PageMap { .. } => SyscallNo::PageMap,
            Syscall::PageUnmap { .. } => SyscallNo::PageUnmap,
            Syscall::Exofork => SyscallNo::Exofork,
            Syscall::EnvSetStatus { .. } => SyscallNo::EnvSetStatus,
            Syscall::EnvSetPgfaultUpcall { .. } => SyscallNo::EnvSetPgfaultUpcall,
            Syscall::Yield => SyscallNo::Yield,
            Syscall::IpcTrySend { .. } => SyscallNo::IpcTrySend,
            Syscall::IpcRecv { .. } => SyscallNo::IpcRecv,
            Syscall::EnvSetTrapframe { .. } => SyscallNo::EnvSetTrapframe,
        }
    }

    pub fn name(&self) -> &'static str {
        self.number().name()
    }

    /// Marshals into the five-word wire form
    pub fn encode(&self) -> RawSyscall {
        let env = |e: &EnvId| e.to_raw() as u32;
        let args = match self {
            Syscall::Cputs { va, len } => [va.as_u32(), *len, 0, 0, 0],
            Syscall::Cgetc | Syscall::GetEnvId | Syscall::Exofork | Syscall::Yield => [0; 5],
            Syscall::EnvDestroy { env: e } => [env(e), 0, 0, 0, 0],
            Syscall::PageAlloc { env: e, va, perm } => [env(e), va.as_u32(), perm.bits(), 0, 0],
            Syscall::PageMap {
                src_env,
                src_va,
                dst_env,
                dst_va,
                perm,
            } => [
                env(src_env),
                src_va.as_u32(),
                env(dst_env),
                dst_va.as_u32(),
                perm.bits(),
            ],
            Syscall::PageUnmap { env: e, va } => [env(e), va.as_u32(), 0, 0, 0],
            Syscall::EnvSetStatus { env: e, status } => [env(e), *status, 0, 0, 0],
            Syscall::EnvSetPgfaultUpcall { env: e, entry } => [env(e), entry.as_u32(), 0, 0, 0],
            Syscall::IpcTrySend {
                env: e,
                value,
                src_va,
                perm,
            } => [env(e), *value, src_va.as_u32(), perm.bits(), 0],
            Syscall::IpcRecv { dst_va } => [dst_va.as_u32(), 0, 0, 0, 0],
            Syscall::EnvSetTrapframe { env: e, tf } => [env(e), tf.as_u32(), 0, 0, 0],
        };
        RawSyscall {
            no: self.number().to_raw(),
            args,
        }
    }
}

/// Syscall as it crosses the boundary: opcode and five argument words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSyscall {
    pub no: u32,
    pub args: [u32; 5],
}

impl RawSyscall {
    pub fn new(no: u32, args: [u32; 5]) -> Self {
        Self { no, args }
    }

    /// Decodes the opcode and arguments into a typed syscall
    ///
    /// Permission words keep every bit the caller passed so the handler can
    /// reject stray bits instead of silently dropping them.
    pub fn decode(&self) -> Result<Syscall, SysError> {
        let [a1, a2, a3, a4, a5] = self.args;
        let env = |w: u32| EnvId::from_raw(w as i32);
        let perm = PteFlags::from_bits_retain;
        let no = SyscallNo::from_raw(self.no).ok_or(SysError::NoSys)?;
        Ok(match no {
            SyscallNo::Cputs => Syscall::Cputs {
                va: VirtAddr(a1),
                len: a2,
            },
            SyscallNo::Cgetc => Syscall::Cgetc,
            SyscallNo::GetEnvId => Syscall::GetEnvId,
            SyscallNo::EnvDestroy => Syscall::EnvDestroy { env: env(a1) },
            SyscallNo::PageAlloc => Syscall::PageAlloc {
                env: env(a1),
                va: VirtAddr(a2),
                perm: perm(a3),
            },
            SyscallNo::PageMap => Syscall::PageMap {
                src_env: env(a1),
                src_va: VirtAddr(a2),
                dst_env: env(a3),
                dst_va: VirtAddr(a4),
                perm: perm(a5),
            },
            SyscallNo::PageUnmap => Syscall::PageUnmap {
                env: env(a1),
                va: VirtAddr(a2),
            },
            SyscallNo::Exofork => Syscall::Exofork,
            SyscallNo::EnvSetStatus => Syscall::EnvSetStatus {
                env: env(a1),
                status: a2,
            },
            SyscallNo::EnvSetPgfaultUpcall => Syscall::EnvSetPgfaultUpcall {
                env: env(a1),
                entry: VirtAddr(a2),
            },
            SyscallNo::Yield => Syscall::Yield,
            SyscallNo::IpcTrySend => Syscall::IpcTrySend {
                env: env(a1),
                value: a2,
                src_va: VirtAddr(a3),
                perm: perm(a4),
            },
            SyscallNo::IpcRecv => Syscall::IpcRecv {
                dst_va: VirtAddr(a1),
            },
            SyscallNo::EnvSetTrapframe => Syscall::EnvSetTrapframe {
                env: env(a1),
                tf: VirtAddr(a2),
            },
        })
    }
}
