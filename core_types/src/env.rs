//! Environment status and saved register state

use crate::memory::VirtAddr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Page fault error code: fault caused by a protection violation
pub const FEC_PR: u32 = 0x1;
/// Page fault error code: fault caused by a write
pub const FEC_WR: u32 = 0x2;
/// Page fault error code: fault occurred in user mode
pub const FEC_U: u32 = 0x4;

/// User text segment selector
pub const GD_UT: u32 = 0x18;
/// User data segment selector
pub const GD_UD: u32 = 0x20;
/// Requested privilege level for user selectors
pub const RPL_USER: u32 = 3;
/// Interrupt enable flag
pub const FL_IF: u32 = 0x0000_0200;
/// I/O privilege level mask
pub const FL_IOPL_MASK: u32 = 0x0000_3000;

/// Environment state machine
///
/// ```text
/// Free -> NotRunnable <-> Runnable -> Running -> Dying -> Free
///              ^                         |
///              +-------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EnvStatus {
    /// Slot unused
    Free = 0,
    /// Marked for teardown
    Dying = 1,
    /// Eligible for scheduling
    Runnable = 2,
    /// Currently executing; at most one at a time
    Running = 3,
    /// Alive but not schedulable, e.g. waiting in IPC receive
    NotRunnable = 4,
}

impl EnvStatus {
    /// Decodes a wire status value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(EnvStatus::Free),
            1 => Some(EnvStatus::Dying),
            2 => Some(EnvStatus::Runnable),
            3 => Some(EnvStatus::Running),
            4 => Some(EnvStatus::NotRunnable),
            _ => None,
        }
    }

    pub const fn to_raw(self) -> u32 {
        self as u32
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: EnvStatus) -> bool {
        use EnvStatus::*;
        match (self, next) {
            (Free, NotRunnable) | (Free, Runnable) => true,
            (NotRunnable, Runnable) | (Runnable, NotRunnable) => true,
            (Runnable, Running) | (Running, Runnable) | (Running, NotRunnable) => true,
            (NotRunnable, NotRunnable) | (Runnable, Runnable) => true,
            (Dying, Free) => true,
            (Free, _) | (Dying, _) => false,
            (_, Dying) => true,
            _ => false,
        }
    }

    pub fn is_alive(self) -> bool {
        !matches!(self, EnvStatus::Free | EnvStatus::Dying)
    }
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvStatus::Free => "free",
            EnvStatus::Dying => "dying",
            EnvStatus::Runnable => "runnable",
            EnvStatus::Running => "running",
            EnvStatus::NotRunnable => "not-runnable",
        };
        f.write_str(name)
    }
}

/// General purpose registers in `pusha` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

impl PushRegs {
    pub const WORDS: usize = 8;

    fn to_words(self) -> [u32; Self::WORDS] {
        [
            self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax,
        ]
    }

    fn from_words(w: &[u32]) -> Self {
        Self {
            edi: w[0],
            esi: w[1],
            ebp: w[2],
            oesp: w[3],
            ebx: w[4],
            edx: w[5],
            ecx: w[6],
            eax: w[7],
        }
    }
}

/// Register snapshot saved on kernel entry and restored on schedule-in
///
/// `eax` carries a syscall's return value back to user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u32,
    pub ds: u32,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl Trapframe {
    /// Number of 32-bit words in the in-memory layout
    pub const WORDS: usize = PushRegs::WORDS + 9;
    /// Size of the in-memory layout in bytes
    pub const SIZE: usize = Self::WORDS * 4;

    /// Fresh user-mode frame starting at `eip` with stack `esp`
    pub fn user(eip: VirtAddr, esp: VirtAddr) -> Self {
        let mut tf = Self {
            eip: eip.as_u32(),
            esp: esp.as_u32(),
            ..Self::default()
        };
        tf.force_user_mode();
        tf
    }

    /// Forces user selectors, interrupts on and I/O privilege off
    pub fn force_user_mode(&mut self) {
        self.cs = GD_UT | RPL_USER;
        self.ds = GD_UD | RPL_USER;
        self.es = GD_UD | RPL_USER;
        self.ss = GD_UD | RPL_USER;
        self.eflags |= FL_IF;
        self.eflags &= !FL_IOPL_MASK;
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = self.regs.to_words().to_vec();
        words.extend_from_slice(&[
            self.es,
            self.ds,
            self.trapno,
            self.err,
            self.eip,
            self.cs,
            self.eflags,
            self.esp,
            self.ss,
        ]);
        words_to_bytes(&words)
    }

    /// Decodes the in-memory layout; `None` if `bytes` is too short
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let w = bytes_to_words(bytes, Self::WORDS)?;
        Some(Self {
            regs: PushRegs::from_words(&w[..PushRegs::WORDS]),
            es: w[8],
            ds: w[9],
            trapno: w[10],
            err: w[11],
            eip: w[12],
            cs: w[13],
            eflags: w[14],
            esp: w[15],
            ss: w[16],
        })
    }
}

/// Frame pushed on the user exception stack when a page fault is reflected
/// to the environment's fault upcall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UTrapframe {
    pub fault_va: VirtAddr,
    pub err: u32,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

impl UTrapframe {
    pub const WORDS: usize = PushRegs::WORDS + 5;
    pub const SIZE: usize = Self::WORDS * 4;

    pub fn is_write(&self) -> bool {
        self.err & FEC_WR != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = vec![self.fault_va.as_u32(), self.err];
        words.extend_from_slice(&self.regs.to_words());
        words.extend_from_slice(&[self.eip, self.eflags, self.esp]);
        words_to_bytes(&words)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let w = bytes_to_words(bytes, Self::WORDS)?;
        Some(Self {
            fault_va: VirtAddr(w[0]),
            err: w[1],
            regs: PushRegs::from_words(&w[2..10]),
            eip: w[10],
            eflags: w[11],
            esp: w[12],
        })
    }
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8], count: usize) -> Option<Vec<u32>> {
    if bytes.len() < count * 4 {
        return None;
    }
    Some(
        bytes[..count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
