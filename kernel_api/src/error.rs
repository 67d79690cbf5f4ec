//! Syscall error types

use core_types::{EnvId, VirtAddr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable errors returned by the kernel as negative codes
///
/// Validation failures leave kernel state untouched.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SysError {
    /// Environment doesn't exist or the caller may not act on it
    #[error("bad environment")]
    BadEnv,

    /// Bad alignment, bad permission bits, out-of-range address or malformed value
    #[error("invalid parameter")]
    Inval,

    /// Physical pages or page-table frames exhausted
    #[error("out of memory")]
    NoMem,

    /// Environment table exhausted
    #[error("out of environments")]
    NoFreeEnv,

    /// Receiver isn't waiting, or another sender got there first
    #[error("env is not recving")]
    IpcNotRecv,

    /// Unknown syscall number
    #[error("unhandled syscall")]
    NoSys,
}

impl SysError {
    /// Every error kind, in code order
    pub const ALL: [SysError; 6] = [
        SysError::BadEnv,
        SysError::Inval,
        SysError::NoMem,
        SysError::NoFreeEnv,
        SysError::IpcNotRecv,
        SysError::NoSys,
    ];

    /// Positive error number
    pub const fn errno(self) -> i32 {
        match self {
            SysError::BadEnv => 2,
            SysError::Inval => 3,
            SysError::NoMem => 4,
            SysError::NoFreeEnv => 5,
            SysError::IpcNotRecv => 7,
            SysError::NoSys => 8,
        }
    }

    /// Negative value as returned across the syscall boundary
    pub const fn code(self) -> i32 {
        -self.errno()
    }

    /// Decodes a negative syscall return value
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.code() == code)
    }
}

/// Converts a raw syscall return value into a result
///
/// Non-negative values are success payloads. Negative values that don't
/// name a known error decode as [`SysError::Inval`].
pub fn decode_return(ret: i32) -> Result<u32, SysError> {
    if ret >= 0 {
        Ok(ret as u32)
    } else {
        Err(SysError::from_code(ret).unwrap_or(SysError::Inval))
    }
}

/// Encodes a handler result as a raw syscall return value
pub fn encode_return(result: Result<u32, SysError>) -> i32 {
    match result {
        Ok(value) => value as i32,
        Err(err) => err.code(),
    }
}

/// A user-level condition the environment can't continue past
///
/// Raised by user code (for instance a fault handler whose preconditions
/// don't hold). The kernel destroys the environment that reports one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("user panic in {env}: {message}")]
pub struct UserPanic {
    pub env: EnvId,
    pub message: String,
}

impl UserPanic {
    pub fn new(env: EnvId, message: impl Into<String>) -> Self {
        Self {
            env,
            message: message.into(),
        }
    }
}

/// A user memory access that could not be completed
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The access faulted and the environment was destroyed as a result
    #[error("environment {env} destroyed by fault at va {va}")]
    Destroyed { env: EnvId, va: VirtAddr },

    /// The environment isn't alive or isn't in a state to execute
    #[error("environment {0} is not executing")]
    NotExecuting(EnvId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_unique() {
        let mut codes: Vec<i32> = SysError::ALL.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), SysError::ALL.len());
    }

    #[test]
    fn test_from_code() {
        for err in SysError::ALL {
            assert_eq!(SysError::from_code(err.code()), Some(err));
        }
        assert_eq!(SysError::from_code(-1000), None);
        assert_eq!(SysError::from_code(0), None);
    }

    #[test]
    fn test_decode_return() {
        assert_eq!(decode_return(0), Ok(0));
        assert_eq!(decode_return(0x1001), Ok(0x1001));
        assert_eq!(decode_return(-2), Err(SysError::BadEnv));
        assert_eq!(decode_return(-7), Err(SysError::IpcNotRecv));
        assert_eq!(decode_return(-99), Err(SysError::Inval));
    }

    #[test]
    fn test_encode_return() {
        assert_eq!(encode_return(Ok(5)), 5);
        assert_eq!(encode_return(Err(SysError::NoMem)), -4);
    }

    #[test]
    fn test_user_panic_display() {
        let panic = UserPanic::new(EnvId::from_raw(0x1001), "not a write");
        assert_eq!(panic.to_string(), "user panic in 00001001: not a write");
    }
}
