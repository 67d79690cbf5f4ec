//! Syscall error code contract tests

use kernel_api::SysError;

/// Every error with its positive error number (stable contract)
pub const ERRNOS: [(SysError, i32); 6] = [
    (SysError::BadEnv, 2),
    (SysError::Inval, 3),
    (SysError::NoMem, 4),
    (SysError::NoFreeEnv, 5),
    (SysError::IpcNotRecv, 7),
    (SysError::NoSys, 8),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use kernel_api::{decode_return, encode_return};

    #[test]
    fn test_error_numbers_are_stable() {
        for (err, errno) in ERRNOS {
            assert_eq!(err.errno(), errno, "{:?}", err);
            assert_eq!(err.code(), -errno);
            assert_eq!(SysError::from_code(-errno), Some(err));
        }
        assert_eq!(SysError::ALL.len(), ERRNOS.len());
    }

    #[test]
    fn test_return_convention() {
        assert_eq!(decode_return(0), Ok(0));
        assert_eq!(decode_return(0x1001), Ok(0x1001));
        assert_eq!(decode_return(-7), Err(SysError::IpcNotRecv));
        // unassigned negative values are never success
        assert!(decode_return(-6).is_err());
        assert!(decode_return(-1).is_err());
        assert_eq!(encode_return(Err(SysError::NoMem)), -4);
        assert_eq!(encode_return(Ok(5)), 5);
    }

    #[test]
    fn test_error_messages_are_stable() {
        assert_eq!(SysError::IpcNotRecv.to_string(), "env is not recving");
        assert_eq!(SysError::BadEnv.to_string(), "bad environment");
        assert_eq!(SysError::NoSys.to_string(), "unhandled syscall");
    }

    #[test]
    fn test_error_enum_is_stable() {
        // These variants MUST NOT CHANGE without updating the monitor
        verify_json(&SysError::BadEnv, r#""BadEnv""#);
        verify_json(&SysError::IpcNotRecv, r#""IpcNotRecv""#);
        verify_json(&SysError::NoFreeEnv, r#""NoFreeEnv""#);
    }
}
