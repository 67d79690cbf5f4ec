//! # Boundary Contract Tests
//!
//! This crate provides "golden" tests for the user/kernel boundary to ensure
//! it doesn't drift accidentally over time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Every wire number is written out literally
//! - **Testability first**: Contract tests fail when the boundary changes
//! - **Mechanism not policy**: Pin what user code depends on, not how the
//!   kernel implements it
//!
//! ## Structure
//!
//! - [`syscall_abi`]: opcode numbers and argument order
//! - [`error_codes`]: negative return codes
//! - [`memory_layout`]: address-space constants and page-table entry bits
//! - [`env_layout`]: identifier layout, status values and frame layouts

pub mod env_layout;
pub mod error_codes;
pub mod memory_layout;
pub mod syscall_abi;

/// Common test helpers for contract validation
pub mod test_helpers {
    use serde::Serialize;

    /// Verifies a wire value hasn't moved
    pub fn verify_wire_value(what: &str, actual: u32, expected: u32) {
        assert_eq!(
            actual, expected,
            "Wire value of {} changed: expected {:#x}, got {:#x}",
            what, expected, actual
        );
    }

    /// Verifies the JSON form of a value, as the monitor sees it
    pub fn verify_json<T: Serialize>(value: &T, expected: &str) {
        let json = serde_json::to_string(value).expect("Failed to serialize");
        assert_eq!(
            json, expected,
            "Serialized form changed: expected '{}', got '{}'",
            expected, json
        );
    }

    /// Splits a little-endian byte image into 32-bit words
    pub fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}
