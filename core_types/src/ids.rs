//! Environment identifiers
//!
//! An [`EnvId`] packs a reusable table-slot index into its low bits and a
//! generation number above them. The generation changes every time the slot is
//! reused, so an identifier kept around after its environment died never
//! names the slot's next occupant.
//!
//! ```text
//! +1+---------------21-----------------+--------10--------+
//! |0|          Generation              | Environment Index|
//! +------------------------------------+------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// log2 of the maximum number of environments
pub const LOG2NENV: u32 = 10;
/// Maximum number of environment slots
pub const NENV: usize = 1 << LOG2NENV;
/// Lowest bit of the generation field
pub const ENVGENSHIFT: u32 = 12;

/// Identifier of an environment
///
/// The raw value `0` never names a live environment; at the syscall boundary
/// it means "the calling environment".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvId(i32);

impl EnvId {
    /// The "current environment" alias
    pub const CURRENT: EnvId = EnvId(0);

    /// Creates an identifier from its raw wire value
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw wire value
    pub const fn to_raw(self) -> i32 {
        self.0
    }

    /// Table slot this identifier refers to
    pub const fn index(self) -> usize {
        (self.0 as u32 as usize) & (NENV - 1)
    }

    /// Generation part of the identifier
    pub const fn generation(self) -> i32 {
        self.0 & !((NENV as i32) - 1)
    }

    pub const fn is_current_alias(self) -> bool {
        self.0 == 0
    }

    /// Identifier for the next occupant of `previous`'s slot
    ///
    /// `previous` is whatever identifier the slot carried last (zero for a
    /// never-used slot).
    pub fn next_for_slot(previous: EnvId, index: usize) -> EnvId {
        debug_assert!(index < NENV);
        let mut generation = previous.0.wrapping_add(1 << ENVGENSHIFT) & !((NENV as i32) - 1);
        if generation <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        EnvId(generation | index as i32)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
