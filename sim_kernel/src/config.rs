//! Kernel configuration
//!
//! Loaded from JSON by harnesses; every field has a default so a partial
//! document is enough.

use core_types::NENV;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables for a [`SimulatedKernel`](crate::SimulatedKernel)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Environment table capacity, at most 1024
    pub max_envs: usize,
    /// Physical frames available to the allocator
    pub phys_frames: usize,
    /// Record every syscall in the audit log
    pub audit_syscalls: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_envs: NENV,
            phys_frames: 4096,
            audit_syscalls: true,
        }
    }
}

/// Configuration rejected at load time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed kernel config: {0}")]
    Parse(String),

    #[error("max_envs must be between 1 and {max}, got {got}")]
    MaxEnvs { got: usize, max: usize },

    #[error("phys_frames must be non-zero")]
    NoFrames,
}

impl KernelConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_envs == 0 || self.max_envs > NENV {
            return Err(ConfigError::MaxEnvs {
                got: self.max_envs,
                max: NENV,
            });
        }
        if self.phys_frames == 0 {
            return Err(ConfigError::NoFrames);
        }
        Ok(())
    }

    pub fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = max_envs;
        self
    }

    pub fn with_phys_frames(mut self, phys_frames: usize) -> Self {
        self.phys_frames = phys_frames;
        self
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit_syscalls = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.max_envs, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = KernelConfig::from_json(r#"{ "phys_frames": 128 }"#).unwrap();
        assert_eq!(config.phys_frames, 128);
        assert_eq!(config.max_envs, 1024);
        assert!(config.audit_syscalls);
    }

    #[test]
    fn test_rejects_oversized_table() {
        let err = KernelConfig::from_json(r#"{ "max_envs": 2048 }"#).unwrap_err();
        assert_eq!(err, ConfigError::MaxEnvs { got: 2048, max: 1024 });
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            KernelConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = KernelConfig::default()
            .with_max_envs(8)
            .with_phys_frames(32)
            .with_audit(false);
        assert_eq!(config.max_envs, 8);
        assert_eq!(config.phys_frames, 32);
        assert!(!config.audit_syscalls);
    }
}
