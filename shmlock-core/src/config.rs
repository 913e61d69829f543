// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML segment options with strict validation.
//!
//! Options are optional: `SegmentOptions::default()` reproduces the behavior
//! every process gets when it does not load a file. When a file is loaded,
//! any invalid field is rejected before a segment is ever touched.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do with a segment name longer than [`crate::types::NAME_LENGTH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamePolicy {
    /// Keep the first 63 characters without reporting anything.
    #[default]
    Truncate,
    /// Fail with `SegmentError::NameTooLong`.
    Reject,
}

/// Raw options as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSegmentOptions {
    #[serde(default)]
    name_policy: NamePolicy,
    #[serde(default = "default_mode")]
    mode: u32,
    #[serde(default = "default_unlink")]
    unlink_on_last_detach: bool,
    #[serde(default = "default_init_timeout_ms")]
    init_timeout_ms: u64,
}

fn default_mode() -> u32 {
    0o600
}

fn default_unlink() -> bool {
    true
}

fn default_init_timeout_ms() -> u64 {
    1000
}

/// Validated per-segment options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOptions {
    pub name_policy: NamePolicy,
    /// Permission bits for objects this process creates.
    pub mode: u32,
    /// Unlink both names when the last attachment on the host goes away.
    pub unlink_on_last_detach: bool,
    /// How long an attacher waits for a concurrently created mutex to become
    /// usable, and how long teardown waits for the lock before giving up on it.
    pub init_timeout: Duration,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            name_policy: NamePolicy::default(),
            mode: default_mode(),
            unlink_on_last_detach: default_unlink(),
            init_timeout: Duration::from_millis(default_init_timeout_ms()),
        }
    }
}

/// Options loader with strict validation.
pub struct OptionsLoader;

impl OptionsLoader {
    /// Longest accepted `init_timeout_ms`.
    const MAX_INIT_TIMEOUT_MS: u64 = 60_000;

    /// Load and validate options from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<SegmentOptions, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            context: "reading options file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate options from a YAML string.
    pub fn load_string(content: &str) -> Result<SegmentOptions, ConfigError> {
        let raw: RawSegmentOptions =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawSegmentOptions) -> Result<SegmentOptions, ConfigError> {
        if raw.mode & !0o777 != 0 {
            return Err(ConfigError::InvalidFieldValue {
                field: "mode",
                value: format!("{:#o}", raw.mode),
                reason: "Only permission bits (0o777) may be set".to_string(),
            });
        }

        // The creating user must be able to map the object read-write.
        if raw.mode & 0o600 != 0o600 {
            return Err(ConfigError::InvalidFieldValue {
                field: "mode",
                value: format!("{:#o}", raw.mode),
                reason: "Owner read and write bits are required".to_string(),
            });
        }

        if raw.init_timeout_ms == 0 || raw.init_timeout_ms > Self::MAX_INIT_TIMEOUT_MS {
            return Err(ConfigError::InvalidFieldValue {
                field: "init_timeout_ms",
                value: raw.init_timeout_ms.to_string(),
                reason: format!("Must be between 1 and {}", Self::MAX_INIT_TIMEOUT_MS),
            });
        }

        Ok(SegmentOptions {
            name_policy: raw.name_policy,
            mode: raw.mode,
            unlink_on_last_detach: raw.unlink_on_last_detach,
            init_timeout: Duration::from_millis(raw.init_timeout_ms),
        })
    }
}
