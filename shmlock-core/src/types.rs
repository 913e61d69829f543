// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! `SegmentName` owns the naming rule every process has to agree on: the
//! segment name is capped at [`NAME_LENGTH`] characters and the companion
//! mutex name is derived from it deterministically.

use std::fmt;

use crate::config::NamePolicy;
use crate::error::SegmentError;

/// Maximum number of characters in a segment or mutex name.
pub const NAME_LENGTH: usize = 63;

/// Suffix appended to the segment name to form the mutex name.
pub const MUTEX_SUFFIX: &str = "Mutex";

/// Validated segment name together with its derived mutex name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentName {
    name: String,
    mutex_name: String,
    truncated: bool,
}

impl SegmentName {
    /// Validate `name` and derive the mutex name.
    ///
    /// Names longer than [`NAME_LENGTH`] characters are cut down or rejected
    /// depending on `policy`.
    pub fn new(name: &str, policy: NamePolicy) -> Result<Self, SegmentError> {
        if name.is_empty() {
            return Err(SegmentError::InvalidName {
                name: name.to_string(),
                reason: "name cannot be empty",
            });
        }

        if name.contains('/') {
            return Err(SegmentError::InvalidName {
                name: name.to_string(),
                reason: "name cannot contain '/'",
            });
        }

        if name.contains('\0') {
            return Err(SegmentError::InvalidName {
                name: name.escape_default().to_string(),
                reason: "name cannot contain NUL",
            });
        }

        let length = name.chars().count();
        if length > NAME_LENGTH && policy == NamePolicy::Reject {
            return Err(SegmentError::NameTooLong {
                length,
                max: NAME_LENGTH,
            });
        }

        let stored = truncate_chars(name, NAME_LENGTH);
        let mutex_name = format!(
            "{}{}",
            truncate_chars(stored, NAME_LENGTH - MUTEX_SUFFIX.len()),
            MUTEX_SUFFIX
        );

        Ok(Self {
            name: stored.to_string(),
            mutex_name,
            truncated: length > NAME_LENGTH,
        })
    }

    /// The stored segment name.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The derived mutex name.
    pub fn mutex_name(&self) -> &str {
        &self.mutex_name
    }

    /// Whether the caller's name was cut to fit.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Name of the POSIX shared memory object backing the segment.
    pub(crate) fn region_object(&self) -> String {
        object_name(&self.name)
    }

    /// Name of the POSIX shared memory object holding the mutex.
    pub(crate) fn mutex_object(&self) -> String {
        object_name(&self.mutex_name)
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub(crate) fn object_name(name: &str) -> String {
    format!("/{}", name)
}

/// Longest prefix of `s` holding at most `max` characters.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name() {
        let name = SegmentName::new("telemetry", NamePolicy::Truncate).unwrap();
        assert_eq!(name.as_str(), "telemetry");
        assert_eq!(name.mutex_name(), "telemetryMutex");
        assert!(!name.was_truncated());
        assert_eq!(name.region_object(), "/telemetry");
        assert_eq!(name.mutex_object(), "/telemetryMutex");
    }

    #[test]
    fn test_long_name_truncated() {
        let long = "a".repeat(80);
        let name = SegmentName::new(&long, NamePolicy::Truncate).unwrap();
        assert_eq!(name.as_str().chars().count(), NAME_LENGTH);
        assert!(name.mutex_name().chars().count() <= NAME_LENGTH);
        assert!(name.mutex_name().ends_with(MUTEX_SUFFIX));
        assert_ne!(name.as_str(), name.mutex_name());
        assert!(name.was_truncated());
    }

    #[test]
    fn test_long_name_rejected() {
        let long = "b".repeat(64);
        let err = SegmentName::new(&long, NamePolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            SegmentError::NameTooLong {
                length: 64,
                max: NAME_LENGTH
            }
        ));

        let exact = "b".repeat(NAME_LENGTH);
        assert!(SegmentName::new(&exact, NamePolicy::Reject).is_ok());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "é".repeat(70);
        let name = SegmentName::new(&long, NamePolicy::Truncate).unwrap();
        assert_eq!(name.as_str().chars().count(), NAME_LENGTH);
        assert_eq!(name.mutex_name().chars().count(), NAME_LENGTH);
    }

    #[test]
    fn test_same_name_same_mutex() {
        let a = SegmentName::new("shared-state", NamePolicy::Truncate).unwrap();
        let b = SegmentName::new("shared-state", NamePolicy::Reject).unwrap();
        assert_eq!(a.mutex_name(), b.mutex_name());
    }

    #[test]
    fn test_invalid_names() {
        assert!(SegmentName::new("", NamePolicy::Truncate).is_err());
        assert!(SegmentName::new("a/b", NamePolicy::Truncate).is_err());
        assert!(SegmentName::new("a\0b", NamePolicy::Truncate).is_err());
    }
}
