//! Custom error types for shmlock.
//!
//! Errors are explicit enums. No `Box<dyn Error>`, no `anyhow::Result` in the
//! library: every failure names the object it happened on and, where the OS
//! was involved, carries the errno it reported.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Top-level error type for shmlock.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("Segment error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failures of segment setup, locking and access.
#[derive(Debug, Error)]
pub enum SegmentError {
    // =========================================================================
    // Naming
    // =========================================================================
    #[error("Invalid segment name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Segment name too long: {length} chars (max {max})")]
    NameTooLong { length: usize, max: usize },

    #[error("Segment name has not been set")]
    NameNotSet,

    // =========================================================================
    // Lifecycle
    // =========================================================================
    #[error("Segment '{name}' is already attached")]
    AlreadyAttached { name: String },

    #[error("Segment '{name}' is not attached")]
    NotAttached { name: String },

    #[error("Payload size {size} exceeds maximum {max}")]
    SizeTooLarge { size: usize, max: usize },

    // =========================================================================
    // Shared memory objects
    // =========================================================================
    #[error("Failed to create shared memory object {name}: {errno}")]
    CreateFailed { name: String, errno: Errno },

    #[error("Failed to open shared memory object {name}: {errno}")]
    OpenFailed { name: String, errno: Errno },

    #[error("Failed to size shared memory object {name}: {errno}")]
    ResizeFailed { name: String, errno: Errno },

    #[error("Failed to map shared memory object {name}: {errno}")]
    MapFailed { name: String, errno: Errno },

    #[error("Shared memory object {name} holds {actual} bytes, expected at least {expected}")]
    Truncated {
        name: String,
        actual: usize,
        expected: usize,
    },

    #[error("Failed to unlink shared memory object {name}: {errno}")]
    UnlinkFailed { name: String, errno: Errno },

    #[error("Timed out after {waited_ms}ms waiting for {name} to be initialized")]
    AttachTimeout { name: String, waited_ms: u64 },

    #[error("Gave up attaching to {name} after {attempts} attempts in {waited_ms}ms")]
    AttachRetriesExhausted {
        name: String,
        attempts: usize,
        waited_ms: u64,
    },

    // =========================================================================
    // Mutex
    // =========================================================================
    #[error("Failed to initialize mutex {name}: {errno}")]
    MutexInit { name: String, errno: Errno },

    #[error("Failed to acquire mutex {name}: {errno}")]
    LockFailed { name: String, errno: Errno },

    #[error("Failed to release mutex {name}: {errno}")]
    UnlockFailed { name: String, errno: Errno },

    // =========================================================================
    // Typed access
    // =========================================================================
    #[error("Payload type needs {required} bytes but segment '{name}' holds {available}")]
    PayloadTooSmall {
        name: String,
        required: usize,
        available: usize,
    },
}

impl SegmentError {
    /// The errno reported by the OS, if this failure came from a system call.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::CreateFailed { errno, .. }
            | Self::OpenFailed { errno, .. }
            | Self::ResizeFailed { errno, .. }
            | Self::MapFailed { errno, .. }
            | Self::UnlinkFailed { errno, .. }
            | Self::MutexInit { errno, .. }
            | Self::LockFailed { errno, .. }
            | Self::UnlockFailed { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Error code recorded by a segment when this error is returned.
    ///
    /// OS failures report their own errno; the rest map onto the closest errno.
    pub fn raw_os_error(&self) -> i32 {
        if let Some(errno) = self.errno() {
            return errno as i32;
        }

        let errno = match self {
            Self::InvalidName { .. } | Self::NameNotSet => Errno::EINVAL,
            Self::NameTooLong { .. } => Errno::ENAMETOOLONG,
            Self::AlreadyAttached { .. } => Errno::EALREADY,
            Self::NotAttached { .. } => Errno::EBADF,
            Self::SizeTooLarge { .. } => Errno::EFBIG,
            Self::Truncated { .. } => Errno::EBADMSG,
            Self::AttachTimeout { .. } => Errno::ETIMEDOUT,
            Self::AttachRetriesExhausted { .. } => Errno::EAGAIN,
            Self::PayloadTooSmall { .. } => Errno::EOVERFLOW,
            _ => Errno::UnknownErrno,
        };
        errno as i32
    }
}

/// Options file errors. Invalid options are rejected up front.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Options file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Options parse error: {message}")]
    Parse { message: String },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using ShmError.
pub type ShmResult<T> = Result<T, ShmError>;
