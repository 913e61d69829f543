//! shmlock Core Library
//!
//! Named, cross-process shared memory segments with a built-in mutex.
//! Processes on the same host create or attach to a segment by name and get
//! lock-protected, typed access to its payload.
//!
//! ```no_run
//! use shmlock_core::TypedSegment;
//!
//! # fn main() -> Result<(), shmlock_core::SegmentError> {
//! let mut counter = TypedSegment::<u64>::new("requests")?;
//! counter.create()?;
//! *counter.lock()? += 1;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod shm;
pub mod types;

// Re-export commonly used types
pub use config::{NamePolicy, OptionsLoader, SegmentOptions};
pub use error::{ConfigError, SegmentError, ShmError, ShmResult};
pub use shm::{
    CreateOutcome, Header, LockState, Payload, ScopedAccess, Segment, SharedSegment, TypedSegment,
};
pub use types::{SegmentName, MUTEX_SUFFIX, NAME_LENGTH};
