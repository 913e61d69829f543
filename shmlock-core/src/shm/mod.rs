// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Named shared memory segments.
//!
//! A segment is a header plus payload in a POSIX shared memory object, paired
//! with a process-shared robust mutex in a second object. Typed access goes
//! through a guard that holds the mutex for its whole lifetime.

mod guard;
mod header;
mod mapping;
mod mutex;
mod segment;
mod typed;

pub use guard::ScopedAccess;
pub use header::{Header, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use mutex::LockState;
pub use segment::{CreateOutcome, Segment, SharedSegment};
pub use typed::{Payload, TypedSegment};
