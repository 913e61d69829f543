// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmlock Benchmarks
//!
//! Helpers shared by the criterion benches: segment naming and setup.
//!
//! # Benchmark Groups
//!
//! - **Lock**: raw `lock`/`unlock` and `try_lock` on an uncontended segment
//! - **Guard**: `ScopedAccess` acquire/release around a payload update
//! - **Contention**: lock round trips while a second thread competes

use shmlock_core::{Payload, Segment, SegmentError, SharedSegment, TypedSegment};

/// Segment name unique to this process and benchmark.
pub fn bench_name(tag: &str) -> String {
    format!("shmlock-bench-{}-{}", tag, std::process::id())
}

/// Create an untyped segment with `size` payload bytes.
pub fn shared_segment(tag: &str, size: usize) -> Result<SharedSegment, SegmentError> {
    let mut segment = SharedSegment::new();
    segment.set_name(&bench_name(tag))?;
    segment.create(size)?;
    Ok(segment)
}

/// Create a typed segment sized for one `T`.
pub fn typed_segment<T: Payload>(tag: &str) -> Result<TypedSegment<T>, SegmentError> {
    let mut segment = TypedSegment::<T>::new(&bench_name(tag))?;
    segment.create()?;
    Ok(segment)
}

/// Attach a second handle to the segment behind `segment`.
pub fn attach_peer(segment: &SharedSegment) -> Result<SharedSegment, SegmentError> {
    let mut peer = SharedSegment::with_options(segment.options().clone());
    peer.set_name(segment.name().unwrap_or_default())?;
    peer.open()?;
    Ok(peer)
}
