// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmlock bump` command - Increment a shared `u64` counter.

use shmlock_core::{CreateOutcome, LockState, SegmentOptions, TypedSegment};

pub fn execute(
    name: &str,
    times: u64,
    options: SegmentOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut counter = TypedSegment::<u64>::with_options(name, options)?;
    if counter.create()? == CreateOutcome::Attached {
        tracing::debug!(name = %name, "Attached to existing counter");
    }

    for _ in 0..times {
        let mut guard = counter.lock()?;
        if guard.lock_state() == Some(LockState::Recovered) {
            tracing::warn!(name = %name, "Counter lock recovered from a terminated holder");
        }
        *guard += 1;
    }

    let value = *counter.lock()?;
    println!("{}", value);

    Ok(())
}
