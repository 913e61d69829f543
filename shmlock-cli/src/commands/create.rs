// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmlock create` command - Create or attach to a segment.

use std::time::Duration;

use shmlock_core::{CreateOutcome, Segment, SegmentOptions, SharedSegment};

pub fn execute(
    name: &str,
    size: usize,
    hold_ms: Option<u64>,
    locked: bool,
    options: SegmentOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut segment = SharedSegment::with_options(options);
    segment.set_name(name)?;

    match segment.create(size)? {
        CreateOutcome::Created => println!("Created {} ({} bytes)", segment_label(&segment), size),
        CreateOutcome::Attached => println!(
            "Attached to existing {} ({} bytes)",
            segment_label(&segment),
            segment.size()?
        ),
    }

    if locked {
        let state = segment.lock()?;
        println!("Holding lock on {} ({:?})", name, state);
    }

    if let Some(ms) = hold_ms {
        tracing::info!(name = %name, hold_ms = ms, locked = locked, "Holding segment attachment");
        std::thread::sleep(Duration::from_millis(ms));
    }

    if locked {
        segment.unlock()?;
    }

    Ok(())
}

fn segment_label(segment: &SharedSegment) -> String {
    format!(
        "{} [mutex {}]",
        segment.name().unwrap_or_default(),
        segment.mutex_name().unwrap_or_default()
    )
}
