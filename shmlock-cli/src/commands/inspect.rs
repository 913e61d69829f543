// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmlock inspect` command - Print the header and leading payload bytes.

use shmlock_core::{LockState, Segment, SegmentOptions, SharedSegment};

/// Bytes per line of the hex dump.
const ROW: usize = 16;

pub fn execute(
    name: &str,
    bytes: usize,
    options: SegmentOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut segment = SharedSegment::with_options(options);
    segment.set_name(name)?;
    segment.open()?;

    let size = segment.size()?;
    let shown = bytes.min(size);

    let base = segment.as_ptr()?;

    let state = segment.lock()?;
    // SAFETY: the lock is held and the payload is `size` bytes long.
    let payload = unsafe { std::slice::from_raw_parts(base, shown) }.to_vec();
    segment.unlock()?;

    if state == LockState::Recovered {
        tracing::warn!(name = %name, "Previous lock holder terminated while holding the lock");
    }

    println!("Segment:      {}", segment.name().unwrap_or_default());
    println!("Mutex:        {}", segment.mutex_name().unwrap_or_default());
    println!("Payload size: {} bytes", size);
    println!("Attachments:  {}", segment.attachments()?);
    println!();

    if payload.is_empty() {
        println!("(empty payload)");
        return Ok(());
    }

    for (row, chunk) in payload.chunks(ROW).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:08x}  {}", row * ROW, hex.join(" "));
    }
    if shown < size {
        println!("... {} more bytes", size - shown);
    }

    Ok(())
}
