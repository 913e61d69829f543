// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmlock remove` command - Unlink a segment and its mutex.

use shmlock_core::SharedSegment;

pub fn execute(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(name = %name, "Removing segment");

    if SharedSegment::remove(name)? {
        println!("✓ Removed {}", name);
    } else {
        println!("Nothing to remove for {}", name);
    }

    Ok(())
}
