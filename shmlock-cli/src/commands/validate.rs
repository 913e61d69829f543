// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmlock validate` command - Validate an options file.

use std::path::Path;

use shmlock_core::OptionsLoader;

pub fn execute(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file.display(), "Validating options");

    match OptionsLoader::load_file(file) {
        Ok(options) => {
            println!("✓ Options are valid");
            println!();
            println!("  Name Policy:           {:?}", options.name_policy);
            println!("  Mode:                  {:#o}", options.mode);
            println!(
                "  Unlink On Last Detach: {}",
                options.unlink_on_last_detach
            );
            println!(
                "  Init Timeout:          {}ms",
                options.init_timeout.as_millis()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Options validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
