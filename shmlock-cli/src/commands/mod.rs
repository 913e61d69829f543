// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod bump;
pub mod create;
pub mod inspect;
pub mod remove;
pub mod validate;
