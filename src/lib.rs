// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]

pub mod baseline;
pub mod checkpoint;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod mutations;
pub mod oracle;
pub mod poc;
pub mod report;
pub mod request;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        let _ = config::ScanConfig::default();
        let _ = state::ScanState::new();
        let _ = stats::ScanStats::new();
        let _ = scheduler::VulnCounts::new();
        let _ = mutations::catalog();
    }
}
