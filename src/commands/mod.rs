// File: mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::Result;
use colored::*;

use crate::cli::{PocArgs, ScriptArgs};
use crate::config::ScanConfig;

pub mod list;
pub mod poc;
pub mod scan;

pub async fn handle_scan_command(config: ScanConfig) -> Result<()> {
    scan::execute(config).await
}

pub fn handle_list_command(config: &ScanConfig) -> Result<()> {
    list::execute(config)
}

pub fn handle_poc_command(args: &PocArgs, config: &ScanConfig) -> Result<()> {
    poc::execute_poc(args, config)
}

pub async fn handle_script_command(args: &ScriptArgs, config: &ScanConfig) -> Result<()> {
    poc::execute_script(args, config).await
}

// Stdout carries the result log, so status lines go to stderr.
fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

fn format_duration(ms: i64) -> String {
    if ms >= 60000 {
        format!("{}m {:.1}s", ms / 60000, (ms % 60000) as f64 / 1000.0)
    } else if ms >= 1000 {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.50s");
        assert_eq!(format_duration(61500), "1m 1.5s");
    }
}
