// File: list.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::Result;
use std::io::{self, Write};

use crate::config::ScanConfig;

/// Enabled mutation names, sorted, one per line.
pub fn execute(config: &ScanConfig) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for name in config.mutations().keys() {
        writeln!(out, "{}", name)?;
    }
    out.flush()?;
    Ok(())
}
