// File: poc.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{Context, Result};
use std::io::{self, Write};

use crate::cli::{PocArgs, ScriptArgs};
use crate::config::ScanConfig;
use crate::poc::{generate_poc, render_script};

pub fn execute_poc(args: &PocArgs, config: &ScanConfig) -> Result<()> {
    let request = generate_poc(
        config,
        &args.method,
        &args.url,
        &args.desync_type,
        &args.mutation,
    )?;

    let mut out = io::stdout().lock();
    out.write_all(&request)?;
    out.flush()?;
    Ok(())
}

pub async fn execute_script(args: &ScriptArgs, config: &ScanConfig) -> Result<()> {
    let template = tokio::fs::read_to_string(&args.template)
        .await
        .with_context(|| format!("Failed to read template {}", args.template.display()))?;

    let script = render_script(config, &template, &args.method, &args.url, &args.mutation)?;
    print!("{}", script);
    io::stdout().flush()?;
    Ok(())
}
