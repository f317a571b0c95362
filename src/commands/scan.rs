// File: scan.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::fmt::Write;
use tokio::io::BufReader;

use super::{format_duration, print_info, print_success};
use crate::checkpoint::StateFile;
use crate::config::ScanConfig;
use crate::engine::Engine;
use crate::report::ReportSink;

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
    ) {
        pb.set_style(
            style
                .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                })
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
    }
    pb
}

pub async fn execute(config: ScanConfig) -> Result<()> {
    let quiet = config.quiet();

    let mut state_file = StateFile::open(config.state_file())
        .await
        .with_context(|| format!("Failed to open state file {}", config.state_file().display()))?;
    let state = state_file
        .load()
        .await
        .with_context(|| format!("Failed to load state file {}", config.state_file().display()))?;

    if !quiet {
        print_info(&format!(
            "Resuming with {} baselines and {} completed tests from {}",
            state.baselines().await.len(),
            state.result_count().await,
            config.state_file().display()
        ));
    }

    let report = ReportSink::new(config.output_file(), config.verbose())
        .context("Failed to create output file")?
        .with_progress(progress_bar(quiet));

    let engine = Engine::new(config, state, report);
    let stats = engine
        .run(BufReader::new(tokio::io::stdin()), Some(state_file))
        .await?;

    if !quiet {
        print_success(&format!(
            "Scan finished in {}",
            format_duration(stats.elapsed_ms())
        ));
        eprintln!("{}", stats);
    }

    Ok(())
}
