// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use colored::*;
use indicatif::ProgressBar;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::errors::ScanError;
use crate::state::{SmuggleTestRecord, TestStatus};

/// `<method> <target> <status> <mutation>`
pub fn finding_line(record: &SmuggleTestRecord) -> String {
    format!(
        "{} {} {} {}",
        record.method(),
        record.target(),
        record.status(),
        record.mutation()
    )
}

/// Result log and error log of a scan. Findings go to stdout and the
/// optional output file, errors and verbose notes to stderr.
pub struct ReportSink {
    output: Option<Mutex<File>>,
    verbose: bool,
    progress: ProgressBar,
}

impl ReportSink {
    pub fn new(output_path: Option<&Path>, verbose: bool) -> io::Result<Self> {
        let output = match output_path {
            Some(path) => Some(Mutex::new(File::create(path)?)),
            None => None,
        };

        Ok(Self {
            output,
            verbose,
            progress: ProgressBar::hidden(),
        })
    }

    /// Lines are printed around the bar instead of through it.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &ProgressBar {
        &self.progress
    }

    pub fn finding(&self, record: &SmuggleTestRecord) -> io::Result<()> {
        let line = finding_line(record);
        let status = match record.status() {
            TestStatus::Clte => record.status().to_string().red().bold(),
            TestStatus::Tecl => record.status().to_string().magenta().bold(),
            other => other.to_string().normal(),
        };

        self.progress.suspend(|| {
            println!(
                "{} {} {} {}",
                record.method(),
                record.target(),
                status,
                record.mutation()
            )
        });

        if let Some(output) = &self.output {
            if let Ok(mut file) = output.lock() {
                writeln!(file, "{}", line)?;
                file.flush()?;
            }
        }
        Ok(())
    }

    pub fn error(&self, error: &ScanError) {
        self.progress.suspend(|| eprintln!("ERROR: {}", error));
    }

    pub fn verbose(&self, message: impl Display) {
        if self.verbose {
            self.progress
                .suspend(|| eprintln!("{} {}", "[*]".blue(), message));
        }
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod report_tests;
