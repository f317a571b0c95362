// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ScanError, ScanResult};
use crate::mutations::{catalog, filter_mutations, MutationMap};

pub const DEFAULT_USER_AGENT: &str = "User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/42.0.2311.135 Safari/537.36 Edge/12.246";

#[derive(Debug, Clone)]
pub struct ScanConfig {
    workers: usize,
    methods: Vec<String>,
    headers: Vec<String>,
    delay: Duration,
    stop_after: u32,
    max_errors: u32,
    checkpoint_interval: Duration,
    enabled: Vec<String>,
    disabled: Vec<String>,
    mutations: MutationMap,
    state_file: PathBuf,
    output_file: Option<PathBuf>,
    debug: bool,
    verbose: bool,
    quiet: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self {
            workers: 10,
            methods: ["GET", "POST", "PUT", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            headers: vec![
                "Connection: close".to_string(),
                DEFAULT_USER_AGENT.to_string(),
            ],
            delay: Duration::from_secs(5),
            stop_after: 0,
            max_errors: 0,
            checkpoint_interval: Duration::from_secs(30),
            enabled: Vec::new(),
            disabled: Vec::new(),
            mutations: catalog().clone(),
            state_file: PathBuf::from("smuggles.state"),
            output_file: None,
            debug: false,
            verbose: false,
            quiet: false,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers;
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn set_methods(&mut self, methods: Vec<String>) {
        self.methods = methods;
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn add_header(&mut self, header: String) {
        self.headers.push(header);
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    pub fn stop_after(&self) -> u32 {
        self.stop_after
    }

    pub fn set_stop_after(&mut self, stop_after: u32) {
        self.stop_after = stop_after;
    }

    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    pub fn set_max_errors(&mut self, max_errors: u32) {
        self.max_errors = max_errors;
    }

    pub fn checkpoint_interval(&self) -> Duration {
        self.checkpoint_interval
    }

    pub fn set_checkpoint_interval(&mut self, interval: Duration) {
        self.checkpoint_interval = interval;
    }

    pub fn enabled(&self) -> &[String] {
        &self.enabled
    }

    pub fn disabled(&self) -> &[String] {
        &self.disabled
    }

    /// Replaces both glob lists and re-derives the enabled mutation set.
    pub fn set_mutation_filters(
        &mut self,
        enabled: Vec<String>,
        disabled: Vec<String>,
    ) -> ScanResult<()> {
        self.mutations = filter_mutations(catalog(), &enabled, &disabled)?;
        self.enabled = enabled;
        self.disabled = disabled;
        Ok(())
    }

    pub fn mutations(&self) -> &MutationMap {
        &self.mutations
    }

    pub fn mutation(&self, name: &str) -> Option<&[u8]> {
        self.mutations.get(name).map(|m| m.as_slice())
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn set_state_file(&mut self, path: PathBuf) {
        self.state_file = path;
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    pub fn set_output_file(&mut self, path: Option<PathBuf>) {
        self.output_file = path;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }

    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn validate(&self) -> ScanResult<()> {
        if self.workers == 0 {
            return Err(ScanError::Config("worker count must be at least 1".into()));
        }

        if self.methods.is_empty() {
            return Err(ScanError::Config("no HTTP methods configured".into()));
        }
        for method in &self.methods {
            if method.is_empty()
                || method
                    .chars()
                    .any(|c| c.is_whitespace() || c.is_control())
            {
                return Err(ScanError::Config(format!("invalid method {:?}", method)));
            }
        }

        for header in &self.headers {
            if !header.contains(':') || header.contains('\r') || header.contains('\n') {
                return Err(ScanError::Config(format!("invalid header {:?}", header)));
            }
        }

        if self.delay.is_zero() {
            return Err(ScanError::Config("delay margin must be positive".into()));
        }

        if self.checkpoint_interval.is_zero() {
            return Err(ScanError::Config(
                "checkpoint interval must be positive".into(),
            ));
        }

        if self.mutations.is_empty() {
            return Err(ScanError::Config(
                "mutation filters leave nothing enabled".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
