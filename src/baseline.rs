// File: baseline.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::debug;
use std::io;
use std::time::Duration;

use crate::errors::{ScanError, ScanResult};
use crate::oracle::ConnectionOracle;
use crate::request::{baseline_request, Target};

pub const BASELINE_CEILING: Duration = Duration::from_secs(30);

/// Measures how long a target takes to answer a plain request.
#[derive(Clone)]
pub struct BaselineCalibrator {
    oracle: ConnectionOracle,
    headers: Vec<String>,
    ceiling: Duration,
}

impl BaselineCalibrator {
    pub fn new(oracle: ConnectionOracle, headers: Vec<String>) -> Self {
        Self {
            oracle,
            headers,
            ceiling: BASELINE_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub async fn measure(&self, target: &Target) -> ScanResult<Duration> {
        let request = baseline_request(target, &self.headers);
        let exchange = self.oracle.send(target, &request, self.ceiling).await?;

        if exchange.timed_out() {
            return Err(ScanError::Read {
                target: target.to_string(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "no baseline response within {}s",
                        self.ceiling.as_secs_f64()
                    ),
                ),
            });
        }

        debug!(
            "Established timing baseline for {}: {}ms",
            target,
            exchange.elapsed.as_millis()
        );
        Ok(exchange.elapsed)
    }
}
