// File: state.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::errors::ScanResult;
use crate::request::{DesyncType, Target};

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn to_nanos(duration: &Duration) -> u64 {
        u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(to_nanos(duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TestStatus {
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "safe")]
    Safe,
    #[serde(rename = "CL.TE")]
    Clte,
    #[serde(rename = "TE.CL")]
    Tecl,
    #[serde(rename = "error")]
    Error,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn is_vulnerable(&self) -> bool {
        matches!(self, Self::Clte | Self::Tecl)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Safe => "safe",
            Self::Clte => "CL.TE",
            Self::Tecl => "TE.CL",
            Self::Error => "error",
        }
    }
}

impl From<DesyncType> for TestStatus {
    fn from(desync_type: DesyncType) -> Self {
        match desync_type {
            DesyncType::Clte => Self::Clte,
            DesyncType::Tecl => Self::Tecl,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a test across runs: one target, one method, one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestKey {
    pub target: String,
    pub method: String,
    pub mutation: String,
}

impl TestKey {
    pub fn new(target: &str, method: &str, mutation: &str) -> Self {
        Self {
            target: target.to_string(),
            method: method.to_string(),
            mutation: mutation.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmuggleTestRecord {
    #[serde(rename = "url")]
    target: Target,
    method: String,
    mutation: String,
    #[serde(with = "duration_nanos")]
    timeout: Duration,
    #[serde(default)]
    status: TestStatus,
}

impl SmuggleTestRecord {
    pub fn new(target: Target, method: &str, mutation: &str, timeout: Duration) -> Self {
        Self {
            target,
            method: method.to_string(),
            mutation: mutation.to_string(),
            timeout,
            status: TestStatus::Unknown,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn mutation(&self) -> &str {
        &self.mutation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Sets the final status. Only the first transition out of `Unknown` is
    /// accepted; later calls are ignored and return `false`.
    pub fn resolve(&mut self, status: TestStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn key(&self) -> TestKey {
        TestKey::new(self.target.key(), &self.method, &self.mutation)
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    base: BTreeMap<&'a str, u64>,
    results: &'a [SmuggleTestRecord],
    errors: &'a HashMap<String, u32>,
}

#[derive(Deserialize, Default)]
struct Snapshot {
    #[serde(default)]
    base: HashMap<String, u64>,
    #[serde(default)]
    results: Vec<SmuggleTestRecord>,
    #[serde(default)]
    errors: HashMap<String, u32>,
}

/// Baselines, completed records and error counters, each behind its own lock.
#[derive(Debug, Default)]
pub struct ScanState {
    baselines: RwLock<HashMap<String, Duration>>,
    results: RwLock<Vec<SmuggleTestRecord>>,
    error_counts: RwLock<HashMap<String, u32>>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty input yields an empty state.
    pub fn from_json(bytes: &[u8]) -> ScanResult<Self> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::new());
        }

        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        Ok(Self {
            baselines: RwLock::new(
                snapshot
                    .base
                    .into_iter()
                    .map(|(k, v)| (k, Duration::from_nanos(v)))
                    .collect(),
            ),
            results: RwLock::new(
                snapshot
                    .results
                    .into_iter()
                    .filter(|r| r.status.is_terminal())
                    .collect(),
            ),
            error_counts: RwLock::new(snapshot.errors),
        })
    }

    /// Holds all three read locks only while serializing.
    pub async fn to_json(&self) -> ScanResult<Vec<u8>> {
        let baselines = self.baselines.read().await;
        let results = self.results.read().await;
        let errors = self.error_counts.read().await;

        let snapshot = SnapshotRef {
            base: baselines
                .iter()
                .map(|(k, v)| (k.as_str(), duration_nanos::to_nanos(v)))
                .collect(),
            results: &results,
            errors: &errors,
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    pub async fn baseline(&self, target: &str) -> Option<Duration> {
        self.baselines.read().await.get(target).copied()
    }

    pub async fn has_baseline(&self, target: &str) -> bool {
        self.baselines.read().await.contains_key(target)
    }

    /// Stores a baseline unless one already exists. Returns whether it was stored.
    pub async fn record_baseline(&self, target: &str, elapsed: Duration) -> bool {
        let mut baselines = self.baselines.write().await;
        if baselines.contains_key(target) {
            return false;
        }
        baselines.insert(target.to_string(), elapsed);
        true
    }

    pub async fn baselines(&self) -> HashMap<String, Duration> {
        self.baselines.read().await.clone()
    }

    /// Appends a finished record. Records still `Unknown` are rejected.
    pub async fn append_result(&self, record: SmuggleTestRecord) -> bool {
        if !record.status.is_terminal() {
            return false;
        }
        self.results.write().await.push(record);
        true
    }

    pub async fn completed_keys(&self) -> HashSet<TestKey> {
        self.results.read().await.iter().map(|r| r.key()).collect()
    }

    pub async fn results(&self) -> Vec<SmuggleTestRecord> {
        self.results.read().await.clone()
    }

    pub async fn result_count(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn error_count(&self, target: &str) -> u32 {
        self.error_counts
            .read()
            .await
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub async fn increment_errors(&self, target: &str) -> u32 {
        let mut counts = self.error_counts.write().await;
        let count = counts.entry(target.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn error_counts(&self) -> HashMap<String, u32> {
        self.error_counts.read().await.clone()
    }
}
