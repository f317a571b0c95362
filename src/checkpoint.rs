// File: checkpoint.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, trace};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::errors::{ErrorSender, ScanResult};
use crate::state::ScanState;

/// The backing file of a scan. It stays open for the whole run and every
/// save replaces its contents.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    file: File,
}

impl StateFile {
    pub async fn open(path: &Path) -> ScanResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses whatever the file holds. An empty file is an empty state.
    pub async fn load(&mut self) -> ScanResult<ScanState> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0)).await?;
        self.file.read_to_end(&mut bytes).await?;
        ScanState::from_json(&bytes)
    }

    pub async fn save(&mut self, state: &ScanState) -> ScanResult<usize> {
        let bytes = state.to_json().await?;

        self.file.seek(SeekFrom::Start(0)).await?;
        self.file.set_len(0).await?;
        self.file.write_all(&bytes).await?;
        self.file.flush().await?;

        Ok(bytes.len())
    }
}

#[derive(Clone)]
pub struct Checkpointer {
    state: Arc<ScanState>,
    file: Arc<Mutex<StateFile>>,
    errors: ErrorSender,
}

impl Checkpointer {
    pub fn new(state: Arc<ScanState>, file: StateFile, errors: ErrorSender) -> Self {
        Self {
            state,
            file: Arc::new(Mutex::new(file)),
            errors,
        }
    }

    /// Writes one snapshot. Failures are reported and the scan carries on.
    pub async fn checkpoint(&self) -> bool {
        let mut file = self.file.lock().await;
        match file.save(&self.state).await {
            Ok(written) => {
                trace!("Checkpoint wrote {} bytes to {}", written, file.path().display());
                true
            }
            Err(e) => {
                let _ = self.errors.send(e);
                false
            }
        }
    }

    /// Checkpoints every `interval` until `shutdown` flips to true.
    pub fn spawn_periodic(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let checkpointer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Periodic checkpoint");
                        checkpointer.checkpoint().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
