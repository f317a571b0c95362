// File: errors.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

use crate::request::DesyncType;

#[derive(Debug)]
pub enum ScanError {
    Dial {
        target: String,
        source: std::io::Error,
    },
    Write {
        target: String,
        source: std::io::Error,
    },
    Read {
        target: String,
        source: std::io::Error,
    },
    Inconclusive {
        target: String,
        desync_type: DesyncType,
        mutation: String,
    },
    Parse {
        input: String,
        reason: String,
    },
    Persistence(std::io::Error),
    Serialization(serde_json::Error),
    Config(String),
    UnknownMutation(String),
    UnknownDesyncType(String),
}

impl ScanError {
    /// Transport level failures are charged against the target's error budget.
    pub fn counts_against_target(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::Write { .. } | Self::Read { .. } | Self::Inconclusive { .. }
        )
    }

    pub fn parse(input: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dial { target, source } => write!(f, "dial {}: {}", target, source),
            Self::Write { target, source } => write!(f, "write {}: {}", target, source),
            Self::Read { target, source } => write!(f, "read {}: {}", target, source),
            Self::Inconclusive {
                target,
                desync_type,
                mutation,
            } => write!(
                f,
                "{} verification for {} ({}) timed out as well, result inconclusive",
                desync_type, target, mutation
            ),
            Self::Parse { input, reason } => write!(f, "invalid target {:?}: {}", input, reason),
            Self::Persistence(e) => write!(f, "state file error: {}", e),
            Self::Serialization(e) => write!(f, "state serialization error: {}", e),
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::UnknownMutation(name) => write!(f, "mutation {} not found", name),
            Self::UnknownDesyncType(name) => write!(f, "unrecognised smuggle type: {}", name),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Dial { source, .. } | Self::Write { source, .. } | Self::Read { source, .. } => {
                Some(source)
            }
            Self::Persistence(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(error: std::io::Error) -> Self {
        Self::Persistence(error)
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

pub type ScanResult<T> = Result<T, ScanError>;

/// Non-fatal errors flow to a single consumer that writes the error log.
pub type ErrorSender = tokio::sync::mpsc::UnboundedSender<ScanError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_transport_errors_count_against_target() {
        let dial = ScanError::Dial {
            target: "http://example.test/".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(dial.counts_against_target());
        assert_eq!(dial.target(), Some("http://example.test/"));
        assert!(dial.source().is_some());

        let inconclusive = ScanError::Inconclusive {
            target: "http://example.test/".to_string(),
            desync_type: DesyncType::Clte,
            mutation: "standard".to_string(),
        };
        assert!(inconclusive.counts_against_target());
        assert!(inconclusive.to_string().contains("CL.TE"));
    }

    #[test]
    fn test_non_transport_errors() {
        let parse = ScanError::parse("ftp://x", "unsupported scheme");
        assert!(!parse.counts_against_target());
        assert!(parse.target().is_none());

        let persistence: ScanError = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert!(matches!(persistence, ScanError::Persistence(_)));
        assert!(!persistence.counts_against_target());

        let unknown = ScanError::UnknownMutation("nope".to_string());
        assert_eq!(unknown.to_string(), "mutation nope not found");
    }
}
