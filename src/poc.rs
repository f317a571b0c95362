// File: poc.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt::Write;

use crate::config::ScanConfig;
use crate::errors::{ScanError, ScanResult};
use crate::request::{build_test_request, Target};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.(Host|Method|Path|Mutation)\s*\}\}").unwrap());

/// Exact probe bytes for one test, ready to paste into a raw socket tool.
pub fn generate_poc(
    config: &ScanConfig,
    method: &str,
    url: &str,
    desync_type: &str,
    mutation: &str,
) -> ScanResult<Vec<u8>> {
    build_test_request(
        method,
        url,
        desync_type,
        mutation,
        config.mutations(),
        config.headers(),
    )
}

/// Header bytes as a string literal body: CR and LF become `\r` and `\n`,
/// other control or non-ASCII bytes become `\xNN`.
pub fn escape_mutation(header: &[u8]) -> String {
    let mut escaped = String::with_capacity(header.len() + 8);
    for &byte in header {
        match byte {
            b'\r' => escaped.push_str("\\r"),
            b'\n' => escaped.push_str("\\n"),
            b'\t' | 0x20..=0x7e => escaped.push(byte as char),
            other => {
                let _ = write!(escaped, "\\x{:02x}", other);
            }
        }
    }
    escaped
}

/// Host with its port when the URL spells one out.
fn authority(target: &Target) -> String {
    match target.url().port() {
        Some(port) => format!("{}:{}", target.host(), port),
        None => target.host().to_string(),
    }
}

/// Fills `{{.Host}}`, `{{.Method}}`, `{{.Path}}` and `{{.Mutation}}` in a
/// replay script template. Anything else is left untouched.
pub fn render_script(
    config: &ScanConfig,
    template: &str,
    method: &str,
    url: &str,
    mutation: &str,
) -> ScanResult<String> {
    let target = Target::parse(url)?;
    let header = config
        .mutation(mutation)
        .ok_or_else(|| ScanError::UnknownMutation(mutation.to_string()))?;
    let escaped = escape_mutation(header);
    let host = authority(&target);

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "Host" => host.clone(),
            "Method" => method.to_string(),
            "Path" => target.path().to_string(),
            "Mutation" => escaped.clone(),
            _ => caps[0].to_string(),
        })
        .into_owned())
}
