// File: request.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use url::{Host, Url};

use crate::errors::{ScanError, ScanResult};
use crate::mutations::MutationMap;

const CLTE_BODY: &[u8] = b"1\r\nZ\r\nQ";
const CLTE_PROBE_LENGTH: usize = 4;
const CLTE_VERIFY_LENGTH: usize = 7;

const TECL_PROBE_BODY: &[u8] = b"0\r\n\r\nX";
const TECL_PROBE_LENGTH: usize = 6;
const TECL_VERIFY_BODY: &[u8] = b"0\r\n\r\n";
const TECL_VERIFY_LENGTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    url: Url,
}

impl Target {
    pub fn parse(input: &str) -> ScanResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ScanError::parse(input, "empty target"));
        }
        if input.len() > 2048 {
            return Err(ScanError::parse(input, "URL too long"));
        }

        let url = Url::parse(input).map_err(|e| ScanError::parse(input, e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ScanError::parse(
                    input,
                    format!("unsupported scheme {}", other),
                ))
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| ScanError::parse(input, "no host in URL"))?;
        if host.is_empty() || host.chars().any(|c| c.is_ascii_control()) {
            return Err(ScanError::parse(input, "host contains invalid characters"));
        }

        Ok(Self { url })
    }

    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Host as it appears in the Host header (IPv6 keeps its brackets).
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Host as passed to the resolver.
    pub fn dial_host(&self) -> String {
        match self.url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Domain(domain)) => domain.to_string(),
            None => String::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.is_tls() { 443 } else { 80 })
    }

    pub fn path(&self) -> &str {
        match self.url.path() {
            "" => "/",
            path => path,
        }
    }

    /// Canonical string used as the key in baselines, results and counters.
    pub fn key(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Target::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DesyncType {
    #[serde(rename = "CL.TE")]
    Clte,
    #[serde(rename = "TE.CL")]
    Tecl,
}

impl DesyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clte => "CL.TE",
            Self::Tecl => "TE.CL",
        }
    }
}

impl fmt::Display for DesyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DesyncType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CL.TE" | "CLTE" => Ok(Self::Clte),
            "TE.CL" | "TECL" => Ok(Self::Tecl),
            _ => Err(ScanError::UnknownDesyncType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probe,
    Verify,
}

fn push_line(buf: &mut Vec<u8>, line: &[u8]) {
    buf.extend_from_slice(line);
    buf.extend_from_slice(b"\r\n");
}

fn push_common_headers(buf: &mut Vec<u8>, target: &Target, headers: &[String]) {
    push_line(buf, format!("Host: {}", target.host()).as_bytes());
    for header in headers {
        push_line(buf, header.as_bytes());
    }
}

/// Plain GET used to calibrate a target's normal latency.
pub fn baseline_request(target: &Target, headers: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    push_line(&mut buf, format!("GET {} HTTP/1.1", target.path()).as_bytes());
    push_common_headers(&mut buf, target, headers);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn smuggle_request(
    method: &str,
    target: &Target,
    te: &[u8],
    headers: &[String],
    content_length: usize,
    body: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256 + te.len() + body.len());
    push_line(
        &mut buf,
        format!("{} {} HTTP/1.1", method, target.path()).as_bytes(),
    );
    push_line(&mut buf, te);
    push_common_headers(&mut buf, target, headers);
    push_line(
        &mut buf,
        format!("Content-Length: {}", content_length).as_bytes(),
    );
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(body);
    buf
}

/// A Transfer-Encoding parser waits for the rest of the chunk; a
/// Content-Length parser is done after four bytes.
pub fn clte(method: &str, target: &Target, te: &[u8], headers: &[String]) -> Vec<u8> {
    smuggle_request(method, target, te, headers, CLTE_PROBE_LENGTH, CLTE_BODY)
}

pub fn clte_verify(method: &str, target: &Target, te: &[u8], headers: &[String]) -> Vec<u8> {
    smuggle_request(method, target, te, headers, CLTE_VERIFY_LENGTH, CLTE_BODY)
}

/// A Transfer-Encoding parser finishes at the zero chunk and leaves `X`
/// behind; a Content-Length parser waits for the sixth byte.
pub fn tecl(method: &str, target: &Target, te: &[u8], headers: &[String]) -> Vec<u8> {
    smuggle_request(
        method,
        target,
        te,
        headers,
        TECL_PROBE_LENGTH,
        TECL_PROBE_BODY,
    )
}

pub fn tecl_verify(method: &str, target: &Target, te: &[u8], headers: &[String]) -> Vec<u8> {
    smuggle_request(
        method,
        target,
        te,
        headers,
        TECL_VERIFY_LENGTH,
        TECL_VERIFY_BODY,
    )
}

pub fn build(
    desync_type: DesyncType,
    phase: Phase,
    method: &str,
    target: &Target,
    te: &[u8],
    headers: &[String],
) -> Vec<u8> {
    match (desync_type, phase) {
        (DesyncType::Clte, Phase::Probe) => clte(method, target, te, headers),
        (DesyncType::Clte, Phase::Verify) => clte_verify(method, target, te, headers),
        (DesyncType::Tecl, Phase::Probe) => tecl(method, target, te, headers),
        (DesyncType::Tecl, Phase::Verify) => tecl_verify(method, target, te, headers),
    }
}

/// Probe request for a single (method, target, type, mutation) test. This is
/// the only entry point PoC and script generators use.
pub fn build_test_request(
    method: &str,
    target: &str,
    desync_type: &str,
    mutation: &str,
    mutations: &MutationMap,
    headers: &[String],
) -> ScanResult<Vec<u8>> {
    let target = Target::parse(target)?;
    let te = mutations
        .get(mutation)
        .ok_or_else(|| ScanError::UnknownMutation(mutation.to_string()))?;
    let desync_type: DesyncType = desync_type.parse()?;
    Ok(build(
        desync_type,
        Phase::Probe,
        method,
        &target,
        te,
        headers,
    ))
}
