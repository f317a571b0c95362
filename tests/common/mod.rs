// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rsmuggle::config::ScanConfig;

/// How the emulated front-end/back-end chain splits requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Front-end forwards Content-Length bytes, back-end parses chunks.
    ClTe,
    /// Front-end forwards the chunked body, back-end reads Content-Length.
    TeCl,
    /// Both sides prefer Transfer-Encoding.
    Safe,
    /// Accepts connections and never answers.
    BlackHole,
    /// Answers the first connection, then stops listening.
    OneShot,
}

#[derive(Debug, PartialEq, Eq)]
enum Decision {
    NeedMore,
    Respond(u16),
}

#[derive(Debug, PartialEq, Eq)]
enum Chunked {
    Incomplete,
    Invalid,
    Complete(usize),
}

pub struct MockChain {
    pub url: String,
    connections: Arc<AtomicUsize>,
}

impl MockChain {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub async fn start_backend(backend: Backend) -> MockChain {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let handle = tokio::spawn(serve(socket, backend));
            if backend == Backend::OneShot {
                let _ = handle.await;
                break;
            }
        }
    });

    MockChain { url, connections }
}

async fn serve(mut socket: TcpStream, backend: Backend) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }

        if backend == Backend::BlackHole {
            continue;
        }

        if let Decision::Respond(status) = decide(&buf, backend) {
            let response = format!(
                "HTTP/1.1 {} Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
            return;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decide(buf: &[u8], backend: Backend) -> Decision {
    let Some(end) = find(buf, b"\r\n\r\n") else {
        return Decision::NeedMore;
    };
    let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
    let body = &buf[end + 4..];

    let mut chunked = false;
    let mut content_length = 0usize;
    for line in head.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim() {
            "transfer-encoding" if value.contains("chunked") => chunked = true,
            "content-length" => content_length = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }

    if !chunked {
        return if body.len() < content_length {
            Decision::NeedMore
        } else {
            Decision::Respond(200)
        };
    }

    match backend {
        Backend::ClTe => {
            if body.len() < content_length {
                return Decision::NeedMore;
            }
            match parse_chunked(&body[..content_length]) {
                Chunked::Complete(_) => Decision::Respond(200),
                Chunked::Invalid => Decision::Respond(400),
                Chunked::Incomplete => Decision::NeedMore,
            }
        }
        Backend::TeCl => match parse_chunked(body) {
            Chunked::Complete(forwarded) if forwarded < content_length => Decision::NeedMore,
            Chunked::Complete(_) => Decision::Respond(200),
            Chunked::Invalid => Decision::Respond(400),
            Chunked::Incomplete => Decision::NeedMore,
        },
        _ => match parse_chunked(body) {
            Chunked::Complete(_) => Decision::Respond(200),
            Chunked::Invalid => Decision::Respond(400),
            Chunked::Incomplete => Decision::NeedMore,
        },
    }
}

fn parse_chunked(bytes: &[u8]) -> Chunked {
    let mut pos = 0;
    loop {
        let Some(line_end) = find(&bytes[pos..], b"\r\n").map(|i| pos + i) else {
            let rest = &bytes[pos..];
            return if rest.iter().all(|b| b.is_ascii_hexdigit()) {
                Chunked::Incomplete
            } else {
                Chunked::Invalid
            };
        };

        let line = String::from_utf8_lossy(&bytes[pos..line_end]);
        let size_text = line.split(';').next().unwrap_or("").trim();
        let Ok(size) = usize::from_str_radix(size_text, 16) else {
            return Chunked::Invalid;
        };
        pos = line_end + 2;

        if size == 0 {
            if bytes.len() < pos + 2 {
                return Chunked::Incomplete;
            }
            return if &bytes[pos..pos + 2] == b"\r\n" {
                Chunked::Complete(pos + 2)
            } else {
                Chunked::Invalid
            };
        }

        if bytes.len() < pos + size + 2 {
            return Chunked::Incomplete;
        }
        if &bytes[pos + size..pos + size + 2] != b"\r\n" {
            return Chunked::Invalid;
        }
        pos += size + 2;
    }
}

/// Small, fast configuration: only a handful of mutations and a short
/// delay margin so a hanging probe costs a fraction of a second.
pub fn fast_config(methods: &[&str], enable: &[&str]) -> ScanConfig {
    let mut config = ScanConfig::new();
    config.set_workers(4);
    config.set_methods(methods.iter().map(|m| m.to_string()).collect());
    config.set_delay(Duration::from_millis(300));
    config.set_checkpoint_interval(Duration::from_millis(100));
    config
        .set_mutation_filters(enable.iter().map(|e| e.to_string()).collect(), vec![])
        .unwrap();
    config.set_quiet(true);
    config
}

pub fn input(lines: &[&str]) -> std::io::Cursor<Vec<u8>> {
    std::io::Cursor::new(lines.join("\n").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_parser() {
        assert_eq!(parse_chunked(b"1\r\nZ"), Chunked::Incomplete);
        assert_eq!(parse_chunked(b"1\r\nZ\r\nQ"), Chunked::Invalid);
        assert_eq!(parse_chunked(b"0\r\n\r\nX"), Chunked::Complete(5));
        assert_eq!(parse_chunked(b"0\r\n\r\n"), Chunked::Complete(5));
    }
}
