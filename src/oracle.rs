// File: oracle.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::debug;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::errors::{ScanError, ScanResult};
use crate::request::Target;

trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RawStream for T {}

/// Certificates are never checked: the scanner only cares about timing.
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Response(Vec<u8>),
    Timeout,
}

#[derive(Debug, Clone)]
pub struct Exchange {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl Exchange {
    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, Outcome::Timeout)
    }

    pub fn response(&self) -> Option<&[u8]> {
        match &self.outcome {
            Outcome::Response(data) => Some(data),
            Outcome::Timeout => None,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionOracle {
    tls: TlsConnector,
    debug: bool,
}

impl ConnectionOracle {
    pub fn new(debug: bool) -> Self {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        Self {
            tls: TlsConnector::from(Arc::new(config)),
            debug,
        }
    }

    /// Writes `request` in one go and waits for the peer to close the
    /// connection. If `timeout` passes first the connection is dropped and
    /// the exchange is reported as timed out.
    pub async fn send(
        &self,
        target: &Target,
        request: &[u8],
        timeout: Duration,
    ) -> ScanResult<Exchange> {
        let start = Instant::now();
        let result = self.exchange(target, request, timeout).await;
        let elapsed = start.elapsed();

        if self.debug {
            let timed_out = matches!(result, Ok(Outcome::Timeout));
            debug!(
                "Request to {} took {}ms (timeout: {})\n{}\n---",
                target,
                elapsed.as_millis(),
                timed_out,
                String::from_utf8_lossy(request)
            );
        }

        result.map(|outcome| Exchange { outcome, elapsed })
    }

    async fn exchange(
        &self,
        target: &Target,
        request: &[u8],
        timeout: Duration,
    ) -> ScanResult<Outcome> {
        let mut stream = self.connect(target, timeout).await?;

        let written = async {
            stream.write_all(request).await?;
            stream.flush().await
        };
        written.await.map_err(|source| ScanError::Write {
            target: target.to_string(),
            source,
        })?;

        let mut reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            match stream.read_to_end(&mut buf).await {
                Ok(_) => Ok(buf),
                // TLS peers that close without close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !buf.is_empty() => Ok(buf),
                Err(e) => Err(e),
            }
        });

        tokio::select! {
            joined = &mut reader => match joined {
                Ok(Ok(data)) => Ok(Outcome::Response(data)),
                Ok(Err(source)) => Err(ScanError::Read {
                    target: target.to_string(),
                    source,
                }),
                Err(e) => Err(ScanError::Read {
                    target: target.to_string(),
                    source: io::Error::new(io::ErrorKind::Other, e.to_string()),
                }),
            },
            _ = tokio::time::sleep(timeout) => {
                // Dropping the task drops the stream, which closes the socket.
                reader.abort();
                Ok(Outcome::Timeout)
            }
        }
    }

    async fn connect(&self, target: &Target, timeout: Duration) -> ScanResult<Box<dyn RawStream>> {
        let dial_error = |source: io::Error| ScanError::Dial {
            target: target.to_string(),
            source,
        };

        let host = target.dial_host();
        let port = target.port();

        let dial = async {
            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            tcp.set_nodelay(true)?;

            if !target.is_tls() {
                return Ok(Box::new(tcp) as Box<dyn RawStream>);
            }

            let domain = ServerName::try_from(host.as_str())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
            let tls = self.tls.connect(domain, tcp).await?;
            Ok::<_, io::Error>(Box::new(tls) as Box<dyn RawStream>)
        };

        match tokio::time::timeout(timeout, dial).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(dial_error(e)),
            Err(_) => Err(dial_error(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connection timeout after {}ms", timeout.as_millis()),
            ))),
        }
    }
}
