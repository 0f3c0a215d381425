use std::time::{Duration, Instant};

use async_trait::async_trait;
use keyprobe_core::Endpoint;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::{tls, ws};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("tls handshake failed: {0}")]
    Tls(#[source] std::io::Error),
    #[error("invalid tls server name {0:?}")]
    ServerName(String),
    #[error("invalid websocket url: {0}")]
    Url(String),
    #[error("websocket upgrade rejected: {0}")]
    Upgrade(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls setup: {0}")]
    TlsSetup(#[from] rustls::Error),
}

/// Measures how long it takes to reach an endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Latency in milliseconds. `limit` bounds the whole operation.
    async fn probe(&self, endpoint: &Endpoint, limit: Duration) -> Result<u64, ProbeError>;
}

/// Opens the minimal real connection for the endpoint's transport: plain
/// TCP, TCP + TLS, or a websocket upgrade over either.
#[derive(Clone)]
pub struct NetProber {
    tls: TlsConnector,
}

impl NetProber {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self { tls: tls::insecure_connector()? })
    }
}

#[async_trait]
impl Prober for NetProber {
    async fn probe(&self, endpoint: &Endpoint, limit: Duration) -> Result<u64, ProbeError> {
        let start = Instant::now();
        let attempt = async {
            let tcp = connect(endpoint).await?;
            match (endpoint.is_websocket, endpoint.requires_tls) {
                (true, true) => {
                    let stream = tls::handshake(&self.tls, &endpoint.host, tcp).await?;
                    ws::upgrade(stream, endpoint, start).await
                }
                (true, false) => ws::upgrade(tcp, endpoint, start).await,
                (false, true) => {
                    let _stream = tls::handshake(&self.tls, &endpoint.host, tcp).await?;
                    Ok(elapsed_ms(start))
                }
                (false, false) => Ok(elapsed_ms(start)),
            }
        };
        timeout(limit, attempt).await.map_err(|_| ProbeError::Timeout(limit))?
    }
}

async fn connect(endpoint: &Endpoint) -> Result<TcpStream, ProbeError> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(ProbeError::Connect)?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
