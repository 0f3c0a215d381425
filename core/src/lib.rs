//! Core types shared by the keyprobe crates.

pub mod clock;
pub mod ratelimiter;

pub use clock::{rfc3339, Clock, FixedClock, SystemClock};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Country value used when no heuristic could resolve one.
pub const UNKNOWN_COUNTRY: &str = "UNKNOWN";

/// Connectable endpoint derived from a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub requires_tls: bool,
    pub is_websocket: bool,
    /// Always starts with `/`.
    pub websocket_path: String,
}

impl Endpoint {
    /// `host:port`, with IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn transport(&self) -> &'static str {
        match (self.is_websocket, self.requires_tls) {
            (true, true) => "wss",
            (true, false) => "ws",
            (false, true) => "tls",
            (false, false) => "tcp",
        }
    }
}

/// Last known result of probing one descriptor.
///
/// A latency is present exactly when the outcome is alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    latency_ms: Option<u64>,
    country: String,
    timestamp: i64,
}

impl ProbeOutcome {
    pub fn alive(latency_ms: u64, country: impl Into<String>, timestamp: i64) -> Self {
        Self { latency_ms: Some(latency_ms), country: country.into(), timestamp }
    }

    pub fn dead(country: impl Into<String>, timestamp: i64) -> Self {
        Self { latency_ms: None, country: country.into(), timestamp }
    }

    pub fn from_latency(latency_ms: Option<u64>, country: impl Into<String>, timestamp: i64) -> Self {
        match latency_ms {
            Some(ms) => Self::alive(ms, country, timestamp),
            None => Self::dead(country, timestamp),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.latency_ms.is_some()
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    /// Unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}
