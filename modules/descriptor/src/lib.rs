//! Descriptor handling: normalizing raw lines, splitting identity from
//! annotation, and deriving a connectable [`Endpoint`] from transport hints.

mod html;

use std::borrow::Cow;

use keyprobe_core::Endpoint;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub use html::unescape_html;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no '@' before the endpoint")]
    MissingAt,
    #[error("no host:port after '@'")]
    MissingHostPort,
    #[error("empty host")]
    EmptyHost,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

const TLS_MARKERS: &[&str] = &["security=tls", "security=reality", "trojan://", "vmess://"];
const WS_MARKERS: &[&str] = &["type=ws", "net=ws"];

static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[?&;])path=([^&#]+)").unwrap());

/// One input line split into identity and annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    identity: String,
    annotation: Option<String>,
}

impl Descriptor {
    /// Trims and unescapes a raw line. Blank lines and lines with an empty
    /// identity yield `None`.
    pub fn from_line(line: &str) -> Option<Self> {
        let unescaped = unescape_html(line.trim());
        let line = unescaped.trim();
        let (identity, annotation) = match line.split_once('#') {
            Some((id, tag)) => (id.trim(), Some(tag.trim()).filter(|t| !t.is_empty())),
            None => (line, None),
        };
        if identity.is_empty() { return None; }
        Some(Self {
            identity: identity.to_string(),
            annotation: annotation.map(decode_annotation),
        })
    }

    /// Dedup and cache key.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Free-text `#tag`, percent-decoded when it was encoded.
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    pub fn scheme(&self) -> Option<&str> {
        self.identity.split_once("://").map(|(s, _)| s).filter(|s| !s.is_empty())
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        parse(&self.identity)
    }
}

/// Everything before the first `#`, trimmed.
pub fn identity(descriptor: &str) -> &str {
    descriptor.split('#').next().unwrap_or("").trim()
}

pub fn parse(descriptor: &str) -> Option<Endpoint> {
    try_parse(descriptor).ok()
}

pub fn try_parse(descriptor: &str) -> Result<Endpoint, ParseError> {
    let (_, after_at) = descriptor.split_once('@').ok_or(ParseError::MissingAt)?;
    let authority = after_at
        .split(|c: char| matches!(c, '?' | '#' | '/' | '@'))
        .next()
        .unwrap_or("")
        .trim();
    let (host, port) = split_host_port(authority)?;
    Ok(Endpoint {
        host: host.to_string(),
        port,
        requires_tls: TLS_MARKERS.iter().any(|m| descriptor.contains(m)),
        is_websocket: WS_MARKERS.iter().any(|m| descriptor.contains(m)),
        websocket_path: websocket_path(descriptor),
    })
}

fn split_host_port(authority: &str) -> Result<(&str, u16), ParseError> {
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or(ParseError::MissingHostPort)?;
        (host, tail.strip_prefix(':').ok_or(ParseError::MissingHostPort)?)
    } else {
        let (host, port) = authority.split_once(':').ok_or(ParseError::MissingHostPort)?;
        // a second colon means an unbracketed IPv6 literal or garbage
        if port.contains(':') { return Err(ParseError::MissingHostPort); }
        (host, port)
    };
    if host.trim().is_empty() { return Err(ParseError::EmptyHost); }
    match port.trim().parse::<u16>() {
        Ok(p) if p != 0 => Ok((host.trim(), p)),
        _ => Err(ParseError::InvalidPort(port.to_string())),
    }
}

fn websocket_path(descriptor: &str) -> String {
    let raw = match PATH_RE.captures(descriptor).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => return "/".to_string(),
    };
    let decoded = urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
    if decoded.starts_with('/') { decoded.into_owned() } else { format!("/{decoded}") }
}

fn decode_annotation(tag: &str) -> String {
    if !tag.contains('%') { return tag.to_string(); }
    urlencoding::decode(tag).map(Cow::into_owned).unwrap_or_else(|_| tag.to_string())
}
