//! Client side of the websocket opening handshake (RFC 6455 section 4.1),
//! just far enough to see the server switch protocols.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyprobe_core::Endpoint;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use url::Url;

use crate::probe::elapsed_ms;
use crate::ProbeError;

const MAX_HEAD: usize = 16 * 1024;
const CLOSE_GRACE: Duration = Duration::from_millis(500);
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Expected `Sec-WebSocket-Accept` for a request key.
pub(crate) fn accept_key(key: &str) -> String {
    let mut h = Sha1::new();
    h.update(key.as_bytes());
    h.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(h.finalize())
}

pub(crate) fn request_url(endpoint: &Endpoint) -> Result<Url, ProbeError> {
    let scheme = if endpoint.requires_tls { "wss" } else { "ws" };
    let raw = format!("{scheme}://{}{}", endpoint.authority(), endpoint.websocket_path);
    Url::parse(&raw).map_err(|e| ProbeError::Url(format!("{raw}: {e}")))
}

pub(crate) fn build_request(url: &Url, key: &str) -> String {
    let mut target = url.path().to_string();
    if let Some(q) = url.query() {
        target.push('?');
        target.push_str(q);
    }
    let host = url.host_str().unwrap_or_default();
    let host = match url.port() {
        Some(p) => format!("{host}:{p}"),
        None => host.to_string(),
    };
    format!(
        "GET {target} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\nUser-Agent: keyprobe/{}\r\n\r\n",
        keyprobe_core::version()
    )
}

/// Performs the upgrade and returns the latency measured from `start`. The
/// connection is closed in the background afterwards.
pub(crate) async fn upgrade<S>(mut stream: S, endpoint: &Endpoint, start: Instant) -> Result<u64, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let url = request_url(endpoint)?;
    let key = STANDARD.encode(rand::random::<[u8; 16]>());
    stream.write_all(build_request(&url, &key).as_bytes()).await?;
    let head = read_head(&mut stream).await?;
    check_response(&head, &key)?;
    let latency = elapsed_ms(start);
    tokio::spawn(async move {
        let _ = timeout(CLOSE_GRACE, close(stream)).await;
    });
    Ok(latency)
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, ProbeError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProbeError::Upgrade("connection closed before response".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            buf.truncate(end);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        if buf.len() > MAX_HEAD {
            return Err(ProbeError::Upgrade("response head too large".into()));
        }
    }
}

pub(crate) fn check_response(head: &str, key: &str) -> Result<(), ProbeError> {
    let mut lines = head.lines();
    let status = lines.next().unwrap_or_default();
    if status.split_whitespace().nth(1) != Some("101") {
        return Err(ProbeError::Upgrade(status.to_string()));
    }
    let headers: Vec<(&str, &str)> = lines.filter_map(|l| l.split_once(':')).map(|(k, v)| (k.trim(), v.trim())).collect();
    let header = |name: &str| headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| *v);
    if !header("upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket")) {
        return Err(ProbeError::Upgrade("missing Upgrade: websocket".into()));
    }
    match header("sec-websocket-accept") {
        Some(v) if v == accept_key(key) => Ok(()),
        Some(v) => Err(ProbeError::Upgrade(format!("bad Sec-WebSocket-Accept {v:?}"))),
        None => Err(ProbeError::Upgrade("missing Sec-WebSocket-Accept".into())),
    }
}

// masked close frame with an empty payload
async fn close<S: AsyncWrite + Unpin>(mut stream: S) -> std::io::Result<()> {
    let mask: [u8; 4] = rand::random();
    let frame = [0x88, 0x80, mask[0], mask[1], mask[2], mask[3]];
    stream.write_all(&frame).await?;
    stream.shutdown().await
}
