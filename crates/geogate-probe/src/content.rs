//! Stage 2: the HTTPS content heuristic.
//!
//! Reached only after a successful TCP connect. Issues one GET for `/`
//! identifying as a desktop browser and classifies the response. Transport
//! failures here are never treated as blocking evidence, stage 1 already
//! established basic connectivity.

use crate::prober::{ProbeConfig, ProbeVerdict};
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HOST, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Phrases in a 403 body that signal origin-side geo/legal blocking
/// rather than an ordinary authorization failure.
const BLOCK_INDICATORS: &[&str] = &[
    // Cloudflare / WAF block pages
    "you have been blocked",
    "access denied",
    "blocked by",
    // Geo-blocking
    "not available in your country",
    "not available in your region",
    "geo restriction",
    "this content is not available",
    "unavailable in your location",
    // Sanctions messaging
    "sanctioned countries",
    "restricted countries",
    "access from your country",
    "your region is restricted",
    "service is not available in your",
    "restricted in your country",
    "not supported in your country",
    "blocked in your region",
    "embargo",
];

#[derive(Debug, Error)]
pub(crate) enum ContentError {
    #[error("invalid server name")]
    InvalidName,

    #[error("TLS handshake failed: {0}")]
    Tls(std::io::Error),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),
}

/// Run the content heuristic over an already-connected TCP stream.
pub(crate) async fn content_check(
    domain: &str,
    stream: TcpStream,
    tls: Arc<rustls::ClientConfig>,
    config: &ProbeConfig,
) -> Result<ProbeVerdict, ContentError> {
    let server_name =
        ServerName::try_from(domain.to_string()).map_err(|_| ContentError::InvalidName)?;

    let connector = TlsConnector::from(tls);
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(ContentError::Tls)?;

    let io = TokioIo::new(tls_stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("probe connection closed with error: {}", e);
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri("/")
        .header(HOST, domain)
        .header(USER_AGENT, &config.user_agent)
        .body(Empty::<Bytes>::new())?;

    let response = sender.send_request(request).await?;
    let status = response.status().as_u16();

    // Only a 403 needs the body; everything else classifies on status alone.
    let body = if status == 403 {
        read_body_prefix(response.into_body(), config.body_probe_limit).await
    } else {
        Vec::new()
    };

    Ok(classify_response(status, &body))
}

/// Map an HTTP status (plus a bounded body prefix for 403) to a verdict.
pub(crate) fn classify_response(status: u16, body: &[u8]) -> ProbeVerdict {
    match status {
        // Unavailable For Legal Reasons: always a block.
        451 => ProbeVerdict::Blocked,
        403 if body_indicates_block(body) => ProbeVerdict::Blocked,
        // Plain 403s, redirects, 200s, errors: the origin answered.
        _ => ProbeVerdict::Reachable,
    }
}

fn body_indicates_block(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body).to_lowercase();
    BLOCK_INDICATORS.iter().any(|phrase| text.contains(phrase))
}

/// Read at most `limit` bytes of the response body.
async fn read_body_prefix(mut body: Incoming, limit: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(limit.min(4096));

    while buf.len() < limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    buf.extend_from_slice(data);
                }
            }
            // Mid-body transport errors: classify on what we have.
            Some(Err(_)) | None => break,
        }
    }

    buf.truncate(limit);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_451_always_blocked() {
        assert_eq!(classify_response(451, b""), ProbeVerdict::Blocked);
        assert_eq!(
            classify_response(451, b"completely unrelated text"),
            ProbeVerdict::Blocked
        );
    }

    #[test]
    fn test_403_with_indicator_blocked() {
        assert_eq!(
            classify_response(403, b"<html>Access Denied</html>"),
            ProbeVerdict::Blocked
        );
        assert_eq!(
            classify_response(403, b"This service is not available in your country."),
            ProbeVerdict::Blocked
        );
        assert_eq!(
            classify_response(403, b"export embargo restrictions apply"),
            ProbeVerdict::Blocked
        );
    }

    #[test]
    fn test_403_without_indicator_reachable() {
        assert_eq!(
            classify_response(403, b"<html>Login required</html>"),
            ProbeVerdict::Reachable
        );
        assert_eq!(classify_response(403, b""), ProbeVerdict::Reachable);
    }

    #[test]
    fn test_other_statuses_reachable() {
        assert_eq!(classify_response(200, b""), ProbeVerdict::Reachable);
        assert_eq!(classify_response(301, b""), ProbeVerdict::Reachable);
        assert_eq!(classify_response(302, b""), ProbeVerdict::Reachable);
        assert_eq!(classify_response(404, b""), ProbeVerdict::Reachable);
        assert_eq!(classify_response(500, b""), ProbeVerdict::Reachable);
    }

    #[test]
    fn test_indicator_match_is_case_insensitive() {
        assert!(body_indicates_block(b"GEO RESTRICTION in effect"));
        assert!(body_indicates_block(b"Sanctioned Countries list"));
        assert!(!body_indicates_block(b"everything is fine"));
    }

    #[test]
    fn test_indicator_match_survives_broken_utf8() {
        let mut body = b"\xff\xfe access denied \xff".to_vec();
        assert!(body_indicates_block(&body));
        body.clear();
        body.extend_from_slice(b"\xff\xfe nothing here");
        assert!(!body_indicates_block(&body));
    }
}
