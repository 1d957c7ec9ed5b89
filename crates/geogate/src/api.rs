//! Local control-plane for the companion browser extension.
//!
//! Loopback-only HTTP endpoint. The extension posts the URL of the site
//! the user is looking at; we add its base domain plus everything observed
//! on the DNS side in the last minute, no probing involved.
//!
//! Routes:
//! - `POST /add` with `{"url": "..."}`: add the site and related domains
//! - `GET /status`: liveness and table sizes
//! - `GET /domains`: recently observed domains with their ages

use crate::config::ApiConfig;
use crate::dispatch::DispatchMsg;
use anyhow::{Context, Result};
use geogate_filter::DomainClassifier;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Shared state behind the endpoint.
pub struct ApiState {
    classifier: Arc<Mutex<DomainClassifier>>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    history_ttl: Duration,
}

impl ApiState {
    pub fn new(
        classifier: Arc<Mutex<DomainClassifier>>,
        dispatch_tx: mpsc::Sender<DispatchMsg>,
        history_ttl: Duration,
    ) -> Self {
        Self {
            classifier,
            dispatch_tx,
            history_ttl,
        }
    }
}

#[derive(Deserialize)]
struct AddRequest {
    url: String,
}

/// Serve the control-plane until the process exits.
pub async fn serve(config: &ApiConfig, state: Arc<ApiState>) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", config.listen_port))
        .await
        .with_context(|| format!("failed to bind control-plane port {}", config.listen_port))?;

    info!("control-plane listening on http://127.0.0.1:{}", config.listen_port);

    loop {
        let (stream, _) = listener.accept().await.context("accept failed")?;
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, std::convert::Infallible>(handle(req, state).await) }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("control-plane connection error: {}", e);
            }
        });
    }
}

async fn handle(req: Request<Incoming>, state: Arc<ApiState>) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        // CORS preflight for the extension.
        (&Method::OPTIONS, _) => json_response(StatusCode::OK, json!({})),
        (&Method::POST, "/add") => handle_add(req, state).await,
        (&Method::GET, "/status") => handle_status(state),
        (&Method::GET, "/domains") => handle_domains(state),
        _ => json_response(StatusCode::NOT_FOUND, json!({"error": "not found"})),
    }
}

async fn handle_add(req: Request<Incoming>, state: Arc<ApiState>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read add request body: {}", e);
            return json_response(StatusCode::BAD_REQUEST, json!({"error": "unreadable body"}));
        }
    };

    let request: AddRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({"error": "expected {\"url\": ...}"}),
            );
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let msg = DispatchMsg::AddSite {
        url: request.url,
        reply: reply_tx,
    };

    if state.dispatch_tx.send(msg).await.is_err() {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": "dispatcher unavailable"}),
        );
    }

    match reply_rx.await {
        Ok(outcome) if outcome.added.is_empty() => json_response(
            StatusCode::OK,
            json!({"message": "all domains already configured", "domains": []}),
        ),
        Ok(outcome) => json_response(
            StatusCode::OK,
            json!({
                "message": format!("added {} domains", outcome.added.len()),
                "domains": outcome.added,
            }),
        ),
        Err(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": "dispatcher unavailable"}),
        ),
    }
}

fn handle_status(state: Arc<ApiState>) -> Response<Full<Bytes>> {
    let classifier = state.classifier.lock().unwrap();
    json_response(
        StatusCode::OK,
        json!({
            "status": "running",
            "history_size": classifier.tracked_count(),
            "config_domains": classifier.configured_count(),
        }),
    )
}

fn handle_domains(state: Arc<ApiState>) -> Response<Full<Bytes>> {
    let classifier = state.classifier.lock().unwrap();
    let domains: Vec<_> = classifier
        .recent_domains(state.history_ttl)
        .into_iter()
        .map(|d| {
            json!({
                "domain": d.name,
                "ago": (d.age.as_secs_f64() * 10.0).round() / 10.0,
            })
        })
        .collect();

    json_response(StatusCode::OK, json!({"domains": domains}))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
        .body(Full::new(Bytes::from(value.to_string())))
        .unwrap()
}
