//! HTTP trigger
//!
//! Serves a small JSON API on its own thread and tokio runtime:
//! - `GET /status`: listener status, reported trigger type, uptime
//! - `GET|POST /trigger`: fire a trigger (optional body `{"source": ..}`)
//! - `POST /config`: request a switch to another trigger type
//!
//! A type switch is only queued here. The manager applies it from its
//! caller's thread, since stopping this server from one of its own handlers
//! would wait on itself.

use crate::trigger::source::{SourceChannels, SOURCE_STOP_TIMEOUT};
use crate::trigger::types::{TriggerError, TriggerEvent, TriggerResult, TriggerType};
use crate::utils::thread::join_with_timeout;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;

/// Shared state for the handlers
struct HttpState {
    channels: SourceChannels,
    allowed: Vec<TriggerType>,
    started_at: Instant,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigRequest {
    trigger_type: String,
}

fn reply(status: StatusCode, outcome: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "status": outcome, "message": message.into() })),
    )
        .into_response()
}

fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/trigger", get(trigger_get).post(trigger_post))
        .route("/config", post(config))
        .fallback(not_found)
        .with_state(state)
}

/// GET /status
async fn status(State(state): State<Arc<HttpState>>) -> Json<serde_json::Value> {
    let trigger_type = *state.channels.reported_type.read();
    Json(json!({
        "status": "running",
        "trigger_type": trigger_type,
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

fn enqueue(state: &HttpState, source: String) -> Response {
    tracing::info!("HTTP trigger: {}", source);
    match state
        .channels
        .events
        .send(TriggerEvent::new(TriggerType::Http, source))
    {
        Ok(()) => reply(StatusCode::OK, "success", "Trigger received"),
        Err(_) => reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "error",
            "Trigger queue closed",
        ),
    }
}

/// GET /trigger
async fn trigger_get(State(state): State<Arc<HttpState>>) -> Response {
    enqueue(&state, "http_get".to_string())
}

/// POST /trigger
///
/// A missing or malformed body still fires, with the default label.
async fn trigger_post(State(state): State<Arc<HttpState>>, body: Bytes) -> Response {
    let request = if body.is_empty() {
        TriggerRequest::default()
    } else {
        serde_json::from_slice::<TriggerRequest>(&body).unwrap_or_else(|e| {
            tracing::debug!("Ignoring malformed trigger body: {}", e);
            TriggerRequest::default()
        })
    };
    let source = request
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "http_post".to_string());
    enqueue(&state, source)
}

/// POST /config
async fn config(State(state): State<Arc<HttpState>>, body: Bytes) -> Response {
    let request = match serde_json::from_slice::<ConfigRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            return reply(
                StatusCode::BAD_REQUEST,
                "error",
                format!("Expected {{\"trigger_type\": ..}}: {}", e),
            )
        }
    };

    let kind = match request.trigger_type.parse::<TriggerType>() {
        Ok(kind) => kind,
        Err(e) => return reply(StatusCode::BAD_REQUEST, "error", e.to_string()),
    };
    if !state.allowed.contains(&kind) {
        return reply(
            StatusCode::BAD_REQUEST,
            "error",
            TriggerError::NotAllowed(kind).to_string(),
        );
    }

    if state.channels.control.send(kind).is_err() {
        return reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "error",
            "Trigger manager unavailable",
        );
    }
    *state.channels.reported_type.write() = kind;

    tracing::info!("HTTP requested trigger type change to {}", kind);
    reply(
        StatusCode::OK,
        "success",
        format!("Trigger type set to {}", kind),
    )
}

async fn not_found() -> Response {
    reply(StatusCode::NOT_FOUND, "error", "Not found")
}

/// HTTP trigger server
pub struct HttpTrigger {
    bind_address: String,
    port: u16,
    allowed: Vec<TriggerType>,
    channels: SourceChannels,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HttpTrigger {
    pub fn new(
        bind_address: &str,
        port: u16,
        allowed: Vec<TriggerType>,
        channels: SourceChannels,
    ) -> Self {
        Self {
            bind_address: bind_address.to_string(),
            port,
            allowed,
            channels,
            local_addr: None,
            shutdown: None,
            thread: None,
        }
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn start(&mut self) -> TriggerResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        // Bind here so a busy port fails the start instead of the thread
        let addr = format!("{}:{}", self.bind_address, self.port);
        let listener = std::net::TcpListener::bind(&addr)
            .map_err(|source| TriggerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let state = Arc::new(HttpState {
            channels: self.channels.clone(),
            allowed: self.allowed.clone(),
            started_at: Instant::now(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("http-trigger".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!("Failed to register HTTP listener: {}", e);
                            return;
                        }
                    };
                    let app = build_router(state);
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(e) = served {
                        tracing::error!("HTTP trigger server error: {}", e);
                    }
                });
                tracing::debug!("HTTP trigger server exited");
            })?;

        self.local_addr = Some(local_addr);
        self.shutdown = Some(shutdown_tx);
        self.thread = Some(handle);
        tracing::info!("HTTP trigger listening on http://{}", local_addr);
        Ok(())
    }

    pub fn stop(&mut self) -> TriggerResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let mut result = Ok(());
        if let Some(handle) = self.thread.take() {
            if !join_with_timeout(handle, SOURCE_STOP_TIMEOUT, "http-trigger") {
                result = Err(TriggerError::Source(format!(
                    "HTTP server on {:?} did not shut down within {:?}",
                    self.local_addr, SOURCE_STOP_TIMEOUT
                )));
            }
        }
        self.local_addr = None;
        result
    }
}

impl Drop for HttpTrigger {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
