//! HTTP trigger for broadcasts.
//!
//! - `POST /send_message` — run a broadcast when the body is `{"text": "send"}`
//!   and `X-Shared-Secret` matches the configured secret
//! - `GET  /metrics`      — Prometheus text exposition
//!
//! Broadcasts run inside the request: the response is written only after the
//! whole recipient loop has finished.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::{resolve_request, NoPrompt, Settings};
use crate::delivery::{self, DeliveryRequest};
use crate::metrics;

pub const SHARED_SECRET_HEADER: &str = "x-shared-secret";
pub const SEND_COMMAND: &str = "send";

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
pub struct TriggerCommand {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    InChannel,
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerResponse {
    pub response_type: ResponseType,
    pub text: String,
}

impl TriggerResponse {
    fn in_channel(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::InChannel,
            text: text.into(),
        }
    }

    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Ephemeral,
            text: text.into(),
        }
    }
}

/// Exact match against the configured secret. No secret configured, no access.
pub fn secret_matches(configured: Option<&str>, presented: Option<&str>) -> bool {
    match (configured, presented) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Recipient CSV and message file reads happen on the blocking pool.
async fn resolve_off_runtime(settings: &Settings) -> crate::Result<DeliveryRequest> {
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || resolve_request(&settings, &mut NoPrompt)).await?
}

/// Handle a trigger command once the secret has been checked.
pub async fn run_command(settings: &Settings, body: &[u8]) -> TriggerResponse {
    let command: TriggerCommand = match serde_json::from_slice(body) {
        Ok(command) => command,
        Err(err) => {
            warn!("Invalid trigger payload: {}", err);
            return TriggerResponse::ephemeral("Invalid request body.");
        }
    };

    if command.text != SEND_COMMAND {
        warn!(command = %command.text, "Unknown command received via API");
        return TriggerResponse::ephemeral("Unknown command.");
    }

    metrics::record_run_start("api");
    let start = Instant::now();
    let result = match resolve_off_runtime(settings).await {
        Ok(request) => delivery::deliver(&request).await,
        Err(err) => Err(err),
    };
    metrics::record_run_result("api", start.elapsed(), result.is_ok());

    match result {
        Ok(report) => {
            info!(summary = %report.summary(), "Messages sent successfully via API");
            TriggerResponse::in_channel("Messages sent successfully!")
        }
        Err(err) => {
            error!("Error while sending messages via API: {}", err);
            TriggerResponse::ephemeral(format!("Error: {}", err))
        }
    }
}

/// Route one request. `secret` is the raw `X-Shared-Secret` header value.
pub async fn route(
    settings: &Settings,
    method: &Method,
    path: &str,
    secret: Option<&str>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::POST, "/send_message") => {
            if !secret_matches(settings.shared_secret.as_deref(), secret) {
                warn!("Rejected trigger request with missing or invalid shared secret");
                return json_response(
                    StatusCode::FORBIDDEN,
                    &serde_json::json!({ "detail": "Unauthorized" }),
                );
            }
            let reply = run_command(settings, &body).await;
            json_response(StatusCode::OK, &reply)
        }
        (_, "/send_message") => empty_response(StatusCode::METHOD_NOT_ALLOWED),
        (&Method::GET, "/metrics") => metrics_response(),
        _ => empty_response(StatusCode::NOT_FOUND),
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    match metrics::encode() {
        Ok((content_type, buffer)) => {
            let mut response = Response::new(Full::from(buffer));
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn handle_request(
    settings: Arc<Settings>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let secret = req
        .headers()
        .get(SHARED_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("Failed to read request body: {}", err);
            return Ok(empty_response(StatusCode::BAD_REQUEST));
        }
    };

    Ok(route(&settings, &method, &path, secret.as_deref(), body).await)
}

/// The trigger listener, bound but not yet serving.
pub struct TriggerServer {
    listener: TcpListener,
    settings: Arc<Settings>,
}

impl TriggerServer {
    pub async fn bind(addr: SocketAddr, settings: Settings) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        if settings.shared_secret.is_none() {
            warn!("SHARED_SECRET is not set: every trigger request will be rejected");
        }
        Ok(Self {
            listener,
            settings: Arc::new(settings),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped. A failed `accept` is
    /// logged and the loop carries on after a short pause.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "Trigger endpoint started");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("Failed to accept trigger connection: {}", err);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            let settings = self.settings.clone();
            let service = service_fn(move |req| handle_request(settings.clone(), req));
            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(?peer, "Trigger connection error: {}", err);
                }
            });
        }
    }
}
