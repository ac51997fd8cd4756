//! HTTP server for the gateway process.
//!
//! This module implements the HTTP server that:
//! - Accepts signed Slack event callbacks, verifies them, and enqueues
//!   them onto the work queue
//! - Provides a liveness endpoint for platform health checks
//!
//! # Endpoints
//!
//! - `POST /slack/event` - Accepts Slack event callbacks (returns 200 with
//!   an empty body, or the challenge string for URL verification)
//! - `GET /_ruok` - Returns 200 with body `imok`
//! - anything else - 404

pub mod event;
pub mod health;

pub use event::event_handler;
pub use health::ruok_handler;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::queue::EventPublisher;

/// Maximum accepted request body.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Slack expects a response within 3 seconds; keep a little margin.
const REQUEST_DEADLINE: Duration = Duration::from_millis(2900);

/// The trace-correlation header echoed back to callers and threaded
/// through the queue.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request-scoped trace correlator, stashed in request extensions by the
/// edge middleware.
#[derive(Debug, Clone, Default)]
pub struct RequestId(pub String);

/// Shared application state.
///
/// Passed to handlers via Axum's `State` extractor. Carries the verifier
/// configuration and the queue producer.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// HMAC signing secret for request verification.
    signing_secret: String,

    /// The static verification token events must carry.
    request_token: String,

    /// The Slack app id events must carry.
    app_id: String,

    /// The workspace id events must carry.
    team_id: String,

    /// Queue producer for verified events.
    publisher: Arc<dyn EventPublisher>,
}

impl AppState {
    /// Creates a new `AppState`.
    pub fn new(
        signing_secret: impl Into<String>,
        request_token: impl Into<String>,
        app_id: impl Into<String>,
        team_id: impl Into<String>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                signing_secret: signing_secret.into(),
                request_token: request_token.into(),
                app_id: app_id.into(),
                team_id: team_id.into(),
                publisher,
            }),
        }
    }

    /// Returns the HMAC signing secret.
    pub fn signing_secret(&self) -> &str {
        &self.inner.signing_secret
    }

    /// Returns the static verification token.
    pub fn request_token(&self) -> &str {
        &self.inner.request_token
    }

    /// Returns the expected Slack app id.
    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    /// Returns the expected workspace id.
    pub fn team_id(&self) -> &str {
        &self.inner.team_id
    }

    /// Returns the queue producer.
    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.inner.publisher
    }
}

/// Edge middleware: echoes `X-Request-ID`, stashes it for the handler, and
/// installs the 2.9-second deadline before anything else runs.
async fn edge_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = match tokio::time::timeout(REQUEST_DEADLINE, next.run(request)).await {
        Ok(response) => response,
        Err(_elapsed) => {
            tracing::error!(request_id = %request_id, "request deadline exceeded");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(axum::body::Body::empty())
                .unwrap_or_default()
        }
    };

    if !request_id.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }

    response
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/slack/event", post(event_handler))
        .route("/_ruok", get(ruok_handler))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(axum::middleware::from_fn(edge_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(app_state)
}
