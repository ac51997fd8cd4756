//! The Slack event endpoint.
//!
//! Accepts signed event callbacks, walks the verification ladder, and
//! enqueues accepted events for asynchronous processing. Slack only wants
//! a fast acknowledgment here; everything interesting happens in the
//! consumer.
//!
//! # Verification order
//!
//! Short-circuits on the first failure:
//!
//! 1. HMAC signature and timestamp freshness
//! 2. Static verification token
//! 3. Envelope `type` present and a string
//! 4. `url_verification` answered immediately with the challenge
//! 5. `api_app_id` matches
//! 6. `team_id` matches
//! 7. `event.type` maps to a known stream
//!
//! Verification failures are logged with detail; the responses themselves
//! are narrow status codes with no body.

use axum::Extension;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::queue::{QueueError, StreamKind};
use crate::signing::{self, SIGNATURE_HEADER, SignatureError, SignedRequest, TIMESTAMP_HEADER};

use super::{AppState, RequestId};

/// Errors that can occur when processing an event callback.
#[derive(Debug, Error)]
pub enum EventError {
    /// Signature or timestamp verification failed.
    #[error("failed to validate request: {0}")]
    Signature(#[from] SignatureError),

    /// The Content-Type header was missing or unparseable.
    #[error("failed to parse Content-Type")]
    MalformedContentType,

    /// The Content-Type was not application/json.
    #[error("content type was not JSON: {0}")]
    UnsupportedContentType(String),

    /// The body was not valid JSON.
    #[error("failed to unmarshal JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// A required envelope field was missing.
    #[error("{0} field missing")]
    MissingField(&'static str),

    /// An envelope field did not have the expected shape or value.
    #[error("{0}")]
    Mismatch(&'static str),

    /// The inner event type does not map to a stream.
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),

    /// Enqueueing the event failed.
    #[error("failed to publish event to workqueue: {0}")]
    Publish(#[from] QueueError),
}

impl IntoResponse for EventError {
    fn into_response(self) -> Response {
        let status = match &self {
            EventError::Signature(_) => StatusCode::BAD_REQUEST,
            EventError::MalformedContentType => StatusCode::BAD_REQUEST,
            EventError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            EventError::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EventError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EventError::Mismatch(_) => StatusCode::BAD_REQUEST,
            EventError::UnknownEventType(_) => StatusCode::BAD_REQUEST,
            EventError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            EventError::MalformedContentType | EventError::UnsupportedContentType(_) => (
                status,
                [(header::ACCEPT, "application/json; charset=utf-8")],
            )
                .into_response(),
            _ => status.into_response(),
        }
    }
}

/// Slack event endpoint handler.
///
/// # Request
///
/// - Method: POST (anything else is 405 from the router)
/// - Content-Type: `application/json`
/// - Headers: `X-Slack-Request-Timestamp` and `X-Slack-Signature`
/// - Body: the event callback envelope, at most 2 MiB
///
/// # Response
///
/// - 200: event accepted (empty body), or the `url_verification`
///   challenge string
/// - 400: bad signature, stale timestamp, or envelope value mismatch
/// - 415: content type was not JSON
/// - 422: unparseable JSON or missing required field
/// - 500: body read or queue publish failure
pub async fn event_handler(
    State(app_state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EventError> {
    let result = process_event(&app_state, &request_id, &headers, &body).await;

    if let Err(e) = &result {
        // every rejection is logged here with the correlator; the HTTP
        // response stays a bare status code
        match e {
            EventError::Publish(_) => {
                error!(request_id = %request_id, error = %e, "failed to publish event");
            }
            _ => {
                warn!(request_id = %request_id, error = %e, "rejecting event callback");
            }
        }
    }

    result
}

async fn process_event(
    app_state: &AppState,
    request_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, EventError> {
    // 1. HMAC signature and timestamp freshness, before anything is parsed
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };

    signing::verify(
        app_state.signing_secret(),
        &SignedRequest {
            timestamp: header_str(TIMESTAMP_HEADER),
            signature: header_str(SIGNATURE_HEADER),
            body,
        },
    )?;

    // transport sanity before the JSON parse
    check_content_type(headers)?;

    // parse the envelope once; field probing happens on this document
    let document: serde_json::Value = serde_json::from_slice(body)?;

    // 2. static verification token
    let token = document
        .get("token")
        .ok_or(EventError::MissingField("token"))?
        .as_str()
        .ok_or(EventError::Mismatch("token field is not a string"))?;

    if token != app_state.request_token() {
        return Err(EventError::Mismatch("mismatched token"));
    }

    // 3. envelope type present and a string
    let envelope_type = document
        .get("type")
        .ok_or(EventError::MissingField("type"))?
        .as_str()
        .ok_or(EventError::Mismatch("type field is not a string"))?;

    // 4. URL verification handshake stops here
    if envelope_type == "url_verification" {
        let challenge = document
            .get("challenge")
            .and_then(|c| c.as_str())
            .ok_or(EventError::MissingField("challenge"))?;

        debug!(request_id = %request_id, "answering url_verification challenge");

        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "plain/text")],
            challenge.to_string(),
        )
            .into_response());
    }

    // 5. app id
    let app_id = document
        .get("api_app_id")
        .ok_or(EventError::MissingField("api_app_id"))?
        .as_str()
        .ok_or(EventError::Mismatch("api_app_id field is not a string"))?;

    if app_id != app_state.app_id() {
        return Err(EventError::Mismatch("mismatched api_app_id"));
    }

    // 6. team id
    let team_id = document
        .get("team_id")
        .ok_or(EventError::MissingField("team_id"))?
        .as_str()
        .ok_or(EventError::Mismatch("team_id field is not a string"))?;

    if team_id != app_state.team_id() {
        return Err(EventError::Mismatch("mismatched team_id"));
    }

    // 7. the inner event must map to a stream
    let event = document
        .get("event")
        .ok_or(EventError::MissingField("event"))?;

    let event_type = event
        .get("type")
        .ok_or(EventError::MissingField("event.type"))?
        .as_str()
        .ok_or(EventError::Mismatch("event.type field is not a string"))?;

    let channel_type = event.get("channel_type").and_then(|c| c.as_str());

    let stream = StreamKind::from_event(event_type, channel_type)
        .ok_or_else(|| EventError::UnknownEventType(event_type.to_string()))?;

    // remaining envelope metadata
    let event_id = document
        .get("event_id")
        .ok_or(EventError::MissingField("event_id"))?
        .as_str()
        .ok_or(EventError::Mismatch("event_id field is not a string"))?;

    let event_time = document
        .get("event_time")
        .ok_or(EventError::MissingField("event_time"))?
        .as_i64()
        .ok_or(EventError::Mismatch("event_time field is not a number"))?;

    // the payload is the self-contained event subtree, not the envelope
    let payload = serde_json::to_vec(event)?;

    debug!(
        request_id = %request_id,
        stream = %stream,
        event_type = %event_type,
        event_id = %event_id,
        event_time,
        "publishing event"
    );

    app_state
        .publisher()
        .publish(stream, event_time, event_id, request_id, &payload)
        .await?;

    Ok(StatusCode::OK.into_response())
}

/// Requires `Content-Type: application/json` (parameters are fine).
fn check_content_type(headers: &HeaderMap) -> Result<(), EventError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(EventError::MalformedContentType)?;

    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media_type.is_empty() {
        return Err(EventError::MalformedContentType);
    }

    if media_type != "application/json" {
        return Err(EventError::UnsupportedContentType(media_type));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::RecordingPublisher;
    use crate::server::{AppState, build_router};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "signing-secret";
    const TOKEN: &str = "verification-token";
    const APP_ID: &str = "A0TESTAPP";
    const TEAM_ID: &str = "T029RQSE6";

    fn app(publisher: Arc<RecordingPublisher>) -> axum::Router {
        build_router(AppState::new(SECRET, TOKEN, APP_ID, TEAM_ID, publisher))
    }

    /// A signed POST to the event endpoint with a fresh timestamp.
    fn signed_request(body: &[u8]) -> Request<Body> {
        signed_request_at(body, chrono::Utc::now().timestamp())
    }

    fn signed_request_at(body: &[u8], ts: i64) -> Request<Body> {
        let signature = crate::signing::sign(SECRET, ts, body);

        Request::builder()
            .method("POST")
            .uri("/slack/event")
            .header("content-type", "application/json")
            .header("x-slack-request-timestamp", ts.to_string())
            .header("x-slack-signature", signature)
            .header("x-request-id", "req-1")
            .body(Body::from(body.to_vec()))
            .unwrap()
    }

    fn message_envelope() -> serde_json::Value {
        json!({
            "token": TOKEN,
            "type": "event_callback",
            "api_app_id": APP_ID,
            "team_id": TEAM_ID,
            "event_id": "Ev12345678",
            "event_time": 1_700_000_123,
            "event": {
                "type": "message",
                "channel_type": "channel",
                "channel": "C123456",
                "user": "U111AAA",
                "text": "hello world",
                "ts": "1700000123.000100"
            }
        })
    }

    // ─── URL verification ───

    #[tokio::test]
    async fn url_verification_answers_challenge() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app(Arc::clone(&publisher));

        let body = serde_json::to_vec(&json!({
            "token": TOKEN,
            "type": "url_verification",
            "challenge": "C"
        }))
        .unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("plain/text")
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"C");

        assert!(publisher.records().is_empty(), "challenge must not enqueue");
    }

    #[tokio::test]
    async fn url_verification_without_challenge_is_422() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let body = serde_json::to_vec(&json!({
            "token": TOKEN,
            "type": "url_verification"
        }))
        .unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // ─── Event enqueue ───

    #[tokio::test]
    async fn valid_event_is_enqueued_once() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app(Arc::clone(&publisher));

        let envelope = message_envelope();
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty(), "accepted events get an empty body");

        let records = publisher.records();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.stream, StreamKind::MessagePublic);
        assert_eq!(record.event_id, "Ev12345678");
        assert_eq!(record.event_ts, 1_700_000_123);
        assert_eq!(record.request_id, "req-1");

        // the payload is exactly the marshaled event subtree
        let expected = serde_json::to_string(&envelope["event"]).unwrap();
        assert_eq!(record.payload, expected);
    }

    #[tokio::test]
    async fn private_channel_types_route_to_private_stream() {
        for channel_type in ["im", "mpim", "group", "app_home"] {
            let publisher = Arc::new(RecordingPublisher::default());
            let app = app(Arc::clone(&publisher));

            let mut envelope = message_envelope();
            envelope["event"]["channel_type"] = json!(channel_type);
            let body = serde_json::to_vec(&envelope).unwrap();

            let response = app.oneshot(signed_request(&body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let records = publisher.records();
            assert_eq!(records[0].stream, StreamKind::MessagePrivate, "{channel_type}");
        }
    }

    #[tokio::test]
    async fn team_join_routes_to_its_stream() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app(Arc::clone(&publisher));

        let envelope = json!({
            "token": TOKEN,
            "type": "event_callback",
            "api_app_id": APP_ID,
            "team_id": TEAM_ID,
            "event_id": "Ev87654321",
            "event_time": 1_700_000_200,
            "event": {
                "type": "team_join",
                "user": {"id": "U1NEW", "name": "newbie"}
            }
        });
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(publisher.records()[0].stream, StreamKind::TeamJoin);
    }

    // ─── Verification failures ───

    #[tokio::test]
    async fn stale_timestamp_is_rejected_without_enqueue() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app(Arc::clone(&publisher));

        let body = serde_json::to_vec(&message_envelope()).unwrap();
        let stale = chrono::Utc::now().timestamp() - 301;

        let response = app.oneshot(signed_request_at(&body, stale)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app(Arc::clone(&publisher));

        let body = serde_json::to_vec(&message_envelope()).unwrap();
        let ts = chrono::Utc::now().timestamp();

        let request = Request::builder()
            .method("POST")
            .uri("/slack/event")
            .header("content-type", "application/json")
            .header("x-slack-request-timestamp", ts.to_string())
            .header("x-slack-signature", crate::signing::sign("wrong-secret", ts, &body))
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_headers_are_rejected() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let body = serde_json::to_vec(&message_envelope()).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/slack/event")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mismatched_token_is_rejected() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let mut envelope = message_envelope();
        envelope["token"] = json!("someone-elses-token");
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mismatched_app_id_is_rejected() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let mut envelope = message_envelope();
        envelope["api_app_id"] = json!("A0IMPOSTER");
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mismatched_team_id_is_rejected() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let mut envelope = message_envelope();
        envelope["team_id"] = json!("TIMPOSTER");
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let mut envelope = message_envelope();
        envelope["event"]["type"] = json!("reaction_added");
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_content_type_is_415() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let body = serde_json::to_vec(&message_envelope()).unwrap();
        let ts = chrono::Utc::now().timestamp();

        let request = Request::builder()
            .method("POST")
            .uri("/slack/event")
            .header("content-type", "text/plain")
            .header("x-slack-request-timestamp", ts.to_string())
            .header("x-slack-signature", crate::signing::sign(SECRET, ts, &body))
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn unparseable_json_is_422() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let response = app.oneshot(signed_request(b"{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn missing_event_id_is_422() {
        let app = app(Arc::new(RecordingPublisher::default()));

        let mut envelope = message_envelope();
        envelope.as_object_mut().unwrap().remove("event_id");
        let body = serde_json::to_vec(&envelope).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn publish_failure_is_500() {
        let app = app(Arc::new(RecordingPublisher::failing()));

        let body = serde_json::to_vec(&message_envelope()).unwrap();

        let response = app.oneshot(signed_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ─── Content-Type parsing ───

    #[test]
    fn content_type_accepts_charset_parameter() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(check_content_type(&headers).is_ok());
    }

    #[test]
    fn content_type_missing_is_malformed() {
        let headers = HeaderMap::new();
        assert!(matches!(
            check_content_type(&headers),
            Err(EventError::MalformedContentType)
        ));
    }
}
