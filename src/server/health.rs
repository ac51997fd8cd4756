//! Liveness endpoint for platform health checks.

use axum::http::StatusCode;

/// Liveness handler.
///
/// Returns 200 OK with the text "imok". Used by the platform's router to
/// verify the process is accepting connections.
pub async fn ruok_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "imok")
}
