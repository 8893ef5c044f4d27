//! Map transport outcomes onto [`ChatError`].

use crate::error::ChatError;
use crate::sanitize::body_excerpt;
use reqwest::StatusCode;

/// Classify a failure raised by reqwest before or while reading a response.
pub fn classify_transport(err: &reqwest::Error, url: &str) -> ChatError {
    if err.is_timeout() {
        ChatError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_builder() {
        ChatError::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        ChatError::MalformedResponse {
            body: err.to_string(),
        }
    } else {
        // Connect failures, resets and redirect loops all mean the
        // upstream could not be reached.
        ChatError::ConnectionFailure {
            url: url.to_string(),
            detail: err.to_string(),
        }
    }
}

/// Classify a non-2xx response.
pub fn classify_status(status: StatusCode, body: &str, url: &str) -> ChatError {
    let body = body_excerpt(body);
    match status {
        StatusCode::UNAUTHORIZED => ChatError::AuthFailure { body },
        StatusCode::NOT_FOUND => ChatError::NotFound {
            url: url.to_string(),
            body,
        },
        other => ChatError::BadStatus {
            status: other.as_u16(),
            body,
        },
    }
}

/// Log a classified error with its diagnostic context and hand it back.
pub(crate) fn logged(err: ChatError, url: &str) -> ChatError {
    tracing::error!(
        url = %url,
        kind = ?err.kind(),
        status = ?err.status_code(),
        detail = ?err,
        "chat completion failed: {}",
        err
    );
    err
}
