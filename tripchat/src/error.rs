use serde::Serialize;

/// Coarse classification of a [`ChatError`], for callers that only care
/// about which branch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatErrorKind {
    Timeout,
    ConnectionFailure,
    AuthFailure,
    NotFound,
    BadStatus,
    MalformedResponse,
    InputEncoding,
    InvalidRequest,
    Config,
}

/// Errors from a chat-completion call.
///
/// `Display` and the fields carry the diagnostic detail that gets logged;
/// [`ChatError::user_message`] is the text safe to show an end user.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request timed out, please try again later")]
    Timeout { url: String },

    #[error("network connection failed, please check your network connection")]
    ConnectionFailure { url: String, detail: String },

    #[error("API authentication failed, check that the API key is correct")]
    AuthFailure { body: String },

    #[error("API endpoint not found, check that the URL is correct: {url}")]
    NotFound { url: String, body: String },

    #[error("API call failed: {status} - {body}")]
    BadStatus { status: u16, body: String },

    #[error("unexpected API response format: {body}")]
    MalformedResponse { body: String },

    #[error("text encoding error, make sure the input uses a standard encoding")]
    InputEncoding(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            ChatError::Timeout { .. } => ChatErrorKind::Timeout,
            ChatError::ConnectionFailure { .. } => ChatErrorKind::ConnectionFailure,
            ChatError::AuthFailure { .. } => ChatErrorKind::AuthFailure,
            ChatError::NotFound { .. } => ChatErrorKind::NotFound,
            ChatError::BadStatus { .. } => ChatErrorKind::BadStatus,
            ChatError::MalformedResponse { .. } => ChatErrorKind::MalformedResponse,
            ChatError::InputEncoding(_) => ChatErrorKind::InputEncoding,
            ChatError::InvalidRequest(_) => ChatErrorKind::InvalidRequest,
            ChatError::Config(_) => ChatErrorKind::Config,
        }
    }

    /// HTTP status of the upstream response, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ChatError::AuthFailure { .. } => Some(401),
            ChatError::NotFound { .. } => Some(404),
            ChatError::BadStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message for end users. Never includes upstream response bodies.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Timeout { .. } => {
                "request timed out, please try again later".to_string()
            }
            ChatError::ConnectionFailure { .. } => {
                "network connection failed, please check your network connection".to_string()
            }
            ChatError::AuthFailure { .. } => {
                "API authentication failed, check that the API key is correct".to_string()
            }
            ChatError::NotFound { url, .. } => {
                format!("API endpoint not found, check that the URL is correct: {}", url)
            }
            ChatError::BadStatus { status, .. } => {
                format!("API call failed with status {}", status)
            }
            ChatError::MalformedResponse { .. } => "unexpected API response format".to_string(),
            ChatError::InputEncoding(_) => {
                "text encoding error, make sure the input uses a standard encoding".to_string()
            }
            ChatError::InvalidRequest(_) => "invalid request".to_string(),
            ChatError::Config(_) => "the AI service is not configured correctly".to_string(),
        }
    }
}
