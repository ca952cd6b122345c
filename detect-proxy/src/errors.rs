use crate::api::models::detect::ErrorEnvelope;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Anything other than POST on the upload routes
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// The request body could not be read as multipart form data
    #[error("Form parsing error: {reason}")]
    FormParsing { reason: String },

    /// The multipart body parsed but carried no `file` part
    #[error("No file uploaded")]
    NoFileUploaded,

    /// The classification service could not be reached or did not answer with JSON
    #[error("AI Server connection failed: {message}")]
    Upstream { message: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::FormParsing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NoFileUploaded => StatusCode::BAD_REQUEST,
            Error::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the caller-facing message. Low-level detail only travels in the `error` field.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::MethodNotAllowed => "Method Not Allowed",
            Error::FormParsing { .. } => "Form parsing error",
            Error::NoFileUploaded => "No file uploaded",
            Error::Upstream { .. } => "AI Server connection failed",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Upstream { message } => {
                tracing::error!("Proxy error: {}", message);
            }
            Error::FormParsing { reason } => {
                tracing::warn!("Form parsing error: {}", reason);
            }
            Error::MethodNotAllowed | Error::NoFileUploaded => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        match self {
            // The method check predates the envelope and only ever carried a message
            Error::MethodNotAllowed => (status, Json(json!({ "message": self.user_message() }))).into_response(),
            Error::Upstream { ref message } => {
                let body = ErrorEnvelope::new(self.user_message()).with_error(message.clone());
                (status, Json(body)).into_response()
            }
            _ => (status, Json(ErrorEnvelope::new(self.user_message()))).into_response(),
        }
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;
