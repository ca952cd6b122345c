//! API response models for the upload proxy.

use serde::Serialize;
use utoipa::ToSchema;

/// Failure body returned by the upload proxy.
///
/// `error` carries the low-level message and is only present for downstream failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ErrorEnvelope {
    /// Always `false`
    pub success: bool,
    /// Human readable summary, e.g. "No file uploaded"
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Body of a 405 response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MethodNotAllowedResponse {
    pub message: String,
}

/// Multipart body accepted by `/detect`. Documentation only, the handler parses the stream itself.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct DetectUpload {
    /// Image to classify. Any filename and MIME type are accepted.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}
