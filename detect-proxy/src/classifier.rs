//! Forwarding uploads to the downstream image-classification service.

use crate::config::Config;
use crate::upload::{FILE_FIELD, UploadedFile};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Body, Client,
    multipart::{Form, Part},
};
use serde::de::IgnoredAny;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

/// Why a downstream call produced no usable result.
///
/// The `Display` text is what the caller sees in the `error` field of the failure envelope.
#[derive(ThisError, Debug)]
pub enum ClassifyError {
    #[error("timeout of {0}ms exceeded")]
    Timeout(u128),

    #[error("Request failed with status code {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("Invalid JSON in response body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Failed to read spooled upload: {0}")]
    Io(#[from] std::io::Error),
}

/// A trait for classifying an uploaded image.
/// In practice this is implemented over http by [`ReqwestClassifier`]; the seam lets the
/// handler be exercised against in-process doubles.
#[async_trait]
pub trait Classify: Send + Sync {
    /// Send the upload downstream and return the raw JSON response body.
    async fn classify(&self, upload: &UploadedFile) -> Result<Bytes, ClassifyError>;
}

/// The concrete implementation of `Classify`.
pub struct ReqwestClassifier {
    client: Client,
    detect_url: Url,
    request_timeout: Duration,
}

impl ReqwestClassifier {
    pub fn new(base_url: &Url, request_timeout: Duration) -> anyhow::Result<Self> {
        let detect_url = ensure_slash(base_url)
            .join("detect")
            .map_err(|e| anyhow::anyhow!("Failed to construct detect URL: {}", e))?;
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            detect_url,
            request_timeout,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(&config.backend_url, config.request_timeout)
    }

    pub fn detect_url(&self) -> &Url {
        &self.detect_url
    }

    fn transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            return ClassifyError::Timeout(self.request_timeout.as_millis());
        }
        ClassifyError::Transport(error_chain(&e))
    }
}

/// Makes sure a url has a trailing slash.
///
/// `Url::join` replaces the last path segment unless the base ends in '/', so
/// `https://host/api` joined with `detect` would give `https://host/detect`.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// Render an error with its sources, e.g. "error sending request: tcp connect error: Connection refused".
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

#[async_trait]
impl Classify for ReqwestClassifier {
    #[instrument(skip_all, fields(url = %self.detect_url, size = upload.size()))]
    async fn classify(&self, upload: &UploadedFile) -> Result<Bytes, ClassifyError> {
        let file = tokio::fs::File::open(upload.path()).await?;
        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), upload.size())
            .file_name(upload.file_name().to_string())
            .mime_str(upload.content_type())
            .map_err(|e| self.transport_error(e))?;
        let form = Form::new().part(FILE_FIELD, part);

        let response = self
            .client
            .post(self.detect_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %body, "Classification service returned an error status");
            return Err(ClassifyError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        // Forwarded verbatim, so only check that it is JSON rather than re-encoding it
        serde_json::from_slice::<IgnoredAny>(&body)?;

        debug!(status = %status, bytes = body.len(), "Classification service responded");
        Ok(body)
    }
}
