//! Multipart upload parsing and spooling.
//!
//! The upload proxy owns the raw request stream: axum hands over an unparsed [`Multipart`] and
//! this module walks its parts. The first part named `file` is written to a temp file in the
//! configured upload directory; every other part, including further `file` parts, is skipped.
//! Repeated `file` parts are how some encoders send an array, so normalizing to the first one
//! here keeps the handler dealing with a single `Option<UploadedFile>`.
//!
//! The temp file is held as a [`TempPath`], which deletes it when dropped. An upload therefore
//! disappears on every exit path: successful forward, parse error midway through the body, or a
//! failed downstream call.

use crate::errors::{Error, Result};
use axum::extract::{
    Multipart,
    multipart::{Field, MultipartError},
};
use mime_guess::mime::Mime;
use std::path::Path;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Name of the multipart part carrying the upload, inbound and outbound.
pub const FILE_FIELD: &str = "file";
/// Filename forwarded when the client sent none.
pub const FALLBACK_FILE_NAME: &str = "upload.jpg";
/// Content type forwarded when the client sent none, or an unparsable one.
pub const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";

/// An uploaded file spooled to disk for the lifetime of one request.
#[derive(Debug)]
pub struct UploadedFile {
    path: TempPath,
    file_name: Option<String>,
    content_type: Option<String>,
    size: u64,
}

impl UploadedFile {
    /// Location of the spooled bytes. Only valid while `self` is alive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Filename as declared by the client, if any.
    pub fn original_file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Content type as declared by the client, if any.
    pub fn original_content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Filename to forward downstream.
    pub fn file_name(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILE_NAME)
    }

    /// Content type to forward downstream.
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| ct.parse::<Mime>().is_ok())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
    }
}

fn form_error(e: MultipartError) -> Error {
    Error::FormParsing { reason: e.body_text() }
}

/// Read the whole multipart body, returning the first `file` part spooled into `dir`.
///
/// Returns `Ok(None)` when the body is well formed but has no `file` part. Any malformed part,
/// even one after the file, fails the whole request and discards the spooled file.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn read_upload(mut multipart: Multipart, dir: &Path) -> Result<Option<UploadedFile>> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        if upload.is_some() || field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        upload = Some(spool(field, dir).await?);
    }

    Ok(upload)
}

async fn spool(mut field: Field<'_>, dir: &Path) -> Result<UploadedFile> {
    let file_name = field.file_name().map(str::to_owned);
    let content_type = field.content_type().map(str::to_owned);

    let (file, path) = tempfile::Builder::new()
        .prefix("detect-upload-")
        .tempfile_in(dir)
        .map_err(|e| Error::FormParsing {
            reason: format!("Failed to create temp file in {}: {}", dir.display(), e),
        })?
        .into_parts();

    let mut out = tokio::fs::File::from_std(file);
    let mut size = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(form_error)? {
        size += chunk.len() as u64;
        out.write_all(&chunk).await.map_err(|e| Error::FormParsing {
            reason: format!("Failed to write upload to {}: {}", path.display(), e),
        })?;
    }

    out.flush().await.map_err(|e| Error::FormParsing {
        reason: format!("Failed to flush upload to {}: {}", path.display(), e),
    })?;

    debug!(
        file_name = ?file_name,
        content_type = ?content_type,
        size = size,
        path = %path.display(),
        "Spooled upload"
    );

    Ok(UploadedFile {
        path,
        file_name,
        content_type,
        size,
    })
}
