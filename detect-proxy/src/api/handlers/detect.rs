//! HTTP handlers for the upload proxy.

use crate::AppState;
use crate::api::models::detect::{DetectUpload, ErrorEnvelope, MethodNotAllowedResponse};
use crate::errors::{Error, Result};
use crate::upload::read_upload;
use axum::{
    extract::{Multipart, State, multipart::MultipartRejection},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};

#[utoipa::path(
    post,
    path = "/detect",
    tag = "detect",
    summary = "Classify image",
    description = "Forward one uploaded image to the classification service. The first part named `file` is sent; \
                   the service's JSON response is returned unchanged with status 200.",
    request_body(
        content = DetectUpload,
        content_type = "multipart/form-data",
        description = "Multipart body with a `file` part"
    ),
    responses(
        (status = 200, description = "Classification result, passed through from the service", content_type = "application/json"),
        (status = 400, description = "No `file` part in the body", body = ErrorEnvelope),
        (status = 405, description = "Method other than POST", body = MethodNotAllowedResponse),
        (status = 500, description = "Form parsing error or classification service failure", body = ErrorEnvelope)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn detect(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let multipart = multipart.map_err(|e| Error::FormParsing { reason: e.body_text() })?;

    let upload = read_upload(multipart, &state.config.upload_dir())
        .await?
        .ok_or(Error::NoFileUploaded)?;

    tracing::info!(
        file_name = upload.file_name(),
        content_type = upload.content_type(),
        size = upload.size(),
        "Forwarding upload to classification service"
    );

    let body = state
        .classifier
        .classify(&upload)
        .await
        .map_err(|e| Error::Upstream { message: e.to_string() })?;

    // `upload` is dropped here, removing the spooled file
    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// Fallback for every method other than POST on the upload routes. The body is never read.
pub async fn method_not_allowed() -> Error {
    Error::MethodNotAllowed
}
