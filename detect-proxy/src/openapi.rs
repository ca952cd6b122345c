//! OpenAPI documentation for the proxy's HTTP surface.

use utoipa::OpenApi;

use crate::api;
use crate::api::models::detect::{DetectUpload, ErrorEnvelope, MethodNotAllowedResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Detect Proxy API",
        description = "Relays banana images to the cultivar classification service and returns its result unchanged."
    ),
    paths(api::handlers::detect::detect),
    components(schemas(DetectUpload, ErrorEnvelope, MethodNotAllowedResponse)),
    tags(
        (name = "detect", description = "Image classification upload proxy")
    )
)]
pub struct ApiDoc;
