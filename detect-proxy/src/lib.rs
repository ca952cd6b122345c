//! # detect-proxy: upload proxy for banana-cultivar image classification
//!
//! The marketplace's browser client lets growers and buyers photograph a banana and ask which
//! cultivar (and how ripe) it is. The classification model runs as a separate service; the
//! browser does not talk to it directly. Instead it POSTs the image to this proxy, which relays
//! it unchanged and hands back whatever JSON the service answers.
//!
//! ## Request Flow
//!
//! 1. `POST /detect` arrives with a `multipart/form-data` body. Only POST is accepted; every
//!    other method gets a 405 before the body is touched.
//! 2. The handler reads the raw multipart stream itself ([`upload`]). The first part named
//!    `file` is spooled to a temp file, other parts are skipped. No `file` part means 400.
//! 3. The spooled file is streamed to `{backend_url}/detect` as a new multipart body
//!    ([`classifier`]), keeping the client's filename and content type or falling back to
//!    `upload.jpg` / `image/jpeg`. The call is bounded by `request_timeout` and never retried.
//! 4. A 2xx JSON answer is returned verbatim with status 200. Anything else becomes a 500 with a
//!    `{ success: false, message, error }` envelope ([`errors`]).
//! 5. The temp file is removed when the request finishes, whichever way it finishes.
//!
//! Requests share nothing but the read-only [`AppState`]: configuration and the pooled HTTP
//! client.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use detect_proxy::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = detect_proxy::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     detect_proxy::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod classifier;
pub mod config;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod upload;

#[cfg(test)]
mod test;

use crate::api::handlers::detect::{detect, method_not_allowed};
use crate::classifier::{Classify, ReqwestClassifier};
use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header::CONTENT_TYPE};
use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .classifier(Arc::new(ReqwestClassifier::from_config(&config)?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub classifier: Arc<dyn Classify>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Browsers send the bare origin, without the trailing slash `Url` adds
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - Upload proxy at `/detect` and `/api/detect` (POST only, JSON 405 otherwise)
/// - Health check at `/healthz`
/// - OpenAPI document at `/api-docs/openapi.json`, docs UI at `/docs`
/// - Optional Prometheus metrics at `/internal/metrics`
/// - Request body limit, CORS and tracing middleware
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = create_cors_layer(&state.config)?;
    let body_limit = DefaultBodyLimit::max(state.config.limits.max_upload_size);
    let enable_metrics = state.config.enable_metrics;

    let mut router = Router::new()
        .route("/detect", post(detect).fallback(method_not_allowed))
        // Path the browser client used when this handler was a serverless function
        .route("/api/detect", post(detect).fallback(method_not_allowed))
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(body_limit)
        .with_state(state)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(cors).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The proxy application: router plus configuration.
///
/// 1. **Create**: [`Application::new`] builds the downstream client and the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves, then drains in-flight requests
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application forwarding to `config.backend_url`
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let classifier = ReqwestClassifier::from_config(&config)?;
        info!("Forwarding uploads to {}", classifier.detect_url());
        Self::with_classifier(config, Arc::new(classifier))
    }

    /// Create an application around an already-built classifier
    pub fn with_classifier(config: Config, classifier: Arc<dyn Classify>) -> anyhow::Result<Self> {
        debug!("Starting detect proxy with configuration: {:#?}", config);

        let state = AppState::builder().config(config.clone()).classifier(classifier).build();
        let router = build_router(state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Detect proxy listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
