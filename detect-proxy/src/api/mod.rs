//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Response data structures
//!
//! # API Structure
//!
//! - **Upload proxy** (`/detect`, `/api/detect`): forwards one image to the classification service
//! - **Health** (`/healthz`): liveness check
//! - **Metrics** (`/internal/metrics`): Prometheus metrics, when enabled
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`.
//! API documentation is available at `/docs` when the server is running.

pub mod handlers;
pub mod models;
