//! HTTP request handlers.
//!
//! - [`detect`]: the upload proxy and its method-not-allowed fallback
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`] which converts to the fixed status codes and JSON
//! envelopes the browser client expects.

pub mod detect;
