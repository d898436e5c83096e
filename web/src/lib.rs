//! Axum glue shared by Passgate HTTP services.
//!
//! Handlers stay thin: parse the request, call the domain service, map the
//! domain error to an [`AppError`]. This crate owns the pieces that are the
//! same for every handler: the error envelope, correlation IDs and the
//! middleware that assigns them.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod middleware;

pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{correlation_id, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
