//! Passgate - QR issuance, verification and single-use redemption for event
//! tickets and membership subscriptions.
//!
//! # Lifecycle
//!
//! ```text
//!  payment collaborator        owner                  door staff
//!         │                      │                        │
//!   register_ticket ──▶ issue_token (idempotent) ──▶ redeem (at most once)
//!                                │                        │
//!                          QR image/URL             verify / view (pure)
//!                                                         │
//!                                          admin: reset_redemption
//! ```
//!
//! # Architecture
//!
//! - **Verification**: one exhaustive rule set (`verification::evaluate`)
//!   shared by every endpoint
//! - **Pass aggregate**: a pure reducer that validates commands and emits
//!   repository effects; each request runs it in a short-lived `Store`
//! - **Repository**: compare-and-set writes, so redemption stays single-use
//!   across concurrent requests and processes
//! - **Server**: axum router with session extraction from gateway headers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod server;
pub mod session;
pub mod tokens;
pub mod types;
pub mod verification;

pub use aggregates::{PassAction, PassEnvironment, PassOutcome, PassReducer, PassState};
pub use app::{PassCache, PassService, Verification};
pub use config::Config;
pub use error::PassError;
pub use repository::{InMemoryPassRepository, PassRepository, PostgresPassRepository};
pub use session::{Role, Session};
pub use tokens::{RandomTokenGenerator, TokenGenerator, VerifyLinks};
pub use types::*;
pub use verification::{Rejection, Verdict};
