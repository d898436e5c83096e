//! HTTP API handlers, organized by audience:
//! - QR: issue (owner), validate (door staff), public view (anyone)
//! - Passes: the caller's own tickets and subscriptions
//! - Admin: registration, status changes and redemption reset

pub mod admin;
pub mod passes;
pub mod qr;

pub use passes::{PassSummary, PassView, SubscriptionInfo, TicketInfo};
pub use qr::{IssueRequest, IssueResponse, ValidateRequest, ValidationResponse};
