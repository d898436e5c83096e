//! Application services - load a record, run the pass reducer in a
//! per-request store and report the outcome.
//!
//! - `PassService`: every operation the HTTP API exposes
//! - `PassCache`: per-owner listing cache, invalidated on mutation

mod cache;
mod services;

pub use cache::{PassCache, Reservation, DEFAULT_CACHE_CAPACITY};
pub use services::{IssuedToken, NewSubscription, NewTicket, PassService, Verification};
