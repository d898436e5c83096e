//! Aggregate reducers.
//!
//! - Pass: token issuance, verification, redemption and admin corrections
//!   for tickets and subscriptions

pub mod pass;

pub use pass::{PassAction, PassEnvironment, PassOutcome, PassReducer, PassState};
