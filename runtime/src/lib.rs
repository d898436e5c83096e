//! # Passgate Runtime
//!
//! Runtime implementation for the Passgate reducer architecture.
//!
//! The [`Store`] owns a piece of state, runs the reducer for every action it
//! receives and executes the returned effects. Actions produced by effects
//! are fed back into the reducer until the store settles.
//!
//! Request handlers build one short-lived store per request around the
//! record they loaded, so `send` drives the whole feedback loop to completion
//! before returning. Callers read the outcome from state afterwards.
//!
//! ## Example
//!
//! ```ignore
//! use passgate_runtime::Store;
//!
//! let store = Store::new(PassState::loaded(record), PassReducer::new(), env);
//! store.send(PassAction::RedeemPass { token, validator_name }).await?;
//! let outcome = store.state(|s| s.outcome.clone()).await;
//! ```

use passgate_core::{effect::Effect, reducer::Reducer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Prometheus metrics for observability
pub mod metrics;

use metrics::{EffectMetrics, ReducerMetrics};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The store did not settle before the caller's deadline
        ///
        /// Effects that already ran are not rolled back.
        #[error("Timeout waiting for the store to settle")]
        Timeout,

        /// Effects kept producing actions past [`DEFAULT_FEEDBACK_LIMIT`](crate::DEFAULT_FEEDBACK_LIMIT)
        ///
        /// Usually a reducer that answers its own feedback action with an
        /// effect producing the same action again.
        #[error("Feedback loop exceeded {0} actions")]
        FeedbackLimitExceeded(usize),
    }
}

pub use error::StoreError;

/// Maximum number of actions a single `send` may process
pub const DEFAULT_FEEDBACK_LIMIT: usize = 64;

/// The Store - runtime for a reducer
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
///
/// # Concurrency
///
/// The reducer runs while holding the state write lock, so concurrent
/// `send` calls on one store serialize at the reducer. Effects run outside
/// the lock.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
        }
    }

    /// Send an action to the store and drive it to completion
    ///
    /// 1. Acquires the write lock and calls the reducer
    /// 2. Executes the returned effects concurrently
    /// 3. Reduces every action the effects produced, in order
    /// 4. Repeats until no effect produces further actions
    ///
    /// Returns the number of actions reduced, including the initial one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FeedbackLimitExceeded`] if the feedback loop
    /// does not settle within [`DEFAULT_FEEDBACK_LIMIT`] actions.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<usize, StoreError> {
        let mut queue = VecDeque::from([action]);
        let mut processed = 0usize;

        while let Some(action) = queue.pop_front() {
            if processed >= DEFAULT_FEEDBACK_LIMIT {
                ReducerMetrics::record_error();
                tracing::error!(
                    limit = DEFAULT_FEEDBACK_LIMIT,
                    "Feedback loop did not settle, aborting"
                );
                return Err(StoreError::FeedbackLimitExceeded(DEFAULT_FEEDBACK_LIMIT));
            }
            processed += 1;

            let effects = {
                let started = Instant::now();
                let mut state = self.state.write().await;
                let effects = self.reducer.reduce(&mut *state, action, &*self.environment);
                ReducerMetrics::record_action(started.elapsed());
                effects
            };

            if effects.is_empty() {
                continue;
            }

            tracing::trace!(effect_count = effects.len(), "Executing effects");
            let produced =
                futures::future::join_all(effects.into_iter().map(Self::execute_effect)).await;

            queue.extend(produced.into_iter().flatten());
        }

        Ok(processed)
    }

    /// Send an action, failing if the store has not settled within `timeout`
    ///
    /// # Errors
    ///
    /// - [`StoreError::Timeout`]: the deadline elapsed first
    /// - [`StoreError::FeedbackLimitExceeded`]: see [`Store::send`]
    pub async fn send_with_timeout(
        &self,
        action: A,
        timeout: Duration,
    ) -> Result<usize, StoreError> {
        tokio::time::timeout(timeout, self.send(action))
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// Read state through a projection function
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&*state)
    }

    async fn execute_effect(effect: Effect<A>) -> Option<A> {
        match effect {
            Effect::None => {
                EffectMetrics::record_kind("none");
                None
            },
            Effect::Future(fut) => {
                EffectMetrics::record_kind("future");
                let started = Instant::now();
                let action = fut.await;
                EffectMetrics::record_execution(started.elapsed());
                action
            },
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
        }
    }
}
