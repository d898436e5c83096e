//! Application state shared by HTTP handlers.

use crate::app::PassService;
use crate::repository::PassRepository;
use passgate_runtime::metrics::MetricsRecorder;
use std::sync::Arc;

/// Application state, cloned (cheaply via Arc) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Pass operations
    pub service: Arc<PassService>,
    /// Repository, for readiness checks
    pub repository: Arc<dyn PassRepository>,
    /// Prometheus recorder when metrics are enabled
    pub metrics: Option<Arc<MetricsRecorder>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(service: PassService, repository: Arc<dyn PassRepository>) -> Self {
        Self {
            service: Arc::new(service),
            repository,
            metrics: None,
        }
    }

    /// Serve `recorder` at `/metrics`
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(Arc::new(recorder));
        self
    }
}
