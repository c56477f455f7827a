pub mod api;
pub mod cli;
pub mod error;
pub mod metrics;
pub mod query;

use std::sync::Arc;

use idg_core::config::Config;
use idg_replicator::DriverMetrics;
use idg_sigv4::SessionTokenVerifier;
use idg_store::Store;
use metrics::VerifyMetrics;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub token_verifier: Arc<dyn SessionTokenVerifier>,
    pub driver_metrics: Arc<DriverMetrics>,
    pub verify_metrics: Arc<VerifyMetrics>,
}
