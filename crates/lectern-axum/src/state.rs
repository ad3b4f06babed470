//! Shared application state type.

use std::sync::Arc;

use lectern_core::events::DoneBus;
use lectern_core::ports::{AudioCache, InFlightRegistry, JobQueue};
use lectern_core::settings::Settings;
use lectern_coordinator::Metrics;

/// Everything the handlers and sessions need, wired once in `bootstrap`.
pub struct GatewayContext {
    pub settings: Settings,
    pub queue: Arc<dyn JobQueue>,
    pub cache: Arc<dyn AudioCache>,
    pub inflight: Arc<dyn InFlightRegistry>,
    pub bus: Arc<DoneBus>,
    pub metrics: Arc<Metrics>,
}

/// Application state shared across all handlers.
pub type AppState = Arc<GatewayContext>;
