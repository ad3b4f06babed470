//! Gateway bootstrap — the composition root.
//!
//! This module is the ONLY place where infrastructure is wired together
//! for the web adapter: stores, coordinator tasks, serverless client, and
//! the shared context all come to life here.

use std::sync::Arc;

use anyhow::Result;

use lectern_core::events::DoneBus;
use lectern_core::ports::{
    AudioCache, InFlightRegistry, JobQueue, ResultsStream, ServerlessClient,
};
use lectern_core::settings::{Settings, validate_settings};
use lectern_coordinator::{Coordinator, CoordinatorDeps, HttpServerlessClient, Metrics};
use lectern_store::{MemoryAudioCache, MemoryBackend, MemoryInFlightRegistry};

use crate::state::{AppState, GatewayContext};

/// A running gateway: shared handler state plus the coordinator handle.
pub struct Gateway {
    pub state: AppState,
    pub coordinator: Coordinator,
}

/// Wire the gateway over the embedded store (single-node deployments and
/// tests; workers run in-process against the same backend).
pub fn bootstrap(settings: Settings) -> Result<Gateway> {
    let backend = MemoryBackend::from_settings(&settings);
    bootstrap_with_store(
        settings,
        Arc::clone(&backend) as Arc<dyn JobQueue>,
        backend as Arc<dyn ResultsStream>,
    )
}

/// Wire the gateway over an externally constructed store (e.g. the Redis
/// backend when workers live on other machines).
pub fn bootstrap_with_store(
    settings: Settings,
    queue: Arc<dyn JobQueue>,
    results: Arc<dyn ResultsStream>,
) -> Result<Gateway> {
    validate_settings(&settings)?;

    let cache: Arc<dyn AudioCache> =
        Arc::new(MemoryAudioCache::new(settings.cache_max_size_bytes));
    let inflight: Arc<dyn InFlightRegistry> = Arc::new(MemoryInFlightRegistry::new());
    let bus = Arc::new(DoneBus::default());
    let metrics = Arc::new(Metrics::default());

    let serverless: Option<Arc<dyn ServerlessClient>> = match &settings.serverless_endpoint {
        Some(endpoint) => Some(Arc::new(HttpServerlessClient::new(endpoint.clone())?)),
        None => None,
    };

    let deps = CoordinatorDeps {
        queue: Arc::clone(&queue),
        results,
        cache: Arc::clone(&cache),
        inflight: Arc::clone(&inflight),
        bus: Arc::clone(&bus),
        serverless,
        metrics: Arc::clone(&metrics),
    };
    let coordinator = Coordinator::start(&settings, &deps);

    let state = Arc::new(GatewayContext { settings, queue, cache, inflight, bus, metrics });
    Ok(Gateway { state, coordinator })
}
