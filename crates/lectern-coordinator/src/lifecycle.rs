//! Coordinator lifecycle: start the consumer and scanners, stop them with
//! a bounded drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lectern_core::events::DoneBus;
use lectern_core::ports::{
    AudioCache, InFlightRegistry, JobQueue, ResultsStream, ServerlessClient,
};
use lectern_core::settings::Settings;

use crate::consumer::ResultConsumer;
use crate::metrics::Metrics;
use crate::overflow::OverflowScanner;
use crate::visibility::VisibilityScanner;

/// How long `shutdown` waits for each task to drain.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Everything the coordinator tasks are wired with. Constructed once at the
/// composition root and injected — no globals, no post-boot mutation.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub queue: Arc<dyn JobQueue>,
    pub results: Arc<dyn ResultsStream>,
    pub cache: Arc<dyn AudioCache>,
    pub inflight: Arc<dyn InFlightRegistry>,
    pub bus: Arc<DoneBus>,
    /// `None` disables the overflow scanners outright.
    pub serverless: Option<Arc<dyn ServerlessClient>>,
    pub metrics: Arc<Metrics>,
}

/// Handle over the coordinator's long-running tasks.
pub struct Coordinator {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Coordinator {
    /// Spawn the result consumer, one visibility scanner per model queue,
    /// and (when serverless is configured) one overflow scanner per model
    /// queue.
    pub fn start(settings: &Settings, deps: &CoordinatorDeps) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let consumer = ResultConsumer::new(
            Arc::clone(&deps.queue),
            Arc::clone(&deps.results),
            Arc::clone(&deps.cache),
            Arc::clone(&deps.inflight),
            Arc::clone(&deps.bus),
            Arc::clone(&deps.metrics),
        );
        tasks.push(("result-consumer", tokio::spawn(consumer.run(cancel.clone()))));

        for model_id in &settings.models {
            let scanner = VisibilityScanner::new(
                model_id.clone(),
                Arc::clone(&deps.queue),
                Arc::clone(&deps.results),
                settings.clone(),
                Arc::clone(&deps.metrics),
            );
            tasks.push(("visibility-scanner", tokio::spawn(scanner.run(cancel.clone()))));
        }

        match (&deps.serverless, settings.overflow_enabled()) {
            (Some(serverless), true) => {
                for model_id in &settings.models {
                    let scanner = OverflowScanner::new(
                        model_id.clone(),
                        Arc::clone(&deps.queue),
                        Arc::clone(&deps.results),
                        Arc::clone(serverless),
                        settings.clone(),
                        Arc::clone(&deps.metrics),
                    );
                    tasks.push(("overflow-scanner", tokio::spawn(scanner.run(cancel.clone()))));
                }
            }
            _ => info!("serverless endpoint not configured, overflow disabled"),
        }

        info!(tasks = tasks.len(), models = settings.models.len(), "coordinator started");
        Self { cancel, tasks }
    }

    /// Cancel all tasks and join each with a bounded drain. In-flight jobs
    /// are safe to abandon: their claims time out and the next process
    /// takes over.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in self.tasks {
            if tokio::time::timeout(SHUTDOWN_DRAIN, task).await.is_err() {
                // Cancellation is already signalled; the task ends at its
                // next poll boundary even though we stop waiting here.
                warn!(task = name, "task did not drain within shutdown budget");
            }
        }
        info!("coordinator stopped");
    }
}
