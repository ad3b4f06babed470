#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![deny(unused_crate_dependencies)]

pub mod consumer;
pub mod lifecycle;
pub mod metrics;
pub mod overflow;
pub mod serverless;
pub mod visibility;

pub use consumer::ResultConsumer;
pub use lifecycle::{Coordinator, CoordinatorDeps};
pub use metrics::{Metrics, MetricsSnapshot};
pub use overflow::OverflowScanner;
pub use serverless::HttpServerlessClient;
pub use visibility::VisibilityScanner;

// Silence unused dev-dependency warnings
#[cfg(test)]
use lectern_worker as _;
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tokio_test as _;
