#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![deny(unused_crate_dependencies)]

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod state;

pub use bootstrap::{Gateway, bootstrap, bootstrap_with_store};
pub use routes::{CorsConfig, create_router};
pub use state::{AppState, GatewayContext};

// Silence unused dev-dependency warnings (integration tests under tests/
// use these, the unit-test target does not)
#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use lectern_worker as _;
#[cfg(test)]
use tokio_test as _;
#[cfg(test)]
use tokio_tungstenite as _;
#[cfg(test)]
use tokio_util as _;
#[cfg(test)]
use tower as _;
