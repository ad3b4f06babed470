#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]
#![deny(unused_crate_dependencies)]

pub mod cache;
pub mod inflight;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use cache::MemoryAudioCache;
pub use inflight::MemoryInFlightRegistry;
pub use memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use redis::RedisBackend;

// Silence unused dev-dependency warnings
#[cfg(test)]
use tokio_test as _;
