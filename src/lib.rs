//! Load-testing harness for ActivityPub services.
//!
//! Each iteration walks the configured actors, every collection they link
//! and every page of those collections, checking status, content type, body
//! and ActivityPub `type` along the way. Results feed one [`aggregate::Aggregator`]
//! whose error rates and latencies are gated by [`thresholds`].

pub mod actor;
pub mod aggregate;
pub mod checks;
pub mod client;
pub mod config;
pub mod config_validation;
pub mod driver;
pub mod errors;
pub mod load_models;
pub mod metrics;
pub mod percentiles;
pub mod report;
pub mod response;
pub mod scenario;
pub mod setup;
pub mod thresholds;
pub mod utils;
pub mod walker;
pub mod yaml_config;
