pub mod models;
pub mod repository;
pub mod service;
pub mod cache;
pub mod platform;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

// Compiled into the library so integration tests can share fixtures
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
