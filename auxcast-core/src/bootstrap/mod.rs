//! Process bootstrap
//!
//! Configuration loading, backend initialization, and service wiring
//! shared by the server binary.

pub mod config;
pub mod database;
pub mod services;

pub use config::load_config;
pub use database::init_database;
pub use services::{init_services, Services};
