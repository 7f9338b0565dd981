pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
