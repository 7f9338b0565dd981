//! Payment gateway clients and the signature engine they share.

pub mod error;
pub mod factory;
pub mod gateway;
pub mod gateways;
pub mod signature;
pub mod types;
pub mod utils;
