pub mod momo;
pub mod vnpay;

pub use momo::{MomoConfig, MomoGateway};
pub use vnpay::{VnpayConfig, VnpayGateway};
