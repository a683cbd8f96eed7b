pub mod common;
pub mod notify;
pub mod order;
pub mod platform;
pub mod prepay;
