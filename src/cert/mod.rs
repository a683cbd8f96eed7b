pub mod manager;
pub mod store;

pub use manager::PlatformCertManager;
pub use store::PlatformCert;
