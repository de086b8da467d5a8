#![forbid(unsafe_code)]

pub mod catalog;
pub mod check;
pub mod compliance;
pub mod gates;
pub mod orchestrator;
pub mod registry;
pub mod store;

pub use catalog::GateCatalog;
pub use orchestrator::Orchestrator;
pub use registry::ValidationRegistry;
