pub mod executor;
pub mod runner;

pub use executor::GateExecutor;
pub use runner::ValidationRunner;
