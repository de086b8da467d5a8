#![forbid(unsafe_code)]

pub mod errors;
pub mod record;
pub mod spec;
pub mod traits;
pub mod types;
