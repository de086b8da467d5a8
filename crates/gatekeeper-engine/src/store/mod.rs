pub mod atomic;
pub mod records;

pub use records::{load_record, save_record};
