pub mod aggregator;
pub mod rules;

pub use aggregator::*;
pub use rules::{is_numeric_noise, Denylist, NameCleanup};
