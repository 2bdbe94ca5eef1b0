pub mod enums;
pub mod triage;

pub use enums::*;
pub use triage::*;
