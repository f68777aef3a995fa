pub mod identity;
pub mod models;
pub mod pii;

pub use identity::{Principal, Role};
pub use pii::Masked;
