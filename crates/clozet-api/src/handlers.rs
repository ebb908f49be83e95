//! Request handlers.

pub mod credits;
pub mod health;
pub mod tryon;

pub use credits::*;
pub use health::{health, ready};
pub use tryon::*;
