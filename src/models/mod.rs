//! Data models

mod condition;
mod credential;

pub use condition::*;
pub use credential::*;
