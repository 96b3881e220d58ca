//! certrotate library
//!
//! Keeps client X.509 credentials fresh by rotating them through an
//! asynchronous certificate signing request workflow before they expire.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;
pub use services::{Reconciler, SyncContext, SyncOutcome};
pub use utils::{RotationError, RotationResult};
