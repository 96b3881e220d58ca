//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - A throwaway certificate authority and identity fixtures
//! - Mock collaborators (authority, store, reporter)
//! - Test database setup


pub use fixtures::*;
pub use mocks::*;
