//! Integration tests for certrotate
//!
//! These tests run full reconciliation passes with mock collaborators, the
//! HTTP authority client against a mocked server, and the SQLite layer on
//! an in-memory database.

mod http_authority_tests;
mod reconciler_tests;
