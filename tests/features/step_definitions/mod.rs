//! Step definitions for Cucumber scenarios

pub mod rotation_steps;
