//! Shared state for Cucumber scenarios


pub use world::TestWorld;
