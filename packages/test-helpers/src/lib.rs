//! Helpers shared by the swarmscan test suites.
pub mod configuration;
pub mod random;
