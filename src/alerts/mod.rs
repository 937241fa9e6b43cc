//! Alert definitions and severities
//!
//! Definitions are plain data; they are compiled and validated into a
//! dependency graph at the start of every evaluation pass.

pub mod config;
pub mod severity;

pub use config::{load_definitions, parse_definitions, AlertDefinition, ConfigError};
pub use severity::Severity;
