//! Alert definition types and loading

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Alert definition as written by an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Unique alert name; also the prefix of every instance identifier
    pub name: String,
    /// Expression whose truthy groups are Critical
    #[serde(default)]
    pub crit: Option<String>,
    /// Expression whose truthy groups are Warning
    #[serde(default)]
    pub warn: Option<String>,
    /// Either an expression whose truthy groups suppress matching crit/warn
    /// groups, or exactly `alert("name", "severity")` to block on another
    /// alert's committed state
    #[serde(default)]
    pub depends: Option<String>,
}

impl AlertDefinition {
    /// Create an alert with no expressions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            crit: None,
            warn: None,
            depends: None,
        }
    }

    /// Set the crit expression
    pub fn with_crit(mut self, expr: impl Into<String>) -> Self {
        self.crit = Some(expr.into());
        self
    }

    /// Set the warn expression
    pub fn with_warn(mut self, expr: impl Into<String>) -> Self {
        self.warn = Some(expr.into());
        self
    }

    /// Set the depends expression
    pub fn with_depends(mut self, expr: impl Into<String>) -> Self {
        self.depends = Some(expr.into());
        self
    }
}

/// Parse a JSON array of alert definitions
pub fn parse_definitions(json: &str) -> Result<Vec<AlertDefinition>, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Load alert definitions from a JSON file
pub fn load_definitions(path: impl AsRef<Path>) -> Result<Vec<AlertDefinition>, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let definitions = parse_definitions(&contents)?;
    tracing::info!(
        path = %path.display(),
        count = definitions.len(),
        "Loaded alert definitions"
    );
    Ok(definitions)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid alert definitions: {0}")]
    Json(#[from] serde_json::Error),
}
