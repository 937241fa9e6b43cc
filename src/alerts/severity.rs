use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of one alert instance for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
    /// Blocked by a cross-alert dependency; never reported as passing
    Unevaluated,
    /// The alert's expressions could not be evaluated this pass
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Unevaluated => "unevaluated",
            Severity::Unknown => "unknown",
        }
    }

    /// Critical or Warning
    pub fn is_firing(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Warning)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(Severity::Normal),
            "warn" | "warning" => Ok(Severity::Warning),
            "crit" | "critical" => Ok(Severity::Critical),
            "unevaluated" => Ok(Severity::Unevaluated),
            "unknown" => Ok(Severity::Unknown),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}
