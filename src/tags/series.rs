use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::TagSet;

/// One time series returned by a backend query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub metric: String,
    #[serde(default)]
    pub tags: TagSet,
    /// Datapoints keyed by unix timestamp (seconds)
    #[serde(default)]
    pub dps: BTreeMap<i64, f64>,
}

impl Series {
    pub fn new(metric: impl Into<String>, tags: TagSet) -> Self {
        Self {
            metric: metric.into(),
            tags,
            dps: BTreeMap::new(),
        }
    }

    /// Builder-style datapoint insert
    pub fn with_point(mut self, timestamp: i64, value: f64) -> Self {
        self.dps.insert(timestamp, value);
        self
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.dps.values().copied()
    }
}
