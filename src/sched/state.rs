//! Pass-scoped instance state
//!
//! An [`InstanceState`] is created fresh for every evaluation pass. Each
//! alert's instance severities are committed in one write, after which they
//! are visible to alerts in later layers, both through the resolver and
//! through `alert(name, severity)` pseudo-queries.

use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::alerts::Severity;
use crate::tags::{TagParseError, TagSet};

/// Identity of one alert instance: `(alert name, tag set)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub alert: String,
    pub tags: TagSet,
}

impl InstanceKey {
    pub fn new(alert: impl Into<String>, tags: TagSet) -> Self {
        Self {
            alert: alert.into(),
            tags,
        }
    }
}

/// Renders as `<alert>{<key>=<value>,...}`, keys sorted
impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.alert, self.tags)
    }
}

impl FromStr for InstanceKey {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.find('{') {
            Some(idx) => Ok(Self::new(&s[..idx], s[idx..].parse()?)),
            None => Ok(Self::new(s, TagSet::new())),
        }
    }
}

/// Read-only view of committed instance severities
pub trait StateReader: Send + Sync {
    /// Committed instances of `alert`; empty if it has not committed
    fn instances(&self, alert: &str) -> Vec<(TagSet, Severity)>;
}

/// In-progress instance state for one pass
#[derive(Debug, Default)]
pub struct InstanceState {
    alerts: RwLock<HashMap<String, Vec<(TagSet, Severity)>>>,
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit every instance of one alert in a single write
    pub fn commit(&self, alert: &str, mut instances: Vec<(TagSet, Severity)>) {
        instances.sort_by(|a, b| a.0.cmp(&b.0));
        let previous = self.alerts.write().insert(alert.to_string(), instances);
        if previous.is_some() {
            tracing::warn!(alert = %alert, "Alert committed twice in one pass");
        }
    }

    /// Ordered copy of everything committed so far
    pub fn snapshot(&self) -> StateSnapshot {
        let alerts = self.alerts.read();
        let entries = alerts
            .iter()
            .flat_map(|(alert, instances)| {
                instances
                    .iter()
                    .map(move |(tags, sev)| (InstanceKey::new(alert.clone(), tags.clone()), *sev))
            })
            .collect();
        StateSnapshot(entries)
    }
}

impl StateReader for InstanceState {
    fn instances(&self, alert: &str) -> Vec<(TagSet, Severity)> {
        self.alerts.read().get(alert).cloned().unwrap_or_default()
    }
}

/// Fully committed result of one pass, ordered by instance key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot(BTreeMap<InstanceKey, Severity>);

impl StateSnapshot {
    pub fn get(&self, key: &InstanceKey) -> Option<Severity> {
        self.0.get(key).copied()
    }

    /// Look up by canonical identifier such as `a{a=c}`
    pub fn get_str(&self, id: &str) -> Option<Severity> {
        id.parse().ok().and_then(|key: InstanceKey| self.get(&key))
    }

    /// Instances of one alert
    pub fn for_alert<'a>(&'a self, alert: &'a str) -> impl Iterator<Item = (&'a InstanceKey, Severity)> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.alert == alert)
            .map(|(k, s)| (k, *s))
    }

    /// Canonical identifiers of every instance at `severity`
    pub fn with_severity(&self, severity: Severity) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, s)| **s == severity)
            .map(|(k, _)| k.to_string())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&InstanceKey, Severity)> {
        self.0.iter().map(|(k, s)| (k, *s))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl StateReader for StateSnapshot {
    fn instances(&self, alert: &str) -> Vec<(TagSet, Severity)> {
        self.for_alert(alert)
            .map(|(k, s)| (k.tags.clone(), s))
            .collect()
    }
}

/// Serializes as `{"a{a=c}": "critical", ...}`
impl Serialize for StateSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, severity) in &self.0 {
            map.serialize_entry(&key.to_string(), severity)?;
        }
        map.end()
    }
}
