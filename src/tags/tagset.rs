use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag-based identity of one concrete time-series instance.
///
/// Keys are kept sorted, so equality, hashing, ordering and the rendered form
/// all agree on the canonical representation (`{a=c,b=q}`) regardless of the
/// order tags were inserted in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a tag, returning the previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Intersection-equality: every key present in both sets carries the same
    /// value. Keys present on only one side are ignored, so sets with no
    /// shared keys always match.
    pub fn matches(&self, other: &TagSet) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };

        small
            .0
            .iter()
            .all(|(k, v)| large.0.get(k).map_or(true, |ov| ov == v))
    }

    /// Union of both sets. On a key conflict the value from `self` wins;
    /// callers only merge sets that already match.
    pub fn merge(&self, other: &TagSet) -> TagSet {
        let mut merged = other.0.clone();
        for (k, v) in &self.0 {
            merged.insert(k.clone(), v.clone());
        }
        TagSet(merged)
    }

    /// Canonical string form, keys sorted ascending
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl FromStr for TagSet {
    type Err = TagParseError;

    /// Parse `{a=b,c=d}`; the braces are optional and whitespace around
    /// keys and values is trimmed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(trimmed);

        let mut tags = TagSet::new();
        for pair in inner.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| TagParseError::MissingEquals(pair.trim().to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(TagParseError::EmptyKey(pair.trim().to_string()));
            }
            if tags.insert(key, value.trim()).is_some() {
                return Err(TagParseError::DuplicateKey(key.to_string()));
            }
        }
        Ok(tags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagParseError {
    #[error("Tag pair '{0}' is missing '='")]
    MissingEquals(String),

    #[error("Tag pair '{0}' has an empty key")]
    EmptyKey(String),

    #[error("Duplicate tag key: {0}")]
    DuplicateKey(String),
}
