//! Backend query references and their normalized form
//!
//! The normalized text is what the per-pass query cache keys on, so two
//! alerts writing `avg:a{host=*,cpu=*}` and `avg:a{cpu=*, host=*}` share one
//! backend call.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::parser::ParseError;

/// A `q(query, start, end)` leaf in an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRef {
    /// `agg[:modifier...]:metric{k=v,...}` with tag keys sorted
    pub query: String,
    /// Relative start such as `5m`
    pub start: String,
    /// Relative end; empty means now
    pub end: String,
}

/// Decomposed metric query, used by backends that speak structured requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub aggregator: String,
    pub metric: String,
    pub rate: bool,
    pub downsample: Option<String>,
    /// Tag filters in key order; values may contain `*` or `|`
    pub tags: Vec<(String, String)>,
}

fn query_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<head>[^{}]+?)\s*(?:\{(?P<tags>[^{}]*)\})?$").expect("static regex")
    })
}

impl QueryRef {
    /// Build a normalized query reference
    pub fn new(query: &str, start: &str, end: &str) -> Result<Self, ParseError> {
        Ok(Self {
            query: normalize_query(query)?,
            start: start.trim().to_string(),
            end: end.trim().to_string(),
        })
    }

    /// Cache key: the canonical `q(...)` rendering
    pub fn cache_key(&self) -> String {
        self.to_string()
    }

    /// Split the query into aggregator, modifiers, metric and tag filters
    pub fn metric_query(&self) -> Result<MetricQuery, ParseError> {
        let (head, tags) = split_query(&self.query)?;
        let parts: Vec<&str> = head.split(':').map(str::trim).collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(ParseError::InvalidQuery(self.query.clone()));
        }

        let mut rate = false;
        let mut downsample = None;
        for modifier in &parts[1..parts.len() - 1] {
            if modifier.starts_with("rate") {
                rate = true;
            } else if modifier.contains('-') {
                downsample = Some(modifier.to_string());
            } else {
                return Err(ParseError::InvalidQuery(self.query.clone()));
            }
        }

        Ok(MetricQuery {
            aggregator: parts[0].to_string(),
            metric: parts[parts.len() - 1].to_string(),
            rate,
            downsample,
            tags,
        })
    }
}

impl fmt::Display for QueryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q({:?}, {:?}, {:?})", self.query, self.start, self.end)
    }
}

fn split_query(query: &str) -> Result<(String, Vec<(String, String)>), ParseError> {
    let caps = query_regex()
        .captures(query.trim())
        .ok_or_else(|| ParseError::InvalidQuery(query.to_string()))?;

    let head = caps["head"].trim().to_string();
    let mut tags = Vec::new();
    if let Some(raw) = caps.name("tags") {
        for pair in raw.as_str().split(',').filter(|p| !p.trim().is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| ParseError::InvalidQuery(query.to_string()))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() || v.is_empty() {
                return Err(ParseError::InvalidQuery(query.to_string()));
            }
            tags.push((k.to_string(), v.to_string()));
        }
    }
    tags.sort();
    // A key filtered twice has no single meaning
    if tags.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(ParseError::InvalidQuery(query.to_string()));
    }
    Ok((head, tags))
}

/// Normalize a metric query: trim whitespace and sort tag filters by key
pub fn normalize_query(query: &str) -> Result<String, ParseError> {
    let (head, tags) = split_query(query)?;
    if tags.is_empty() && !query.contains('{') {
        return Ok(head);
    }
    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    Ok(format!("{}{{{}}}", head, rendered.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sorts_tags() {
        assert_eq!(
            normalize_query("avg:a{host=*,cpu=*}").unwrap(),
            "avg:a{cpu=*,host=*}"
        );
        assert_eq!(
            normalize_query("  avg:a{ cpu = * , host=*} ").unwrap(),
            "avg:a{cpu=*,host=*}"
        );
        assert_eq!(normalize_query("sum:os.cpu").unwrap(), "sum:os.cpu");
    }

    #[test]
    fn test_cache_key_rendering() {
        let q = QueryRef::new("avg:a{host=*,cpu=*}", "5m", "").unwrap();
        assert_eq!(q.cache_key(), r#"q("avg:a{cpu=*,host=*}", "5m", "")"#);

        let same = QueryRef::new("avg:a{cpu=*,host=*}", " 5m", "").unwrap();
        assert_eq!(q.cache_key(), same.cache_key());
    }

    #[test]
    fn test_metric_query() {
        let q = QueryRef::new("sum:5m-avg:rate:os.cpu{host=ny01}", "1h", "").unwrap();
        let mq = q.metric_query().unwrap();
        assert_eq!(mq.aggregator, "sum");
        assert_eq!(mq.metric, "os.cpu");
        assert!(mq.rate);
        assert_eq!(mq.downsample.as_deref(), Some("5m-avg"));
        assert_eq!(mq.tags, vec![("host".to_string(), "ny01".to_string())]);
    }

    #[test]
    fn test_invalid_queries() {
        assert!(normalize_query("avg:a{host}").is_err());
        assert!(normalize_query("avg:a{host=*").is_err());
        assert_eq!(
            normalize_query("avg:a{host=x,host=y}"),
            Err(ParseError::InvalidQuery("avg:a{host=x,host=y}".to_string()))
        );
        assert!(normalize_query("avg:a{host=x,dc=ny,host=x}").is_err());
        assert!(QueryRef::new("avg:a{host=x, host=y}", "5m", "").is_err());
        let q = QueryRef::new("metriconly", "5m", "").unwrap();
        assert!(q.metric_query().is_err());
    }
}
