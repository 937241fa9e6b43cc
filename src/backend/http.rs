use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::{BackendError, QueryBackend};
use crate::expr::QueryRef;
use crate::tags::{Series, TagSet};

/// Client for an OpenTSDB-compatible query endpoint
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
}

/// `/api/query` request body
#[derive(Debug, Serialize)]
struct QueryRequest {
    start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<String>,
    queries: Vec<SubQuery>,
}

#[derive(Debug, Serialize)]
struct SubQuery {
    aggregator: String,
    metric: String,
    rate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    downsample: Option<String>,
    tags: HashMap<String, String>,
}

/// One element of the `/api/query` response array
#[derive(Debug, Deserialize)]
struct QueryResponse {
    metric: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    dps: BTreeMap<String, f64>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_request(query: &QueryRef) -> Result<QueryRequest, BackendError> {
        let mq = query.metric_query().map_err(|e| BackendError::InvalidQuery {
            query: query.query.clone(),
            reason: e.to_string(),
        })?;

        Ok(QueryRequest {
            start: relative_time(&query.start),
            end: if query.end.is_empty() {
                None
            } else {
                Some(relative_time(&query.end))
            },
            queries: vec![SubQuery {
                aggregator: mq.aggregator,
                metric: mq.metric,
                rate: mq.rate,
                downsample: mq.downsample,
                tags: mq.tags.into_iter().collect(),
            }],
        })
    }

    async fn execute(&self, query: &QueryRef) -> Result<Vec<Series>, BackendError> {
        let request = Self::build_request(query)?;
        let url = format!("{}/api/query", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        // OpenTSDB answers 400 "No such name" for metrics without data
        if status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if body.contains("No such name") {
                tracing::debug!(query = %query, "Metric has no data");
                return Ok(Vec::new());
            }
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let results: Vec<QueryResponse> = response
            .json()
            .await
            .map_err(|e| BackendError::Deserialization(e.to_string()))?;

        results.into_iter().map(into_series).collect()
    }
}

impl QueryBackend for HttpBackend {
    fn query<'a>(&'a self, query: &'a QueryRef) -> BoxFuture<'a, Result<Vec<Series>, BackendError>> {
        self.execute(query).boxed()
    }
}

fn into_series(response: QueryResponse) -> Result<Series, BackendError> {
    let mut series = Series::new(response.metric, response.tags.into_iter().collect::<TagSet>());
    for (ts, value) in response.dps {
        let ts: i64 = ts
            .parse()
            .map_err(|_| BackendError::Deserialization(format!("bad timestamp: {}", ts)))?;
        series.dps.insert(ts, value);
    }
    Ok(series)
}

/// `5m` → `5m-ago`; absolute times pass through untouched
fn relative_time(t: &str) -> String {
    let is_relative = t
        .chars()
        .last()
        .map_or(false, |c| matches!(c, 's' | 'm' | 'h' | 'd' | 'w' | 'y'))
        && t[..t.len() - 1].chars().all(|c| c.is_ascii_digit())
        && t.len() > 1;

    if is_relative {
        format!("{}-ago", t)
    } else {
        t.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_time() {
        assert_eq!(relative_time("5m"), "5m-ago");
        assert_eq!(relative_time("1h"), "1h-ago");
        assert_eq!(relative_time("1h-ago"), "1h-ago");
        assert_eq!(relative_time("1700000000"), "1700000000");
    }

    #[test]
    fn test_build_request() {
        let q = QueryRef::new("avg:rate:os.cpu{host=*,cpu=0}", "5m", "").unwrap();
        let request = HttpBackend::build_request(&q).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["start"], "5m-ago");
        assert!(json.get("end").is_none());
        assert_eq!(json["queries"][0]["aggregator"], "avg");
        assert_eq!(json["queries"][0]["metric"], "os.cpu");
        assert_eq!(json["queries"][0]["rate"], true);
        assert_eq!(json["queries"][0]["tags"]["host"], "*");
    }

    #[test]
    fn test_decode_response() {
        let body = r#"[{"metric":"c","tags":{"a":"b"},"aggregateTags":[],"dps":{"0":1,"60":2.5}}]"#;
        let parsed: Vec<QueryResponse> = serde_json::from_str(body).unwrap();
        let series = into_series(parsed.into_iter().next().unwrap()).unwrap();

        assert_eq!(series.tags.to_string(), "{a=b}");
        assert_eq!(series.dps.get(&60), Some(&2.5));
    }

    #[test]
    fn test_invalid_query_rejected_before_request() {
        let q = QueryRef::new("nometric", "5m", "").unwrap();
        assert!(matches!(
            HttpBackend::build_request(&q),
            Err(BackendError::InvalidQuery { .. })
        ));
    }
}
