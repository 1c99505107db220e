//! HTTP transport for the decentralized query gateway.
//!
//! Requests go to `{gateway}/api/{api_key}/subgraphs/id/{dataset_id}`. When
//! several gateway URLs are configured, each attempt picks the URL with the
//! fewest recent failures, so a flaky mirror drifts to the back of the line
//! until it answers again.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use graphscout_core::GatewaySettings;
use graphscout_core::config::is_valid_dataset_id;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::transport::{GraphRequest, QueryTransport};
use crate::GatewayError;

#[derive(Deserialize)]
struct GraphResponse {
    data: Option<Map<String, Value>>,
    #[serde(default)]
    errors: Vec<GraphErrorEntry>,
}

#[derive(Deserialize)]
struct GraphErrorEntry {
    message: String,
}

impl GraphResponse {
    fn into_data(self) -> Result<Map<String, Value>, GatewayError> {
        if !self.errors.is_empty() {
            let messages: Vec<String> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(GatewayError::Query(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| GatewayError::Malformed("response carries neither data nor errors".into()))
    }
}

/// Gateway base URLs with their recent failure counts.
#[derive(Debug)]
struct EndpointPool {
    bases: Vec<String>,
    failures: Vec<u32>,
}

impl EndpointPool {
    fn new(bases: &[String]) -> Self {
        let bases: Vec<String> = bases
            .iter()
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .collect();
        let failures = vec![0; bases.len()];
        Self { bases, failures }
    }

    /// Index of the base with the fewest failures; ties keep configuration order.
    fn pick(&self) -> Option<usize> {
        (0..self.bases.len()).min_by_key(|&i| self.failures[i])
    }

    fn failed(&mut self, idx: usize) {
        self.failures[idx] = self.failures[idx].saturating_add(1);
    }

    fn succeeded(&mut self, idx: usize) {
        self.failures[idx] = 0;
    }
}

/// Per-dataset endpoint URLs, one per gateway base.
#[derive(Debug)]
struct DatasetEndpoint {
    urls: Vec<String>,
}

impl DatasetEndpoint {
    fn new(bases: &[String], api_key: &str, dataset_id: &str) -> Self {
        let urls = bases
            .iter()
            .map(|base| format!("{base}/api/{api_key}/subgraphs/id/{dataset_id}"))
            .collect();
        Self { urls }
    }
}

/// Gateway client. One instance serves every dataset.
pub struct GatewayClient {
    client: reqwest::Client,
    api_key: Option<String>,
    pool: EndpointPool,
    endpoints: HashMap<String, DatasetEndpoint>,
    max_retries: usize,
    rate_limit_delay: Duration,
    max_wait: Duration,
}

impl GatewayClient {
    pub fn new(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            api_key: settings.credential().map(str::to_string),
            pool: EndpointPool::new(&settings.base_urls),
            endpoints: HashMap::new(),
            max_retries: settings.max_retries.max(1),
            rate_limit_delay: settings.rate_limit_delay,
            max_wait: settings.timeout,
        })
    }

    /// Pause before retrying a 429, never longer than the request timeout.
    fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or(self.rate_limit_delay).min(self.max_wait)
    }

    /// Number of dataset endpoints created so far.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Drop every cached dataset endpoint.
    pub fn close_all(&mut self) {
        let count = self.endpoints.len();
        self.endpoints.clear();
        debug!(count, "closed gateway endpoints");
    }

    fn endpoint(&mut self, dataset_id: &str) -> Result<&DatasetEndpoint, GatewayError> {
        let api_key = self.api_key.as_deref().ok_or(GatewayError::MissingCredential)?;
        if !is_valid_dataset_id(dataset_id) {
            return Err(GatewayError::InvalidDatasetId(dataset_id.to_string()));
        }
        if self.pool.bases.is_empty() {
            return Err(GatewayError::NoEndpoints);
        }
        let bases = &self.pool.bases;
        Ok(self
            .endpoints
            .entry(dataset_id.to_string())
            .or_insert_with(|| {
                debug!(dataset_id = %dataset_id, "creating dataset endpoint");
                DatasetEndpoint::new(bases, api_key, dataset_id)
            }))
    }

    async fn post(&self, url: &str, request: &GraphRequest) -> Result<Map<String, Value>, GatewayError> {
        let resp = self.client.post(url).json(request).send().await?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(GatewayError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GraphResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        body.into_data()
    }
}

#[async_trait]
impl QueryTransport for GatewayClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(
        &mut self,
        dataset_id: &str,
        request: &GraphRequest,
    ) -> Result<Map<String, Value>, GatewayError> {
        let urls = self.endpoint(dataset_id)?.urls.clone();

        let mut last_err = GatewayError::NoEndpoints;
        for attempt in 1..=self.max_retries {
            let Some(idx) = self.pool.pick() else {
                break;
            };
            let base = &self.pool.bases[idx];
            debug!(dataset_id = %dataset_id, gateway = %base, attempt, "executing gateway query");

            match self.post(&urls[idx], request).await {
                Ok(data) => {
                    self.pool.succeeded(idx);
                    info!(dataset_id = %dataset_id, keys = data.len(), "gateway query succeeded");
                    return Ok(data);
                }
                Err(e) if e.is_auth_failure() => {
                    warn!(dataset_id = %dataset_id, auth_failure = true, error = %e,
                        "gateway rejected credentials, check GRAPH_API_KEY");
                    return Err(e);
                }
                Err(GatewayError::Query(message)) => {
                    // The gateway answered; the document itself is at fault.
                    self.pool.succeeded(idx);
                    warn!(dataset_id = %dataset_id, error = %message, "gateway returned query errors");
                    return Err(GatewayError::Query(message));
                }
                Err(GatewayError::RateLimited { retry_after }) => {
                    self.pool.failed(idx);
                    let wait = self.rate_limit_wait(retry_after);
                    warn!(dataset_id = %dataset_id, attempt, wait_ms = wait.as_millis() as u64, "rate limited by gateway");
                    if attempt < self.max_retries {
                        tokio::time::sleep(wait).await;
                    }
                    last_err = GatewayError::RateLimited { retry_after };
                }
                Err(e) if e.is_retryable() => {
                    self.pool.failed(idx);
                    warn!(dataset_id = %dataset_id, gateway = %self.pool.bases[idx], attempt, error = %e, "gateway attempt failed");
                    last_err = e;
                }
                Err(e) => {
                    warn!(dataset_id = %dataset_id, error = %e, "gateway query failed");
                    return Err(e);
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphscout_core::config::META_INDEX_DATASET_ID;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DATASET: &str = "5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV";

    fn settings(bases: Vec<String>) -> GatewaySettings {
        GatewaySettings {
            api_key: Some("test-key".into()),
            base_urls: bases,
            rate_limit_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn meta_body() -> serde_json::Value {
        json!({"data": {"_meta": {"block": {"number": 42}}}})
    }

    #[test]
    fn retry_after_is_capped_by_timeout() {
        let client = GatewayClient::new(&GatewaySettings {
            timeout: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(2),
            ..settings(vec!["https://gw.example".into()])
        })
        .unwrap();
        assert_eq!(client.rate_limit_wait(Some(Duration::from_secs(86_400))), Duration::from_secs(5));
        assert_eq!(client.rate_limit_wait(Some(Duration::from_secs(1))), Duration::from_secs(1));
        assert_eq!(client.rate_limit_wait(None), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn returns_data_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(format!("/api/test-key/subgraphs/id/{DATASET}")))
            .and(body_partial_json(json!({"variables": {"first": 5}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(meta_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = GatewayClient::new(&settings(vec![server.uri()])).unwrap();
        let data = client
            .execute(DATASET, &GraphRequest::new("query($first: Int) { _meta { block { number } } }").var("first", 5))
            .await
            .unwrap();
        assert_eq!(data["_meta"]["block"]["number"], 42);
        assert_eq!(client.endpoint_count(), 1);
    }

    #[tokio::test]
    async fn graphql_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"errors": [{"message": "Type `Query` has no field `pols`"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut client = GatewayClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.execute(DATASET, &GraphRequest::new("{ pols { id } }")).await.unwrap_err();
        match err {
            GatewayError::Query(message) => assert!(message.contains("has no field")),
            other => panic!("expected query error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fails_over_to_healthier_gateway() {
        let flaky = MockServer::start().await;
        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(1)
            .mount(&flaky)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(meta_body()))
            .expect(2)
            .mount(&healthy)
            .await;

        let mut client = GatewayClient::new(&settings(vec![flaky.uri(), healthy.uri()])).unwrap();
        let request = GraphRequest::new("{ _meta { block { number } } }");
        assert!(client.execute(DATASET, &request).await.is_ok());
        // The flaky gateway now has a failure on record and is tried last.
        assert!(client.execute(DATASET, &request).await.is_ok());
    }

    #[tokio::test]
    async fn waits_out_rate_limit_then_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(meta_body()))
            .mount(&server)
            .await;

        let mut client = GatewayClient::new(&settings(vec![server.uri()])).unwrap();
        let data = client
            .execute(DATASET, &GraphRequest::new("{ _meta { block { number } } }"))
            .await
            .unwrap();
        assert!(data.contains_key("_meta"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let mut client = GatewayClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.execute(DATASET, &GraphRequest::new("{ x }")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = GatewayClient::new(&settings(vec![server.uri()])).unwrap();
        let err = client.execute(DATASET, &GraphRequest::new("{ x }")).await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn rejects_bad_input_before_any_call() {
        let mut client = GatewayClient::new(&settings(vec!["http://127.0.0.1:9".into()])).unwrap();
        let err = client.execute("not-a-dataset", &GraphRequest::new("{ x }")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidDatasetId(_)));

        let mut anonymous = GatewayClient::new(&GatewaySettings::default()).unwrap();
        assert!(!anonymous.is_configured());
        let err = anonymous
            .execute(META_INDEX_DATASET_ID, &GraphRequest::new("{ x }"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredential));
    }

    #[test]
    fn close_all_drops_endpoints() {
        let mut client = GatewayClient::new(&settings(vec!["https://gateway.example/".into()])).unwrap();
        let url = client.endpoint(DATASET).unwrap().urls[0].clone();
        assert_eq!(url, format!("https://gateway.example/api/test-key/subgraphs/id/{DATASET}"));
        client.endpoint(DATASET).unwrap();
        assert_eq!(client.endpoint_count(), 1);
        client.close_all();
        assert_eq!(client.endpoint_count(), 0);
    }
}
