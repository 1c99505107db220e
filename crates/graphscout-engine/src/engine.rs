//! Query execution: plan, run against the gateway, render.

use chrono::{DateTime, Utc};
use graphscout_ai::{QueryBuilder, format_result};
use graphscout_core::{CacheSettings, ExecutionResult, ExecutionTrace, ProtocolContext, QueryContext};
use graphscout_gateway::{GatewayError, GraphRequest, QueryTransport};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, QueryCache};

const TEST_CONNECTION_QUERY: &str = "query TestConnection { _meta { block { number } } }";

const METADATA_QUERY: &str = "\
query GetMetadata {
  _meta {
    block { number hash timestamp }
    deployment
    hasIndexingErrors
  }
}";

/// Indexing head of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    pub block_number: Option<u64>,
    pub block_hash: Option<String>,
    pub block_timestamp: Option<i64>,
    /// `block_timestamp` rendered as `YYYY-MM-DD HH:MM:SS UTC`.
    pub formatted_time: Option<String>,
    pub deployment: Option<String>,
    pub has_indexing_errors: bool,
}

/// Outcome of [`QueryEngine::execute_with_context`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContextualResult {
    pub success: bool,
    pub data: Option<Map<String, Value>>,
    pub error: Option<String>,
    /// Caller context plus `dataset_id` and `executed_at`.
    pub context: Map<String, Value>,
}

pub struct QueryEngine {
    transport: Box<dyn QueryTransport>,
    builder: QueryBuilder,
    cache: QueryCache,
}

impl QueryEngine {
    pub fn new(transport: Box<dyn QueryTransport>, builder: QueryBuilder, cache: &CacheSettings) -> Self {
        Self {
            transport,
            builder,
            cache: QueryCache::new(cache),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_configured()
    }

    /// Plan, execute and render one resolved question. Never fails: errors come
    /// back as `success: false` with the underlying message.
    pub async fn execute_natural_language_query(&mut self, ctx: &QueryContext) -> ExecutionResult {
        info!(protocol = %ctx.protocol, network = %ctx.network, dataset_id = %ctx.dataset_id, "executing question");
        let protocol_ctx = ProtocolContext::for_protocol(&ctx.protocol, &ctx.network);
        let plan = self.builder.build_query(&ctx.user_query, &protocol_ctx).await;
        debug!(query = %plan.query_document, "plan ready");

        let data = match self
            .run_query(&ctx.dataset_id, &plan.query_document, &plan.variables, true)
            .await
        {
            Ok(data) if data.is_empty() => {
                warn!(dataset_id = %ctx.dataset_id, "gateway returned no data");
                return ExecutionResult::failed("gateway returned no data");
            }
            Ok(data) => data,
            Err(e) => {
                error!(dataset_id = %ctx.dataset_id, error = %e, "query execution failed");
                return ExecutionResult::failed(e.to_string());
            }
        };

        let formatted = format_result(&data, &plan.explanation);
        let trace = ExecutionTrace {
            explanation: plan.explanation,
            query_document: plan.query_document,
            variables: plan.variables,
            dataset_id: ctx.dataset_id.clone(),
            protocol: ctx.protocol.clone(),
            network: ctx.network.clone(),
        };
        ExecutionResult::succeeded(data, formatted, trace)
    }

    /// The `data` object for `query` on `dataset_id`, or `None` on any failure.
    pub async fn execute_query(
        &mut self,
        dataset_id: &str,
        query: &str,
        variables: &Map<String, Value>,
        use_cache: bool,
    ) -> Option<Map<String, Value>> {
        match self.run_query(dataset_id, query, variables, use_cache).await {
            Ok(data) => Some(data),
            Err(e) => {
                error!(dataset_id = %dataset_id, error = %e, "query failed");
                None
            }
        }
    }

    async fn run_query(
        &mut self,
        dataset_id: &str,
        query: &str,
        variables: &Map<String, Value>,
        use_cache: bool,
    ) -> Result<Map<String, Value>, GatewayError> {
        let key = (use_cache && self.cache.is_enabled()).then(|| QueryCache::key(dataset_id, query, variables));
        if let Some(hit) = key.as_deref().and_then(|k| self.cache.get(k)) {
            debug!(dataset_id = %dataset_id, "cache hit");
            return Ok(hit.clone());
        }

        let request = GraphRequest::with_variables(query, variables.clone());
        let data = self.transport.execute(dataset_id, &request).await?;
        if let Some(key) = key {
            self.cache.insert(key, data.clone());
        }
        Ok(data)
    }

    /// Run `query` and return the data with `context` stamped by execution time.
    pub async fn execute_with_context(
        &mut self,
        dataset_id: &str,
        query: &str,
        variables: &Map<String, Value>,
        mut context: Map<String, Value>,
    ) -> ContextualResult {
        let outcome = self.run_query(dataset_id, query, variables, true).await;
        context.insert("dataset_id".into(), Value::from(dataset_id));
        context.insert("executed_at".into(), Value::from(Utc::now().to_rfc3339()));
        match outcome {
            Ok(data) => ContextualResult {
                success: true,
                data: Some(data),
                error: None,
                context,
            },
            Err(e) => {
                error!(dataset_id = %dataset_id, error = %e, "query failed");
                ContextualResult {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                    context,
                }
            }
        }
    }

    /// Whether `dataset_id` answers a minimal `_meta` probe. Bypasses the cache.
    pub async fn test_connection(&mut self, dataset_id: &str) -> bool {
        let ok = self
            .execute_query(dataset_id, TEST_CONNECTION_QUERY, &Map::new(), false)
            .await
            .is_some_and(|data| data.contains_key("_meta"));
        info!(dataset_id = %dataset_id, ok, "connection test");
        ok
    }

    pub async fn get_subgraph_metadata(&mut self, dataset_id: &str) -> Option<DatasetMetadata> {
        let data = self
            .execute_query(dataset_id, METADATA_QUERY, &Map::new(), true)
            .await?;
        let meta = data.get("_meta").filter(|m| m.is_object())?;
        let block = meta.get("block");

        let block_timestamp = block.and_then(|b| b.get("timestamp")).and_then(Value::as_i64);
        Some(DatasetMetadata {
            block_number: block.and_then(|b| b.get("number")).and_then(Value::as_u64),
            block_hash: block
                .and_then(|b| b.get("hash"))
                .and_then(Value::as_str)
                .map(str::to_string),
            block_timestamp,
            formatted_time: block_timestamp.and_then(format_timestamp),
            deployment: meta.get("deployment").and_then(Value::as_str).map(str::to_string),
            has_indexing_errors: meta
                .get("hasIndexingErrors")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        info!("query cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn format_timestamp(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphscout_core::ResolutionSource;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DATASET: &str = "5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV";

    /// Returns a fixed answer and counts calls.
    struct CannedTransport {
        calls: Arc<AtomicUsize>,
        answer: Result<Value, String>,
    }

    #[async_trait]
    impl QueryTransport for CannedTransport {
        fn is_configured(&self) -> bool {
            true
        }

        async fn execute(
            &mut self,
            _dataset_id: &str,
            _request: &GraphRequest,
        ) -> Result<Map<String, Value>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Ok(v) => Ok(v.as_object().cloned().unwrap_or_default()),
                Err(msg) => Err(GatewayError::Query(msg.clone())),
            }
        }
    }

    fn engine(answer: Result<Value, String>, ttl: Duration) -> (QueryEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = CannedTransport {
            calls: calls.clone(),
            answer,
        };
        let cache = CacheSettings {
            ttl,
            ..Default::default()
        };
        (
            QueryEngine::new(Box::new(transport), QueryBuilder::new(None), &cache),
            calls,
        )
    }

    fn context(question: &str) -> QueryContext {
        QueryContext {
            user_query: question.into(),
            protocol: "uniswap".into(),
            network: "ethereum".into(),
            version: Some("v3".into()),
            dataset_id: DATASET.into(),
            confidence: 0.8,
            source: ResolutionSource::Registry,
        }
    }

    #[tokio::test]
    async fn repeated_query_within_ttl_hits_transport_once() {
        let (mut engine, calls) = engine(Ok(json!({"pools": []})), Duration::from_secs(300));
        // Empty lists still make a non-empty data object.
        let a = engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), true).await;
        let b = engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), true).await;
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.cache_stats().entries, 1);

        engine.clear_cache();
        engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_call_transport_again() {
        let (mut engine, calls) = engine(Ok(json!({"pools": []})), Duration::ZERO);
        engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), true).await;
        engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_can_be_bypassed() {
        let (mut engine, calls) = engine(Ok(json!({"pools": []})), Duration::from_secs(300));
        engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), false).await;
        engine.execute_query(DATASET, "{ pools { id } }", &Map::new(), false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn rejected_document_surfaces_transport_message() {
        let (mut engine, _) = engine(
            Err("Type `Query` has no field `pols`".into()),
            Duration::from_secs(300),
        );
        let result = engine.execute_natural_language_query(&context("top pools")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("has no field `pols`"));
        assert!(result.formatted.is_empty());
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn fallback_plan_result_is_rendered() {
        let data = json!({"pools": [{"id": "0xabc", "token0": {"symbol": "USDC"}, "token1": {"symbol": "WETH"},
                                      "totalValueLockedUSD": "1500000"}]});
        let (mut engine, _) = engine(Ok(data), Duration::from_secs(300));
        let result = engine.execute_natural_language_query(&context("top pools by tvl")).await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.formatted.contains("USDC/WETH pool"));
        let trace = result.context.unwrap();
        assert_eq!(trace.dataset_id, DATASET);
        assert!(!trace.query_document.is_empty());
    }

    #[tokio::test]
    async fn empty_data_is_a_failure() {
        let (mut engine, _) = engine(Ok(json!({})), Duration::from_secs(300));
        let result = engine.execute_natural_language_query(&context("top pools")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("gateway returned no data"));
    }

    #[tokio::test]
    async fn context_is_stamped() {
        let (mut engine, _) = engine(Ok(json!({"tokens": []})), Duration::from_secs(300));
        let ctx = json!({"caller": "test"}).as_object().cloned().unwrap();
        let result = engine
            .execute_with_context(DATASET, "{ tokens { id } }", &Map::new(), ctx)
            .await;
        assert!(result.success);
        assert_eq!(result.context["caller"], "test");
        assert_eq!(result.context["dataset_id"], DATASET);
        assert!(result.context["executed_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn metadata_and_connection_probe() {
        let meta = json!({"_meta": {
            "block": {"number": 19000000, "hash": "0xfeed", "timestamp": 1700000000},
            "deployment": "QmDeployment",
            "hasIndexingErrors": false
        }});
        let (mut engine, calls) = engine(Ok(meta), Duration::from_secs(300));
        assert!(engine.test_connection(DATASET).await);

        let metadata = engine.get_subgraph_metadata(DATASET).await.unwrap();
        assert_eq!(metadata.block_number, Some(19_000_000));
        assert_eq!(metadata.block_hash.as_deref(), Some("0xfeed"));
        assert_eq!(metadata.formatted_time.as_deref(), Some("2023-11-14 22:13:20 UTC"));
        assert_eq!(metadata.deployment.as_deref(), Some("QmDeployment"));
        assert!(!metadata.has_indexing_errors);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_probe_is_false() {
        let (mut engine, _) = engine(Err("auth error: invalid API key".into()), Duration::from_secs(300));
        assert!(!engine.test_connection(DATASET).await);
        assert!(engine.get_subgraph_metadata(DATASET).await.is_none());
    }
}
