//! Dataset discovery through the network's meta-index dataset.
//!
//! Two strategies run in order: a display-name search for the protocol (and
//! its versioned spellings), then a scan of the highest-signal datasets
//! matching on name or description. Candidates whose indexer reports
//! `failed` health are never returned.

use graphscout_core::aliases::canonical_network;
use graphscout_core::types::title_case;
use graphscout_core::HealthStatus;
use graphscout_store::{DatasetRegistry, NewDataset};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::transport::{GraphRequest, QueryTransport};
use crate::GatewayError;

/// 1000 GRT expressed in wei.
pub const MIN_SIGNAL_WEI: &str = "1000000000000000000000";

const WEI_PER_GRT: f64 = 1e18;

const SEARCH_QUERY: &str = r#"
query SearchSubgraphs($text: String!) {
  subgraphs(
    where: { displayName_contains_nocase: $text, active: true }
    first: 10
    orderBy: currentSignalledTokens
    orderDirection: desc
  ) {
    id
    displayName
    description
    currentSignalledTokens
    currentVersion {
      subgraphDeployment {
        manifest { network description }
        indexingStatus { synced health }
      }
    }
  }
}
"#;

const HIGH_SIGNAL_QUERY: &str = r#"
query HighSignalSubgraphs($minSignal: String!) {
  subgraphs(
    first: 50
    orderBy: currentSignalledTokens
    orderDirection: desc
    where: { currentSignalledTokens_gt: $minSignal, active: true }
  ) {
    id
    displayName
    description
    currentSignalledTokens
    currentVersion {
      subgraphDeployment {
        manifest { network description }
        indexingStatus { synced health }
      }
    }
  }
}
"#;

const DETAILS_QUERY: &str = r#"
query GetSubgraphDetails($id: ID!) {
  subgraph(id: $id) {
    id
    displayName
    description
    currentSignalledTokens
    currentVersion {
      subgraphDeployment {
        manifest { network }
        indexingStatus { synced health }
      }
    }
  }
}
"#;

/// A dataset found by a meta-index search.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryCandidate {
    pub dataset_id: String,
    pub display_name: String,
    pub network_id: String,
    /// Curation signal in GRT.
    pub signal_score: f64,
    pub is_synced: bool,
    pub description: String,
}

/// Descriptive metadata for one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDetails {
    pub display_name: String,
    pub description: String,
    pub network_id: String,
    pub is_synced: bool,
    pub health: String,
    pub signal_score: f64,
}

// Wire shapes. Every field is optional; the meta-index omits what it lacks.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MetaSubgraph {
    id: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    current_signalled_tokens: Option<Value>,
    current_version: Option<MetaVersion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MetaVersion {
    subgraph_deployment: Option<MetaDeployment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MetaDeployment {
    manifest: Option<MetaManifest>,
    indexing_status: Option<MetaIndexingStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaManifest {
    network: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaIndexingStatus {
    synced: Option<bool>,
    health: Option<String>,
}

impl MetaSubgraph {
    fn deployment(&self) -> Option<&MetaDeployment> {
        self.current_version.as_ref()?.subgraph_deployment.as_ref()
    }

    fn signal_score(&self) -> f64 {
        let wei = match &self.current_signalled_tokens {
            Some(Value::String(s)) => s.parse::<f64>().unwrap_or(0.0),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        };
        wei / WEI_PER_GRT
    }

    /// Convert to a candidate. Datasets without a deployment or with failed
    /// indexing are dropped.
    fn into_candidate(self) -> Option<DiscoveryCandidate> {
        let signal_score = self.signal_score();
        let deployment = self.deployment()?;
        let status = deployment.indexing_status.as_ref();
        if status.and_then(|s| s.health.as_deref()) == Some("failed") {
            return None;
        }
        let manifest = deployment.manifest.as_ref();
        let is_synced = status.and_then(|s| s.synced).unwrap_or(false);
        let network_id = manifest
            .and_then(|m| m.network.clone())
            .unwrap_or_else(|| "unknown".into());
        let description = manifest
            .and_then(|m| m.description.clone())
            .or_else(|| self.description.clone())
            .unwrap_or_default();

        Some(DiscoveryCandidate {
            dataset_id: self.id.filter(|id| !id.is_empty())?,
            display_name: self.display_name.unwrap_or_else(|| "Unknown".into()),
            network_id,
            signal_score,
            is_synced,
            description,
        })
    }
}

/// Manifests name chains their own way (`mainnet`, `arbitrum-one`); compare canonical ids.
fn same_network(manifest: &str, wanted: &str) -> bool {
    canonical_network(manifest) == canonical_network(wanted)
}

fn parse_candidates(data: Map<String, Value>) -> Vec<DiscoveryCandidate> {
    let Some(Value::Array(items)) = data.get("subgraphs") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<MetaSubgraph>(item.clone()) {
            Ok(sg) => sg.into_candidate(),
            Err(e) => {
                debug!(error = %e, "skipping unreadable meta-index entry");
                None
            }
        })
        .collect()
}

/// Meta-index search for datasets the registry does not know yet.
pub struct DatasetDiscovery {
    transport: Box<dyn QueryTransport>,
    meta_index_id: String,
}

impl DatasetDiscovery {
    pub fn new(transport: Box<dyn QueryTransport>, meta_index_id: impl Into<String>) -> Self {
        Self {
            transport,
            meta_index_id: meta_index_id.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_configured()
    }

    /// Dataset id for `protocol` on `network`, or `None` when nothing qualifies.
    ///
    /// Without gateway credentials this returns `None` without any network call.
    pub async fn find(&mut self, protocol: &str, network: &str, version: Option<&str>) -> Option<String> {
        self.find_candidate(protocol, network, version)
            .await
            .map(|c| c.dataset_id)
    }

    /// Like [`find`](Self::find) but returns the whole candidate.
    pub async fn find_candidate(
        &mut self,
        protocol: &str,
        network: &str,
        version: Option<&str>,
    ) -> Option<DiscoveryCandidate> {
        if !self.is_enabled() {
            error!(protocol = %protocol, "discovery disabled: gateway credential missing");
            return None;
        }
        info!(protocol = %protocol, network = %network, version = ?version, "searching meta-index");

        if let Some(hit) = self.search_by_name(protocol, network, version).await {
            info!(dataset_id = %hit.dataset_id, name = %hit.display_name, "found dataset by name");
            return Some(hit);
        }
        if let Some(hit) = self.search_by_signal(protocol, network).await {
            info!(dataset_id = %hit.dataset_id, name = %hit.display_name, "found dataset by signal");
            return Some(hit);
        }
        warn!(protocol = %protocol, network = %network, "no dataset discovered");
        None
    }

    async fn search_by_name(
        &mut self,
        protocol: &str,
        network: &str,
        version: Option<&str>,
    ) -> Option<DiscoveryCandidate> {
        let protocol_lc = protocol.to_lowercase();
        let mut terms = vec![protocol.to_string()];
        if let Some(v) = version {
            terms.push(format!("{protocol} {v}"));
            terms.push(format!("{protocol}{v}"));
        }

        for term in terms {
            debug!(term = %term, "meta-index name search");
            let request = GraphRequest::new(SEARCH_QUERY).var("text", term.as_str());
            let candidates = match self.run(&request).await {
                Ok(data) => parse_candidates(data),
                Err(e) => {
                    error!(term = %term, error = %e, "meta-index name search failed");
                    continue;
                }
            };
            if let Some(hit) = candidates.into_iter().find(|c| {
                same_network(&c.network_id, network)
                    && c.display_name.to_lowercase().contains(&protocol_lc)
            }) {
                return Some(hit);
            }
        }
        None
    }

    async fn search_by_signal(&mut self, protocol: &str, network: &str) -> Option<DiscoveryCandidate> {
        let protocol_lc = protocol.to_lowercase();
        let request = GraphRequest::new(HIGH_SIGNAL_QUERY).var("minSignal", MIN_SIGNAL_WEI);
        let candidates = match self.run(&request).await {
            Ok(data) => parse_candidates(data),
            Err(e) => {
                error!(error = %e, "meta-index signal search failed");
                return None;
            }
        };
        candidates.into_iter().find(|c| {
            same_network(&c.network_id, network)
                && (c.display_name.to_lowercase().contains(&protocol_lc)
                    || c.description.to_lowercase().contains(&protocol_lc))
        })
    }

    /// Descriptive metadata for `dataset_id`, `None` on any failure.
    pub async fn details(&mut self, dataset_id: &str) -> Option<DatasetDetails> {
        if !self.is_enabled() {
            return None;
        }
        let request = GraphRequest::new(DETAILS_QUERY).var("id", dataset_id);
        let data = match self.run(&request).await {
            Ok(data) => data,
            Err(e) => {
                error!(dataset_id = %dataset_id, error = %e, "failed to fetch dataset details");
                return None;
            }
        };
        let raw = data.get("subgraph").filter(|v| !v.is_null())?;
        let sg: MetaSubgraph = serde_json::from_value(raw.clone()).ok()?;

        let signal_score = sg.signal_score();
        let deployment = sg.deployment();
        let status = deployment.and_then(|d| d.indexing_status.as_ref());
        Some(DatasetDetails {
            display_name: sg.display_name.clone().unwrap_or_else(|| "Unknown".into()),
            description: sg.description.clone().unwrap_or_default(),
            network_id: deployment
                .and_then(|d| d.manifest.as_ref())
                .and_then(|m| m.network.clone())
                .unwrap_or_else(|| "unknown".into()),
            is_synced: status.and_then(|s| s.synced).unwrap_or(false),
            health: status
                .and_then(|s| s.health.clone())
                .unwrap_or_else(|| "unknown".into()),
            signal_score,
        })
    }

    /// Discover a dataset and record it in `registry`.
    ///
    /// The id is returned even when the registry write fails.
    pub async fn search_and_add_to_registry(
        &mut self,
        protocol: &str,
        network: &str,
        registry: &mut DatasetRegistry,
        version: Option<&str>,
    ) -> Option<String> {
        let candidate = self.find_candidate(protocol, network, version).await?;
        let dataset_id = candidate.dataset_id.clone();

        let (display_name, synced) = match self.details(&dataset_id).await {
            Some(details) => (details.display_name, details.is_synced),
            None => (candidate.display_name, candidate.is_synced),
        };
        let display_name = if display_name.is_empty() || display_name == "Unknown" {
            format!("{} on {}", title_case(protocol), title_case(network))
        } else {
            display_name
        };

        let entry = NewDataset::new(protocol, network, dataset_id.as_str(), display_name)
            .version(version)
            .health(HealthStatus::from_synced(synced));
        if registry.add(entry) {
            info!(protocol = %protocol, network = %network, dataset_id = %dataset_id, "registered discovered dataset");
        } else {
            error!(protocol = %protocol, network = %network, "failed to register discovered dataset");
        }
        Some(dataset_id)
    }

    async fn run(&mut self, request: &GraphRequest) -> Result<Map<String, Value>, GatewayError> {
        self.transport.execute(&self.meta_index_id, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphscout_core::config::META_INDEX_DATASET_ID;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const CURVE_ID: &str = "3fy93eAT56UJsRCEht8iFhfi6wjHWXtZ9dnnbQmvFopF";

    /// Answers each meta-index query kind with a canned `data` object.
    struct FakeMetaIndex {
        configured: bool,
        calls: Arc<AtomicUsize>,
        search: Value,
        signal: Value,
        details: Value,
    }

    impl FakeMetaIndex {
        fn new(search: Value, signal: Value, details: Value) -> Self {
            Self {
                configured: true,
                calls: Arc::new(AtomicUsize::new(0)),
                search,
                signal,
                details,
            }
        }
    }

    #[async_trait]
    impl QueryTransport for FakeMetaIndex {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn execute(
            &mut self,
            dataset_id: &str,
            request: &GraphRequest,
        ) -> Result<Map<String, Value>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(dataset_id, META_INDEX_DATASET_ID);
            let data = if request.query.contains("SearchSubgraphs") {
                &self.search
            } else if request.query.contains("HighSignalSubgraphs") {
                &self.signal
            } else {
                &self.details
            };
            match data {
                Value::Object(map) => Ok(map.clone()),
                _ => Err(GatewayError::Status {
                    status: 500,
                    body: "meta-index unavailable".into(),
                }),
            }
        }
    }

    fn subgraph(id: &str, name: &str, network: &str, health: &str, synced: bool) -> Value {
        json!({
            "id": id,
            "displayName": name,
            "description": "",
            "currentSignalledTokens": "2500000000000000000000",
            "currentVersion": {"subgraphDeployment": {
                "manifest": {"network": network, "description": format!("{name} indexer")},
                "indexingStatus": {"synced": synced, "health": health}
            }}
        })
    }

    fn discovery(fake: FakeMetaIndex) -> DatasetDiscovery {
        DatasetDiscovery::new(Box::new(fake), META_INDEX_DATASET_ID)
    }

    #[tokio::test]
    async fn no_credential_means_no_calls() {
        let mut fake = FakeMetaIndex::new(Value::Null, Value::Null, Value::Null);
        fake.configured = false;
        let calls = fake.calls.clone();
        let mut discovery = discovery(fake);

        assert_eq!(discovery.find("uniswap", "ethereum", None).await, None);
        assert_eq!(discovery.details(CURVE_ID).await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn name_search_filters_network_and_failed_health() {
        let search = json!({"subgraphs": [
            subgraph("FailedCurveDatasetIdentifier00000000000000", "Curve", "mainnet", "failed", true),
            subgraph("PolygonCurveDatasetIdentifier0000000000000", "Curve Polygon", "matic", "healthy", true),
            subgraph(CURVE_ID, "Curve Finance", "mainnet", "healthy", true),
        ]});
        let mut discovery = discovery(FakeMetaIndex::new(search, Value::Null, Value::Null));
        assert_eq!(discovery.find("curve", "mainnet", None).await.as_deref(), Some(CURVE_ID));
    }

    #[tokio::test]
    async fn manifest_network_names_are_canonicalized() {
        let search = json!({"subgraphs": [subgraph(CURVE_ID, "Curve Finance", "mainnet", "healthy", true)]});
        let mut discovery = discovery(FakeMetaIndex::new(search, Value::Null, Value::Null));
        assert_eq!(discovery.find("curve", "ethereum", None).await.as_deref(), Some(CURVE_ID));
    }

    #[tokio::test]
    async fn arbitrum_one_manifest_matches_arbitrum() {
        let search = json!({"subgraphs": [subgraph(CURVE_ID, "Curve Finance", "arbitrum-one", "healthy", true)]});
        let mut discovery = discovery(FakeMetaIndex::new(search, Value::Null, Value::Null));
        assert_eq!(discovery.find("curve", "arbitrum", None).await.as_deref(), Some(CURVE_ID));
    }

    #[tokio::test]
    async fn signal_search_matches_description() {
        let search = json!({"subgraphs": []});
        let signal = json!({"subgraphs": [
            subgraph("OtherDatasetIdentifier000000000000000000000", "Messari Lending", "mainnet", "healthy", true),
            subgraph(CURVE_ID, "Stableswap Pools", "arbitrum-one", "healthy", false),
        ]});
        let mut fake = FakeMetaIndex::new(search, signal, Value::Null);
        fake.signal["subgraphs"][1]["currentVersion"]["subgraphDeployment"]["manifest"]["description"] =
            json!("Curve stableswap pools");
        let mut discovery = discovery(fake);

        let hit = discovery.find_candidate("curve", "arbitrum", None).await.unwrap();
        assert_eq!(hit.dataset_id, CURVE_ID);
        assert!(!hit.is_synced);
        assert!((hit.signal_score - 2500.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn versioned_search_tries_every_spelling() {
        let fake = FakeMetaIndex::new(json!({"subgraphs": []}), json!({"subgraphs": []}), Value::Null);
        let calls = fake.calls.clone();
        let mut discovery = discovery(fake);

        assert_eq!(discovery.find("balancer", "ethereum", Some("v2")).await, None);
        // Three name searches then one signal listing.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn transport_errors_degrade_to_none() {
        let mut discovery = discovery(FakeMetaIndex::new(Value::Null, Value::Null, Value::Null));
        assert_eq!(discovery.find("curve", "mainnet", None).await, None);
    }

    #[tokio::test]
    async fn search_and_add_registers_with_sync_health() {
        let search = json!({"subgraphs": [subgraph(CURVE_ID, "Curve Finance", "mainnet", "healthy", true)]});
        let details = json!({"subgraph": subgraph(CURVE_ID, "Curve Finance Mainnet", "mainnet", "healthy", false)});
        let mut discovery = discovery(FakeMetaIndex::new(search, Value::Null, details));

        let tmp = TempDir::new().unwrap();
        let mut registry = DatasetRegistry::open(tmp.path().join("registry.json"));
        let id = discovery
            .search_and_add_to_registry("curve", "mainnet", &mut registry, Some("v1"))
            .await;
        assert_eq!(id.as_deref(), Some(CURVE_ID));

        let record = registry.get("curve-mainnet-v1").unwrap();
        assert_eq!(record.display_name, "Curve Finance Mainnet");
        assert_eq!(record.health_status, HealthStatus::Syncing);
    }

    #[tokio::test]
    async fn search_and_add_returns_id_when_registry_write_fails() {
        let search = json!({"subgraphs": [subgraph(CURVE_ID, "Curve", "mainnet", "healthy", true)]});
        let mut discovery = discovery(FakeMetaIndex::new(search, Value::Null, Value::Null));

        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let mut registry = DatasetRegistry::open(blocker.join("registry.json"));

        let id = discovery
            .search_and_add_to_registry("curve", "mainnet", &mut registry, None)
            .await;
        assert_eq!(id.as_deref(), Some(CURVE_ID));
        assert_eq!(registry.get("curve-mainnet").unwrap().health_status, HealthStatus::Healthy);
    }
}
