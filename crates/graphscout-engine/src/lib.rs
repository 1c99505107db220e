//! Execution layer: the cached query engine and the end-to-end orchestrator.

mod error;
pub mod cache;
pub mod engine;
pub mod orchestrator;

pub use cache::{CacheStats, QueryCache};
pub use engine::{ContextualResult, DatasetMetadata, QueryEngine};
pub use error::SetupError;
pub use orchestrator::{MAX_BATCH, Orchestrator};

use graphscout_ai::{ProtocolAnalyzer, QueryBuilder, llm};
use graphscout_core::Settings;
use graphscout_gateway::{DatasetDiscovery, GatewayClient};
use graphscout_store::DatasetRegistry;
use tracing::info;

/// Wire every stage from `settings`: one gateway client each for discovery and
/// execution, one shared model for analysis and plan building.
pub fn build_orchestrator(settings: &Settings) -> Result<Orchestrator, SetupError> {
    let model = llm::from_settings(&settings.llm)?;
    let registry = DatasetRegistry::open(settings.cache.registry_path());
    info!(path = %registry.path().display(), records = registry.len(), "registry loaded");

    let discovery = DatasetDiscovery::new(
        Box::new(GatewayClient::new(&settings.gateway)?),
        settings.gateway.meta_index_id.clone(),
    );
    let engine = QueryEngine::new(
        Box::new(GatewayClient::new(&settings.gateway)?),
        QueryBuilder::new(model.clone()),
        &settings.cache,
    );
    Ok(Orchestrator::new(
        settings.gateway.clone(),
        ProtocolAnalyzer::new(model),
        registry,
        discovery,
        engine,
    ))
}
