//! Top-level entry: question → analysis → dataset resolution → execution → text.

use graphscout_ai::ProtocolAnalyzer;
use graphscout_core::config::is_valid_dataset_id;
use graphscout_core::types::title_case;
use graphscout_core::{
    AnalysisResult, ConfigError, GatewaySettings, ProtocolMention, QueryContext, ResolutionSource,
};
use graphscout_gateway::DatasetDiscovery;
use graphscout_store::{DatasetRegistry, NewDataset};
use tracing::{info, warn};

use crate::engine::QueryEngine;

/// Most queries accepted by [`Orchestrator::multi_query`].
pub const MAX_BATCH: usize = 5;

const RULE: &str = "==================================================";
const THIN_RULE: &str = "------------------------------";

/// Owns every pipeline stage. One question at a time.
pub struct Orchestrator {
    gateway: GatewaySettings,
    analyzer: ProtocolAnalyzer,
    registry: DatasetRegistry,
    discovery: DatasetDiscovery,
    engine: QueryEngine,
}

impl Orchestrator {
    pub fn new(
        gateway: GatewaySettings,
        analyzer: ProtocolAnalyzer,
        registry: DatasetRegistry,
        discovery: DatasetDiscovery,
        engine: QueryEngine,
    ) -> Self {
        Self {
            gateway,
            analyzer,
            registry,
            discovery,
            engine,
        }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    /// Answer `text` against every protocol it mentions.
    ///
    /// Only a missing gateway credential is an error; every other failure is
    /// rendered into the returned text.
    pub async fn query(&mut self, text: &str) -> Result<String, ConfigError> {
        self.gateway.require_credential()?;
        info!(query = %text, "answering question");

        let analysis = self.analyzer.analyze(text).await;
        if analysis.is_empty() {
            return Ok("No protocol recognized in the question.\n\
                       Name the protocol explicitly, e.g. Uniswap, Aave or Compound."
                .to_string());
        }
        info!(count = analysis.mentions.len(), "protocols identified");

        let mut resolved = Vec::with_capacity(analysis.mentions.len());
        for mention in &analysis.mentions {
            match self.resolve(mention).await {
                Some((dataset_id, source)) => {
                    info!(protocol = %mention.protocol_id, dataset_id = %dataset_id, source = %source, "dataset resolved");
                    resolved.push(QueryContext {
                        user_query: text.to_string(),
                        protocol: mention.protocol_id.clone(),
                        network: mention.network_id.clone(),
                        version: mention.version.clone(),
                        dataset_id,
                        confidence: mention.confidence,
                        source,
                    });
                }
                None => {
                    warn!(protocol = %mention.protocol_id, network = %mention.network_id, "no dataset found, skipping")
                }
            }
        }

        match resolved.as_slice() {
            [] => Ok("No usable dataset found for the protocols mentioned.\n\
                      Check the protocol and network names."
                .to_string()),
            [single] => Ok(self.single_protocol(single).await),
            many => Ok(self.compare_protocols(many).await),
        }
    }

    /// Registry first, then meta-index discovery (which records what it finds).
    async fn resolve(&mut self, mention: &ProtocolMention) -> Option<(String, ResolutionSource)> {
        let version = mention.version.as_deref();
        if let Some(id) = self
            .registry
            .find(&mention.protocol_id, &mention.network_id, version)
        {
            return Some((id, ResolutionSource::Registry));
        }
        info!(protocol = %mention.protocol_id, network = %mention.network_id, "registry miss, trying discovery");
        self.discovery
            .search_and_add_to_registry(
                &mention.protocol_id,
                &mention.network_id,
                &mut self.registry,
                version,
            )
            .await
            .map(|id| (id, ResolutionSource::Discovery))
    }

    async fn single_protocol(&mut self, ctx: &QueryContext) -> String {
        let result = self.engine.execute_natural_language_query(ctx).await;
        if !result.success {
            return format!(
                "Query failed: {}\nTry rephrasing the question more explicitly.",
                result.error.unwrap_or_else(|| "unknown error".into())
            );
        }
        [
            "Query succeeded".to_string(),
            format!("Protocol: {}", title_case(&ctx.protocol)),
            format!("Network: {}", title_case(&ctx.network)),
            format!("Dataset: {}", short_id(&ctx.dataset_id)),
            format!("Source: {}", ctx.source),
            format!("Confidence: {:.2}", ctx.confidence),
            String::new(),
            "Results:".to_string(),
            result.formatted,
        ]
        .join("\n")
    }

    async fn compare_protocols(&mut self, contexts: &[QueryContext]) -> String {
        let mut out = vec![
            format!("Multi-protocol query ({} protocols)", contexts.len()),
            RULE.to_string(),
        ];
        for (i, ctx) in contexts.iter().enumerate() {
            out.push(format!(
                "\n{}. {} on {}",
                i + 1,
                ctx.protocol.to_uppercase(),
                title_case(&ctx.network)
            ));
            out.push(THIN_RULE.to_string());
            let result = self.engine.execute_natural_language_query(ctx).await;
            if result.success {
                out.push(format!("Query succeeded (source: {})", ctx.source));
                out.push(result.formatted);
            } else {
                out.push(format!(
                    "Query failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".into())
                ));
            }
        }
        out.join("\n")
    }

    /// Run up to [`MAX_BATCH`] `;`-separated questions through [`query`](Self::query).
    pub async fn multi_query(&mut self, text: &str) -> Result<String, ConfigError> {
        self.gateway.require_credential()?;
        let queries: Vec<&str> = text.split(';').map(str::trim).filter(|q| !q.is_empty()).collect();
        if queries.is_empty() {
            return Ok("No queries given. Separate questions with ';'.".to_string());
        }
        if queries.len() > MAX_BATCH {
            return Ok(format!(
                "At most {MAX_BATCH} queries per batch, got {}.",
                queries.len()
            ));
        }
        info!(count = queries.len(), "batch query");

        let mut out = vec![format!("Batch query ({} queries)", queries.len()), RULE.to_string()];
        for (i, q) in queries.iter().enumerate() {
            out.push(format!("\nQuery {}: {q}", i + 1));
            out.push(THIN_RULE.to_string());
            out.push(self.query(q).await?);
        }
        Ok(out.join("\n"))
    }

    /// Walk through what [`query`](Self::query) would do without running any
    /// dataset query. Discovery hits are not recorded.
    pub async fn explain(&mut self, text: &str) -> Result<String, ConfigError> {
        self.gateway.require_credential()?;
        let mut out = vec![format!("Query explanation: {text}"), RULE.to_string()];

        out.push("\n1. Protocol analysis:".to_string());
        let analysis = self.analyzer.analyze(text).await;
        if analysis.is_empty() {
            out.push("  No protocol recognized".to_string());
            return Ok(out.join("\n"));
        }
        render_analysis(&analysis, &mut out);

        out.push("\n2. Dataset resolution:".to_string());
        let mut found = 0;
        for m in &analysis.mentions {
            out.push(format!("  {} on {}:", m.protocol_id, m.network_id));
            let version = m.version.as_deref();
            if let Some(id) = self.registry.find(&m.protocol_id, &m.network_id, version) {
                out.push(format!("    registry: {}", short_id(&id)));
                found += 1;
                continue;
            }
            out.push("    registry: not found".to_string());
            if !self.discovery.is_enabled() {
                out.push("    discovery: unavailable (no gateway credential)".to_string());
                continue;
            }
            match self.discovery.find(&m.protocol_id, &m.network_id, version).await {
                Some(id) => {
                    out.push(format!("    discovery: {}", short_id(&id)));
                    found += 1;
                }
                None => out.push("    discovery: nothing found".to_string()),
            }
        }

        out.push("\n3. Execution plan:".to_string());
        if found > 0 {
            out.push(format!("  Query {found} dataset(s)"));
            out.push("  Build a GraphQL plan per dataset (model, else keyword fallback)".to_string());
            out.push("  Execute against the gateway and render the results".to_string());
        } else {
            out.push("  No usable dataset, nothing to execute".to_string());
        }

        out.push("\n4. System status:".to_string());
        let stats = self.registry.get_statistics();
        out.push(format!("  Known datasets: {}", stats.total_records));
        out.push(format!("  Protocols: {}", join_or_none(stats.protocols.keys())));
        out.push(format!("  Networks: {}", join_or_none(stats.networks.keys())));
        out.push(format!("  Gateway key: {}", yes_no(self.gateway.credential().is_some())));
        out.push(format!(
            "  Analyzer: {}",
            if self.analyzer.has_model() { "model" } else { "rules only" }
        ));
        out.push(format!("  Discovery: {}", available(self.discovery.is_enabled())));
        Ok(out.join("\n"))
    }

    /// Rendered registry statistics.
    pub fn registry_stats(&self) -> String {
        let stats = self.registry.get_statistics();
        let mut out = vec![
            "Registry statistics".to_string(),
            THIN_RULE.to_string(),
            format!("Datasets: {}", stats.total_records),
            format!("Gateway key: {}", yes_no(self.gateway.credential().is_some())),
        ];
        if !stats.protocols.is_empty() {
            out.push("\nProtocols:".to_string());
            out.extend(stats.protocols.iter().map(|(p, n)| format!("   {p}: {n}")));
        }
        if !stats.networks.is_empty() {
            out.push("\nNetworks:".to_string());
            out.extend(stats.networks.iter().map(|(n, c)| format!("   {n}: {c}")));
        }
        out.push("\nHealth:".to_string());
        out.extend(stats.health.iter().map(|(h, c)| format!("   {h}: {c}")));
        let used: Vec<_> = stats.most_used.iter().filter(|u| u.query_count > 0).take(3).collect();
        if !used.is_empty() {
            out.push("\nMost used:".to_string());
            out.extend(used.iter().map(|u| format!("   {}: {} queries", u.key, u.query_count)));
        }
        out.join("\n")
    }

    /// Record a dataset by hand. `name` defaults to `Protocol on Network`.
    pub fn add_known_dataset(
        &mut self,
        protocol: &str,
        network: &str,
        dataset_id: &str,
        name: Option<&str>,
    ) -> String {
        if !is_valid_dataset_id(dataset_id) {
            return format!("Not a valid dataset id: {dataset_id}");
        }
        let name = name
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} on {}", title_case(protocol), title_case(network)));
        if self
            .registry
            .add(NewDataset::new(protocol, network, dataset_id, name))
        {
            format!(
                "Added dataset {}-{} -> {dataset_id}",
                protocol.trim().to_lowercase(),
                network.trim().to_lowercase()
            )
        } else {
            format!("Failed to add dataset {protocol}-{network}")
        }
    }

    /// Rendered indexing head of `dataset_id`.
    pub async fn dataset_status(&mut self, dataset_id: &str) -> Result<String, ConfigError> {
        self.gateway.require_credential()?;
        if !is_valid_dataset_id(dataset_id) {
            return Ok(format!("Not a valid dataset id: {dataset_id}"));
        }
        let Some(meta) = self.engine.get_subgraph_metadata(dataset_id).await else {
            return Ok(format!("No metadata available for {}", short_id(dataset_id)));
        };
        let mut out = vec![format!("Dataset {dataset_id}")];
        if let Some(n) = meta.block_number {
            out.push(format!("   Block: {n}"));
        }
        if let Some(hash) = &meta.block_hash {
            out.push(format!("   Block hash: {hash}"));
        }
        if let Some(t) = &meta.formatted_time {
            out.push(format!("   Block time: {t}"));
        }
        if let Some(d) = &meta.deployment {
            out.push(format!("   Deployment: {d}"));
        }
        out.push(format!("   Indexing errors: {}", yes_no(meta.has_indexing_errors)));
        Ok(out.join("\n"))
    }
}

fn render_analysis(analysis: &AnalysisResult, out: &mut Vec<String>) {
    out.push(format!("  {} protocol(s) identified", analysis.mentions.len()));
    for (i, m) in analysis.mentions.iter().enumerate() {
        out.push(format!("    {}. {}", i + 1, m.protocol_id));
        out.push(format!("       network: {}", m.network_id));
        out.push(format!("       version: {}", m.version.as_deref().unwrap_or("unspecified")));
        out.push(format!("       confidence: {:.2}", m.confidence));
    }
    out.push(format!("  Overall confidence: {:.2}", analysis.overall_confidence));
}

fn short_id(id: &str) -> String {
    let prefix: String = id.chars().take(16).collect();
    if prefix.len() < id.len() {
        format!("{prefix}...")
    } else {
        prefix
    }
}

fn join_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let joined = items.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() { "none".to_string() } else { joined }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn available(flag: bool) -> &'static str {
    if flag { "available" } else { "unavailable" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_ids_are_shortened() {
        assert_eq!(
            short_id("5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV"),
            "5zvR82QoaXYFyDEK..."
        );
        assert_eq!(short_id("ID123"), "ID123");
    }

    #[test]
    fn empty_lists_render_none() {
        assert_eq!(join_or_none(Vec::<String>::new().iter()), "none");
        let items = vec!["aave".to_string(), "uniswap".to_string()];
        assert_eq!(join_or_none(items.iter()), "aave, uniswap");
    }
}
