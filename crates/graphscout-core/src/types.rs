//! Shared pipeline types passed between the analyzer, registry, builder and engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A protocol reference extracted from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMention {
    pub protocol_id: String,
    pub network_id: String,
    pub version: Option<String>,
    /// Clamped to `[0, 1]`.
    pub confidence: f64,
}

impl ProtocolMention {
    pub fn new(
        protocol_id: impl Into<String>,
        network_id: impl Into<String>,
        version: Option<String>,
        confidence: f64,
    ) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            network_id: network_id.into(),
            version,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Output of protocol analysis: ordered, deduplicated mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub mentions: Vec<ProtocolMention>,
    pub raw_query: String,
    pub overall_confidence: f64,
}

impl AnalysisResult {
    /// Build a result, dropping later mentions of an already-seen protocol and
    /// averaging the remaining confidences.
    pub fn from_mentions(raw_query: &str, mentions: Vec<ProtocolMention>) -> Self {
        let mentions = dedup_by_protocol(mentions);
        let overall_confidence = mean_confidence(&mentions);
        Self {
            mentions,
            raw_query: raw_query.to_string(),
            overall_confidence,
        }
    }

    pub fn empty(raw_query: &str) -> Self {
        Self::from_mentions(raw_query, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }
}

fn dedup_by_protocol(mentions: Vec<ProtocolMention>) -> Vec<ProtocolMention> {
    let mut out: Vec<ProtocolMention> = Vec::with_capacity(mentions.len());
    for m in mentions {
        if !out.iter().any(|seen| seen.protocol_id == m.protocol_id) {
            out.push(m);
        }
    }
    out
}

/// Mean of per-mention confidences, `0.0` for an empty slice.
pub fn mean_confidence(mentions: &[ProtocolMention]) -> f64 {
    if mentions.is_empty() {
        return 0.0;
    }
    mentions.iter().map(|m| m.confidence).sum::<f64>() / mentions.len() as f64
}

/// Indexing health of a dataset as last observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Syncing,
    Unhealthy,
}

impl HealthStatus {
    pub const ALL: [HealthStatus; 4] = [
        HealthStatus::Unknown,
        HealthStatus::Healthy,
        HealthStatus::Syncing,
        HealthStatus::Unhealthy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Syncing => "syncing",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Health implied by a discovery sync flag.
    pub fn from_synced(synced: bool) -> Self {
        if synced { Self::Healthy } else { Self::Syncing }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol metadata handed to the query builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolContext {
    /// Display name, e.g. `Uniswap Protocol`.
    pub name: String,
    pub network: String,
    pub description: String,
    pub entities: Vec<String>,
    pub categories: Vec<String>,
}

impl ProtocolContext {
    /// Context derived from a resolved (protocol, network) pair.
    pub fn for_protocol(protocol: &str, network: &str) -> Self {
        let name = title_case(protocol);
        Self {
            name: format!("{name} Protocol"),
            network: network.to_string(),
            description: format!("{name} Protocol on {}", title_case(network)),
            entities: Vec::new(),
            categories: vec!["DeFi".to_string()],
        }
    }
}

/// A structured query ready for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub query_document: String,
    pub variables: Map<String, Value>,
    pub explanation: String,
}

impl QueryPlan {
    pub fn new(
        query_document: impl Into<String>,
        variables: Map<String, Value>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            query_document: query_document.into(),
            variables,
            explanation: explanation.into(),
        }
    }
}

/// Where a dataset id for a mention came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Registry,
    Discovery,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Discovery => "discovery",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mention that has been resolved to an addressable dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub user_query: String,
    pub protocol: String,
    pub network: String,
    pub version: Option<String>,
    pub dataset_id: String,
    pub confidence: f64,
    pub source: ResolutionSource,
}

/// What was actually run for a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub explanation: String,
    pub query_document: String,
    pub variables: Map<String, Value>,
    pub dataset_id: String,
    pub protocol: String,
    pub network: String,
}

/// Outcome of one natural-language execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub formatted: String,
    pub context: Option<ExecutionTrace>,
}

impl ExecutionResult {
    pub fn succeeded(data: Map<String, Value>, formatted: String, context: ExecutionTrace) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            formatted,
            context: Some(context),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            formatted: String::new(),
            context: None,
        }
    }
}

/// Uppercase the first letter of each `-`/`_`/space separated word.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = true;
    for c in s.chars() {
        if c == ' ' || c == '-' || c == '_' {
            upper_next = true;
            out.push(c);
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
