//! Free text → protocol mentions.
//!
//! The model path asks for a JSON list of `{protocol, network, version,
//! confidence}`; anything that goes wrong there drops to the rule path, which
//! scans the alias tables and a handful of domain keywords.

use std::sync::{Arc, LazyLock};

use graphscout_core::aliases::{
    DEFAULT_NETWORK, NETWORK_ALIASES, PROTOCOL_ALIASES, canonical_network, canonical_protocol, scan,
};
use graphscout_core::{AnalysisResult, ProtocolMention};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{Completion, GenerateRequest};
use crate::parse::extract_json;

/// Confidence given to a protocol named in the text.
pub const ALIAS_CONFIDENCE: f64 = 0.8;
/// Confidence given to protocols inferred from domain keywords.
pub const KEYWORD_CONFIDENCE: f64 = 0.5;
/// Confidence assumed when the model omits one.
const MODEL_DEFAULT_CONFIDENCE: f64 = 0.5;

const DEX_KEYWORDS: &[&str] = &["dex", "swap", "pool", "liquidity", "amm"];
const DEX_DEFAULTS: &[&str] = &["uniswap", "sushiswap"];
const LENDING_KEYWORDS: &[&str] = &["lend", "borrow", "deposit", "供应", "借贷"];
const LENDING_DEFAULTS: &[&str] = &["aave", "compound"];

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\b|uni)v(\d+)\b").expect("valid regex"));

const ANALYSIS_PROMPT: &str = "\
Identify every DeFi protocol referenced by the user's question about on-chain data.

Respond ONLY with a JSON object, no explanation:
{
  \"protocols\": [
    {
      \"protocol\": \"canonical protocol id, e.g. uniswap, aave, compound\",
      \"network\": \"network id, e.g. ethereum, polygon, arbitrum\",
      \"version\": \"v2, v3, ... or null when no version is stated\",
      \"confidence\": 0.95
    }
  ],
  \"overall_confidence\": 0.9
}

Rules:
1. Protocol ids are lowercase canonical names: uniswap, aave, compound, curve, sushiswap, balancer.
2. Network ids are lowercase: ethereum, polygon, arbitrum, optimism, bsc, avalanche.
3. List every protocol the question involves.
4. Use ethereum when no network is stated.
5. Only fill version when the question states one.

Examples:
- \"Compare Uniswap and SushiSwap liquidity\" -> two protocols
- \"Aave V3 data on Polygon\" -> one protocol with version and network
- \"All DEX protocol data\" -> several DEX protocols";

pub struct ProtocolAnalyzer {
    llm: Option<Arc<dyn Completion>>,
}

impl ProtocolAnalyzer {
    pub fn new(llm: Option<Arc<dyn Completion>>) -> Self {
        Self { llm }
    }

    /// Rules only, no model.
    pub fn rule_based() -> Self {
        Self { llm: None }
    }

    /// Whether a generative model backs the analysis.
    pub fn has_model(&self) -> bool {
        self.llm.is_some()
    }

    /// Extract protocol mentions from `query`. Never fails.
    pub async fn analyze(&self, query: &str) -> AnalysisResult {
        info!(query = %query, "analyzing query");
        if let Some(llm) = &self.llm {
            match self.model_analyze(llm.as_ref(), query).await {
                Ok(result) if !result.is_empty() => return result,
                Ok(_) => debug!("model found no protocols, using rules"),
                Err(reason) => warn!(reason = %reason, "model analysis failed, using rules"),
            }
        }
        rule_based_analyze(query)
    }

    /// The single highest-confidence mention, earliest on ties.
    pub async fn extract_single_protocol(&self, query: &str) -> Option<ProtocolMention> {
        let result = self.analyze(query).await;
        result.mentions.into_iter().reduce(|best, m| {
            if m.confidence > best.confidence { m } else { best }
        })
    }

    async fn model_analyze(&self, llm: &dyn Completion, query: &str) -> Result<AnalysisResult, String> {
        let request = GenerateRequest {
            system_prompt: Some(ANALYSIS_PROMPT.to_string()),
            user_prompt: format!("Question: \"{query}\""),
            max_tokens: 500,
            temperature: 0.1,
        };
        let text = llm.complete(&request).await.map_err(|e| e.to_string())?;
        let json = extract_json(&text).map_err(|e| e.to_string())?;
        Ok(mentions_from_json(&json, query))
    }
}

fn mentions_from_json(json: &Value, query: &str) -> AnalysisResult {
    let mentions = json
        .get("protocols")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(mention_from_json).collect())
        .unwrap_or_default();
    AnalysisResult::from_mentions(query, mentions)
}

fn mention_from_json(item: &Value) -> Option<ProtocolMention> {
    let protocol = item.get("protocol").and_then(Value::as_str)?;
    let protocol = canonical_protocol(protocol);
    if protocol.is_empty() {
        return None;
    }
    let network = item
        .get("network")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .map(canonical_network)
        .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
    let version = item
        .get("version")
        .and_then(Value::as_str)
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty() && v != "null");
    let confidence = item
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(MODEL_DEFAULT_CONFIDENCE);
    Some(ProtocolMention::new(protocol, network, version, confidence))
}

/// Alias- and keyword-driven analysis.
pub fn rule_based_analyze(query: &str) -> AnalysisResult {
    let lowered = query.to_lowercase();

    // Prefer an explicitly named non-default network: in "ETH/USDC on
    // Arbitrum" the `eth` is a ticker, not the chain.
    let networks = scan(NETWORK_ALIASES, &lowered);
    let network = networks
        .iter()
        .find(|n| **n != DEFAULT_NETWORK)
        .or_else(|| networks.first())
        .copied()
        .unwrap_or(DEFAULT_NETWORK);

    let version = VERSION_TOKEN
        .captures(&lowered)
        .and_then(|c| c.get(1))
        .map(|d| format!("v{}", d.as_str()));

    let mut mentions: Vec<ProtocolMention> = scan(PROTOCOL_ALIASES, &lowered)
        .into_iter()
        .map(|p| ProtocolMention::new(p, network, version.clone(), ALIAS_CONFIDENCE))
        .collect();

    if mentions.is_empty() {
        let defaults = if contains_any(&lowered, DEX_KEYWORDS) {
            DEX_DEFAULTS
        } else if contains_any(&lowered, LENDING_KEYWORDS) {
            LENDING_DEFAULTS
        } else {
            &[]
        };
        mentions = defaults
            .iter()
            .map(|p| ProtocolMention::new(*p, network, None, KEYWORD_CONFIDENCE))
            .collect();
    }

    let result = AnalysisResult::from_mentions(query, mentions);
    debug!(count = result.mentions.len(), confidence = result.overall_confidence, "rule-based analysis");
    result
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct CannedModel(Result<&'static str, ()>);

    #[async_trait]
    impl Completion for CannedModel {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: &GenerateRequest) -> Result<String, LlmError> {
            self.0.map(str::to_string).map_err(|_| LlmError::EmptyCompletion)
        }
    }

    fn with_model(answer: Result<&'static str, ()>) -> ProtocolAnalyzer {
        ProtocolAnalyzer::new(Some(Arc::new(CannedModel(answer))))
    }

    fn ids(result: &AnalysisResult) -> Vec<(&str, &str)> {
        result
            .mentions
            .iter()
            .map(|m| (m.protocol_id.as_str(), m.network_id.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn compare_two_protocols_on_polygon() {
        let result = ProtocolAnalyzer::rule_based()
            .analyze("Compare Uniswap and Sushiswap TVL on Polygon")
            .await;
        assert_eq!(ids(&result), vec![("uniswap", "polygon"), ("sushiswap", "polygon")]);
        assert!(result.overall_confidence > 0.0);
    }

    #[test]
    fn no_protocol_means_empty_result() {
        let result = rule_based_analyze("what is the weather like today?");
        assert!(result.is_empty());
        assert_eq!(result.overall_confidence, 0.0);
        assert_eq!(result.raw_query, "what is the weather like today?");
    }

    #[test]
    fn version_applies_to_every_protocol() {
        let result = rule_based_analyze("aave v3 and compound rates on arbitrum");
        assert_eq!(ids(&result), vec![("aave", "arbitrum"), ("compound", "arbitrum")]);
        assert!(result.mentions.iter().all(|m| m.version.as_deref() == Some("v3")));
    }

    #[test]
    fn version_inside_alias() {
        let result = rule_based_analyze("UniV2 top pairs");
        assert_eq!(result.mentions[0].protocol_id, "uniswap");
        assert_eq!(result.mentions[0].version.as_deref(), Some("v2"));
    }

    #[test]
    fn ticker_eth_does_not_override_named_network() {
        let result = rule_based_analyze("uniswap ETH/USDC pools on Arbitrum");
        assert_eq!(ids(&result), vec![("uniswap", "arbitrum")]);
    }

    #[test]
    fn dex_keywords_seed_default_dexes() {
        let result = rule_based_analyze("which dex pools have the deepest liquidity?");
        assert_eq!(ids(&result), vec![("uniswap", "ethereum"), ("sushiswap", "ethereum")]);
        assert_eq!(result.overall_confidence, KEYWORD_CONFIDENCE);
        assert!(result.mentions.iter().all(|m| m.version.is_none()));
    }

    #[test]
    fn lending_keywords_seed_default_lenders() {
        let result = rule_based_analyze("best borrow rates on polygon");
        assert_eq!(ids(&result), vec![("aave", "polygon"), ("compound", "polygon")]);
    }

    #[test]
    fn chinese_network_alias() {
        let result = rule_based_analyze("curve 在马蹄上的池子");
        assert_eq!(ids(&result), vec![("curve", "polygon")]);
    }

    #[tokio::test]
    async fn model_answer_is_normalized() {
        let analyzer = with_model(Ok(
            "```json\n{\"protocols\": [{\"protocol\": \"Sushi\", \"network\": \"MATIC\", \"version\": null, \"confidence\": 0.9}, {\"protocol\": \"sushiswap\", \"network\": \"ethereum\"}]}\n```",
        ));
        let result = analyzer.analyze("sushi on polygon").await;
        assert_eq!(ids(&result), vec![("sushiswap", "polygon")]);
        assert_eq!(result.mentions[0].version, None);
        assert!((result.overall_confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_rules() {
        let result = with_model(Err(())).analyze("aave markets").await;
        assert_eq!(ids(&result), vec![("aave", "ethereum")]);

        let result = with_model(Ok("I have no idea")).analyze("aave markets").await;
        assert_eq!(ids(&result), vec![("aave", "ethereum")]);
    }

    #[tokio::test]
    async fn single_protocol_prefers_highest_confidence() {
        let analyzer = with_model(Ok(
            r#"{"protocols": [{"protocol": "curve", "confidence": 0.4}, {"protocol": "balancer", "confidence": 0.7}]}"#,
        ));
        let best = analyzer.extract_single_protocol("stable pools").await.unwrap();
        assert_eq!(best.protocol_id, "balancer");
        assert_eq!(best.network_id, "ethereum");

        assert!(ProtocolAnalyzer::rule_based()
            .extract_single_protocol("hello there")
            .await
            .is_none());
    }
}
