//! Natural language → [`QueryPlan`].
//!
//! The model drafts a GraphQL document from a prompt carrying protocol
//! metadata, entity schemas and construction rules. Its answer is parsed
//! tolerantly, then validated and repaired. Any failure along the way yields a
//! deterministic keyword-driven plan instead, so callers always get a
//! non-empty document.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use graphscout_core::aliases::words;
use graphscout_core::{ProtocolContext, QueryPlan};
use regex::Regex;
use serde_json::{Map, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{Completion, GenerateRequest, LlmError};
use crate::parse::{ParseError, RawPlan, parse_plan_response};

/// At most this many examples go into one prompt.
pub const MAX_EXAMPLES: usize = 3;

const DEFAULT_FIRST: i64 = 10;

const COMMON_TICKERS: &[&str] = &[
    "eth", "weth", "usdc", "usdt", "dai", "wbtc", "uni", "link", "aave", "matic",
];
const POOL_KEYWORDS: &[&str] = &["pool", "pair", "liquidity", "池", "交易对", "流动性"];
const TOKEN_KEYWORDS: &[&str] = &["token", "代币", "币"];

static VARIABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));

static DEFAULTED_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\s*:\s*[\[\]A-Za-z0-9_!]+\s*=").expect("valid regex")
});

static OPERATION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:query|subscription)\b[^{]*\{").expect("valid regex")
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no generative model configured")]
    NoModel,
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("unparseable model response: {0}")]
    Parse(#[from] ParseError),
    #[error("model produced an empty query document")]
    EmptyQuery,
    #[error("query references unbound variable ${0}")]
    UnboundVariable(String),
}

// ── Prompt material ──

/// A natural-language question paired with the GraphQL that answers it.
#[derive(Debug, Clone, Copy)]
pub struct QueryExample {
    pub natural: &'static str,
    pub graphql: &'static str,
}

const UNISWAP_EXAMPLES: &[QueryExample] = &[
    QueryExample {
        natural: "All USDC/ETH pools across fee tiers",
        graphql: r#"query {
  pools(
    where: { or: [
      { token0_: { symbol_contains_nocase: "USDC" }, token1_: { symbol_contains_nocase: "ETH" } },
      { token0_: { symbol_contains_nocase: "ETH" }, token1_: { symbol_contains_nocase: "USDC" } }
    ] }
    orderBy: feeTier
    orderDirection: asc
    first: 10
  ) { id token0 { symbol name } token1 { symbol name } feeTier totalValueLockedUSD volumeUSD }
}"#,
    },
    QueryExample {
        natural: "TVL of the USDC/ETH pools",
        graphql: r#"query {
  pools(
    where: { or: [
      { token0_: { symbol_contains_nocase: "USDC" }, token1_: { symbol_contains_nocase: "ETH" } },
      { token0_: { symbol_contains_nocase: "ETH" }, token1_: { symbol_contains_nocase: "USDC" } }
    ] }
    orderBy: totalValueLockedUSD
    orderDirection: desc
    first: 5
  ) { id token0 { symbol } token1 { symbol } feeTier totalValueLockedUSD }
}"#,
    },
    QueryExample {
        natural: "Top 5 pools by TVL",
        graphql: r#"query {
  pools(first: 5, orderBy: totalValueLockedUSD, orderDirection: desc) {
    id token0 { symbol } token1 { symbol } totalValueLockedUSD volumeUSD feeTier
  }
}"#,
    },
    QueryExample {
        natural: "Details of a specific pool",
        graphql: r#"query {
  pool(id: "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640") {
    id token0 { symbol name decimals } token1 { symbol name decimals }
    totalValueLockedUSD volumeUSD feeTier liquidity sqrtPrice tick
  }
}"#,
    },
];

const AAVE_EXAMPLES: &[QueryExample] = &[
    QueryExample {
        natural: "Total deposits and borrows in the USDC market",
        graphql: r#"query {
  markets(where: { inputToken_: { symbol: "USDC" } }, first: 1) {
    totalDepositBalanceUSD totalBorrowBalanceUSD rates { rate side }
  }
}"#,
    },
    QueryExample {
        natural: "Most recent liquidations",
        graphql: r#"query {
  liquidates(first: 10, orderBy: timestamp, orderDirection: desc) {
    id timestamp amount amountUSD profitUSD
  }
}"#,
    },
];

const GENERIC_EXAMPLES: &[QueryExample] = &[QueryExample {
    natural: "Entities with the highest TVL",
    graphql: r#"query {
  pools(first: 5, orderBy: totalValueLockedUSD, orderDirection: desc) { id totalValueLockedUSD }
}"#,
}];

/// Examples for a protocol display name; generic ones when none match.
pub fn examples_for(protocol_name: &str) -> &'static [QueryExample] {
    let name = protocol_name.to_lowercase();
    let table: &[(&str, &'static [QueryExample])] =
        &[("uniswap", UNISWAP_EXAMPLES), ("aave", AAVE_EXAMPLES)];
    table
        .iter()
        .find(|(key, _)| name.contains(key))
        .map(|(_, examples)| *examples)
        .unwrap_or(GENERIC_EXAMPLES)
}

/// Common entity kinds with the fields worth selecting.
pub const ENTITY_SCHEMAS: &[(&str, &str, &[&str])] = &[
    (
        "pools",
        "liquidity pools / trading pairs",
        &[
            "id", "token0 { symbol name decimals }", "token1 { symbol name decimals }",
            "totalValueLockedUSD", "volumeUSD", "feeTier", "liquidity", "sqrtPrice", "tick",
        ],
    ),
    (
        "tokens",
        "token metadata and aggregates",
        &[
            "id", "symbol", "name", "decimals", "totalSupply", "volume", "volumeUSD",
            "totalValueLocked", "totalValueLockedUSD",
        ],
    ),
    (
        "positions",
        "user liquidity positions",
        &[
            "id", "owner", "pool { id }", "token0 { symbol }", "token1 { symbol }", "liquidity",
            "depositedToken0", "depositedToken1", "withdrawnToken0", "withdrawnToken1",
            "collectedFeesToken0", "collectedFeesToken1",
        ],
    ),
    (
        "swaps",
        "individual trades",
        &[
            "id", "transaction { id }", "timestamp", "pool { id }", "origin", "amount0",
            "amount1", "amountUSD", "sqrtPriceX96", "tick",
        ],
    ),
    (
        "markets",
        "lending markets",
        &[
            "id", "name", "inputToken { symbol name }", "totalValueLockedUSD",
            "totalBorrowBalanceUSD", "totalDepositBalanceUSD", "inputTokenBalance",
            "rates { id rate side type }",
        ],
    ),
];

const CONSTRUCTION_RULES: &str = "\
Construction rules:
1. Filter pool tokens with the token0_ / token1_ nested filters, never token0Address or token1Address.
2. Token pairs are unordered: match both directions with an `or` of the two orderings.
3. ETH trades as WETH on most DEXes. When the user says ETH, filter with symbol_contains_nocase: \"ETH\" so both ETH and WETH match. Do not rewrite ETH to WETH yourself.
4. One pair can have several fee tiers (100 = 0.01%, 500 = 0.05%, 3000 = 0.3%, 10000 = 1%). Return every tier unless the user names one: use first: 5-10, never first: 1.
5. TVL questions sort by totalValueLockedUSD desc. Listing a pair's pools sorts by feeTier asc. A named fee tier goes into the where filter.
6. Pool ids are lowercase addresses.
7. Use first: 5-10 for a single pair and larger limits for global rankings.";

pub fn system_prompt(ctx: &ProtocolContext) -> String {
    let mut entities = String::new();
    for (name, description, fields) in ENTITY_SCHEMAS {
        entities.push_str(&format!("- {name} ({description}): {}\n", fields.join(", ")));
    }
    format!(
        "You translate natural-language questions into GraphQL queries for The Graph gateway.\n\
         \n\
         Protocol:\n\
         - name: {name}\n\
         - network: {network}\n\
         - description: {description}\n\
         \n\
         Common entities:\n\
         {entities}\n\
         {CONSTRUCTION_RULES}\n\
         \n\
         Respond ONLY with a JSON object:\n\
         {{\"query\": \"GraphQL document\", \"variables\": {{}}, \"explanation\": \"one sentence\"}}",
        name = ctx.name,
        network = ctx.network,
        description = ctx.description,
    )
}

pub fn user_prompt(nl_query: &str, ctx: &ProtocolContext, examples: &[QueryExample]) -> String {
    let mut parts = Vec::new();
    if !examples.is_empty() {
        parts.push("Reference examples:".to_string());
        for ex in examples.iter().take(MAX_EXAMPLES) {
            parts.push(format!("\nQuestion: {}\nGraphQL: {}", ex.natural, ex.graphql));
        }
        parts.push(String::new());
    }
    if !ctx.entities.is_empty() {
        parts.push(format!("Entities in this dataset: {}", ctx.entities.join(", ")));
        parts.push(String::new());
    }
    parts.push("Translate this question into GraphQL:".to_string());
    parts.push(format!("\"{nl_query}\""));
    parts.push(String::new());
    parts.push("Keep ETH as ETH, and match token pairs such as USDC/ETH in both directions.".to_string());
    parts.join("\n")
}

// ── Builder ──

pub struct QueryBuilder {
    llm: Option<Arc<dyn Completion>>,
}

impl QueryBuilder {
    pub fn new(llm: Option<Arc<dyn Completion>>) -> Self {
        Self { llm }
    }

    /// Build a plan for `nl_query`. Never fails: falls back to [`fallback_plan`].
    pub async fn build_query(&self, nl_query: &str, ctx: &ProtocolContext) -> QueryPlan {
        match self.model_plan(nl_query, ctx).await {
            Ok(plan) => {
                info!(protocol = %ctx.name, explanation = %plan.explanation, "built query with model");
                plan
            }
            Err(e) => {
                warn!(protocol = %ctx.name, error = %e, "query generation failed, using fallback plan");
                fallback_plan(nl_query)
            }
        }
    }

    async fn model_plan(&self, nl_query: &str, ctx: &ProtocolContext) -> Result<QueryPlan, BuildError> {
        let llm = self.llm.as_ref().ok_or(BuildError::NoModel)?;
        let examples = examples_for(&ctx.name);
        let request = GenerateRequest {
            system_prompt: Some(system_prompt(ctx)),
            user_prompt: user_prompt(nl_query, ctx, examples),
            max_tokens: 1000,
            temperature: 0.0,
        };
        let text = llm.complete(&request).await?;
        debug!(chars = text.len(), "model answered");
        let raw = parse_plan_response(&text)?;
        validate(raw)
    }
}

/// Check and repair a parsed plan.
///
/// Rejects an empty document, wraps a bare selection set in a named query,
/// binds `first`/`skip` defaults, and collapses whitespace. Any other variable
/// the document uses must be bound or declared with a default.
pub fn validate(raw: RawPlan) -> Result<QueryPlan, BuildError> {
    let RawPlan {
        query,
        mut variables,
        explanation,
    } = raw;

    let mut query = WHITESPACE.replace_all(query.trim(), " ").into_owned();
    if query.is_empty() || query == "{}" {
        return Err(BuildError::EmptyQuery);
    }
    if !OPERATION_HEADER.is_match(&query) {
        query = if query.starts_with('{') {
            format!("query GeneratedQuery {query}")
        } else {
            format!("query GeneratedQuery {{ {query} }}")
        };
    }

    let defaulted: BTreeSet<&str> = DEFAULTED_VARIABLE
        .captures_iter(&query)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let referenced: BTreeSet<&str> = VARIABLE_REF
        .captures_iter(&query)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    for name in referenced {
        if variables.contains_key(name) || defaulted.contains(name) {
            continue;
        }
        match name {
            "first" => {
                variables.insert(name.to_string(), json!(DEFAULT_FIRST));
            }
            "skip" => {
                variables.insert(name.to_string(), json!(0));
            }
            other => return Err(BuildError::UnboundVariable(other.to_string())),
        }
    }

    Ok(QueryPlan::new(query, variables, explanation))
}

// ── Deterministic fallback ──

const SPECIFIC_POOLS: &str = "query SpecificPools($token0: String!, $token1: String!, $first: Int!) { \
pools(where: { or: [ \
{ token0_: { symbol_contains_nocase: $token0 }, token1_: { symbol_contains_nocase: $token1 } }, \
{ token0_: { symbol_contains_nocase: $token1 }, token1_: { symbol_contains_nocase: $token0 } } ] }, \
first: $first, orderBy: totalValueLockedUSD, orderDirection: desc) { \
id token0 { symbol name decimals } token1 { symbol name decimals } feeTier totalValueLockedUSD volumeUSD liquidity } }";

const FALLBACK_POOLS: &str = "query FallbackPools($first: Int!) { \
pools(first: $first, orderBy: totalValueLockedUSD, orderDirection: desc) { \
id token0 { symbol name } token1 { symbol name } feeTier totalValueLockedUSD volumeUSD } }";

const FALLBACK_TOKEN: &str = "query FallbackToken($symbol: String!) { \
tokens(where: { symbol_contains_nocase: $symbol }, first: 1) { \
id symbol name decimals totalValueLockedUSD volumeUSD } }";

const FALLBACK_TOKENS: &str = "query FallbackTokens($first: Int!) { \
tokens(first: $first, orderBy: totalValueLockedUSD, orderDirection: desc) { \
id symbol name totalValueLockedUSD volumeUSD } }";

const FALLBACK_META: &str = "query FallbackMeta { \
_meta { block { number timestamp } deployment hasIndexingErrors } }";

/// Known tickers in `text`, uppercased, in order of appearance.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for (_, word) in words(&lowered) {
        if COMMON_TICKERS.contains(&word) {
            let ticker = word.to_uppercase();
            if !out.contains(&ticker) {
                out.push(ticker);
            }
        }
    }
    out
}

/// Keyword-driven plan used when generation fails.
pub fn fallback_plan(nl_query: &str) -> QueryPlan {
    let lowered = nl_query.to_lowercase();
    let tickers = extract_tickers(nl_query);
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    let mut vars = Map::new();
    if mentions(POOL_KEYWORDS) {
        if let [token0, token1, ..] = tickers.as_slice() {
            vars.insert("token0".into(), json!(token0));
            vars.insert("token1".into(), json!(token1));
            vars.insert("first".into(), json!(DEFAULT_FIRST));
            return QueryPlan::new(
                SPECIFIC_POOLS,
                vars,
                format!("Fallback: every {token0}/{token1} pool across fee tiers"),
            );
        }
        vars.insert("first".into(), json!(DEFAULT_FIRST));
        return QueryPlan::new(FALLBACK_POOLS, vars, "Fallback: pools with the highest TVL");
    }
    if mentions(TOKEN_KEYWORDS) {
        if let Some(symbol) = tickers.first() {
            vars.insert("symbol".into(), json!(symbol));
            return QueryPlan::new(FALLBACK_TOKEN, vars, format!("Fallback: {symbol} token details"));
        }
        vars.insert("first".into(), json!(DEFAULT_FIRST));
        return QueryPlan::new(FALLBACK_TOKENS, vars, "Fallback: tokens with the highest TVL");
    }
    QueryPlan::new(FALLBACK_META, vars, "Fallback: dataset metadata")
}
