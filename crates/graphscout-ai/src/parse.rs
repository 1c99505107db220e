//! Tolerant parsing of free-form model output.
//!
//! Model text is untrusted. Each strategy below either produces a value or
//! declines, and strategies are tried in a fixed order:
//! direct JSON, an embedded `{...}` object, a fenced code block (JSON or raw
//! GraphQL), then a bare GraphQL document found in the text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

static EMBEDDED_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("valid regex"));

static QUERY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bquery\b(?:\s+[A-Za-z_][A-Za-z0-9_]*)?\s*(?:\([^)]*\))?\s*\{").expect("valid regex")
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z]*[ \t]*\r?\n([\s\S]*?)\r?\n?```").expect("valid regex")
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("model response is empty")]
    Empty,
    #[error("no parse strategy matched the model response")]
    Unrecognized,
}

/// A plan as the model described it, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlan {
    pub query: String,
    pub variables: Map<String, Value>,
    pub explanation: String,
}

type Strategy<T> = (&'static str, fn(&str) -> Option<T>);

const JSON_STRATEGIES: &[Strategy<Value>] = &[
    ("direct", direct_json),
    ("embedded", embedded_json),
    ("fenced", fenced_json),
];

const PLAN_STRATEGIES: &[Strategy<RawPlan>] = &[
    ("direct", direct_plan),
    ("embedded", embedded_plan),
    ("fenced", fenced_plan),
    ("raw", raw_document),
];

fn run<T>(strategies: &[Strategy<T>], text: &str) -> Result<T, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    for (name, strategy) in strategies {
        if let Some(value) = strategy(text) {
            debug!(strategy = name, "parsed model response");
            return Ok(value);
        }
    }
    Err(ParseError::Unrecognized)
}

/// The first JSON object found in `text`.
pub fn extract_json(text: &str) -> Result<Value, ParseError> {
    run(JSON_STRATEGIES, text)
}

/// A query plan found in `text`.
pub fn parse_plan_response(text: &str) -> Result<RawPlan, ParseError> {
    run(PLAN_STRATEGIES, text)
}

fn direct_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed).ok().filter(Value::is_object)
}

fn embedded_json(text: &str) -> Option<Value> {
    let m = EMBEDDED_OBJECT.find(text)?;
    serde_json::from_str::<Value>(m.as_str()).ok().filter(Value::is_object)
}

fn direct_plan(text: &str) -> Option<RawPlan> {
    direct_json(text).and_then(plan_from_json)
}

fn embedded_plan(text: &str) -> Option<RawPlan> {
    embedded_json(text).and_then(plan_from_json)
}

fn fenced_json(text: &str) -> Option<Value> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| direct_json(m.as_str()))
}

fn fenced_plan(text: &str) -> Option<RawPlan> {
    for caps in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if let Some(plan) = direct_json(body).and_then(plan_from_json) {
            return Some(plan);
        }
        if looks_like_document(body) {
            return Some(RawPlan {
                query: body.to_string(),
                variables: Map::new(),
                explanation: "Extracted from code block".into(),
            });
        }
    }
    None
}

fn raw_document(text: &str) -> Option<RawPlan> {
    if !text.to_lowercase().contains("query") {
        return None;
    }
    let start = QUERY_HEADER
        .find(text)
        .map(|m| m.start())
        .or_else(|| text.find('{'))?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let query = text[start..=end].trim();
    if !looks_like_document(query) {
        return None;
    }
    Some(RawPlan {
        query: query.to_string(),
        variables: Map::new(),
        explanation: "Direct GraphQL extraction".into(),
    })
}

fn looks_like_document(text: &str) -> bool {
    let t = text.trim_start();
    (t.starts_with('{') || t.starts_with("query")) && t.contains('{') && t.trim_end().ends_with('}')
}

fn plan_from_json(value: Value) -> Option<RawPlan> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    let query = match obj.remove("query") {
        Some(Value::String(q)) => q,
        _ => return None,
    };
    let variables = match obj.remove("variables") {
        Some(Value::Object(vars)) => vars,
        _ => Map::new(),
    };
    let explanation = match obj.remove("explanation") {
        Some(Value::String(e)) => e,
        _ => String::new(),
    };
    Some(RawPlan {
        query,
        variables,
        explanation,
    })
}
