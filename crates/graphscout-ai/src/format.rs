//! Render gateway `data` objects as readable text.

use graphscout_core::format::{format_address, format_fee_tier, format_number};
use serde_json::{Map, Value};

/// Items shown per list before truncating.
pub const MAX_ITEMS: usize = 10;

/// Render `data` with an optional explanation header.
///
/// Lists render per item with pool, token or position templates and a generic
/// template otherwise. When every pool in a `pools` list shares one token
/// pair, a combined TVL line precedes the per-tier breakdown.
pub fn format_result(data: &Map<String, Value>, explanation: &str) -> String {
    if data.is_empty() {
        return "No data returned.".to_string();
    }

    let mut out: Vec<String> = Vec::new();
    if !explanation.is_empty() {
        out.push(explanation.to_string());
        out.push(String::new());
    }

    for (key, value) in data {
        match value {
            Value::Array(items) if items.is_empty() => out.push(format!("No {key} found.")),
            Value::Array(items) => {
                out.push(format!("Found {} {key}:", items.len()));
                if key == "pools" && items.len() > 1 {
                    if let Some((pair, total)) = same_pair_total(items) {
                        out.push(String::new());
                        out.push(format!("Total {pair} TVL: ${}", format_number(total)));
                        out.push("By fee tier:".to_string());
                    }
                }
                out.push(String::new());
                let shown = items.len().min(MAX_ITEMS);
                for (i, item) in items.iter().take(shown).enumerate() {
                    out.extend(format_item(key, item, Some(i + 1)));
                    if i + 1 < shown {
                        out.push(String::new());
                    }
                }
                if items.len() > MAX_ITEMS {
                    out.push(format!("... and {} more", items.len() - MAX_ITEMS));
                }
            }
            Value::Object(_) if key == "_meta" => out.extend(format_meta(value)),
            Value::Object(_) => out.extend(format_item(key, value, None)),
            Value::Null => out.push(format!("No {key} found.")),
            scalar => out.push(format!("{key}: {}", scalar_text(scalar))),
        }
    }
    out.join("\n")
}

fn format_item(kind: &str, item: &Value, index: Option<usize>) -> Vec<String> {
    let prefix = index.map(|i| format!("{i}. ")).unwrap_or_default();
    let mut lines = Vec::new();

    match kind {
        "pools" | "pool" => {
            lines.push(format!(
                "{prefix}{}/{} pool",
                symbol(item.get("token0")),
                symbol(item.get("token1"))
            ));
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                lines.push(format!("   Address: {id}"));
            }
            if let Some(tvl) = number(item.get("totalValueLockedUSD")) {
                lines.push(format!("   TVL: ${}", format_number(tvl)));
            }
            if let Some(volume) = number(item.get("volumeUSD")) {
                lines.push(format!("   Volume: ${}", format_number(volume)));
            }
            if let Some(fee) = number(item.get("feeTier")) {
                lines.push(format!("   Fee: {}", format_fee_tier(fee)));
            }
            if let Some(liquidity) = number(item.get("liquidity")) {
                lines.push(format!("   Liquidity: {}", format_number(liquidity)));
            }
        }
        "tokens" | "token" => {
            let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
            lines.push(format!("{prefix}{} ({name})", symbol(Some(item))));
            if let Some(tvl) = number(item.get("totalValueLockedUSD")) {
                lines.push(format!("   TVL: ${}", format_number(tvl)));
            }
            if let Some(volume) = number(item.get("volumeUSD")) {
                lines.push(format!("   Volume: ${}", format_number(volume)));
            }
        }
        "positions" | "position" => {
            let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
            let owner = item.get("owner").and_then(Value::as_str).unwrap_or_default();
            lines.push(format!("{prefix}Position {}", format_address(id)));
            lines.push(format!("   Owner: {}", format_address(owner)));
            if let Some(liquidity) = number(item.get("liquidity")) {
                lines.push(format!("   Liquidity: {}", format_number(liquidity)));
            }
        }
        _ => {
            let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
            lines.push(format!("{prefix}{kind} {}", format_address(id)).trim_end().to_string());
            if let Value::Object(fields) = item {
                for (k, v) in fields {
                    if k == "id" || k == "__typename" {
                        continue;
                    }
                    match v {
                        Value::Number(n) => {
                            lines.push(format!("   {k}: {}", format_number(n.as_f64().unwrap_or(0.0))))
                        }
                        Value::String(s) if !s.is_empty() => lines.push(format!("   {k}: {s}")),
                        Value::Bool(b) => lines.push(format!("   {k}: {b}")),
                        Value::Object(nested) if nested.contains_key("symbol") => {
                            lines.push(format!("   {k}: {}", symbol(Some(v))))
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    lines
}

fn format_meta(meta: &Value) -> Vec<String> {
    let mut lines = vec!["Dataset status:".to_string()];
    let block = meta.get("block");
    if let Some(n) = block.and_then(|b| b.get("number")).and_then(Value::as_u64) {
        lines.push(format!("   Block: {n}"));
    }
    if let Some(ts) = block.and_then(|b| b.get("timestamp")).and_then(Value::as_u64) {
        lines.push(format!("   Block timestamp: {ts}"));
    }
    if let Some(deployment) = meta.get("deployment").and_then(Value::as_str) {
        lines.push(format!("   Deployment: {deployment}"));
    }
    if let Some(errors) = meta.get("hasIndexingErrors").and_then(Value::as_bool) {
        lines.push(format!("   Indexing errors: {}", if errors { "yes" } else { "no" }));
    }
    lines
}

/// `TOKEN0/TOKEN1` and summed TVL when every pool shares one pair, either order.
fn same_pair_total(pools: &[Value]) -> Option<(String, f64)> {
    let first = pools.first()?;
    let a = symbol(first.get("token0"));
    let b = symbol(first.get("token1"));

    let same = pools.iter().all(|p| {
        let x = symbol(p.get("token0"));
        let y = symbol(p.get("token1"));
        (x == a && y == b) || (x == b && y == a)
    });
    if !same {
        return None;
    }
    let total = pools
        .iter()
        .filter_map(|p| number(p.get("totalValueLockedUSD")))
        .sum();
    Some((format!("{a}/{b}"), total))
}

fn symbol(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.get("symbol"))
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

/// Gateway numbers arrive as JSON numbers or as decimal strings.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
