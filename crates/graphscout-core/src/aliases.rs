//! Static alias tables mapping user spellings to canonical protocol and network ids.
//!
//! ASCII aliases match whole words only, so `compare` never matches `comp` and
//! `top` never matches `op`. Non-ASCII aliases (e.g. `以太坊`) have no word
//! boundaries in running text and match as substrings.

/// Network assumed when the text names none.
pub const DEFAULT_NETWORK: &str = "ethereum";

/// alias → canonical protocol id.
pub const PROTOCOL_ALIASES: &[(&str, &str)] = &[
    ("uni", "uniswap"),
    ("uniswap", "uniswap"),
    ("univ2", "uniswap"),
    ("univ3", "uniswap"),
    ("aave", "aave"),
    ("compound", "compound"),
    ("comp", "compound"),
    ("curve", "curve"),
    ("crv", "curve"),
    ("sushi", "sushiswap"),
    ("sushiswap", "sushiswap"),
    ("balancer", "balancer"),
    ("bal", "balancer"),
    ("pancake", "pancakeswap"),
    ("pancakeswap", "pancakeswap"),
    ("cake", "pancakeswap"),
    ("gmx", "gmx"),
    ("lido", "lido"),
    ("maker", "maker"),
    ("mkr", "maker"),
    ("synthetix", "synthetix"),
    ("snx", "synthetix"),
    ("yearn", "yearn"),
    ("yfi", "yearn"),
];

/// alias → canonical network id.
pub const NETWORK_ALIASES: &[(&str, &str)] = &[
    ("ethereum", "ethereum"),
    ("eth", "ethereum"),
    ("mainnet", "ethereum"),
    ("以太坊", "ethereum"),
    ("polygon", "polygon"),
    ("matic", "polygon"),
    ("马蹄", "polygon"),
    ("arbitrum", "arbitrum"),
    ("arb", "arbitrum"),
    ("arbitrum-one", "arbitrum"),
    ("optimism", "optimism"),
    ("op", "optimism"),
    ("bsc", "bsc"),
    ("binance", "bsc"),
    ("bnb", "bsc"),
    ("avalanche", "avalanche"),
    ("avax", "avalanche"),
    ("fantom", "fantom"),
    ("ftm", "fantom"),
];

/// Canonical protocol id for a name, or the lowercased name itself.
pub fn canonical_protocol(name: &str) -> String {
    canonicalize(PROTOCOL_ALIASES, name)
}

/// Canonical network id for a name, or the lowercased name itself.
pub fn canonical_network(name: &str) -> String {
    canonicalize(NETWORK_ALIASES, name)
}

fn canonicalize(table: &[(&str, &'static str)], name: &str) -> String {
    let lower = name.trim().to_lowercase();
    lookup(table, &lower)
        .map(str::to_string)
        .unwrap_or(lower)
}

fn lookup(table: &[(&str, &'static str)], alias: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(a, _)| *a == alias)
        .map(|(_, canonical)| *canonical)
}

/// Split lowercased text into ASCII-alphanumeric words with their byte offsets.
pub fn words(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_ascii_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            out.push((s, &text[s..i]));
        }
    }
    if let Some(s) = start {
        out.push((s, &text[s..]));
    }
    out
}

/// Canonical ids found in `lowered`, ordered by first appearance, deduplicated.
pub fn scan(table: &[(&str, &'static str)], lowered: &str) -> Vec<&'static str> {
    let mut hits: Vec<(usize, &'static str)> = Vec::new();

    for (pos, word) in words(lowered) {
        if let Some(canonical) = lookup(table, word) {
            hits.push((pos, canonical));
        }
    }
    for (alias, canonical) in table.iter().filter(|(a, _)| !a.is_ascii()) {
        if let Some(pos) = lowered.find(alias) {
            hits.push((pos, canonical));
        }
    }

    hits.sort_by_key(|(pos, _)| *pos);
    let mut out: Vec<&'static str> = Vec::new();
    for (_, canonical) in hits {
        if !out.contains(&canonical) {
            out.push(canonical);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_protocol("UniV3"), "uniswap");
        assert_eq!(canonical_protocol("Sushi"), "sushiswap");
        assert_eq!(canonical_protocol("Frax"), "frax");
        assert_eq!(canonical_network("MATIC"), "polygon");
        assert_eq!(canonical_network("arbitrum-one"), "arbitrum");
        assert_eq!(canonical_network(" Base "), "base");
    }

    #[test]
    fn scan_orders_by_appearance() {
        let found = scan(PROTOCOL_ALIASES, "compare sushi and uniswap tvl");
        assert_eq!(found, vec!["sushiswap", "uniswap"]);
    }

    #[test]
    fn scan_ignores_partial_words() {
        assert!(scan(PROTOCOL_ALIASES, "compare the top pools").is_empty());
        assert!(scan(NETWORK_ALIASES, "compare the top pools").is_empty());
    }

    #[test]
    fn scan_matches_non_ascii_substrings() {
        assert_eq!(scan(NETWORK_ALIASES, "uniswap在以太坊上的数据"), vec!["ethereum"]);
    }

    #[test]
    fn words_split_on_punctuation() {
        let w: Vec<&str> = words("usdc/eth pool, v3").into_iter().map(|(_, w)| w).collect();
        assert_eq!(w, vec!["usdc", "eth", "pool", "v3"]);
    }
}
