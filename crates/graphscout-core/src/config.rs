//! Runtime settings shared by every layer.
//!
//! Settings are plain values assembled once at startup (the CLI fills them from
//! flags and environment variables) and handed to constructors by reference.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Well-known dataset that indexes every published dataset on the network.
pub const META_INDEX_DATASET_ID: &str = "DZz4kDTdmzWLWsV373w2bSmoar3umKKH9y82SUKr5qmp";

pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.thegraph.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("gateway credential missing: set GRAPH_API_KEY to enable dataset queries")]
    MissingGatewayKey,
    #[error("unknown LLM provider: {0} (expected anthropic, openai or qwen)")]
    UnknownProvider(String),
}

/// Gateway transport settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub api_key: Option<String>,
    /// Primary gateway first, mirrors after. Tried in order of fewest recent failures.
    pub base_urls: Vec<String>,
    pub meta_index_id: String,
    pub timeout: Duration,
    pub max_retries: usize,
    /// Wait applied after a 429 without a usable `Retry-After` header.
    pub rate_limit_delay: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_urls: vec![DEFAULT_GATEWAY_URL.to_string()],
            meta_index_id: META_INDEX_DATASET_ID.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            rate_limit_delay: Duration::from_secs(2),
        }
    }
}

impl GatewaySettings {
    /// The api key, if one is set and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Fail with [`ConfigError::MissingGatewayKey`] when no credential is configured.
    pub fn require_credential(&self) -> Result<&str, ConfigError> {
        self.credential().ok_or(ConfigError::MissingGatewayKey)
    }
}

/// Query result cache and registry location.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub cache_dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            cache_dir: PathBuf::from("cache"),
        }
    }
}

impl CacheSettings {
    pub fn registry_path(&self) -> PathBuf {
        self.cache_dir.join("dataset_registry.json")
    }
}

/// Generative model vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
    /// DashScope's OpenAI-compatible endpoint.
    Qwen,
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "qwen" | "dashscope" => Ok(Self::Qwen),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Qwen => "qwen",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5-20250929",
            Self::OpenAi => "gpt-4o-mini",
            Self::Qwen => "qwen-plus",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        }
    }
}

/// Generative model settings. Absent credentials disable the model paths.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: None,
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmSettings {
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub gateway: GatewaySettings,
    pub cache: CacheSettings,
    pub llm: LlmSettings,
}

/// Dataset ids on the gateway are 30–60 ASCII alphanumerics.
pub fn is_valid_dataset_id(id: &str) -> bool {
    (30..=60).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing() {
        assert_eq!("Anthropic".parse::<LlmProvider>(), Ok(LlmProvider::Anthropic));
        assert_eq!("openai".parse::<LlmProvider>(), Ok(LlmProvider::OpenAi));
        assert_eq!("qwen".parse::<LlmProvider>(), Ok(LlmProvider::Qwen));
        assert_eq!(
            "llama".parse::<LlmProvider>(),
            Err(ConfigError::UnknownProvider("llama".into()))
        );
    }

    #[test]
    fn blank_gateway_key_is_missing() {
        let settings = GatewaySettings {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(settings.credential(), None);
        assert_eq!(
            settings.require_credential(),
            Err(ConfigError::MissingGatewayKey)
        );
    }

    #[test]
    fn llm_defaults_follow_provider() {
        let settings = LlmSettings {
            provider: LlmProvider::OpenAi,
            base_url: Some("http://localhost:8080/v1/".into()),
            ..Default::default()
        };
        assert_eq!(settings.model(), "gpt-4o-mini");
        assert_eq!(settings.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn dataset_id_validation() {
        assert!(is_valid_dataset_id(META_INDEX_DATASET_ID));
        assert!(is_valid_dataset_id("5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV"));
        assert!(!is_valid_dataset_id("ID123"));
        assert!(!is_valid_dataset_id("5zvR82QoaXYFyDEKLZ9t6v9adgnptxYp-KpSbxtgVENFV"));
        assert!(!is_valid_dataset_id(""));
    }

    #[test]
    fn registry_lives_in_cache_dir() {
        let cache = CacheSettings {
            cache_dir: PathBuf::from("/tmp/gs"),
            ..Default::default()
        };
        assert_eq!(cache.registry_path(), PathBuf::from("/tmp/gs/dataset_registry.json"));
    }
}
