//! Command-line flags (with environment fallbacks) → [`Settings`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use graphscout_core::config::DEFAULT_GATEWAY_URL;
use graphscout_core::{
    CacheSettings, ConfigError, GatewaySettings, LlmProvider, LlmSettings, Settings,
};

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Gateway api key.
    #[arg(long, env = "GRAPH_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Primary gateway URL.
    #[arg(long, env = "GRAPH_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL, global = true)]
    pub gateway_url: String,

    /// Extra gateway URLs tried when the primary fails.
    #[arg(long = "mirror", env = "GRAPH_GATEWAY_MIRRORS", value_delimiter = ',', global = true)]
    pub mirrors: Vec<String>,

    /// Per-request gateway timeout in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    /// Attempts per gateway request.
    #[arg(long, default_value_t = 3, global = true)]
    pub max_retries: usize,

    /// Directory holding the dataset registry.
    #[arg(long, env = "GRAPHSCOUT_CACHE_DIR", default_value = "cache", global = true)]
    pub cache_dir: PathBuf,

    /// Result cache lifetime in seconds.
    #[arg(long, env = "GRAPHSCOUT_CACHE_TTL", default_value_t = 300, global = true)]
    pub cache_ttl: u64,

    /// Disable the query result cache.
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// LLM provider: anthropic, openai or qwen.
    #[arg(long, env = "LLM_PROVIDER", default_value = "anthropic", global = true)]
    pub llm_provider: String,

    /// Model name (provider default when unset).
    #[arg(long, env = "MODEL_NAME", global = true)]
    pub model: Option<String>,

    /// Override the provider's API base URL.
    #[arg(long, env = "LLM_BASE_URL", global = true)]
    pub llm_base_url: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, global = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "DASHSCOPE_API_KEY", hide_env_values = true, global = true)]
    pub dashscope_api_key: Option<String>,
}

impl SettingsArgs {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let provider: LlmProvider = self.llm_provider.parse()?;
        let llm_key = match provider {
            LlmProvider::Anthropic => self.anthropic_api_key,
            LlmProvider::OpenAi => self.openai_api_key,
            LlmProvider::Qwen => self.dashscope_api_key,
        };

        let mut base_urls = vec![self.gateway_url.trim_end_matches('/').to_string()];
        base_urls.extend(
            self.mirrors
                .iter()
                .map(|m| m.trim().trim_end_matches('/').to_string())
                .filter(|m| !m.is_empty()),
        );

        Ok(Settings {
            gateway: GatewaySettings {
                api_key: self.api_key,
                base_urls,
                timeout: Duration::from_secs(self.timeout),
                max_retries: self.max_retries,
                ..Default::default()
            },
            cache: CacheSettings {
                enabled: !self.no_cache,
                ttl: Duration::from_secs(self.cache_ttl),
                cache_dir: self.cache_dir,
            },
            llm: LlmSettings {
                provider,
                model: self.model,
                api_key: llm_key,
                base_url: self.llm_base_url,
                ..Default::default()
            },
        })
    }
}
