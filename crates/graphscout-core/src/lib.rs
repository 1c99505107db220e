pub mod aliases;
pub mod config;
pub mod format;
pub mod types;

pub use config::{CacheSettings, ConfigError, GatewaySettings, LlmProvider, LlmSettings, Settings};
pub use format::{format_address, format_number};
pub use types::{
    AnalysisResult, ExecutionResult, ExecutionTrace, HealthStatus, ProtocolContext,
    ProtocolMention, QueryContext, QueryPlan, ResolutionSource,
};
