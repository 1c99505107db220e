use graphscout_ai::LlmError;
use graphscout_gateway::GatewayError;
use thiserror::Error;

/// Failure to assemble the pipeline from settings.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("gateway client: {0}")]
    Gateway(#[from] GatewayError),
    #[error("LLM provider: {0}")]
    Llm(#[from] LlmError),
}
