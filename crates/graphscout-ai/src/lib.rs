//! Generative layer: model providers, tolerant response parsing, protocol
//! analysis, GraphQL plan building and result rendering.

pub mod analyzer;
pub mod builder;
pub mod format;
pub mod llm;
pub mod parse;

pub use analyzer::ProtocolAnalyzer;
pub use builder::{BuildError, QueryBuilder};
pub use format::format_result;
pub use llm::{Completion, GenerateRequest, LlmError};
pub use parse::ParseError;
