use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::GatewayError;

/// A GraphQL document with its bound variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl GraphRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
        }
    }

    pub fn with_variables(query: impl Into<String>, variables: Map<String, Value>) -> Self {
        Self {
            query: query.into(),
            variables,
        }
    }

    pub fn var(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }
}

/// Executes GraphQL requests against datasets addressed by id.
///
/// Implementations keep per-dataset connection state, hence `&mut self`.
#[async_trait]
pub trait QueryTransport: Send {
    /// Whether the credentials needed to reach the gateway are present.
    fn is_configured(&self) -> bool;

    /// Run `request` against `dataset_id` and return the response's `data` object.
    async fn execute(
        &mut self,
        dataset_id: &str,
        request: &GraphRequest,
    ) -> Result<Map<String, Value>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_variables_are_omitted() {
        let body = serde_json::to_value(GraphRequest::new("{ _meta { block { number } } }")).unwrap();
        assert_eq!(body, json!({"query": "{ _meta { block { number } } }"}));

        let body = serde_json::to_value(GraphRequest::new("q").var("first", 10)).unwrap();
        assert_eq!(body["variables"]["first"], 10);
    }
}
