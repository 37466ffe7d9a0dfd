//! Agent configuration, built with the typed builder pattern.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Opaque, validated configuration for one [`crate::agent::Agent`]. Beyond
/// `model`, values are passed through to the LLM adapter as an opaque map —
/// the kernel does not interpret them.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_iterations: usize,
    pub auto_execute_tools: bool,
    pub adapter_config: Map<String, Value>,
}

impl AgentConfig {
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }
}

/// Builder for [`AgentConfig`]. Required field: `model`.
#[derive(Default)]
pub struct AgentConfigBuilder {
    model: Option<String>,
    max_iterations: Option<usize>,
    auto_execute_tools: Option<bool>,
    adapter_config: Map<String, Value>,
}

impl AgentConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn auto_execute_tools(mut self, enabled: bool) -> Self {
        self.auto_execute_tools = Some(enabled);
        self
    }

    pub fn adapter_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.adapter_config.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        let model = self.model.ok_or_else(|| Error::config("model is required"))?;
        if model.is_empty() {
            return Err(Error::config("model must not be empty"));
        }
        Ok(AgentConfig {
            model,
            max_iterations: self.max_iterations.unwrap_or(10),
            auto_execute_tools: self.auto_execute_tools.unwrap_or(true),
            adapter_config: self.adapter_config,
        })
    }
}
