//! Dispatches tool calls by name, applies registered tool adapters, and
//! produces the structured responses the execute loop turns into messages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tool::{Tool, ToolManager};

/// Rewrites a tool's LLM-visible schema and the parameters the LLM supplies at
/// call time. Adapters run in registration order; an adapter must be a no-op
/// for tools it does not claim.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn should_adapt(&self, tool: &Tool) -> bool;
    fn adapt_signature(&self, tool: &Tool, original: Value) -> Value;
    fn adapt_parameters(&self, tool_name: &str, llm_provided: Map<String, Value>) -> Map<String, Value>;

    /// Reports which properties this adapter removes/adds/modifies relative to
    /// the tool's original schema, used to detect conflicts between adapters
    /// that both claim the same property.
    fn analyze_transformation(&self, tool: &Tool) -> TransformationSummary;
}

#[derive(Debug, Default, Clone)]
pub struct TransformationSummary {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
}

/// The outcome of one tool invocation, ready to become a tool [`crate::message::Message`].
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub tool_name: String,
    pub tool_call_id: String,
    pub response: Value,
    /// Only the visible (non-hidden) parameters, as recorded into the
    /// assistant message's tool-call arguments.
    pub parameters_recorded: Map<String, Value>,
    pub success: bool,
    pub error: Option<String>,
}

/// Invokes tools by name with JSON-decoded arguments, applying all installed
/// adapters first.
pub struct ToolInvoker {
    tools: Arc<ToolManager>,
    adapters: Vec<Arc<dyn ToolAdapter>>,
}

impl ToolInvoker {
    pub fn new(tools: Arc<ToolManager>, adapters: Vec<Arc<dyn ToolAdapter>>) -> Self {
        ToolInvoker { tools, adapters }
    }

    /// Surfaces a warning (does not error) if two installed adapters both
    /// claim to touch the same tool property. First-registered adapter wins
    /// when this happens; see the kernel's resolved open question on adapter
    /// conflicts.
    pub fn warn_on_adapter_conflicts(&self, tool: &Tool) {
        let mut claimed: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for (i, adapter) in self.adapters.iter().enumerate() {
            if !adapter.should_adapt(tool) {
                continue;
            }
            let summary = adapter.analyze_transformation(tool);
            for prop in summary.removed.iter().chain(&summary.added).chain(&summary.modified) {
                if let Some(first) = claimed.get(prop) {
                    log::warn!(
                        "tool '{}': adapters {} and {} both touch property '{}'; adapter {} wins (registration order)",
                        tool.name,
                        first,
                        i,
                        prop,
                        first
                    );
                } else {
                    claimed.insert(prop.clone(), i);
                }
            }
        }
    }

    /// The effective tool signatures after all adapters have been applied,
    /// used to build the request sent to the LLM adapter.
    pub async fn effective_signatures(&self) -> Vec<Value> {
        let active = self.tools.active().await;
        let mut out = Vec::with_capacity(active.len());
        for tool in active.values() {
            self.warn_on_adapter_conflicts(tool);
            let mut schema = tool.signature();
            for adapter in &self.adapters {
                if adapter.should_adapt(tool) {
                    schema = adapter.adapt_signature(tool, schema);
                }
            }
            out.push(schema);
        }
        out
    }

    /// Invokes one tool call by name. Validation or lookup failure produces a
    /// failed [`ToolResponse`] rather than a propagated `Err`, per the kernel's
    /// policy of turning tool errors into message-history data.
    pub async fn invoke(&self, call_id: &str, tool_name: &str, llm_provided: Map<String, Value>) -> ToolResponse {
        let Some(tool) = self.tools.get(tool_name).await else {
            return ToolResponse {
                tool_name: tool_name.to_string(),
                tool_call_id: call_id.to_string(),
                response: Value::Null,
                parameters_recorded: llm_provided,
                success: false,
                error: Some(format!("tool '{tool_name}' is not registered")),
            };
        };

        let mut params = llm_provided.clone();
        for adapter in &self.adapters {
            if adapter.should_adapt(&tool) {
                params = adapter.adapt_parameters(tool_name, params);
            }
        }

        let recorded: Map<String, Value> = params
            .iter()
            .filter(|(k, _)| !tool.hidden_params().contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Err(error) = validate_against_schema(&tool.signature(), &params) {
            return ToolResponse {
                tool_name: tool_name.to_string(),
                tool_call_id: call_id.to_string(),
                response: Value::Null,
                parameters_recorded: recorded,
                success: false,
                error: Some(error),
            };
        }

        match tool.invoke(params).await {
            Ok(response) => ToolResponse {
                tool_name: tool_name.to_string(),
                tool_call_id: call_id.to_string(),
                response,
                parameters_recorded: recorded,
                success: true,
                error: None,
            },
            Err(e) => ToolResponse {
                tool_name: tool_name.to_string(),
                tool_call_id: call_id.to_string(),
                response: Value::Null,
                parameters_recorded: recorded,
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Invokes several tool calls concurrently when `parallel` is true,
    /// preserving the original call order in the returned vector regardless of
    /// completion order. One call's failure never cancels the others.
    pub async fn invoke_many(&self, calls: Vec<(String, String, Map<String, Value>)>, parallel: bool) -> Vec<ToolResponse> {
        if !parallel {
            let mut out = Vec::with_capacity(calls.len());
            for (call_id, name, args) in calls {
                out.push(self.invoke(&call_id, &name, args).await);
            }
            return out;
        }
        let futures = calls
            .into_iter()
            .map(|(call_id, name, args)| async move { self.invoke(&call_id, &name, args).await });
        futures::future::join_all(futures).await
    }
}

/// Checks `args` against a tool's generated JSON schema: every required
/// property must be present, and present properties must match their
/// declared type. Returns the first violation found.
fn validate_against_schema(schema: &Value, args: &Map<String, Value>) -> std::result::Result<(), String> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };
    if let Some(Value::Array(required)) = obj.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(format!("missing required parameter '{name}'"));
            }
        }
    }
    if let Some(Value::Object(properties)) = obj.get("properties") {
        for (name, value) in args {
            let Some(expected) = properties.get(name).and_then(|p| p.get("type")).and_then(Value::as_str) else {
                continue;
            };
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "parameter '{name}' expected type '{expected}', got '{}'",
                    json_type_name(value)
                ));
            }
        }
    }
    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
