//! Tool definitions, schema generation, and the scoped tool-set mechanism.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A tool's callable body. Implementors may be genuinely async or return
/// immediately; both are awaited uniformly by the invoker.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: Map<String, Value>) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn invoke(&self, args: Map<String, Value>) -> Result<Value> {
        (self)(args).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn schema_name(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

struct ParamDef {
    name: String,
    ty: ParamType,
    description: String,
    required: bool,
    hidden: bool,
}

/// A callable exposed to the LLM with a JSON-schema signature derived from its
/// declared parameters.
pub struct Tool {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub priority: i32,
    hidden: HashSet<String>,
    schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// The JSON schema presented to the LLM: hidden parameters are never
    /// included.
    pub fn signature(&self) -> Value {
        self.schema.clone()
    }

    pub fn hidden_params(&self) -> &HashSet<String> {
        &self.hidden
    }

    pub async fn invoke(&self, args: Map<String, Value>) -> Result<Value> {
        self.handler.invoke(args).await
    }

    /// Partially applies this tool with fixed values for `bound`, returning a
    /// [`BoundTool`] whose schema is this tool's schema minus the bound (and
    /// hidden) parameters.
    pub fn bind(self: Arc<Self>, bound: Map<String, Value>) -> BoundTool {
        BoundTool {
            tool: self,
            bound,
        }
    }
}

/// Builds a [`Tool`] with a fluent parameter declaration, mirroring the
/// fill-in-then-`build` shape used throughout this crate's configuration types.
pub struct ToolBuilder {
    name: String,
    description: String,
    tags: Vec<String>,
    priority: i32,
    params: Vec<ParamDef>,
    handler: Option<Arc<dyn ToolHandler>>,
}

pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolBuilder {
            name: name.into(),
            description: description.into(),
            tags: Vec::new(),
            priority: 0,
            params: Vec::new(),
            handler: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType, description: impl Into<String>, required: bool) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            ty,
            description: description.into(),
            required,
            hidden: false,
        });
        self
    }

    /// Declares a parameter that must not appear in the LLM-visible schema but
    /// may still be supplied by the caller at invocation time (e.g. an
    /// `agent_handle` or a capability token threaded in by a component).
    pub fn hidden_param(mut self, name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
            hidden: true,
        });
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn handler<H: ToolHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Tool> {
        let handler = self
            .handler
            .ok_or_else(|| Error::validation(format!("tool '{}' has no handler", self.name)))?;

        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut hidden = HashSet::new();
        for p in &self.params {
            if p.hidden {
                hidden.insert(p.name.clone());
                continue;
            }
            let mut prop = Map::new();
            prop.insert("type".into(), Value::from(p.ty.schema_name()));
            prop.insert("description".into(), Value::from(p.description.clone()));
            properties.insert(p.name.clone(), Value::Object(prop));
            if p.required {
                required.push(Value::from(p.name.clone()));
            }
        }
        let mut schema = Map::new();
        schema.insert("type".into(), Value::from("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), Value::Array(required));

        Ok(Tool {
            name: self.name,
            description: self.description,
            tags: self.tags,
            priority: self.priority,
            hidden,
            schema: Value::Object(schema),
            handler,
        })
    }
}

/// A [`Tool`] partially applied with fixed values for some parameters. Presented
/// to the LLM as the underlying tool's schema minus the bound parameters.
pub struct BoundTool {
    tool: Arc<Tool>,
    bound: Map<String, Value>,
}

impl BoundTool {
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn signature(&self) -> Value {
        let mut schema = self.tool.signature();
        if let Some(obj) = schema.as_object_mut() {
            if let Some(Value::Object(props)) = obj.get_mut("properties") {
                for bound_name in self.bound.keys() {
                    props.remove(bound_name);
                }
            }
            if let Some(Value::Array(required)) = obj.get_mut("required") {
                required.retain(|v| v.as_str().map(|s| !self.bound.contains_key(s)).unwrap_or(true));
            }
        }
        schema
    }

    pub async fn invoke(&self, mut args: Map<String, Value>) -> Result<Value> {
        for (k, v) in &self.bound {
            args.insert(k.clone(), v.clone());
        }
        self.tool.invoke(args).await
    }
}

/// How a scoped tool-set change composes with the tools already active.
pub enum ScopeMode {
    /// The active set is exactly the given tools for the scope's duration.
    Replace(Vec<Arc<Tool>>),
    /// The given tools are layered on top of the existing set; later wins on
    /// name collision.
    Append(Vec<Arc<Tool>>),
    /// The active set is filtered to tools for which `filter` returns true.
    Filter(Arc<dyn Fn(&str, &Tool) -> bool + Send + Sync>),
}

/// A named collection of tools with registration, lookup, and a scoped
/// replace/append/filter mechanism whose effect is always fully reversed on
/// scope exit, including error paths.
#[derive(Default)]
pub struct ToolManager {
    tools: Mutex<HashMap<String, Arc<Tool>>>,
}

impl ToolManager {
    pub fn new() -> Self {
        ToolManager {
            tools: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, tool: Tool) {
        let mut tools = self.tools.lock().unwrap();
        tools.insert(tool.name.clone(), Arc::new(tool));
    }

    /// Registers an already-shared tool, used when carrying a tool set over to
    /// a forked agent without rebuilding each [`Tool`].
    pub async fn register_arc(&self, tool: Arc<Tool>) {
        let mut tools = self.tools.lock().unwrap();
        tools.insert(tool.name.clone(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.lock().unwrap().get(name).cloned()
    }

    /// Returns tools whose name matches `pattern`: either an exact name or a
    /// `tag:*`/`prefix*` wildcard.
    pub async fn lookup(&self, pattern: &str) -> Vec<Arc<Tool>> {
        let tools = self.tools.lock().unwrap();
        if let Some(tag) = pattern.strip_suffix(":*") {
            tools
                .values()
                .filter(|t| t.tags.iter().any(|x| x == tag))
                .cloned()
                .collect()
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            tools.values().filter(|t| t.name.starts_with(prefix)).cloned().collect()
        } else {
            tools.get(pattern).cloned().into_iter().collect()
        }
    }

    pub async fn active(&self) -> HashMap<String, Arc<Tool>> {
        self.tools.lock().unwrap().clone()
    }

    /// Replaces the active tool set wholesale, used to restore a snapshot taken
    /// via [`ToolManager::active`].
    pub async fn restore(&self, tools: HashMap<String, Arc<Tool>>) {
        *self.tools.lock().unwrap() = tools;
    }

    /// Applies `mode` to the active tool set and returns a guard that restores
    /// the prior set when dropped, regardless of how the scope's body exits.
    pub async fn scope(&self, mode: ScopeMode) -> ToolScopeGuard<'_> {
        let mut tools = self.tools.lock().unwrap();
        let saved = tools.clone();
        match mode {
            ScopeMode::Replace(new_tools) => {
                tools.clear();
                for t in new_tools {
                    tools.insert(t.name.clone(), t);
                }
            }
            ScopeMode::Append(extra) => {
                for t in extra {
                    tools.insert(t.name.clone(), t);
                }
            }
            ScopeMode::Filter(predicate) => {
                tools.retain(|name, t| predicate(name, t));
            }
        }
        drop(tools);
        ToolScopeGuard {
            manager: self,
            saved: Some(saved),
        }
    }
}

/// Restores the tool set captured at [`ToolManager::scope`] entry when dropped,
/// on every exit path including panics and early `?` returns.
pub struct ToolScopeGuard<'a> {
    manager: &'a ToolManager,
    saved: Option<HashMap<String, Arc<Tool>>>,
}

impl Drop for ToolScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.manager.tools.lock().unwrap() = saved;
        }
    }
}
