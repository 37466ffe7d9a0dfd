//! # Agent Kernel
//!
//! A concurrent runtime kernel for LLM-driven agents: a priority-ordered event
//! bus, a content-addressed and versioned message store, schema-derived tool
//! dispatch, and scoped execution modes with isolation levels.
//!
//! The kernel defines no wire format and ships no concrete LLM provider: hosts
//! implement [`llm::LlmAdapter`] for whatever model server they target, and
//! [`agent::Agent`] drives the call-then-dispatch loop against it.
//!
//! ## Quick start
//!
//! ```no_run
//! use agent_kernel::{Agent, AgentConfig};
//!
//! # async fn run() -> agent_kernel::Result<()> {
//! let config = AgentConfig::builder().model("local-model").build()?;
//! let agent = Agent::new(config, Vec::new()).await?;
//! // agent.set_adapter(...).await;
//! // let reply = agent.call("hello").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **identifier**: time-ordered 128-bit identifiers for messages and agents
//! - **event**: priority-ordered pub/sub bus ([`event::EventRouter`]) plus the
//!   canonical event name taxonomy ([`event::names`])
//! - **sync_bridge**: bridges blocking callers into the async event bus
//! - **message**: the immutable message data model
//! - **store**: content-addressed message persistence and weak ownership tracking
//! - **version**: append-only version history over message-id sequences
//! - **message_list**: the mutable, indexable view over a version history
//! - **tool**: tool definitions, schema generation, and scoped tool sets
//! - **tool_invoker**: dispatches tool calls, applying registered adapters
//! - **llm**: the [`llm::LlmAdapter`] provider boundary
//! - **component**: the plugin/extension contract
//! - **mode**: scoped handler sessions with setup/teardown and isolation levels
//! - **task**: background task lifecycle management
//! - **config**: agent configuration
//! - **agent**: the root aggregate tying every module together

pub mod agent;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod identifier;
pub mod llm;
pub mod message;
pub mod message_list;
pub mod mode;
pub mod store;
pub mod sync_bridge;
pub mod task;
pub mod tool;
pub mod tool_invoker;
pub mod version;

pub use agent::{Agent, AgentState};
pub use component::{Component, HandlerDeclaration};
pub use config::{AgentConfig, AgentConfigBuilder};
pub use error::{Error, Result};
pub use event::{EventContext, EventHandler, EventRouter, SubscriptionToken};
pub use identifier::Identifier;
pub use llm::{LlmAdapter, LlmResponse, LlmStreamChunk, TokenUsage};
pub use message::{ContentPart, ImageDetail, ImagePart, Message, MessageRole, TextPart, ToolCall};
pub use message_list::MessageList;
pub use mode::{IsolationLevel, ModeHandler, ModeManager};
pub use store::{AgentHandle, MessageRegistry, MessageStore, PersistenceHook};
pub use sync_bridge::SyncBridge;
pub use task::{TaskId, TaskRegistry, TaskState};
pub use tool::{tool, BoundTool, ParamType, ScopeMode, Tool, ToolBuilder, ToolHandler, ToolManager, ToolScopeGuard};
pub use tool_invoker::{ToolAdapter, ToolInvoker, ToolResponse, TransformationSummary};
pub use version::{Version, VersionManager};

/// Convenience module re-exporting the types most hosts need to construct and
/// drive an [`Agent`].
pub mod prelude {
    pub use crate::{
        tool, Agent, AgentConfig, Component, ContentPart, Error, EventContext, EventHandler,
        IsolationLevel, LlmAdapter, LlmResponse, Message, MessageRole, ModeHandler, Result, Tool,
        ToolAdapter, ToolBuilder, ToolHandler,
    };
}
