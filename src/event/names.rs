//! Canonical event name taxonomy.
//!
//! Every name follows `domain:action[:phase]`. Names marked "extension point
//! only" are never dispatched by the kernel itself; they exist so external
//! integrations (citation providers, web fetchers, template compilers, cache
//! layers) share one vocabulary instead of inventing their own.

/// Fired once all components are installed, before the agent reaches `ready`.
pub const AGENT_INIT_BEFORE: &str = "agent:init:before";
pub const AGENT_INIT_AFTER: &str = "agent:init:after";
pub const AGENT_CLOSE_BEFORE: &str = "agent:close:before";
pub const AGENT_CLOSE_AFTER: &str = "agent:close:after";
pub const AGENT_STATE_CHANGE: &str = "agent:state:change";
pub const AGENT_FORK_BEFORE: &str = "agent:fork:before";
pub const AGENT_FORK_AFTER: &str = "agent:fork:after";
/// Extension point only: agents merging forked history back into a parent.
pub const AGENT_MERGE_BEFORE: &str = "agent:merge:before";
pub const AGENT_MERGE_AFTER: &str = "agent:merge:after";

pub const MESSAGE_CREATE_BEFORE: &str = "message:create:before";
pub const MESSAGE_CREATE_AFTER: &str = "message:create:after";
pub const MESSAGE_APPEND_BEFORE: &str = "message:append:before";
pub const MESSAGE_APPEND_AFTER: &str = "message:append:after";
pub const MESSAGE_REPLACE_BEFORE: &str = "message:replace:before";
pub const MESSAGE_REPLACE_AFTER: &str = "message:replace:after";
pub const MESSAGE_RENDER_BEFORE: &str = "message:render:before";
pub const MESSAGE_RENDER_AFTER: &str = "message:render:after";
/// Extension point only: per-part rendering hook used by template expansion.
pub const MESSAGE_PART_RENDER: &str = "message:part:render";

pub const LLM_COMPLETE_BEFORE: &str = "llm:complete:before";
pub const LLM_COMPLETE_AFTER: &str = "llm:complete:after";
pub const LLM_COMPLETE_ERROR: &str = "llm:complete:error";
/// Extension point only: the execute loop always calls `complete`, never
/// `stream` — these exist for callers that drive `LlmAdapter::stream`
/// directly, outside the orchestrated loop, and want a shared vocabulary.
pub const LLM_STREAM_BEFORE: &str = "llm:stream:before";
pub const LLM_STREAM_CHUNK: &str = "llm:stream:chunk";
pub const LLM_STREAM_AFTER: &str = "llm:stream:after";
pub const LLM_STREAM_ERROR: &str = "llm:stream:error";
/// Extension point only: structured extraction built atop completion.
pub const LLM_EXTRACT_BEFORE: &str = "llm:extract:before";
pub const LLM_EXTRACT_AFTER: &str = "llm:extract:after";
pub const LLM_EXTRACT_ERROR: &str = "llm:extract:error";

pub const TOOL_CALL_BEFORE: &str = "tool:call:before";
pub const TOOL_CALL_AFTER: &str = "tool:call:after";
pub const TOOL_CALL_ERROR: &str = "tool:call:error";
pub const TOOLS_PROVIDE: &str = "tools:provide";

pub const EXECUTE_BEFORE: &str = "execute:before";
pub const EXECUTE_AFTER: &str = "execute:after";
pub const EXECUTE_ERROR: &str = "execute:error";
pub const EXECUTE_ITERATION_BEFORE: &str = "execute:iteration:before";
pub const EXECUTE_ITERATION_AFTER: &str = "execute:iteration:after";
pub const EXECUTE_ITERATION_ERROR: &str = "execute:iteration:error";

pub const MODE_ENTERING: &str = "mode:entering";
pub const MODE_ENTERED: &str = "mode:entered";
pub const MODE_EXITING: &str = "mode:exiting";
pub const MODE_EXITED: &str = "mode:exited";
pub const MODE_ERROR: &str = "mode:error";
pub const MODE_TRANSITION: &str = "mode:transition";

/// Extension point only: context providers contributing template values.
pub const CONTEXT_PROVIDER_BEFORE: &str = "context:provider:before";
pub const CONTEXT_PROVIDER_AFTER: &str = "context:provider:after";
/// Extension point only: template compilation for rendered content parts.
pub const TEMPLATE_COMPILE_BEFORE: &str = "template:compile:before";
pub const TEMPLATE_COMPILE_AFTER: &str = "template:compile:after";
/// Extension point only: write-through persistence hook lifecycle.
pub const STORAGE_WRITE_BEFORE: &str = "storage:write:before";
pub const STORAGE_WRITE_AFTER: &str = "storage:write:after";
/// Extension point only: external cache layers.
pub const CACHE_HIT: &str = "cache:hit";
pub const CACHE_MISS: &str = "cache:miss";
/// Extension point only: tool/message validation middlewares.
pub const VALIDATION_BEFORE: &str = "validation:before";
pub const VALIDATION_AFTER: &str = "validation:after";
/// Extension point only: citation extraction extensions.
pub const CITATIONS_EXTRACT_BEFORE: &str = "citations:extract:before";
pub const CITATIONS_EXTRACT_AFTER: &str = "citations:extract:after";
/// Extension point only: web fetcher extensions.
pub const FETCH_BEFORE: &str = "fetch:before";
pub const FETCH_AFTER: &str = "fetch:after";
pub const FETCH_ERROR: &str = "fetch:error";
/// Extension point only: conversation summarization extensions.
pub const SUMMARY_BEFORE: &str = "summary:before";
pub const SUMMARY_AFTER: &str = "summary:after";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_domain_action_shape() {
        for name in [
            AGENT_INIT_BEFORE,
            MESSAGE_APPEND_AFTER,
            LLM_COMPLETE_ERROR,
            TOOL_CALL_BEFORE,
            EXECUTE_ITERATION_AFTER,
            MODE_TRANSITION,
        ] {
            assert!(name.contains(':'), "{name} should contain a domain separator");
        }
    }
}
