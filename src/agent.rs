//! The root aggregate: owns messages, tools, events, modes, and background
//! tasks, and drives the iterative LLM-call-then-tool-dispatch loop.

pub use crate::config::{AgentConfig, AgentConfigBuilder};

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::component::Component;
use crate::error::{Error, Result};
use crate::event::{names, EventRouter};
use crate::identifier::Identifier;
use crate::llm::LlmAdapter;
use crate::message::{ContentPart, Message, MessageRole, TextPart, ToolCall};
use crate::message_list::MessageList;
use crate::mode::{IsolationLevel, ModeHandler, ModeManager};
use crate::store::{AgentHandle, MessageRegistry, MessageStore};
use crate::sync_bridge::SyncBridge;
use crate::task::TaskRegistry;
use crate::tool::{tool, Tool, ToolManager};
use crate::tool_invoker::{ToolAdapter, ToolInvoker};

/// A snapshot of LLM config and tool set taken on entering a `Config`-isolated
/// mode, restored when that mode exits.
struct ConfigScope {
    config: AgentConfig,
    tools: std::collections::HashMap<String, Arc<Tool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    Ready,
    Executing,
    Closing,
    Closed,
}

impl AgentState {
    fn as_str(self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::Ready => "ready",
            AgentState::Executing => "executing",
            AgentState::Closing => "closing",
            AgentState::Closed => "closed",
        }
    }
}

/// The root runtime object. Cheap to clone (everything interior is `Arc`-backed)
/// so handlers and tools can hold a reference back to the agent that owns them.
pub struct Agent {
    handle: Arc<AgentHandle>,
    config: Mutex<AgentConfig>,
    events: Arc<EventRouter>,
    bridge: SyncBridge,
    store: MessageStore,
    registry: Arc<MessageRegistry>,
    messages: Arc<MessageList>,
    tools: Arc<ToolManager>,
    modes: Arc<ModeManager>,
    tasks: Arc<TaskRegistry>,
    adapter: Mutex<Option<Arc<dyn LlmAdapter>>>,
    tool_adapters: Mutex<Vec<Arc<dyn ToolAdapter>>>,
    state: Mutex<AgentState>,
    cancel: CancellationToken,
    context: Mutex<Map<String, Value>>,
    /// Stack of `Config`-isolation snapshots, one per currently active
    /// `Config`-isolated mode, in entry order.
    config_scopes: Mutex<Vec<ConfigScope>>,
}

impl Agent {
    /// Constructs a new agent, installing every component before reaching
    /// `ready`. Initialization blocks on every component's `wait_on_ready`
    /// background task.
    pub async fn new(config: AgentConfig, components: Vec<Arc<dyn Component>>) -> Result<Agent> {
        let handle = Arc::new(AgentHandle {
            agent_id: Identifier::new(),
        });
        let events = Arc::new(EventRouter::new());
        let bridge = SyncBridge::new(events.clone())?;
        let store = MessageStore::new();
        let registry = Arc::new(MessageRegistry::new());
        let messages = Arc::new(MessageList::new(store.clone(), registry.clone(), handle.clone(), events.clone()));
        let tools = Arc::new(ToolManager::new());
        let modes = Arc::new(ModeManager::new());
        let tasks = TaskRegistry::new();

        let agent = Agent {
            handle,
            config: Mutex::new(config),
            events,
            bridge,
            store,
            registry,
            messages,
            tools,
            modes,
            tasks,
            adapter: Mutex::new(None),
            tool_adapters: Mutex::new(Vec::new()),
            state: Mutex::new(AgentState::Initializing),
            cancel: CancellationToken::new(),
            context: Mutex::new(Map::new()),
            config_scopes: Mutex::new(Vec::new()),
        };

        agent.events.apply(names::AGENT_INIT_BEFORE, Map::new()).await;
        for component in &components {
            component.install(&agent).await?;
            for decl in component.handler_declarations() {
                agent.events.on(decl.event, decl.handler, decl.priority).await;
            }
        }
        agent.tasks.ready_gate(Some(Duration::from_secs(30))).await?;
        agent.set_state(AgentState::Ready).await;
        agent.events.apply(names::AGENT_INIT_AFTER, Map::new()).await;
        Ok(agent)
    }

    /// Transitions to `next`, firing `agent:state:change` with the old and
    /// new state names.
    async fn set_state(&self, next: AgentState) {
        let previous = {
            let mut guard = self.state.lock().await;
            let previous = *guard;
            *guard = next;
            previous
        };
        if previous != next {
            let mut params = Map::new();
            params.insert("from".into(), Value::from(previous.as_str()));
            params.insert("to".into(), Value::from(next.as_str()));
            self.events.apply(names::AGENT_STATE_CHANGE, params).await;
        }
    }

    pub fn id(&self) -> Identifier {
        self.handle.agent_id
    }

    pub async fn state(&self) -> AgentState {
        *self.state.lock().await
    }

    pub fn events(&self) -> &Arc<EventRouter> {
        &self.events
    }

    pub fn bridge(&self) -> &SyncBridge {
        &self.bridge
    }

    pub fn tools(&self) -> &Arc<ToolManager> {
        &self.tools
    }

    pub fn modes(&self) -> &Arc<ModeManager> {
        &self.modes
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn messages(&self) -> &Arc<MessageList> {
        &self.messages
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn set_adapter(&self, adapter: Arc<dyn LlmAdapter>) {
        *self.adapter.lock().await = Some(adapter);
    }

    pub async fn install_tool_adapter(&self, adapter: Arc<dyn ToolAdapter>) {
        self.tool_adapters.lock().await.push(adapter);
    }

    pub async fn context_get(&self, key: &str) -> Option<Value> {
        self.context.lock().await.get(key).cloned()
    }

    pub async fn context_set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.lock().await.insert(key.into(), value.into());
    }

    /// Appends a user-role message built from plain text.
    pub async fn append(&self, content: impl Into<String>) -> Result<()> {
        self.events.apply(names::MESSAGE_CREATE_BEFORE, Map::new()).await;
        let message = Message::user(vec![ContentPart::Text(TextPart::new(content.into()))]);
        self.events.apply(names::MESSAGE_CREATE_AFTER, Map::new()).await;
        self.messages.append(message).await
    }

    async fn invoker(&self) -> ToolInvoker {
        ToolInvoker::new(self.tools.clone(), self.tool_adapters.lock().await.clone())
    }

    /// One convenience turn: appends `input` as a user message, runs the
    /// execute loop to completion, and returns the final assistant message.
    pub async fn call(&self, input: impl Into<String>) -> Result<Message> {
        self.append(input).await?;
        let (max_iterations, auto_execute_tools) = {
            let config = self.config.lock().await;
            (config.max_iterations, config.auto_execute_tools)
        };
        let produced = self.execute(max_iterations, auto_execute_tools).await?;
        produced
            .into_iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .ok_or_else(|| Error::other("execute loop produced no assistant message"))
    }

    /// Runs the iterative LLM-call-then-tool-dispatch loop, returning only the
    /// messages newly produced during this call (not pre-existing history).
    pub async fn execute(&self, max_iterations: usize, auto_execute_tools: bool) -> Result<Vec<Message>> {
        if max_iterations == 0 {
            return Ok(Vec::new());
        }
        self.set_state(AgentState::Executing).await;
        self.events.apply(names::EXECUTE_BEFORE, Map::new()).await;
        let invoker = self.invoker().await;
        let mut produced = Vec::new();
        // A fresh child per call: cancelling the agent cancels every in-flight
        // call, but this call's own token never reaches back up to the parent
        // or sideways into a sibling fork's calls.
        let call_token = self.cancel.child_token();

        let result = self
            .execute_inner(max_iterations, auto_execute_tools, &invoker, &call_token, &mut produced)
            .await;

        match &result {
            Ok(_) => {
                self.events.apply(names::EXECUTE_AFTER, Map::new()).await;
            }
            Err(e) => {
                let mut params = Map::new();
                params.insert("error".into(), Value::from(e.to_string()));
                self.events.apply(names::EXECUTE_ERROR, params).await;
            }
        }
        self.set_state(AgentState::Ready).await;
        result.map(|_| produced)
    }

    async fn execute_inner(
        &self,
        max_iterations: usize,
        auto_execute_tools: bool,
        invoker: &ToolInvoker,
        call_token: &CancellationToken,
        produced: &mut Vec<Message>,
    ) -> Result<()> {
        for i in 0..max_iterations {
            let (new_messages, keep_going) = self.execute_one_iteration(i, auto_execute_tools, invoker, call_token).await?;
            produced.extend(new_messages);
            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    /// Runs one iteration of the loop body: a single LLM call, plus tool
    /// dispatch if the response carries tool calls. Returns the messages this
    /// iteration appended and whether the loop should keep iterating. Shared
    /// by both `execute` (which collects every iteration's messages into one
    /// `Vec`) and `execute_stream` (which yields them as they're produced).
    /// Fires `execute:iteration:error` on any failure, distinct from the
    /// call-level `execute:error` its caller fires once the whole loop unwinds.
    async fn execute_one_iteration(
        &self,
        i: usize,
        auto_execute_tools: bool,
        invoker: &ToolInvoker,
        call_token: &CancellationToken,
    ) -> Result<(Vec<Message>, bool)> {
        let result = self.execute_one_iteration_inner(i, auto_execute_tools, invoker, call_token).await;
        if let Err(e) = &result {
            let mut params = Map::new();
            params.insert("iteration".into(), Value::from(i as i64));
            params.insert("error".into(), Value::from(e.to_string()));
            self.events.apply(names::EXECUTE_ITERATION_ERROR, params).await;
        }
        result
    }

    async fn execute_one_iteration_inner(
        &self,
        i: usize,
        auto_execute_tools: bool,
        invoker: &ToolInvoker,
        call_token: &CancellationToken,
    ) -> Result<(Vec<Message>, bool)> {
        if call_token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.apply_pending_mode_transition().await?;

        let mut params = Map::new();
        params.insert("iteration".into(), Value::from(i as i64));
        self.events.apply(names::EXECUTE_ITERATION_BEFORE, params).await;

        self.events.apply(names::MESSAGE_RENDER_BEFORE, Map::new()).await;
        let rendered = self.messages.messages().await?;
        self.events.apply(names::MESSAGE_RENDER_AFTER, Map::new()).await;

        self.events.apply(names::TOOLS_PROVIDE, Map::new()).await;
        let tool_signatures = invoker.effective_signatures().await;
        let adapter = self
            .adapter
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::config("no LLM adapter installed"))?;

        let (adapter_config, model) = {
            let config = self.config.lock().await;
            (config.adapter_config.clone(), config.model.clone())
        };

        self.events.apply(names::LLM_COMPLETE_BEFORE, Map::new()).await;
        let response = match adapter.complete(&rendered, &tool_signatures, &adapter_config).await {
            Ok(r) => r,
            Err(e) => {
                let mut params = Map::new();
                params.insert("error".into(), Value::from(e.to_string()));
                self.events.apply(names::LLM_COMPLETE_ERROR, params).await;
                return Err(e);
            }
        };
        self.events.apply(names::LLM_COMPLETE_AFTER, Map::new()).await;

        if !response.tool_calls.is_empty() && auto_execute_tools {
            let parallel = adapter.supports_parallel_tool_calls(&model);
            let new_messages = self.run_tool_calls(i, response.content, response.tool_calls, invoker, parallel).await?;
            self.messages.extend(new_messages.clone()).await?;

            let mut params = Map::new();
            params.insert("iteration".into(), Value::from(i as i64));
            self.events.apply(names::EXECUTE_ITERATION_AFTER, params).await;
            return Ok((new_messages, true));
        }

        let mut content_parts = Vec::new();
        if !response.content.is_empty() {
            content_parts.push(ContentPart::Text(TextPart::new(response.content)));
        }
        let final_msg = Message::assistant(content_parts).with_iteration_index(i);
        self.messages.append(final_msg.clone()).await?;

        let mut params = Map::new();
        params.insert("iteration".into(), Value::from(i as i64));
        self.events.apply(names::EXECUTE_ITERATION_AFTER, params).await;
        Ok((vec![final_msg], false))
    }

    /// Like [`Agent::execute`], but yields each newly produced message as soon
    /// as its iteration completes instead of collecting the whole call into
    /// one `Vec`. Built over `futures::stream::unfold` driving the same
    /// per-iteration body `execute` uses, with a small internal queue so one
    /// iteration's batch of messages (e.g. an assistant message plus its tool
    /// results) is drained one item at a time.
    pub fn execute_stream(&self, max_iterations: usize, auto_execute_tools: bool) -> futures::stream::BoxStream<'_, Result<Message>> {
        use futures::StreamExt;

        enum Phase {
            NotStarted,
            Running {
                invoker: ToolInvoker,
                call_token: CancellationToken,
                i: usize,
            },
            Finishing,
            Done,
        }

        struct State<'a> {
            agent: &'a Agent,
            phase: Phase,
            queue: std::collections::VecDeque<Message>,
            max_iterations: usize,
            auto_execute_tools: bool,
        }

        let initial = State {
            agent: self,
            phase: Phase::NotStarted,
            queue: std::collections::VecDeque::new(),
            max_iterations,
            auto_execute_tools,
        };

        futures::stream::unfold(initial, |mut state| async move {
            loop {
                if let Some(msg) = state.queue.pop_front() {
                    return Some((Ok(msg), state));
                }
                match &mut state.phase {
                    Phase::NotStarted => {
                        if state.max_iterations == 0 {
                            state.phase = Phase::Done;
                            return None;
                        }
                        state.agent.set_state(AgentState::Executing).await;
                        state.agent.events.apply(names::EXECUTE_BEFORE, Map::new()).await;
                        let invoker = state.agent.invoker().await;
                        let call_token = state.agent.cancel.child_token();
                        state.phase = Phase::Running { invoker, call_token, i: 0 };
                    }
                    Phase::Running { invoker, call_token, i } => {
                        if *i >= state.max_iterations {
                            state.phase = Phase::Finishing;
                            continue;
                        }
                        let result = state
                            .agent
                            .execute_one_iteration(*i, state.auto_execute_tools, invoker, call_token)
                            .await;
                        match result {
                            Ok((messages, keep_going)) => {
                                state.queue.extend(messages);
                                if keep_going {
                                    *i += 1;
                                } else {
                                    state.phase = Phase::Finishing;
                                }
                            }
                            Err(e) => {
                                let mut params = Map::new();
                                params.insert("error".into(), Value::from(e.to_string()));
                                state.agent.events.apply(names::EXECUTE_ERROR, params).await;
                                state.agent.set_state(AgentState::Ready).await;
                                state.phase = Phase::Done;
                                return Some((Err(e), state));
                            }
                        }
                    }
                    Phase::Finishing => {
                        state.agent.events.apply(names::EXECUTE_AFTER, Map::new()).await;
                        state.agent.set_state(AgentState::Ready).await;
                        state.phase = Phase::Done;
                    }
                    Phase::Done => return None,
                }
            }
        })
        .boxed()
    }

    /// Builds the assistant+tool-result message batch for one iteration,
    /// honoring the sequencing policy: one assistant message carrying every
    /// tool call when the model supports parallel calls, otherwise one
    /// assistant/tool pair per call.
    async fn run_tool_calls(
        &self,
        iteration: usize,
        assistant_text: String,
        tool_calls: Vec<ToolCall>,
        invoker: &ToolInvoker,
        parallel: bool,
    ) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        if parallel {
            let mut content_parts = Vec::new();
            if !assistant_text.is_empty() {
                content_parts.push(ContentPart::Text(TextPart::new(assistant_text)));
            }
            let mut assistant_msg = Message::assistant(content_parts).with_iteration_index(iteration);
            assistant_msg.tool_calls = tool_calls.clone();
            out.push(assistant_msg);

            for tc in &tool_calls {
                self.fire_tool_call_before(tc).await;
            }
            let calls: Vec<_> = tool_calls
                .iter()
                .map(|tc| {
                    (
                        tc.call_id.clone(),
                        tc.tool_name.clone(),
                        tc.arguments_json.as_object().cloned().unwrap_or_default(),
                    )
                })
                .collect();
            let responses = invoker.invoke_many(calls, true).await;
            for (tc, resp) in tool_calls.iter().zip(responses.iter()) {
                self.fire_tool_call_after(tc, resp).await;
                out.push(self.tool_response_to_message(tc, resp, iteration));
            }
        } else {
            for (idx, tc) in tool_calls.iter().enumerate() {
                let mut content_parts = Vec::new();
                if idx == 0 && !assistant_text.is_empty() {
                    content_parts.push(ContentPart::Text(TextPart::new(assistant_text.clone())));
                }
                let mut assistant_msg = Message::assistant(content_parts).with_iteration_index(iteration);
                assistant_msg.tool_calls = vec![tc.clone()];
                out.push(assistant_msg);

                self.fire_tool_call_before(tc).await;
                let args = tc.arguments_json.as_object().cloned().unwrap_or_default();
                let resp = invoker.invoke(&tc.call_id, &tc.tool_name, args).await;
                self.fire_tool_call_after(tc, &resp).await;
                out.push(self.tool_response_to_message(tc, &resp, iteration));
            }
        }
        Ok(out)
    }

    async fn fire_tool_call_before(&self, call: &ToolCall) {
        let mut params = Map::new();
        params.insert("tool_call_id".into(), Value::from(call.call_id.clone()));
        params.insert("tool_name".into(), Value::from(call.tool_name.clone()));
        self.events.apply(names::TOOL_CALL_BEFORE, params).await;
    }

    async fn fire_tool_call_after(&self, call: &ToolCall, response: &crate::tool_invoker::ToolResponse) {
        let mut params = Map::new();
        params.insert("tool_call_id".into(), Value::from(call.call_id.clone()));
        params.insert("tool_name".into(), Value::from(call.tool_name.clone()));
        params.insert("success".into(), Value::from(response.success));
        if let Some(err) = &response.error {
            params.insert("error".into(), Value::from(err.clone()));
            self.events.apply(names::TOOL_CALL_ERROR, params.clone()).await;
        }
        self.events.apply(names::TOOL_CALL_AFTER, params).await;
    }

    fn tool_response_to_message(
        &self,
        call: &ToolCall,
        response: &crate::tool_invoker::ToolResponse,
        iteration: usize,
    ) -> Message {
        let text = if response.success {
            match &response.response {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        } else {
            response.error.clone().unwrap_or_else(|| "tool failed".to_string())
        };
        let mut msg = Message::tool_result(call.call_id.clone(), call.tool_name.clone(), vec![ContentPart::Text(TextPart::new(text))])
            .with_iteration_index(iteration);
        msg = msg.with_metadata("success", response.success);
        msg
    }

    async fn apply_pending_mode_transition(&self) -> Result<()> {
        use crate::mode::PendingTransition;
        if let Some(transition) = self.modes.take_pending_transition().await {
            let mut params = Map::new();
            let result = match &transition {
                PendingTransition::Switch(name) => {
                    params.insert("transition".into(), Value::from("switch"));
                    params.insert("mode".into(), Value::from(name.clone()));
                    self.enter_mode(name).await
                }
                PendingTransition::Exit => {
                    params.insert("transition".into(), Value::from("exit"));
                    self.exit_mode().await
                }
            };
            self.events.apply(names::MODE_TRANSITION, params).await;
            if let Err(e) = &result {
                log::warn!("mode transition {transition:?} failed: {e}");
                let mut params = Map::new();
                params.insert("error".into(), Value::from(e.to_string()));
                self.events.apply(names::MODE_ERROR, params).await;
            } else {
                log::debug!("mode transition {transition:?} applied");
            }
            result?;
        }
        Ok(())
    }

    /// Registers a mode. When `invokable` is true, also registers a tool
    /// named `enter_mode_<name>` whose only effect is scheduling a switch into
    /// this mode at the next safe point — giving the LLM a way to request the
    /// mode without the kernel entering it mid-iteration.
    pub async fn register_mode(
        &self,
        name: impl Into<String>,
        isolation: IsolationLevel,
        invokable: bool,
        metadata: Map<String, Value>,
        handler: Arc<dyn ModeHandler>,
    ) {
        let name = name.into();
        self.modes.register(name.clone(), isolation, invokable, metadata, handler).await;
        if invokable {
            let modes = self.modes.clone();
            let target = name.clone();
            let entry_tool = tool(format!("enter_mode_{name}"), format!("Switches into the '{name}' mode"))
                .handler(move |_args| {
                    let modes = modes.clone();
                    let target = target.clone();
                    async move {
                        modes.schedule_mode_switch(target).await;
                        Ok(Value::from("scheduled"))
                    }
                })
                .build()
                .expect("generated mode-entry tool is always valid");
            self.tools.register(entry_tool).await;
        }
    }

    pub async fn enter_mode(&self, name: &str) -> Result<()> {
        let mut params = Map::new();
        params.insert("mode".into(), Value::from(name));
        self.events.apply(names::MODE_ENTERING, params).await;

        // Isolation `Config` snapshots the LLM config and tool set before the
        // mode's own setup runs, so its handler can freely mutate either.
        let already_active = self.modes.active_mode_name().await.as_deref() == Some(name);
        if !already_active && self.modes.isolation_of(name).await == Some(IsolationLevel::Config) {
            let snapshot = ConfigScope {
                config: self.config.lock().await.clone(),
                tools: self.tools.active().await,
            };
            self.config_scopes.lock().await.push(snapshot);
        }

        self.modes.enter(name, &self.messages).await?;
        let mut params = Map::new();
        params.insert("mode".into(), Value::from(name));
        self.events.apply(names::MODE_ENTERED, params).await;
        Ok(())
    }

    pub async fn exit_mode(&self) -> Result<()> {
        let name = self.modes.active_mode_name().await;
        let isolation = self.modes.active_isolation().await;
        let mut params = Map::new();
        if let Some(n) = &name {
            params.insert("mode".into(), Value::from(n.clone()));
        }
        self.events.apply(names::MODE_EXITING, params).await;
        self.modes.exit(&self.messages).await?;

        if isolation == Some(IsolationLevel::Config) {
            if let Some(scope) = self.config_scopes.lock().await.pop() {
                *self.config.lock().await = scope.config;
                self.tools.restore(scope.tools).await;
            }
        }

        let mut params = Map::new();
        if let Some(n) = &name {
            params.insert("mode".into(), Value::from(n.clone()));
        }
        self.events.apply(names::MODE_EXITED, params).await;
        Ok(())
    }

    /// Mutates the agent's LLM configuration in place, e.g. from within a
    /// `Config`-isolated mode's handler.
    pub async fn update_config(&self, f: impl FnOnce(&mut AgentConfig)) {
        f(&mut self.config.lock().await);
    }

    pub async fn config(&self) -> AgentConfig {
        self.config.lock().await.clone()
    }

    /// Creates a sibling agent with a fresh event router and independent
    /// version history. When `include_messages` is true, current messages are
    /// deep-copied under fresh identifiers owned by the fork; the registered
    /// tool set is carried over by reference (tools are stateless callables).
    pub async fn fork(&self, include_messages: bool) -> Result<Agent> {
        let mut params = Map::new();
        params.insert("include_messages".into(), Value::from(include_messages));
        self.events.apply(names::AGENT_FORK_BEFORE, params).await;

        let new_handle = Arc::new(AgentHandle {
            agent_id: Identifier::new(),
        });
        let new_store = MessageStore::new();
        let new_registry = Arc::new(MessageRegistry::new());
        let new_events = Arc::new(EventRouter::new());
        let new_list = MessageList::new(new_store.clone(), new_registry.clone(), new_handle.clone(), new_events.clone());

        if include_messages {
            let current = self.messages.messages().await?;
            let copied: Vec<Message> = current
                .into_iter()
                .map(|mut m| {
                    m.id = Identifier::new();
                    m
                })
                .collect();
            new_list.extend(copied).await?;
        }

        let new_bridge = SyncBridge::new(new_events.clone())?;
        let new_tools = Arc::new(ToolManager::new());
        for (_, tool) in self.tools.active().await {
            new_tools.register_arc(tool).await;
        }

        let adapter = self.adapter.lock().await.clone();
        let tool_adapters = self.tool_adapters.lock().await.clone();

        let fork = Agent {
            handle: new_handle,
            config: Mutex::new(self.config.lock().await.clone()),
            events: new_events,
            bridge: new_bridge,
            store: new_store,
            registry: new_registry,
            messages: Arc::new(new_list),
            tools: new_tools,
            modes: Arc::new(ModeManager::new()),
            tasks: TaskRegistry::new(),
            adapter: Mutex::new(adapter),
            tool_adapters: Mutex::new(tool_adapters),
            state: Mutex::new(AgentState::Ready),
            cancel: CancellationToken::new(),
            context: Mutex::new(self.context.lock().await.clone()),
            config_scopes: Mutex::new(Vec::new()),
        };

        fork.events.apply(names::AGENT_FORK_AFTER, Map::new()).await;
        Ok(fork)
    }

    /// Cancels all pending background tasks and drains the event router's
    /// outstanding fire-and-forget dispatches. The sync bridge's dedicated
    /// runtime is torn down when the last `Agent` referencing it is dropped.
    pub async fn close(&self) -> Result<()> {
        self.events.apply(names::AGENT_CLOSE_BEFORE, Map::new()).await;
        self.set_state(AgentState::Closing).await;
        self.cancel.cancel();
        self.tasks.cancel_all().await;
        self.events.join(Some(Duration::from_secs(5))).await?;
        self.set_state(AgentState::Closed).await;
        self.events.apply(names::AGENT_CLOSE_AFTER, Map::new()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockAdapter;
    use crate::llm::{LlmResponse, TokenUsage};
    use crate::tool::{ParamType, ToolBuilder};

    async fn ready_agent() -> Agent {
        let config = AgentConfig::builder().model("mock-model").build().unwrap();
        Agent::new(config, Vec::new()).await.unwrap()
    }

    #[tokio::test]
    async fn max_iterations_zero_returns_immediately_with_no_messages() {
        let agent = ready_agent().await;
        let produced = agent.execute(0, true).await.unwrap();
        assert!(produced.is_empty());
    }

    #[tokio::test]
    async fn scenario_a_parallel_tool_turn() {
        let agent = ready_agent().await;
        agent
            .tools
            .register(
                ToolBuilder::new("get_weather", "d")
                    .param("location", ParamType::String, "loc", true)
                    .handler(|_args| async move { Ok(Value::from("sunny")) })
                    .build()
                    .unwrap(),
            )
            .await;
        agent
            .tools
            .register(
                ToolBuilder::new("get_time", "d")
                    .param("timezone", ParamType::String, "tz", true)
                    .handler(|_args| async move { Ok(Value::from("3:45 PM")) })
                    .build()
                    .unwrap(),
            )
            .await;
        let adapter = MockAdapter::new(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![
                    ToolCall {
                        call_id: "A".into(),
                        tool_name: "get_weather".into(),
                        arguments_json: serde_json::json!({"location": "Paris"}),
                    },
                    ToolCall {
                        call_id: "B".into(),
                        tool_name: "get_time".into(),
                        arguments_json: serde_json::json!({"timezone": "Europe/Paris"}),
                    },
                ],
                usage: TokenUsage::default(),
                raw: Value::Null,
            },
            LlmResponse {
                content: "Sunny, 3:45 PM".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                raw: Value::Null,
            },
        ]);
        agent.set_adapter(Arc::new(adapter)).await;

        let final_msg = agent.call("What's the weather in Paris and the time?").await.unwrap();
        assert_eq!(final_msg.text(), "Sunny, 3:45 PM");

        let history = agent.messages().messages().await.unwrap();
        // user, assistant(2 calls), tool(A), tool(B), assistant(final)
        assert_eq!(history.len(), 5);
        assert_eq!(history[1].tool_calls.len(), 2);
        assert_eq!(history[2].role, MessageRole::Tool);
        assert_eq!(history[3].role, MessageRole::Tool);
        let ids: std::collections::HashSet<_> = [
            history[2].tool_call_id.clone().unwrap(),
            history[3].tool_call_id.clone().unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(ids, ["A".to_string(), "B".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn scenario_b_non_parallel_tool_turn_emits_pairs() {
        let agent = ready_agent().await;
        agent
            .tools
            .register(
                ToolBuilder::new("get_weather", "d")
                    .handler(|_args| async move { Ok(Value::from("sunny")) })
                    .build()
                    .unwrap(),
            )
            .await;
        agent
            .tools
            .register(
                ToolBuilder::new("get_time", "d")
                    .handler(|_args| async move { Ok(Value::from("3:45 PM")) })
                    .build()
                    .unwrap(),
            )
            .await;
        let adapter = MockAdapter::new(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![
                    ToolCall {
                        call_id: "A".into(),
                        tool_name: "get_weather".into(),
                        arguments_json: serde_json::json!({}),
                    },
                    ToolCall {
                        call_id: "B".into(),
                        tool_name: "get_time".into(),
                        arguments_json: serde_json::json!({}),
                    },
                ],
                usage: TokenUsage::default(),
                raw: Value::Null,
            },
            LlmResponse {
                content: "done".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                raw: Value::Null,
            },
        ])
        .without_parallel_tool_calls();
        agent.set_adapter(Arc::new(adapter)).await;

        agent.call("go").await.unwrap();
        let history = agent.messages().messages().await.unwrap();
        // user, assistant(A), tool(A), assistant(B), tool(B), assistant(final)
        assert_eq!(history.len(), 6);
        assert_eq!(history[1].tool_calls.len(), 1);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("A"));
        assert_eq!(history[3].tool_calls.len(), 1);
        assert_eq!(history[4].tool_call_id.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn fork_leaves_parent_history_unchanged() {
        let agent = ready_agent().await;
        agent.append("hello").await.unwrap();
        let fork = agent.fork(true).await.unwrap();
        fork.append("fork-only").await.unwrap();
        assert_eq!(agent.messages().len().await, 1);
        assert_eq!(fork.messages().len().await, 2);
    }

    #[tokio::test]
    async fn call_fires_state_render_and_tools_provide_events() {
        use crate::event::EventContext;
        use async_trait::async_trait;

        struct Recorder(Arc<tokio::sync::Mutex<Vec<&'static str>>>, &'static str);
        #[async_trait]
        impl crate::event::EventHandler for Recorder {
            async fn handle(&self, _ctx: &mut EventContext) {
                self.0.lock().await.push(self.1);
            }
        }

        let agent = ready_agent().await;
        agent
            .set_adapter(Arc::new(MockAdapter::new(vec![LlmResponse {
                content: "hi".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                raw: Value::Null,
            }])))
            .await;

        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        agent
            .events()
            .on(names::AGENT_STATE_CHANGE, Arc::new(Recorder(seen.clone(), "state")), 0)
            .await;
        agent
            .events()
            .on(names::MESSAGE_RENDER_BEFORE, Arc::new(Recorder(seen.clone(), "render_before")), 0)
            .await;
        agent
            .events()
            .on(names::MESSAGE_RENDER_AFTER, Arc::new(Recorder(seen.clone(), "render_after")), 0)
            .await;
        agent
            .events()
            .on(names::TOOLS_PROVIDE, Arc::new(Recorder(seen.clone(), "tools_provide")), 0)
            .await;

        agent.call("hello").await.unwrap();

        let seen = seen.lock().await;
        assert!(seen.contains(&"state"));
        assert!(seen.contains(&"render_before"));
        assert!(seen.contains(&"render_after"));
        assert!(seen.contains(&"tools_provide"));
    }

    #[tokio::test]
    async fn execute_stream_yields_the_same_messages_as_execute() {
        use futures::StreamExt;

        let agent = ready_agent().await;
        agent.append("hello").await.unwrap();
        agent
            .set_adapter(Arc::new(MockAdapter::new(vec![LlmResponse {
                content: "hi there".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                raw: Value::Null,
            }])))
            .await;

        let mut stream = agent.execute_stream(5, true);
        let mut streamed = Vec::new();
        while let Some(item) = stream.next().await {
            streamed.push(item.unwrap());
        }

        assert_eq!(streamed.len(), 1);
        assert_eq!(streamed[0].text(), "hi there");
    }

    #[tokio::test]
    async fn execute_stream_yields_tool_call_batch_then_final_message() {
        use futures::StreamExt;

        let agent = ready_agent().await;
        agent
            .tools
            .register(
                ToolBuilder::new("ping", "d")
                    .handler(|_args| async move { Ok(Value::from("pong")) })
                    .build()
                    .unwrap(),
            )
            .await;
        agent.append("hello").await.unwrap();
        agent
            .set_adapter(Arc::new(MockAdapter::new(vec![
                LlmResponse {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        call_id: "c1".into(),
                        tool_name: "ping".into(),
                        arguments_json: Value::Object(Map::new()),
                    }],
                    usage: TokenUsage::default(),
                    raw: Value::Null,
                },
                LlmResponse {
                    content: "done".into(),
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                    raw: Value::Null,
                },
            ])))
            .await;

        let mut stream = agent.execute_stream(5, true);
        let mut streamed = Vec::new();
        while let Some(item) = stream.next().await {
            streamed.push(item.unwrap());
        }

        assert_eq!(streamed.len(), 3);
        assert_eq!(streamed[2].text(), "done");
    }

    #[tokio::test]
    async fn execute_stream_zero_iterations_yields_nothing() {
        use futures::StreamExt;

        let agent = ready_agent().await;
        let mut stream = agent.execute_stream(0, true);
        assert!(stream.next().await.is_none());
    }
}
