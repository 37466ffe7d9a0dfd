//! End-to-end scenarios exercised through the public `Agent` API only: no
//! internal module is reached around the front door.

use std::sync::Arc;

use agent_kernel::llm::mock::MockAdapter;
use agent_kernel::llm::{LlmResponse, TokenUsage};
use agent_kernel::{
    tool, Agent, AgentConfig, EventContext, EventHandler, EventRouter, IsolationLevel, ModeHandler,
    Result, ScopeMode, ToolCall,
};
use async_trait::async_trait;
use serde_json::Value;

fn scripted(responses: Vec<LlmResponse>) -> MockAdapter {
    MockAdapter::new(responses)
}

fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall {
        call_id: id.into(),
        tool_name: name.into(),
        arguments_json: args,
    }
}

fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: text.into(),
        tool_calls: vec![],
        usage: TokenUsage::default(),
        raw: Value::Null,
    }
}

async fn agent_with(model: &str) -> Agent {
    let config = AgentConfig::builder().model(model).build().unwrap();
    Agent::new(config, Vec::new()).await.unwrap()
}

#[tokio::test]
async fn scenario_a_parallel_tool_turn_round_trips_through_the_public_api() {
    let agent = agent_with("m").await;
    agent
        .tools()
        .register(
            tool("get_weather", "weather lookup")
                .handler(|_| async move { Ok(Value::from("sunny")) })
                .build()
                .unwrap(),
        )
        .await;
    agent
        .tools()
        .register(
            tool("get_time", "time lookup")
                .handler(|_| async move { Ok(Value::from("3:45 PM")) })
                .build()
                .unwrap(),
        )
        .await;

    let adapter = scripted(vec![
        LlmResponse {
            content: String::new(),
            tool_calls: vec![
                tool_call("A", "get_weather", Value::Null),
                tool_call("B", "get_time", Value::Null),
            ],
            usage: TokenUsage::default(),
            raw: Value::Null,
        },
        text_response("Sunny and 3:45 PM."),
    ]);
    agent.set_adapter(Arc::new(adapter)).await;

    let reply = agent.call("weather and time?").await.unwrap();
    assert_eq!(reply.text(), "Sunny and 3:45 PM.");
}

#[tokio::test]
async fn scenario_b_non_parallel_tool_turn_emits_one_pair_per_call() {
    let agent = agent_with("m").await;
    agent
        .tools()
        .register(
            tool("step_one", "first step")
                .handler(|_| async move { Ok(Value::from("1")) })
                .build()
                .unwrap(),
        )
        .await;
    agent
        .tools()
        .register(
            tool("step_two", "second step")
                .handler(|_| async move { Ok(Value::from("2")) })
                .build()
                .unwrap(),
        )
        .await;

    let adapter = scripted(vec![
        LlmResponse {
            content: String::new(),
            tool_calls: vec![tool_call("A", "step_one", Value::Null), tool_call("B", "step_two", Value::Null)],
            usage: TokenUsage::default(),
            raw: Value::Null,
        },
        text_response("done"),
    ])
    .without_parallel_tool_calls();
    agent.set_adapter(Arc::new(adapter)).await;

    agent.call("run the steps").await.unwrap();
    let history = agent.messages().messages().await.unwrap();
    // one assistant/tool pair per call, not a single batched assistant turn
    let assistant_tool_call_counts: Vec<usize> = history
        .iter()
        .filter(|m| !m.tool_calls.is_empty())
        .map(|m| m.tool_calls.len())
        .collect();
    assert_eq!(assistant_tool_call_counts, vec![1, 1]);
}

struct DraftMode;

#[async_trait]
impl ModeHandler for DraftMode {
    async fn setup(&self, _session: &mut agent_kernel::mode::ModeSession) -> Result<()> {
        Ok(())
    }
    async fn teardown(&self, _session: &mut agent_kernel::mode::ModeSession) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn scenario_c_thread_isolation_discards_scratch_work_but_keeps_the_final_reply() {
    let agent = agent_with("m").await;
    agent
        .modes()
        .register(
            "draft",
            IsolationLevel::Thread,
            true,
            Default::default(),
            Arc::new(DraftMode),
        )
        .await;

    agent.append("outer question").await.unwrap();
    agent.enter_mode("draft").await.unwrap();
    agent.append("scratch thinking").await.unwrap();
    agent
        .messages()
        .append(agent_kernel::Message::assistant(vec![agent_kernel::ContentPart::Text(
            agent_kernel::TextPart::new("polished answer"),
        )]))
        .await
        .unwrap();
    agent.exit_mode().await.unwrap();

    let history = agent.messages().messages().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), "outer question");
    assert_eq!(history[1].text(), "polished answer");
}

#[tokio::test]
async fn scenario_d_scoped_tool_replacement_restores_after_an_error() {
    let agent = agent_with("m").await;
    agent
        .tools()
        .register(
            tool("default_tool", "normal tool")
                .handler(|_| async move { Ok(Value::from("ok")) })
                .build()
                .unwrap(),
        )
        .await;

    let sandbox_tool = Arc::new(
        tool("sandbox_tool", "sandboxed tool")
            .handler(|_| async move { Err(agent_kernel::Error::other("sandbox failure")) })
            .build()
            .unwrap(),
    );

    {
        let _guard = agent.tools().scope(ScopeMode::Replace(vec![sandbox_tool])).await;
        assert!(agent.tools().get("default_tool").await.is_none());
        assert!(agent.tools().get("sandbox_tool").await.is_some());
        // a failing tool invocation inside the scope must not prevent restore
        let result = agent.tools().get("sandbox_tool").await.unwrap().invoke(Default::default()).await;
        assert!(result.is_err());
    }

    assert!(agent.tools().get("default_tool").await.is_some());
    assert!(agent.tools().get("sandbox_tool").await.is_none());
}

#[tokio::test]
async fn scenario_e_revert_is_non_destructive() {
    let agent = agent_with("m").await;
    agent.append("first").await.unwrap();
    agent.append("second").await.unwrap();
    let before_revert = agent.messages().current_index().await;

    agent.messages().revert_to(0).await.unwrap();
    let after_revert = agent.messages().messages().await.unwrap();
    assert_eq!(after_revert.len(), 1);
    assert_eq!(after_revert[0].text(), "first");

    // the version we reverted away from is still retrievable
    assert!(agent.messages().current_index().await > before_revert);
}

struct ReentrantProbe {
    bridge: Arc<agent_kernel::SyncBridge>,
    captured: std::sync::Mutex<Option<agent_kernel::Result<EventContext>>>,
}

#[async_trait]
impl EventHandler for ReentrantProbe {
    async fn handle(&self, _ctx: &mut EventContext) {
        // Running on the bridge's own loop here: calling back into the same
        // bridge must fail fast instead of deadlocking on `block_on`.
        let result = self.bridge.apply_sync("inner", Default::default());
        *self.captured.lock().unwrap() = Some(result);
    }
}

#[test]
fn scenario_f_sync_bridge_rejects_reentrant_apply_sync() {
    use agent_kernel::{Error, SyncBridge};

    let router = Arc::new(EventRouter::new());
    let bridge = Arc::new(SyncBridge::new(router.clone()).unwrap());

    // A plain call from an ordinary thread succeeds.
    assert!(bridge.apply_sync("probe", Default::default()).is_ok());

    let probe = Arc::new(ReentrantProbe {
        bridge: bridge.clone(),
        captured: std::sync::Mutex::new(None),
    });
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(router.on("outer", probe.clone(), 0));

    bridge.do_fire("outer", Default::default());
    bridge.join(Some(std::time::Duration::from_secs(1))).unwrap();

    let captured = probe.captured.lock().unwrap().take().expect("handler ran");
    assert!(matches!(captured, Err(Error::DeadlockGuard(_))));
}

struct SandboxMode;

#[async_trait]
impl ModeHandler for SandboxMode {
    async fn setup(&self, _session: &mut agent_kernel::mode::ModeSession) -> Result<()> {
        Ok(())
    }
    async fn teardown(&self, _session: &mut agent_kernel::mode::ModeSession) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn scenario_g_config_isolation_restores_model_and_tool_set_on_exit() {
    let agent = agent_with("outer-model").await;
    agent
        .tools()
        .register(
            tool("stays", "always available").handler(|_| async move { Ok(Value::from("ok")) }).build().unwrap(),
        )
        .await;
    agent
        .modes()
        .register("sandbox", IsolationLevel::Config, false, Default::default(), Arc::new(SandboxMode))
        .await;

    agent.enter_mode("sandbox").await.unwrap();
    agent.update_config(|c| c.model = "sandbox-model".into()).await;
    agent
        .tools()
        .register(tool("scratch", "sandbox only").handler(|_| async move { Ok(Value::from("ok")) }).build().unwrap())
        .await;
    assert_eq!(agent.config().await.model, "sandbox-model");
    assert!(agent.tools().get("scratch").await.is_some());

    agent.exit_mode().await.unwrap();

    assert_eq!(agent.config().await.model, "outer-model");
    assert!(agent.tools().get("scratch").await.is_none());
    assert!(agent.tools().get("stays").await.is_some());
}
