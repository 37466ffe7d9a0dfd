//! Registers two tools and drives one parallel tool-calling turn against the
//! in-process mock adapter. Swap `MockAdapter` for a real `LlmAdapter`
//! implementation to point this at an actual model server.

use std::sync::Arc;

use agent_kernel::llm::mock::MockAdapter;
use agent_kernel::llm::{LlmResponse, TokenUsage};
use agent_kernel::{tool, Agent, AgentConfig, ParamType, ToolCall};
use serde_json::Value;

#[tokio::main]
async fn main() -> agent_kernel::Result<()> {
    env_logger::init();

    let config = AgentConfig::builder().model("local-model").build()?;
    let agent = Agent::new(config, Vec::new()).await?;

    agent
        .tools()
        .register(
            tool("get_weather", "Look up the current weather for a location")
                .param("location", ParamType::String, "City and country", true)
                .handler(|args| async move {
                    let location = args.get("location").and_then(|v| v.as_str()).unwrap_or("unknown");
                    Ok(Value::from(format!("sunny and 22C in {location}")))
                })
                .build()?,
        )
        .await;

    agent
        .tools()
        .register(
            tool("get_time", "Look up the current local time for a timezone")
                .param("timezone", ParamType::String, "IANA timezone name", true)
                .handler(|_args| async move { Ok(Value::from("14:32")) })
                .build()?,
        )
        .await;

    // A real deployment wires up an `LlmAdapter` backed by a model server; this
    // demo scripts the two responses a live model would produce for the prompt
    // below so the example runs standalone.
    let adapter = MockAdapter::new(vec![
        LlmResponse {
            content: String::new(),
            tool_calls: vec![
                ToolCall {
                    call_id: "call_weather".into(),
                    tool_name: "get_weather".into(),
                    arguments_json: serde_json::json!({"location": "Tokyo"}),
                },
                ToolCall {
                    call_id: "call_time".into(),
                    tool_name: "get_time".into(),
                    arguments_json: serde_json::json!({"timezone": "Asia/Tokyo"}),
                },
            ],
            usage: TokenUsage::default(),
            raw: Value::Null,
        },
        LlmResponse {
            content: "It's sunny and 22C in Tokyo; the local time is 14:32.".into(),
            tool_calls: vec![],
            usage: TokenUsage::default(),
            raw: Value::Null,
        },
    ]);
    agent.set_adapter(Arc::new(adapter)).await;

    let reply = agent.call("What's the weather and time in Tokyo?").await?;
    println!("{}", reply.text());
    Ok(())
}
