//! Temporarily replaces an agent's entire tool set for the duration of a
//! scope, then shows the prior tools restored automatically on drop, even
//! when the scope's body exits early.

use std::sync::Arc;

use agent_kernel::{tool, Agent, AgentConfig, ParamType, ScopeMode};
use serde_json::Value;

#[tokio::main]
async fn main() -> agent_kernel::Result<()> {
    env_logger::init();

    let config = AgentConfig::builder().model("local-model").build()?;
    let agent = Agent::new(config, Vec::new()).await?;

    agent
        .tools()
        .register(
            tool("search_web", "General web search")
                .handler(|_args| async move { Ok(Value::from("no results")) })
                .build()?,
        )
        .await;
    agent
        .tools()
        .register(
            tool("send_email", "Sends an email on the user's behalf")
                .handler(|_args| async move { Ok(Value::from("sent")) })
                .build()?,
        )
        .await;

    println!("normal tool set: {:?}", agent.tools().active().await.keys().collect::<Vec<_>>());

    {
        let read_only = Arc::new(
            tool("search_web_readonly", "Web search, read-only sandbox")
                .param("query", ParamType::String, "search terms", true)
                .handler(|_args| async move { Ok(Value::from("no results")) })
                .build()?,
        );
        let _guard = agent.tools().scope(ScopeMode::Replace(vec![read_only])).await;
        println!(
            "scoped tool set: {:?}",
            agent.tools().active().await.keys().collect::<Vec<_>>()
        );
        // `send_email` is unreachable for the scope's duration regardless of
        // how this block exits: the guard's `Drop` always restores the set
        // captured at entry.
    }

    println!("restored tool set: {:?}", agent.tools().active().await.keys().collect::<Vec<_>>());
    Ok(())
}
