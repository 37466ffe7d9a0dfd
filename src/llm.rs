//! The LLM adapter boundary. The kernel defines no wire format: it passes
//! rendered messages and tool signatures to whatever adapter the host wires
//! up and consumes a structured response.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::message::{Message, ToolCall};

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One complete turn returned by [`LlmAdapter::complete`].
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub raw: Value,
}

/// A partial delta in a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct LlmStreamChunk {
    pub delta_content: Option<String>,
    pub delta_tool_call: Option<ToolCall>,
    pub finished: bool,
    pub usage: Option<TokenUsage>,
}

/// The contract an external LLM provider adapter implements. The kernel only
/// depends on this trait; no concrete provider implementation ships here.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(
        &self,
        rendered_messages: &[Message],
        tool_signatures: &[Value],
        config: &Map<String, Value>,
    ) -> Result<LlmResponse>;

    fn stream(
        &self,
        rendered_messages: &[Message],
        tool_signatures: &[Value],
        config: &Map<String, Value>,
    ) -> BoxStream<'static, Result<LlmStreamChunk>>;

    fn supports_parallel_tool_calls(&self, model_name: &str) -> bool;
    fn supports_streaming(&self, model_name: &str) -> bool;
}

/// Test-only adapter that replays a fixed sequence of responses, one per
/// `complete` call. Not part of the default public surface.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct MockAdapter {
        responses: Mutex<Vec<LlmResponse>>,
        cursor: AtomicUsize,
        parallel_tool_calls: bool,
    }

    impl MockAdapter {
        pub fn new(responses: Vec<LlmResponse>) -> Self {
            MockAdapter {
                responses: Mutex::new(responses),
                cursor: AtomicUsize::new(0),
                parallel_tool_calls: true,
            }
        }

        pub fn without_parallel_tool_calls(mut self) -> Self {
            self.parallel_tool_calls = false;
            self
        }
    }

    #[async_trait]
    impl LlmAdapter for MockAdapter {
        async fn complete(
            &self,
            _rendered_messages: &[Message],
            _tool_signatures: &[Value],
            _config: &Map<String, Value>,
        ) -> Result<LlmResponse> {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            responses
                .get(i)
                .cloned()
                .ok_or_else(|| crate::error::Error::adapter("mock adapter exhausted its scripted responses"))
        }

        fn stream(
            &self,
            _rendered_messages: &[Message],
            _tool_signatures: &[Value],
            _config: &Map<String, Value>,
        ) -> BoxStream<'static, Result<LlmStreamChunk>> {
            Box::pin(futures::stream::empty())
        }

        fn supports_parallel_tool_calls(&self, _model_name: &str) -> bool {
            self.parallel_tool_calls
        }

        fn supports_streaming(&self, _model_name: &str) -> bool {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockAdapter;
    use super::*;

    #[tokio::test]
    async fn mock_adapter_replays_scripted_responses_in_order() {
        let adapter = MockAdapter::new(vec![
            LlmResponse {
                content: "first".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                raw: Value::Null,
            },
            LlmResponse {
                content: "second".into(),
                tool_calls: vec![],
                usage: TokenUsage::default(),
                raw: Value::Null,
            },
        ]);
        let r1 = adapter.complete(&[], &[], &Map::new()).await.unwrap();
        let r2 = adapter.complete(&[], &[], &Map::new()).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
    }

    #[tokio::test]
    async fn mock_adapter_errors_once_exhausted() {
        let adapter = MockAdapter::new(vec![]);
        assert!(adapter.complete(&[], &[], &Map::new()).await.is_err());
    }
}
