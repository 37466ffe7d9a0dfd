//! The message data model: immutable, content-addressed conversation turns.
//!
//! A [`Message`] never changes after it is stored. "Editing" a message means
//! building a new one with a new [`Identifier`] and letting [`crate::message_list`]
//! retire the old id from the active version — the old [`Message`] stays in
//! [`crate::store::MessageStore`] for as long as the agent lives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifier::Identifier;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One typed unit of message content. A message's `content_parts` is an ordered
/// sequence of these; rendering to a wire format is entirely the adapter's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPart {
    Text(TextPart),
    Template(TemplatePart),
    Image(ImagePart),
    File(FilePart),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

impl TextPart {
    pub fn new(text: impl Into<String>) -> Self {
        TextPart { text: text.into() }
    }
}

/// Unexpanded template source plus the variables it will be rendered against.
/// Expansion itself is an extension point (`template:compile:*`), not a kernel
/// concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatePart {
    pub source: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl TemplatePart {
    pub fn new(source: impl Into<String>) -> Self {
        TemplatePart {
            source: source.into(),
            variables: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    url: String,
    detail: ImageDetail,
}

impl ImagePart {
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::validation("image url must not be empty"));
        }
        Ok(ImagePart {
            url,
            detail: ImageDetail::Auto,
        })
    }

    pub fn from_base64(data: &str, mime_type: &str) -> Result<Self> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::validation(format!("invalid base64 image data: {e}")))?;
        Ok(ImagePart {
            url: format!("data:{mime_type};base64,{data}"),
            detail: ImageDetail::Auto,
        })
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn detail(&self) -> ImageDetail {
        self.detail
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePart {
    pub uri: String,
    pub mime_type: Option<String>,
}

/// One tool call emitted by an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments_json: Value,
}

/// An immutable conversation turn or tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Identifier,
    pub role: MessageRole,
    pub content_parts: Vec<ContentPart>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub iteration_index: Option<usize>,
}

impl Message {
    pub fn new(role: MessageRole, content_parts: Vec<ContentPart>) -> Self {
        Message {
            id: Identifier::new(),
            role,
            content_parts,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            metadata: Map::new(),
            iteration_index: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::new(MessageRole::System, vec![ContentPart::Text(TextPart::new(text))])
    }

    pub fn user(content_parts: Vec<ContentPart>) -> Self {
        Message::new(MessageRole::User, content_parts)
    }

    pub fn assistant(content_parts: Vec<ContentPart>) -> Self {
        Message::new(MessageRole::Assistant, content_parts)
    }

    /// Builds the assistant message for one execute-loop iteration that carries
    /// tool calls but no visible text.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Message::new(MessageRole::Assistant, Vec::new());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Builds the tool-result message answering one tool call.
    pub fn tool_result(call_id: impl Into<String>, tool_name: impl Into<String>, content_parts: Vec<ContentPart>) -> Self {
        let mut msg = Message::new(MessageRole::Tool, content_parts);
        msg.tool_call_id = Some(call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }

    pub fn with_iteration_index(mut self, index: usize) -> Self {
        self.iteration_index = Some(index);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Plain-text projection of this message's content parts, joined with
    /// newlines. Image/file/template parts contribute nothing here; adapters
    /// that need the richer shape should walk `content_parts` directly.
    pub fn text(&self) -> String {
        self.content_parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_has_single_text_part() {
        let msg = Message::system("be helpful");
        assert_eq!(msg.role, MessageRole::System);
        assert_eq!(msg.text(), "be helpful");
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let msg = Message::tool_result("call_1", "get_weather", vec![ContentPart::Text(TextPart::new("sunny"))]);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn each_message_gets_a_distinct_identifier() {
        let a = Message::system("a");
        let b = Message::system("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn image_from_url_rejects_empty_string() {
        assert!(ImagePart::from_url("").is_err());
    }

    #[test]
    fn image_from_base64_rejects_invalid_data() {
        assert!(ImagePart::from_base64("not valid base64!!", "image/png").is_err());
    }

    #[test]
    fn multiple_text_parts_join_with_newline() {
        let msg = Message::user(vec![
            ContentPart::Text(TextPart::new("line 1")),
            ContentPart::Text(TextPart::new("line 2")),
        ]);
        assert_eq!(msg.text(), "line 1\nline 2");
    }

    #[test]
    fn serializes_and_round_trips_through_json() {
        let msg = Message::assistant_tool_calls(vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "get_time".into(),
            arguments_json: serde_json::json!({"timezone": "UTC"}),
        }]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.tool_calls.len(), 1);
    }
}
