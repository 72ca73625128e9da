//! The chat client abstraction the pipeline is written against.

use tv_domain::chat::{Message, ToolCall, ToolDefinition, Usage};
use tv_domain::Result;

/// A single chat-completions request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Tools offered for this turn. Empty means a plain text completion.
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    /// Overrides the client's default model when set.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn text(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            ..Self::default()
        }
    }
}

/// The parsed first choice of a chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text, when present.
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// Assistant text with surrounding whitespace stripped, or `None`
    /// when the model produced nothing.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// A chat completion backend. Implementations are stateless across
/// calls and perform no retries of their own.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Stable identifier for logging.
    fn client_id(&self) -> &str;
}
