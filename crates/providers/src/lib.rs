//! Model client for Traceval.
//!
//! One trait, [`ChatClient`], and one adapter: any endpoint speaking the
//! OpenAI chat-completions wire format. Plus the bounded retry policy the
//! pipeline uses for tool-less synthesis calls.

pub mod openai_compat;
pub mod retry;
pub mod traits;

pub use openai_compat::OpenAiCompatClient;
pub use traits::{ChatClient, ChatRequest, ChatResponse};
