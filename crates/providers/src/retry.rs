//! Bounded retry-until-nonempty policy for tool-less synthesis calls.
//!
//! Models occasionally return an empty completion for a long prompt. The
//! pipeline's synthesis steps cannot proceed without text, so they retry
//! up to a fixed attempt cap and then fail loudly instead of spinning.

use crate::traits::{ChatClient, ChatRequest};
use tv_domain::chat::{Message, Usage};
use tv_domain::{Error, Result};

/// Call `chat` until it yields non-empty text, up to `max_attempts` times.
///
/// Returns the text plus the usage of every attempt made, including the
/// empty ones. Transport and provider errors propagate immediately; only
/// an empty completion triggers a retry.
pub async fn generate_text(
    client: &dyn ChatClient,
    messages: Vec<Message>,
    max_attempts: u32,
) -> Result<(String, Vec<Usage>)> {
    let req = ChatRequest::text(messages);
    let mut usages = Vec::new();

    for attempt in 1..=max_attempts {
        let resp = client.chat(&req).await?;
        if let Some(u) = resp.usage {
            usages.push(u);
        }
        if let Some(text) = resp.text() {
            return Ok((text.to_string(), usages));
        }
        tracing::warn!(attempt, max_attempts, "empty completion, retrying");
    }

    Err(Error::ExhaustedRetries {
        attempts: max_attempts,
    })
}
