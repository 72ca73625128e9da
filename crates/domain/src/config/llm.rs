use serde::{Deserialize, Serialize};

/// Model endpoint settings. The server config carries defaults; each job
/// submission may override all three fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
}

fn d_model() -> String {
    "gpt-4o".into()
}

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: d_model(),
            api_key: String::new(),
            base_url: d_base_url(),
        }
    }
}
