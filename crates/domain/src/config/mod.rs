//! Configuration tree, loaded from a TOML file with serde defaults so a
//! missing file or a partial file still yields a runnable config.

mod llm;
mod pipeline;
mod server;

pub use llm::LlmSettings;
pub use pipeline::PipelineConfig;
pub use server::ServerConfig;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Default model settings, overridden per job at submission.
    #[serde(default)]
    pub llm: LlmSettings,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9090

            [llm]
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.pipeline.max_steps, 10);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn missing_file_is_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/traceval.toml")).unwrap();
        assert_eq!(cfg.pipeline.summary_threshold_tokens, 100);
    }
}
