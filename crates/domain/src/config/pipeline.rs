use serde::{Deserialize, Serialize};

/// Tunables for the evaluation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard cap on agent-loop iterations per stage run.
    #[serde(default = "d_max_steps")]
    pub max_steps: u32,
    /// A step entry needs summarizing past this many whitespace tokens.
    #[serde(default = "d_summary_threshold_tokens")]
    pub summary_threshold_tokens: usize,
    /// Or past this many characters, whichever trips first.
    #[serde(default = "d_summary_threshold_chars")]
    pub summary_threshold_chars: usize,
    /// Attempt cap for the retry-until-nonempty synthesis policy.
    #[serde(default = "d_max_completion_retries")]
    pub max_completion_retries: u32,
    /// The conclude report regenerates when the output count is a
    /// multiple of this.
    #[serde(default = "d_batch_modulus")]
    pub batch_modulus: usize,
}

fn d_max_steps() -> u32 {
    10
}

fn d_summary_threshold_tokens() -> usize {
    100
}

fn d_summary_threshold_chars() -> usize {
    1000
}

fn d_max_completion_retries() -> u32 {
    10
}

fn d_batch_modulus() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_steps: d_max_steps(),
            summary_threshold_tokens: d_summary_threshold_tokens(),
            summary_threshold_chars: d_summary_threshold_chars(),
            max_completion_retries: d_max_completion_retries(),
            batch_modulus: d_batch_modulus(),
        }
    }
}
