//! Shared test fixtures: a scripted chat client and a throwaway batch
//! directory layout.

use crate::agent::StageContext;
use crate::audit::StepLogger;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tv_domain::chat::{ToolCall, Usage};
use tv_domain::config::PipelineConfig;
use tv_domain::trace::TraceRecord;
use tv_domain::{Error, Result};
use tv_providers::{ChatClient, ChatRequest, ChatResponse};

/// Replays a fixed response sequence and counts calls. An exhausted
/// script errors, so a test also bounds how many calls may happen.
pub struct ScriptedClient {
    script: Mutex<VecDeque<ChatResponse>>,
    pub calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(script: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue another response after construction, for scripts that need
    /// paths only known once the test environment exists.
    pub fn push(&self, resp: ChatResponse) {
        self.script.lock().unwrap().push_back(resp);
    }
}

#[async_trait::async_trait]
impl ChatClient for ScriptedClient {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Other("scripted client exhausted".into()))
    }

    fn client_id(&self) -> &str {
        "scripted"
    }
}

pub fn text_response(content: impl Into<String>) -> ChatResponse {
    ChatResponse {
        content: Some(content.into()),
        tool_calls: Vec::new(),
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
        }),
        model: "scripted".into(),
        finish_reason: Some("stop".into()),
    }
}

pub fn tool_call_response(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: vec![ToolCall {
            call_id: "call-1".into(),
            tool_name: name.into(),
            arguments,
        }],
        usage: None,
        model: "scripted".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

/// A tempdir with `pending/` and `output/`, one seeded trace record, and
/// a stage context wired to a scripted client.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub client: Arc<ScriptedClient>,
    pub ctx: StageContext,
    pub audit: StepLogger,
}

impl TestEnv {
    pub fn new(script: Vec<ChatResponse>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pending_dir = dir.path().join("pending");
        let output_dir = dir.path().join("output");
        std::fs::create_dir_all(&pending_dir).unwrap();
        std::fs::create_dir_all(&output_dir).unwrap();

        sample_record("trace-1")
            .save(&pending_dir.join("trace-1.json"))
            .unwrap();

        let client = Arc::new(ScriptedClient::new(script));
        let ctx = StageContext {
            client: client.clone(),
            limits: PipelineConfig::default(),
            pending_dir,
            output_dir,
            report_requirement: None,
        };
        let audit = StepLogger::new(dir.path());
        Self {
            dir,
            client,
            ctx,
            audit,
        }
    }

    pub fn pending_file(&self, name: &str) -> PathBuf {
        self.ctx.pending_dir.join(name)
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.ctx.output_dir.join(name)
    }
}

pub fn sample_record(id: &str) -> TraceRecord {
    TraceRecord::new(
        id,
        "rename every photo in the folder by date",
        vec![
            "list the folder first".into(),
            "apply the rename".into(),
        ],
        vec![
            "list_dir{\"path\": \"photos\"}".into(),
            "rename_all{\"pattern\": \"%Y-%m-%d\"}".into(),
        ],
        vec!["12 files".into(), "12 files renamed".into()],
    )
    .unwrap()
}
