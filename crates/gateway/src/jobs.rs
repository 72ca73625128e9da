//! On-disk job store: per-job working directories plus the persisted
//! `status.json` and `job_config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tv_domain::config::LlmSettings;
use tv_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Running,
    Finished,
    Failed,
}

/// Contents of `status.json`, rewritten on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-job model settings and the report requirement, persisted as
/// `job_config.json` so reruns and revisions see the latest values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub llm: LlmSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_requirement: Option<String>,
}

pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn init_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("init")
    }

    pub fn pending_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("pending")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    /// Create the directory layout and the initial `status.json`.
    pub fn create(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.job_dir(job_id);
        std::fs::create_dir_all(self.init_dir(job_id))?;
        std::fs::create_dir_all(self.pending_dir(job_id))?;
        std::fs::create_dir_all(self.output_dir(job_id))?;
        let now = chrono::Utc::now().to_rfc3339();
        self.write_status(&JobStatus {
            job_id: job_id.to_string(),
            state: JobState::Created,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        })?;
        Ok(dir)
    }

    pub fn exists(&self, job_id: &str) -> bool {
        self.job_dir(job_id).join("status.json").exists()
    }

    pub fn load_status(&self, job_id: &str) -> Result<JobStatus> {
        let path = self.job_dir(job_id).join("status.json");
        if !path.exists() {
            return Err(Error::NotFound(format!("job not found: {job_id}")));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    fn write_status(&self, status: &JobStatus) -> Result<()> {
        let path = self.job_dir(&status.job_id).join("status.json");
        std::fs::write(path, serde_json::to_string_pretty(status)?)?;
        Ok(())
    }

    pub fn set_state(
        &self,
        job_id: &str,
        state: JobState,
        error: Option<String>,
    ) -> Result<()> {
        let mut status = self.load_status(job_id)?;
        status.state = state;
        status.error = error;
        status.updated_at = chrono::Utc::now().to_rfc3339();
        self.write_status(&status)
    }

    pub fn save_config(&self, job_id: &str, config: &JobConfig) -> Result<()> {
        let path = self.job_dir(job_id).join("job_config.json");
        std::fs::write(path, serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    pub fn load_config(&self, job_id: &str) -> Result<JobConfig> {
        let path = self.job_dir(job_id).join("job_config.json");
        if !path.exists() {
            return Err(Error::NotFound(format!("job config missing: {job_id}")));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_transition_persists_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        store.create("job-1").unwrap();

        let status = store.load_status("job-1").unwrap();
        assert_eq!(status.state, JobState::Created);
        assert!(status.error.is_none());

        store
            .set_state("job-1", JobState::Failed, Some("model unreachable".into()))
            .unwrap();
        let status = store.load_status("job-1").unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("model unreachable"));
    }

    #[test]
    fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load_status("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path()).unwrap();
        store.create("job-1").unwrap();
        store
            .save_config(
                "job-1",
                &JobConfig {
                    llm: LlmSettings::default(),
                    report_requirement: Some("focus on tool misuse".into()),
                },
            )
            .unwrap();
        let config = store.load_config("job-1").unwrap();
        assert_eq!(config.report_requirement.as_deref(), Some("focus on tool misuse"));
    }
}
