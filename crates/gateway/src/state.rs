//! Shared application state handed to every request handler.

use crate::jobs::JobStore;
use crate::logs::LogRegistry;
use std::path::Path;
use tv_domain::config::AppConfig;
use tv_domain::Result;

pub struct AppState {
    pub config: AppConfig,
    pub jobs: JobStore,
    pub logs: LogRegistry,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let jobs = JobStore::new(Path::new(&config.server.data_dir))?;
        Ok(Self {
            config,
            jobs,
            logs: LogRegistry::new(),
        })
    }
}
