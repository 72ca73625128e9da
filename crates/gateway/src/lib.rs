//! The Traceval gateway: job submission API, job store, per-job log
//! channels, and the background runner that drives the pipeline.

pub mod api;
pub mod jobs;
pub mod logs;
pub mod runner;
pub mod state;
