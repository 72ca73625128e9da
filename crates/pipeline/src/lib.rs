//! The Traceval evaluation pipeline.
//!
//! A submitted batch of agent traces flows through three model-driven
//! stages per trace (structuring, insight, report), each run as a bounded
//! tool-calling agent loop, then through batch-level aggregation and a
//! final synthesized Markdown report. Report revisions accumulate in a
//! versioned history.

pub mod agent;
pub mod aggregate;
pub mod audit;
pub mod conclude;
pub mod history;
pub mod ingest;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod stages;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;
