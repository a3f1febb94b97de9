//! Orchestration of the vidsift pipeline.
//!
//! [`Pipeline`] runs discovery end to end: enumerate, probe, reconcile
//! against the store, then fingerprint the remaining groups with a fixed
//! pool of workers feeding a single batching writer. Clustering runs
//! separately over the persisted fingerprints.

mod config;
mod orchestrator;
mod pipeline;
mod progress;
mod writer;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use orchestrator::{FingerprintOrchestrator, OrchestratorReport};
pub use pipeline::{ClusterReport, DiscoveryReport, Pipeline, PipelineEvent, SharedStore, run_clustering};
pub use progress::{FingerprintProgress, ProgressUpdate};
pub use writer::{BatchWriter, WriterReport};

/// Capacity of the persistence task channel between workers and the writer.
pub const PERSIST_CHANNEL_SIZE: usize = 256;

/// Capacity of the event channel returned by [`Pipeline::start_discovery`].
pub const EVENT_CHANNEL_SIZE: usize = 100;
