//! Analysis stages of the vidsift pipeline.
//!
//! - **Reconciliation** - split discovered videos into unchanged ones, ones
//!   that can reuse a stored fingerprint, and groups of new identical files
//! - **Fingerprinting** - perceptual hashes in fast (collage) or slow
//!   (per-second) mode, rejecting featureless results
//! - **Clustering** - connected components of the bounded similarity
//!   relation, reported as duplicate buckets
//!
//! ```rust,ignore
//! use vidsift_analyze::{DuplicateClusterer, Reconciler};
//!
//! let reconciliation = Reconciler::new().reconcile(discovered, &known);
//! println!("{} groups need a fingerprint", reconciliation.pending_groups().count());
//!
//! let (buckets, _stats) = DuplicateClusterer::new().cluster(&mut fingerprints, &videos);
//! println!("Found {} duplicate groups", buckets.len());
//! ```

mod cluster;
mod fingerprint;
mod reconcile;

pub use cluster::{
    ClusterConfig, ClusterConfigBuilder, ClusterStats, DuplicateBucket, DuplicateClusterer,
};
pub use fingerprint::{
    FingerprintConfig, FingerprintConfigBuilder, FingerprintGenerator, FingerprintOutcome,
};
pub use reconcile::{EquivalenceGroup, ReconcileStats, Reconciler, Reconciliation};

// Re-export core types
pub use vidsift_core::{Fingerprint, FingerprintError, HashKind, VideoDescriptor};
