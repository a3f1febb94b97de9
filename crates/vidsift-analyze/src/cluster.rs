//! Duplicate clustering over persisted fingerprints.
//!
//! Clustering always starts from scratch:
//!
//! 1. Reset every bucket and neighbor list
//! 2. Compute each fingerprint's neighbors (parallel, read-only)
//! 3. Label connected components of the neighbor graph in store order
//! 4. Keep buckets with at least two fingerprints, joined to their videos
//!
//! Similarity is not transitive, but bucket membership is: two fingerprints
//! that are not neighbors share a bucket when a chain of neighbors links them.

use std::collections::{BTreeMap, HashMap};

use derive_builder::Builder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vidsift_core::{Fingerprint, VideoDescriptor, within_bounds};

/// Configuration for duplicate clustering.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(private, name = "build_unchecked"))]
#[serde(default)]
pub struct ClusterConfig {
    /// Largest duration difference, in seconds, between neighbors.
    #[builder(default = "5.0")]
    pub max_duration_diff: f64,

    /// Largest symbol distance between neighbors.
    #[builder(default = "4")]
    pub max_hash_distance: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_duration_diff: 5.0,
            max_hash_distance: 4,
        }
    }
}

impl ClusterConfigBuilder {
    /// Build a validated config.
    pub fn build(&self) -> Result<ClusterConfig, ClusterConfigBuilderError> {
        let config = self.build_unchecked()?;
        config.validate()?;
        Ok(config)
    }
}

impl ClusterConfig {
    /// Create a new config builder.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Check the values the builder and deserialized files must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_duration_diff.is_finite() || self.max_duration_diff < 0.0 {
            return Err("max_duration_diff must be a non-negative number".to_string());
        }
        Ok(())
    }
}

/// Fingerprints sharing one bucket, with every video that references them.
#[derive(Debug, Clone)]
pub struct DuplicateBucket {
    /// Bucket id.
    pub id: i64,
    /// Member fingerprints in store order.
    pub fingerprints: Vec<Fingerprint>,
    /// Videos referencing a member fingerprint, sorted by path.
    pub videos: Vec<VideoDescriptor>,
}

impl DuplicateBucket {
    /// Total size of the bucket's videos.
    pub fn total_size(&self) -> u64 {
        self.videos.iter().map(|v| v.size).sum()
    }
}

/// Counters for one clustering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    /// Fingerprints considered.
    pub fingerprints: u64,
    /// Ordered pairs skipped because their hashes differ in length.
    pub length_mismatches: u64,
    /// Buckets assigned.
    pub buckets: u64,
    /// Fingerprints placed in a bucket.
    pub clustered: u64,
}

/// Assigns duplicate buckets to fingerprints.
pub struct DuplicateClusterer {
    config: ClusterConfig,
}

impl DuplicateClusterer {
    /// Create a clusterer with default thresholds.
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }

    /// Create a clusterer with custom thresholds.
    pub fn with_config(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Reset and recompute neighbors and buckets for `fingerprints` in place.
    ///
    /// `fingerprints` must be in store order; neighbor indices refer to it.
    pub fn assign_buckets(&self, fingerprints: &mut [Fingerprint]) -> ClusterStats {
        for fingerprint in fingerprints.iter_mut() {
            fingerprint.reset_cluster_state();
        }

        let snapshot: &[Fingerprint] = fingerprints;
        let adjacency: Vec<(Vec<usize>, u64)> = (0..snapshot.len())
            .into_par_iter()
            .map(|i| self.neighbors_of(snapshot, i))
            .collect();

        let length_mismatches: u64 = adjacency.iter().map(|(_, m)| m).sum();
        if length_mismatches > 0 {
            warn!(length_mismatches, "Skipped comparisons between hashes of different lengths");
        }

        let mut next_bucket: i64 = 0;
        let mut stack = Vec::new();
        for start in 0..fingerprints.len() {
            if fingerprints[start].is_bucketed() || adjacency[start].0.is_empty() {
                continue;
            }
            let bucket = next_bucket;
            next_bucket += 1;

            stack.push(start);
            while let Some(i) = stack.pop() {
                if fingerprints[i].is_bucketed() {
                    continue;
                }
                fingerprints[i].bucket = bucket;
                stack.extend(
                    adjacency[i]
                        .0
                        .iter()
                        .copied()
                        .filter(|&j| !fingerprints[j].is_bucketed()),
                );
            }
        }

        let mut clustered = 0;
        for (fingerprint, (neighbors, _)) in fingerprints.iter_mut().zip(adjacency) {
            if fingerprint.is_bucketed() {
                clustered += 1;
            }
            fingerprint.neighbors = neighbors;
        }

        let stats = ClusterStats {
            fingerprints: fingerprints.len() as u64,
            length_mismatches,
            buckets: next_bucket as u64,
            clustered,
        };
        debug!(?stats, "Buckets assigned");
        stats
    }

    /// Group bucketed fingerprints and join them to their videos.
    ///
    /// Buckets with fewer than two fingerprints, or whose fingerprints are
    /// referenced by fewer than two videos, are dropped.
    pub fn collect_buckets(
        &self,
        fingerprints: &[Fingerprint],
        videos: &[VideoDescriptor],
    ) -> Vec<DuplicateBucket> {
        let mut by_bucket: BTreeMap<i64, Vec<Fingerprint>> = BTreeMap::new();
        for fingerprint in fingerprints.iter().filter(|f| f.is_bucketed()) {
            by_bucket
                .entry(fingerprint.bucket)
                .or_default()
                .push(fingerprint.clone());
        }
        by_bucket.retain(|_, members| members.len() >= 2);

        let bucket_of: HashMap<_, i64> = by_bucket
            .iter()
            .flat_map(|(&id, members)| members.iter().map(move |f| (f.uid, id)))
            .collect();

        let mut videos_by_bucket: HashMap<i64, Vec<VideoDescriptor>> = HashMap::new();
        for video in videos {
            let Some(fingerprint) = &video.fingerprint else {
                continue;
            };
            if let Some(&id) = bucket_of.get(&fingerprint.uid) {
                videos_by_bucket.entry(id).or_default().push(video.clone());
            }
        }

        by_bucket
            .into_iter()
            .filter_map(|(id, fingerprints)| {
                let mut videos = videos_by_bucket.remove(&id).unwrap_or_default();
                videos.sort_by(|a, b| a.path.cmp(&b.path));
                videos.dedup_by(|a, b| a.path == b.path);
                (videos.len() >= 2).then_some(DuplicateBucket {
                    id,
                    fingerprints,
                    videos,
                })
            })
            .collect()
    }

    /// Assign buckets, then collect the duplicate buckets.
    pub fn cluster(
        &self,
        fingerprints: &mut [Fingerprint],
        videos: &[VideoDescriptor],
    ) -> (Vec<DuplicateBucket>, ClusterStats) {
        let stats = self.assign_buckets(fingerprints);
        (self.collect_buckets(fingerprints, videos), stats)
    }

    /// Neighbors of `fingerprints[i]` in store order, plus the number of
    /// comparisons skipped for unequal hash lengths.
    fn neighbors_of(&self, fingerprints: &[Fingerprint], i: usize) -> (Vec<usize>, u64) {
        let this = &fingerprints[i];
        let mut neighbors = Vec::new();
        let mut mismatches = 0;

        for (j, other) in fingerprints.iter().enumerate() {
            if j == i {
                continue;
            }
            match within_bounds(
                (&this.value, this.duration),
                (&other.value, other.duration),
                self.config.max_duration_diff,
                self.config.max_hash_distance,
            ) {
                Ok(true) => neighbors.push(j),
                Ok(false) => {}
                Err(_) => mismatches += 1,
            }
        }

        (neighbors, mismatches)
    }
}

impl Default for DuplicateClusterer {
    fn default() -> Self {
        Self::new()
    }
}
