//! Identity reconciliation of freshly discovered videos against the store.
//!
//! Partitions discovered descriptors into those needing no work at all and
//! equivalence groups that each need at most one fingerprint computation:
//!
//! 1. Same path with unchanged inode, size and mtime: nothing to do
//! 2. Same inode, size and mtime as a fingerprinted known video: reuse its
//!    fingerprint. An inode whose size or mtime moved falls through to step 3.
//! 3. Same size and content digest as a fingerprinted known video: reuse
//! 4. Everything else is new, grouped with identical new files by the same
//!    keys. Files without a digest always get a group of their own.

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vidsift_core::{ContentKey, FingerprintRef, InodeInfo, VideoDescriptor};
use vidsift_scan::{ContentDigest, StreamingDigest};

/// Videos believed to share content. The first member is canonical.
#[derive(Debug, Clone)]
pub struct EquivalenceGroup {
    members: Vec<VideoDescriptor>,
}

impl EquivalenceGroup {
    /// Create a group holding a single video.
    pub fn singleton(video: VideoDescriptor) -> Self {
        Self {
            members: vec![video],
        }
    }

    /// The member that gets fingerprinted.
    pub fn canonical(&self) -> &VideoDescriptor {
        &self.members[0]
    }

    /// All members, canonical first.
    pub fn members(&self) -> &[VideoDescriptor] {
        &self.members
    }

    /// Take ownership of the members.
    pub fn into_members(self) -> Vec<VideoDescriptor> {
        self.members
    }

    /// Number of members (never zero).
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; groups are created with one member.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if the canonical member already carries a fingerprint.
    pub fn is_reused(&self) -> bool {
        self.canonical().fingerprint.is_some()
    }

    /// Add a member known to share the canonical member's content.
    pub fn push(&mut self, video: VideoDescriptor) {
        self.members.push(video);
    }
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Unchanged files already in the store.
    pub unchanged: u64,
    /// Files reusing a known fingerprint through their inode.
    pub reused_by_inode: u64,
    /// Files reusing a known fingerprint through their content digest.
    pub reused_by_content: u64,
    /// Groups that need a fingerprint computation.
    pub new_groups: u64,
    /// New files folded into another new file's group.
    pub folded: u64,
    /// Files whose content digest could not be computed.
    pub hash_failures: u64,
    /// Corrupted descriptors left out entirely.
    pub corrupted: u64,
}

/// Output of one reconciliation pass.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Descriptors that need no further work.
    pub unchanged: Vec<VideoDescriptor>,
    /// Groups covering every other usable descriptor exactly once.
    pub groups: Vec<EquivalenceGroup>,
    /// Counters.
    pub stats: ReconcileStats,
}

impl Reconciliation {
    /// Groups that need a fingerprint computation.
    pub fn pending_groups(&self) -> impl Iterator<Item = &EquivalenceGroup> {
        self.groups.iter().filter(|g| !g.is_reused())
    }
}

/// A fingerprinted known video, as far as the inode index cares.
struct KnownInode {
    size: u64,
    modified: SystemTime,
    fingerprint: FingerprintRef,
}

/// Reconciles discovered videos against known ones.
pub struct Reconciler<D = StreamingDigest> {
    digest: D,
}

impl Reconciler<StreamingDigest> {
    /// Create a reconciler that streams files from disk.
    pub fn new() -> Self {
        Self {
            digest: StreamingDigest,
        }
    }
}

impl Default for Reconciler<StreamingDigest> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ContentDigest> Reconciler<D> {
    /// Create a reconciler with a custom digest.
    pub fn with_digest(digest: D) -> Self {
        Self { digest }
    }

    /// Partition `fresh` given the videos the store already knows.
    pub fn reconcile(&self, fresh: Vec<VideoDescriptor>, known: &[VideoDescriptor]) -> Reconciliation {
        let mut stats = ReconcileStats::default();
        let known_by_path: HashMap<&Path, &VideoDescriptor> =
            known.iter().map(|k| (k.path(), k)).collect();

        let mut by_inode: HashMap<InodeInfo, KnownInode> = HashMap::new();
        let mut by_content: HashMap<ContentKey, FingerprintRef> = HashMap::new();
        for video in known {
            let Some(fingerprint) = &video.fingerprint else {
                continue;
            };
            by_inode.entry(video.inode).or_insert_with(|| KnownInode {
                size: video.size,
                modified: video.modified,
                fingerprint: FingerprintRef::clone(fingerprint),
            });
            if let Some(key) = video.content_key() {
                by_content
                    .entry(key)
                    .or_insert_with(|| FingerprintRef::clone(fingerprint));
            }
        }

        let mut unchanged = Vec::new();
        let mut reused = Vec::new();
        let mut new = Vec::new();

        for mut video in fresh {
            if video.corrupted {
                stats.corrupted += 1;
                continue;
            }

            if let Some(stored) = known_by_path.get(video.path()) {
                if video.is_unchanged_from(stored) {
                    video.id = stored.id;
                    video.content_hash = stored.content_hash;
                    video.fingerprint = stored.fingerprint.clone();
                    stats.unchanged += 1;
                    unchanged.push(video);
                    continue;
                }
            }

            // Always digest before any lookup so every descriptor carries its key.
            match self.digest.digest(&video) {
                Ok(hash) => video.content_hash = Some(hash),
                Err(err) => {
                    warn!(path = %video.path.display(), "Could not hash file: {err}");
                    stats.hash_failures += 1;
                }
            }

            // A hardlink shares size and mtime with its inode; anything else
            // is an in-place edit or a recycled inode number.
            let inode_match = by_inode
                .get(&video.inode)
                .filter(|k| k.size == video.size && k.modified == video.modified);

            if let Some(known) = inode_match {
                video.fingerprint = Some(FingerprintRef::clone(&known.fingerprint));
                stats.reused_by_inode += 1;
                reused.push(EquivalenceGroup::singleton(video));
            } else if let Some(fingerprint) =
                video.content_key().and_then(|key| by_content.get(&key))
            {
                video.fingerprint = Some(FingerprintRef::clone(fingerprint));
                stats.reused_by_content += 1;
                reused.push(EquivalenceGroup::singleton(video));
            } else {
                new.push(video);
            }
        }

        let mut groups = group_new(new, &mut stats);
        stats.new_groups = groups.len() as u64;
        groups.extend(reused);

        debug!(?stats, "Reconciliation finished");
        Reconciliation {
            unchanged,
            groups,
            stats,
        }
    }
}

/// Group new descriptors with each other by inode and by content key.
///
/// Only descriptors with a content digest are folded.
fn group_new(new: Vec<VideoDescriptor>, stats: &mut ReconcileStats) -> Vec<EquivalenceGroup> {
    let mut groups: Vec<EquivalenceGroup> = Vec::new();
    let mut inode_index: HashMap<InodeInfo, usize> = HashMap::new();
    let mut content_index: HashMap<ContentKey, usize> = HashMap::new();

    for video in new {
        let Some(key) = video.content_key() else {
            groups.push(EquivalenceGroup::singleton(video));
            continue;
        };
        let existing = inode_index
            .get(&video.inode)
            .or_else(|| content_index.get(&key))
            .copied();

        let index = match existing {
            Some(index) => {
                stats.folded += 1;
                groups[index].push(video);
                index
            }
            None => {
                groups.push(EquivalenceGroup::singleton(video));
                groups.len() - 1
            }
        };

        let member = &groups[index].members[groups[index].len() - 1];
        inode_index.entry(member.inode).or_insert(index);
        content_index.entry(key).or_insert(index);
    }

    groups
}
