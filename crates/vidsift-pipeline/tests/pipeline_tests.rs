use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vidsift_analyze::{EquivalenceGroup, FingerprintConfig, FingerprintGenerator, HashKind};
use vidsift_core::{
    Fingerprint, FrameExtractor, InodeInfo, MediaError, MediaInfo, MediaProbe, PersistRecord,
    PipelineError, ScanConfig, StoreError, Thumbnail, VideoDescriptor, VideoStore,
};
use vidsift_pipeline::{
    BatchWriter, FingerprintOrchestrator, FingerprintProgress, OrchestratorConfig, Pipeline,
    PipelineEvent, SharedStore, run_clustering,
};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// In-memory store that can be told to fail.
#[derive(Default)]
struct MemoryStore {
    videos: Vec<VideoDescriptor>,
    fingerprints: Vec<Fingerprint>,
    create_calls: usize,
    busy_failures: usize,
    query_failures: usize,
    unreachable: bool,
}

impl MemoryStore {
    fn shared(self) -> SharedStore<Self> {
        Arc::new(Mutex::new(self))
    }

    fn fingerprint_id(&mut self, fingerprint: &Fingerprint) -> i64 {
        if let Some(existing) = self.fingerprints.iter().find(|f| f.uid == fingerprint.uid) {
            return existing.id.unwrap();
        }
        let mut stored = fingerprint.clone();
        let id = self.fingerprints.len() as i64 + 1;
        stored.id = Some(id);
        self.fingerprints.push(stored);
        id
    }

    fn upsert(&mut self, video: &VideoDescriptor) {
        match self.videos.iter_mut().find(|v| v.path == video.path) {
            Some(existing) => *existing = video.clone(),
            None => {
                let mut video = video.clone();
                video.id = Some(self.videos.len() as i64 + 1);
                self.videos.push(video);
            }
        }
    }
}

impl VideoStore for MemoryStore {
    fn all_videos(&self) -> Result<Vec<VideoDescriptor>, StoreError> {
        if self.unreachable {
            return Err(StoreError::Unavailable {
                message: "disk gone".into(),
            });
        }
        Ok(self.videos.clone())
    }

    fn all_fingerprints(&self) -> Result<Vec<Fingerprint>, StoreError> {
        Ok(self.fingerprints.clone())
    }

    fn create_video_with_fingerprint(
        &mut self,
        video: &VideoDescriptor,
        fingerprint: &Fingerprint,
        _thumbnails: &[Thumbnail],
    ) -> Result<(), StoreError> {
        self.create_calls += 1;
        self.fingerprint_id(fingerprint);
        self.upsert(video);
        Ok(())
    }

    fn create_videos_with_fingerprints(
        &mut self,
        records: &[PersistRecord],
    ) -> Result<usize, StoreError> {
        self.create_calls += 1;
        if self.busy_failures > 0 {
            self.busy_failures -= 1;
            return Err(StoreError::Busy {
                message: "database is locked".into(),
            });
        }
        if self.query_failures > 0 {
            self.query_failures -= 1;
            return Err(StoreError::Query {
                message: "disk I/O error".into(),
            });
        }
        for record in records {
            self.fingerprint_id(&record.fingerprint);
            self.upsert(&record.video);
        }
        Ok(records.len())
    }

    fn bulk_update_fingerprints(&mut self, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        for update in fingerprints {
            if let Some(stored) = self.fingerprints.iter_mut().find(|f| f.uid == update.uid) {
                stored.bucket = update.bucket;
                stored.neighbors = update.neighbors.clone();
            }
        }
        Ok(())
    }
}

fn png(pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_fn(32, 32, |x, y| Rgb(pixel(x, y)));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Checkerboard frames, except black frames for files named `blank*`.
#[derive(Default)]
struct PatternExtractor {
    calls: AtomicUsize,
}

impl FrameExtractor for PatternExtractor {
    fn extract_frame(&self, path: &Path, _timestamp: f64) -> Result<Vec<u8>, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("blank") {
            return Ok(png(|_, _| [0, 0, 0]));
        }
        Ok(png(|x, y| {
            if (x / 8 + y / 8) % 2 == 0 { [255, 255, 255] } else { [0, 0, 0] }
        }))
    }
}

/// Reports a duration from the file name: `long*` files run ten minutes.
#[derive(Clone, Default)]
struct NameProbe {
    calls: Arc<AtomicUsize>,
}

impl MediaProbe for NameProbe {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("corrupt") {
            return Err(MediaError::Unreadable {
                path: path.to_path_buf(),
                message: "moov atom not found".into(),
            });
        }
        let duration = if name.starts_with("long") { 600.0 } else { 30.0 };
        Ok(MediaInfo {
            duration,
            ..MediaInfo::default()
        })
    }
}

fn fast_config() -> FingerprintConfig {
    FingerprintConfig::builder()
        .kind(HashKind::Fast)
        .frame_count(4usize)
        .tile_size(32u32)
        .build()
        .unwrap()
}

fn orchestrator_config(batch_size: usize) -> OrchestratorConfig {
    OrchestratorConfig::builder()
        .workers(3usize)
        .batch_size(batch_size)
        .flush_interval(Duration::from_secs(60))
        .retry_base_delay(Duration::from_millis(1))
        .build()
        .unwrap()
}

fn video(path: &str, inode: u64) -> VideoDescriptor {
    let mut v = VideoDescriptor::new(path, 100, SystemTime::UNIX_EPOCH, InodeInfo::new(inode, 1));
    v.media = Some(MediaInfo {
        duration: 30.0,
        ..MediaInfo::default()
    });
    v
}

fn record(i: u64) -> PersistRecord {
    let fp = Arc::new(Fingerprint::new(HashKind::Fast, format!("{i:016x}"), 30.0));
    PersistRecord::new(video(&format!("/v/{i:02}.mp4"), i), fp, Arc::from(Vec::new()))
}

// ---------------------------------------------------------------------------
// Batch writer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_writer_persists_every_task_exactly_once() {
    let store = MemoryStore::default().shared();
    let (tx, rx) = mpsc::channel(8);
    let writer = BatchWriter::new(Arc::clone(&store), orchestrator_config(10));
    let handle = tokio::spawn(writer.run(rx, CancellationToken::new()));

    for i in 0..25 {
        tx.send(record(i)).await.unwrap();
    }
    drop(tx);
    let report = handle.await.unwrap();

    assert_eq!(report.persisted_rows, 25);
    assert_eq!(report.batches, 3);
    assert_eq!(report.dropped_rows, 0);

    let store = store.lock().unwrap();
    assert_eq!(store.videos.len(), 25);
    let mut paths: Vec<_> = store.videos.iter().map(|v| v.path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 25);
}

#[tokio::test]
async fn test_writer_flushes_on_interval() {
    let store = MemoryStore::default().shared();
    let (tx, rx) = mpsc::channel(8);
    let config = OrchestratorConfig::builder()
        .batch_size(100usize)
        .flush_interval(Duration::from_millis(20))
        .build()
        .unwrap();
    let handle = tokio::spawn(BatchWriter::new(Arc::clone(&store), config).run(rx, CancellationToken::new()));

    tx.send(record(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.lock().unwrap().videos.len(), 1);

    drop(tx);
    assert_eq!(handle.await.unwrap().batches, 1);
}

#[tokio::test]
async fn test_writer_retries_busy_store() {
    let store = MemoryStore {
        busy_failures: 2,
        ..MemoryStore::default()
    }
    .shared();
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::spawn(
        BatchWriter::new(Arc::clone(&store), orchestrator_config(5)).run(rx, CancellationToken::new()),
    );

    for i in 0..5 {
        tx.send(record(i)).await.unwrap();
    }
    drop(tx);
    let report = handle.await.unwrap();

    assert_eq!(report.retries, 2);
    assert_eq!(report.persisted_rows, 5);
    assert_eq!(store.lock().unwrap().create_calls, 3);
}

#[tokio::test]
async fn test_writer_drops_batch_after_max_attempts() {
    let store = MemoryStore {
        busy_failures: 10,
        ..MemoryStore::default()
    }
    .shared();
    let config = OrchestratorConfig::builder()
        .batch_size(2usize)
        .max_flush_attempts(3u32)
        .retry_base_delay(Duration::from_millis(1))
        .build()
        .unwrap();
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::spawn(BatchWriter::new(Arc::clone(&store), config).run(rx, CancellationToken::new()));

    for i in 0..2 {
        tx.send(record(i)).await.unwrap();
    }
    drop(tx);
    let report = handle.await.unwrap();

    assert_eq!(report.dropped_batches, 1);
    assert_eq!(report.dropped_rows, 2);
    assert_eq!(report.retries, 2);
    assert_eq!(store.lock().unwrap().create_calls, 3);
}

#[tokio::test]
async fn test_writer_continues_after_non_transient_error() {
    let store = MemoryStore {
        query_failures: 1,
        ..MemoryStore::default()
    }
    .shared();
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::spawn(
        BatchWriter::new(Arc::clone(&store), orchestrator_config(2)).run(rx, CancellationToken::new()),
    );

    for i in 0..4 {
        tx.send(record(i)).await.unwrap();
    }
    drop(tx);
    let report = handle.await.unwrap();

    assert_eq!(report.dropped_batches, 1);
    assert_eq!(report.retries, 0);
    assert_eq!(report.persisted_rows, 2);
}

#[tokio::test]
async fn test_cancelled_writer_keeps_draining() {
    let store = MemoryStore::default().shared();
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(8);
    let handle = tokio::spawn(BatchWriter::new(Arc::clone(&store), orchestrator_config(10)).run(rx, cancel.clone()));

    tx.send(record(0)).await.unwrap();
    cancel.cancel();
    for i in 1..5 {
        tx.send(record(i)).await.unwrap();
    }
    drop(tx);

    assert_eq!(handle.await.unwrap().persisted_rows, 5);
    assert_eq!(store.lock().unwrap().videos.len(), 5);
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reused_groups_skip_the_generator() {
    let store = MemoryStore::default().shared();
    let extractor = Arc::new(PatternExtractor::default());
    let generator = FingerprintGenerator::new(Arc::clone(&extractor), fast_config());
    let orchestrator = FingerprintOrchestrator::new(generator, Arc::clone(&store), orchestrator_config(10));

    let known = Arc::new(Fingerprint::new(HashKind::Fast, "0123456789abcdef", 30.0));
    let groups: Vec<_> = (0..6)
        .map(|i| {
            EquivalenceGroup::singleton(
                video(&format!("/v/{i}.mp4"), i).with_fingerprint(Arc::clone(&known)),
            )
        })
        .collect();

    let progress = Arc::new(FingerprintProgress::new(6));
    let report = orchestrator
        .run(groups, Arc::clone(&progress), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.reused, 6);
    assert_eq!(report.writer.persisted_rows, 6);
    assert_eq!(progress.completed(), 6);

    let store = store.lock().unwrap();
    assert_eq!(store.fingerprints.len(), 1);
    assert_eq!(store.fingerprints[0].uid, known.uid);
}

#[tokio::test]
async fn test_degenerate_groups_never_reach_the_store() {
    let store = MemoryStore::default().shared();
    let generator = FingerprintGenerator::new(PatternExtractor::default(), fast_config());
    let orchestrator = FingerprintOrchestrator::new(generator, Arc::clone(&store), orchestrator_config(10));

    let groups = vec![
        EquivalenceGroup::singleton(video("/v/blank-1.mp4", 1)),
        EquivalenceGroup::singleton(video("/v/scene.mp4", 2)),
        EquivalenceGroup::singleton(video("/v/blank-2.mp4", 3)),
    ];
    let progress = Arc::new(FingerprintProgress::new(3));
    let report = orchestrator
        .run(groups, Arc::clone(&progress), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.degenerate, 2);
    assert_eq!(report.fingerprinted, 1);
    assert_eq!(progress.completed(), 3);

    let store = store.lock().unwrap();
    assert_eq!(store.videos.len(), 1);
    assert!(store.fingerprints.iter().all(|f| !f.is_degenerate()));
    assert_eq!(store.videos[0].file_name, "scene.mp4");
}

#[tokio::test]
async fn test_group_members_share_one_fingerprint() {
    let store = MemoryStore::default().shared();
    let extractor = Arc::new(PatternExtractor::default());
    let generator = FingerprintGenerator::new(Arc::clone(&extractor), fast_config());
    let orchestrator = FingerprintOrchestrator::new(generator, Arc::clone(&store), orchestrator_config(10));

    let mut group = EquivalenceGroup::singleton(video("/v/a.mp4", 1));
    group.push(video("/v/a-copy.mp4", 2));
    group.push(video("/v/a-link.mp4", 1));
    let report = orchestrator
        .run(vec![group], Arc::new(FingerprintProgress::new(1)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 4);
    assert_eq!(report.writer.persisted_rows, 3);
    let store = store.lock().unwrap();
    assert_eq!(store.fingerprints.len(), 1);
    assert_eq!(store.videos.len(), 3);
}

#[tokio::test]
async fn test_cancelled_orchestrator_processes_nothing_new() {
    let store = MemoryStore::default().shared();
    let generator = FingerprintGenerator::new(PatternExtractor::default(), fast_config());
    let orchestrator = FingerprintOrchestrator::new(generator, Arc::clone(&store), orchestrator_config(10));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let groups = (0..4)
        .map(|i| EquivalenceGroup::singleton(video(&format!("/v/{i}.mp4"), i)))
        .collect();
    let report = orchestrator
        .run(groups, Arc::new(FingerprintProgress::new(4)), &cancel)
        .await
        .unwrap();

    assert_eq!(report.cancelled, 4);
    assert_eq!(report.fingerprinted, 0);
    assert!(store.lock().unwrap().videos.is_empty());
}

#[tokio::test]
async fn test_orchestrator_rejects_zero_workers() {
    let store = MemoryStore::default().shared();
    let generator = FingerprintGenerator::new(PatternExtractor::default(), fast_config());
    let config = OrchestratorConfig {
        workers: 0,
        ..orchestrator_config(10)
    };
    let orchestrator = FingerprintOrchestrator::new(generator, Arc::clone(&store), config);

    let groups = vec![EquivalenceGroup::singleton(video("/v/a.mp4", 1))];
    let err = orchestrator
        .run(groups, Arc::new(FingerprintProgress::new(1)), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    assert!(store.lock().unwrap().videos.is_empty());
}

#[tokio::test]
async fn test_writer_survives_zero_flush_interval() {
    let store = MemoryStore::default().shared();
    let config = OrchestratorConfig {
        flush_interval: Duration::ZERO,
        ..orchestrator_config(10)
    };
    let (tx, rx) = mpsc::channel(16);
    let writer = BatchWriter::new(Arc::clone(&store), config);
    let handle = tokio::spawn(writer.run(rx, CancellationToken::new()));

    tx.send(record(1)).await.unwrap();
    drop(tx);
    let report = handle.await.unwrap();
    assert_eq!(report.persisted_rows, 1);
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn write_videos(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), format!("contents of {name}")).unwrap();
    }
}

fn pipeline(root: &Path) -> Pipeline<NameProbe, PatternExtractor> {
    pipeline_with_probe(root, NameProbe::default())
}

fn pipeline_with_probe(root: &Path, probe: NameProbe) -> Pipeline<NameProbe, PatternExtractor> {
    Pipeline::new(ScanConfig::new(root), probe, PatternExtractor::default())
        .with_fingerprint_config(fast_config())
        .with_orchestrator_config(orchestrator_config(2))
}

#[tokio::test]
async fn test_unreachable_store_is_fatal() {
    let temp = TempDir::new().unwrap();
    write_videos(temp.path(), &["a.mp4"]);
    let store = MemoryStore {
        unreachable: true,
        ..MemoryStore::default()
    }
    .shared();

    let err = pipeline(temp.path())
        .discover_and_fingerprint(store)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::StoreUnreachable { .. }));
}

#[tokio::test]
async fn test_invalid_fingerprint_config_is_fatal() {
    let temp = TempDir::new().unwrap();
    write_videos(temp.path(), &["a.mp4"]);
    let config = FingerprintConfig {
        frame_count: 0,
        ..fast_config()
    };

    let err = pipeline(temp.path())
        .with_fingerprint_config(config)
        .discover_and_fingerprint(MemoryStore::default().shared())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_no_videos_is_fatal() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("notes.txt"), "not a video").unwrap();

    let err = pipeline(temp.path())
        .discover_and_fingerprint(MemoryStore::default().shared())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoInput { .. }));
}

#[tokio::test]
async fn test_discovery_then_clustering() {
    let temp = TempDir::new().unwrap();
    write_videos(
        temp.path(),
        &["a.mp4", "b.mkv", "blank.mp4", "corrupt.avi", "long.mov"],
    );
    let store = MemoryStore::default().shared();
    let pipeline = pipeline(temp.path());

    let report = pipeline
        .discover_and_fingerprint(Arc::clone(&store))
        .await
        .unwrap();
    assert_eq!(report.scan.videos, 5);
    assert_eq!(report.probe.corrupted, 1);
    assert_eq!(report.reconcile.new_groups, 4);
    assert_eq!(report.fingerprint.fingerprinted, 3);
    assert_eq!(report.fingerprint.degenerate, 1);
    assert_eq!(report.fingerprint.writer.persisted_rows, 3);

    let clusters = pipeline.cluster(Arc::clone(&store)).await.unwrap();
    assert_eq!(clusters.buckets.len(), 1);
    let names: Vec<_> = clusters.buckets[0]
        .videos
        .iter()
        .map(|v| v.file_name.to_string())
        .collect();
    assert_eq!(names, ["a.mp4", "b.mkv"]);

    let stored = store.lock().unwrap();
    assert_eq!(stored.fingerprints.iter().filter(|f| f.is_bucketed()).count(), 2);
}

#[tokio::test]
async fn test_second_run_reuses_everything() {
    let temp = TempDir::new().unwrap();
    write_videos(temp.path(), &["a.mp4", "b.mp4"]);
    let store = MemoryStore::default().shared();

    pipeline(temp.path())
        .discover_and_fingerprint(Arc::clone(&store))
        .await
        .unwrap();

    // A byte-identical copy appears next to the known files.
    fs::copy(temp.path().join("a.mp4"), temp.path().join("a-copy.mp4")).unwrap();
    let again = pipeline(temp.path());
    let report = again.discover_and_fingerprint(Arc::clone(&store)).await.unwrap();

    assert_eq!(report.probe.unchanged, 2);
    assert_eq!(report.probe.probed, 1);
    assert_eq!(report.reconcile.unchanged, 2);
    assert_eq!(report.reconcile.reused_by_content, 1);
    assert_eq!(report.fingerprint.fingerprinted, 0);
    assert_eq!(report.fingerprint.reused, 1);
    assert_eq!(store.lock().unwrap().videos.len(), 3);
    assert_eq!(store.lock().unwrap().fingerprints.len(), 2);
}

#[tokio::test]
async fn test_start_discovery_streams_progress_then_result() {
    let temp = TempDir::new().unwrap();
    write_videos(temp.path(), &["a.mp4", "b.mp4", "c.mp4"]);
    let mut rx = pipeline(temp.path()).start_discovery(MemoryStore::default().shared());

    let mut scanning = Vec::new();
    let mut progress = Vec::new();
    let mut result = None;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Scanning(update) => scanning.push(update),
            PipelineEvent::Progress(update) => progress.push(update),
            PipelineEvent::Complete(r) => result = Some(r),
        }
    }

    let report = result.unwrap().unwrap();
    assert_eq!(report.fingerprint.fingerprinted, 3);
    assert_eq!(scanning.last().unwrap().videos_found, 3);
    assert_eq!(progress.len(), 3);
    assert_eq!(progress.last().unwrap().fraction(), 1.0);
}

#[tokio::test]
async fn test_unchanged_files_keep_stored_metadata() {
    let temp = TempDir::new().unwrap();
    write_videos(temp.path(), &["a.mp4", "b.mp4", "long.mp4"]);
    let store = MemoryStore::default().shared();
    let probe = NameProbe::default();

    pipeline_with_probe(temp.path(), probe.clone())
        .discover_and_fingerprint(Arc::clone(&store))
        .await
        .unwrap();
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);

    let report = pipeline_with_probe(temp.path(), probe.clone())
        .discover_and_fingerprint(Arc::clone(&store))
        .await
        .unwrap();
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.probe.unchanged, 3);
    assert_eq!(report.reconcile.unchanged, 3);

    // An edited file is probed again.
    fs::write(temp.path().join("b.mp4"), "re-encoded contents of b.mp4").unwrap();
    let report = pipeline_with_probe(temp.path(), probe.clone())
        .discover_and_fingerprint(Arc::clone(&store))
        .await
        .unwrap();
    assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    assert_eq!(report.probe.unchanged, 2);
}

#[test]
fn test_run_clustering_on_plain_store() {
    let mut store = MemoryStore::default();
    let near_a = Fingerprint::new(HashKind::Fast, "0f0f0f0f0f0f0f0f", 60.0);
    let near_b = Fingerprint::new(HashKind::Fast, "0f0f0f0f0f0f0f0e", 62.0);
    let far = Fingerprint::new(HashKind::Fast, "ffffffffffffffff", 60.0);
    for (i, fp) in [near_a, near_b, far].into_iter().enumerate() {
        let v = video(&format!("/v/{i}.mp4"), i as u64).with_fingerprint(Arc::new(fp.clone()));
        store.create_video_with_fingerprint(&v, &fp, &[]).unwrap();
    }

    let (buckets, stats) = run_clustering(&mut store, &Default::default()).unwrap();
    assert_eq!(stats.fingerprints, 3);
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].videos.len(), 2);
    assert_eq!(store.fingerprints[2].bucket, -1);
}
