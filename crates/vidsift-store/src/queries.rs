use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use compact_str::CompactString;
use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};
use tracing::debug;
use uuid::Uuid;

use vidsift_core::{
    Fingerprint, FingerprintRef, InodeInfo, MediaInfo, PersistRecord, StoreError, Thumbnail,
    VideoDescriptor, VideoStore,
};

use crate::sqlite::{SqliteStore, classify, from_nanos, to_nanos};

const VIDEO_COLUMNS: &str = "id, path, file_name, size, modified_ns, inode, device, nlink, \
     symlink_target, content_hash, duration, width, height, video_codec, audio_codec, bitrate, \
     corrupted, fingerprint_id";

const FINGERPRINT_COLUMNS: &str = "id, uid, kind, value, duration, neighbors, bucket";

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub videos: u64,
    pub fingerprints: u64,
    pub thumbnails: u64,
    /// Fingerprints currently assigned to a bucket.
    pub bucketed: u64,
}

/// Videos of one persisted duplicate bucket.
#[derive(Debug, Clone)]
pub struct StoredGroup {
    pub bucket: i64,
    pub videos: Vec<VideoDescriptor>,
}

impl SqliteStore {
    /// Count rows in each table.
    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        self.conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM video), \
                        (SELECT COUNT(*) FROM fingerprint), \
                        (SELECT COUNT(*) FROM thumbnail), \
                        (SELECT COUNT(*) FROM fingerprint WHERE bucket >= 0)",
                [],
                |row| {
                    Ok(StoreCounts {
                        videos: row.get::<_, i64>(0)? as u64,
                        fingerprints: row.get::<_, i64>(1)? as u64,
                        thumbnails: row.get::<_, i64>(2)? as u64,
                        bucketed: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .map_err(classify)
    }

    /// Duplicate buckets from the last persisted clustering pass.
    ///
    /// Only buckets holding at least two fingerprints referenced by at
    /// least two distinct videos are returned, with videos sorted by path.
    pub fn duplicate_groups(&self) -> Result<Vec<StoredGroup>, StoreError> {
        let fingerprints = self.fingerprints_by_id()?;

        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM video \
             WHERE fingerprint_id IN ( \
                 SELECT id FROM fingerprint WHERE bucket IN ( \
                     SELECT f.bucket FROM fingerprint f \
                     JOIN video v ON v.fingerprint_id = f.id \
                     WHERE f.bucket >= 0 \
                     GROUP BY f.bucket \
                     HAVING COUNT(DISTINCT f.id) >= 2 AND COUNT(DISTINCT v.id) >= 2)) \
             ORDER BY path"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        let rows = stmt.query_map([], video_from_row).map_err(classify)?;

        let mut groups: BTreeMap<i64, Vec<VideoDescriptor>> = BTreeMap::new();
        for row in rows {
            let (video, fingerprint_id) = row.map_err(classify)?;
            let video = attach(video, fingerprint_id, &fingerprints);
            if let Some(bucket) = video.fingerprint.as_ref().map(|f| f.bucket) {
                groups.entry(bucket).or_default().push(video);
            }
        }

        Ok(groups
            .into_iter()
            .map(|(bucket, videos)| StoredGroup { bucket, videos })
            .collect())
    }

    /// Preview frames stored for a video row, in sample order.
    pub fn thumbnails(&self, video_id: i64) -> Result<Vec<Thumbnail>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT timestamp, data FROM thumbnail WHERE video_id = ?1 ORDER BY position",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![video_id], |row| {
                Ok(Thumbnail::new(row.get(0)?, row.get(1)?))
            })
            .map_err(classify)?;
        rows.collect::<Result<_, _>>().map_err(classify)
    }

    /// Look up one video by path.
    pub fn video_by_path(&self, path: &std::path::Path) -> Result<Option<VideoDescriptor>, StoreError> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM video WHERE path = ?1");
        let found = self
            .conn
            .query_row(&sql, params![path.to_string_lossy()], video_from_row)
            .optional()
            .map_err(classify)?;

        match found {
            Some((video, fingerprint_id)) => {
                let fingerprints = self.fingerprints_by_id()?;
                Ok(Some(attach(video, fingerprint_id, &fingerprints)))
            }
            None => Ok(None),
        }
    }

    fn fingerprints_by_id(&self) -> Result<HashMap<i64, FingerprintRef>, StoreError> {
        Ok(self
            .all_fingerprints()?
            .into_iter()
            .filter_map(|f| f.id.map(|id| (id, Arc::new(f))))
            .collect())
    }

    fn begin(&mut self) -> Result<Transaction<'_>, StoreError> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)
    }
}

impl VideoStore for SqliteStore {
    fn all_videos(&self) -> Result<Vec<VideoDescriptor>, StoreError> {
        let fingerprints = self.fingerprints_by_id()?;

        let sql = format!("SELECT {VIDEO_COLUMNS} FROM video ORDER BY id");
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        let rows = stmt.query_map([], video_from_row).map_err(classify)?;

        let mut videos = Vec::new();
        for row in rows {
            let (video, fingerprint_id) = row.map_err(classify)?;
            videos.push(attach(video, fingerprint_id, &fingerprints));
        }
        debug!(count = videos.len(), "Loaded videos");
        Ok(videos)
    }

    fn all_fingerprints(&self) -> Result<Vec<Fingerprint>, StoreError> {
        let sql = format!(
            "SELECT {FINGERPRINT_COLUMNS} FROM fingerprint \
             WHERE EXISTS (SELECT 1 FROM video WHERE video.fingerprint_id = fingerprint.id) \
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(classify)?;

        let mut fingerprints = Vec::new();
        for row in rows {
            let (id, uid, kind, value, duration, neighbors, bucket) = row.map_err(classify)?;
            let uid = Uuid::parse_str(&uid).map_err(|e| corrupt(id, "uid", e))?;
            let kind = kind.parse().map_err(|e| corrupt(id, "kind", e))?;
            let neighbors =
                serde_json::from_str(&neighbors).map_err(|e| corrupt(id, "neighbors", e))?;
            fingerprints.push(Fingerprint {
                uid,
                id: Some(id),
                kind,
                value,
                duration,
                neighbors,
                bucket,
            });
        }
        Ok(fingerprints)
    }

    fn create_video_with_fingerprint(
        &mut self,
        video: &VideoDescriptor,
        fingerprint: &Fingerprint,
        thumbnails: &[Thumbnail],
    ) -> Result<(), StoreError> {
        let tx = self.begin()?;
        let fingerprint_id = insert_fingerprint(&tx, fingerprint)?;
        let replaced = upsert_video(&tx, video, fingerprint_id, thumbnails)?;
        prune_fingerprints(&tx, replaced)?;
        tx.commit().map_err(classify)
    }

    fn create_videos_with_fingerprints(
        &mut self,
        records: &[PersistRecord],
    ) -> Result<usize, StoreError> {
        let tx = self.begin()?;
        let mut fingerprint_ids: HashMap<Uuid, i64> = HashMap::new();
        let mut replaced = HashSet::new();
        let mut count = 0;

        for record in records {
            let fingerprint_id = match fingerprint_ids.get(&record.fingerprint.uid) {
                Some(&id) => id,
                None => {
                    let id = insert_fingerprint(&tx, &record.fingerprint)?;
                    fingerprint_ids.insert(record.fingerprint.uid, id);
                    id
                }
            };
            replaced.extend(upsert_video(
                &tx,
                &record.video,
                fingerprint_id,
                &record.thumbnails,
            )?);
            count += 1;
        }
        prune_fingerprints(&tx, replaced)?;

        tx.commit().map_err(classify)?;
        debug!(count, fingerprints = fingerprint_ids.len(), "Batch committed");
        Ok(count)
    }

    fn bulk_update_fingerprints(
        &mut self,
        fingerprints: &[Fingerprint],
    ) -> Result<(), StoreError> {
        let tx = self.begin()?;
        {
            let mut stmt = tx
                .prepare_cached("UPDATE fingerprint SET bucket = ?1, neighbors = ?2 WHERE uid = ?3")
                .map_err(classify)?;
            for fingerprint in fingerprints {
                let neighbors = serde_json::to_string(&fingerprint.neighbors).map_err(|e| {
                    StoreError::Query {
                        message: format!("encoding neighbors: {e}"),
                    }
                })?;
                stmt.execute(params![
                    fingerprint.bucket,
                    neighbors,
                    fingerprint.uid.to_string()
                ])
                .map_err(classify)?;
            }
        }
        tx.commit().map_err(classify)?;
        debug!(count = fingerprints.len(), "Fingerprint buckets updated");
        Ok(())
    }
}

/// Insert a fingerprint unless its uid is already stored, returning its row id.
fn insert_fingerprint(tx: &Transaction<'_>, fingerprint: &Fingerprint) -> Result<i64, StoreError> {
    let uid = fingerprint.uid.to_string();
    let neighbors = serde_json::to_string(&fingerprint.neighbors).map_err(|e| StoreError::Query {
        message: format!("encoding neighbors: {e}"),
    })?;

    tx.prepare_cached(
        "INSERT INTO fingerprint (uid, kind, value, duration, neighbors, bucket) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(uid) DO NOTHING",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            uid,
            fingerprint.kind.to_string(),
            fingerprint.value,
            fingerprint.duration,
            neighbors,
            fingerprint.bucket
        ])
    })
    .map_err(classify)?;

    tx.query_row(
        "SELECT id FROM fingerprint WHERE uid = ?1",
        params![uid],
        |row| row.get(0),
    )
    .map_err(classify)
}

/// Insert or replace a video row by path, along with its thumbnails.
///
/// Returns the fingerprint row the path referenced before, when it differs.
fn upsert_video(
    tx: &Transaction<'_>,
    video: &VideoDescriptor,
    fingerprint_id: i64,
    thumbnails: &[Thumbnail],
) -> Result<Option<i64>, StoreError> {
    let media = video.media.as_ref();
    let previous: Option<i64> = tx
        .prepare_cached("SELECT fingerprint_id FROM video WHERE path = ?1")
        .and_then(|mut stmt| {
            stmt.query_row(params![video.path.to_string_lossy()], |row| row.get(0))
                .optional()
        })
        .map_err(classify)?
        .flatten();

    let video_id: i64 = tx
        .prepare_cached(
            "INSERT INTO video \
             (path, file_name, size, modified_ns, inode, device, nlink, symlink_target, \
              content_hash, duration, width, height, video_codec, audio_codec, bitrate, \
              corrupted, fingerprint_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
             ON CONFLICT(path) DO UPDATE SET \
                 file_name = excluded.file_name, \
                 size = excluded.size, \
                 modified_ns = excluded.modified_ns, \
                 inode = excluded.inode, \
                 device = excluded.device, \
                 nlink = excluded.nlink, \
                 symlink_target = excluded.symlink_target, \
                 content_hash = excluded.content_hash, \
                 duration = excluded.duration, \
                 width = excluded.width, \
                 height = excluded.height, \
                 video_codec = excluded.video_codec, \
                 audio_codec = excluded.audio_codec, \
                 bitrate = excluded.bitrate, \
                 corrupted = excluded.corrupted, \
                 fingerprint_id = excluded.fingerprint_id \
             RETURNING id",
        )
        .and_then(|mut stmt| {
            stmt.query_row(
                params![
                    video.path.to_string_lossy(),
                    video.file_name.as_str(),
                    video.size as i64,
                    to_nanos(video.modified),
                    video.inode.inode as i64,
                    video.inode.device as i64,
                    video.nlink as i64,
                    video.symlink_target.as_deref(),
                    video.content_hash.map(|h| h as i64),
                    media.map(|m| m.duration),
                    media.map(|m| m.width),
                    media.map(|m| m.height),
                    media.map(|m| m.video_codec.as_str()),
                    media.and_then(|m| m.audio_codec.as_deref()),
                    media.map(|m| m.bitrate as i64),
                    video.corrupted,
                    fingerprint_id
                ],
                |row| row.get(0),
            )
        })
        .map_err(classify)?;

    tx.execute("DELETE FROM thumbnail WHERE video_id = ?1", params![video_id])
        .map_err(classify)?;
    let mut stmt = tx
        .prepare_cached(
            "INSERT INTO thumbnail (video_id, position, timestamp, data) VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(classify)?;
    for (position, thumbnail) in thumbnails.iter().enumerate() {
        stmt.execute(params![
            video_id,
            position as i64,
            thumbnail.timestamp,
            thumbnail.data
        ])
        .map_err(classify)?;
    }
    Ok(previous.filter(|&id| id != fingerprint_id))
}

/// Delete fingerprint rows in `candidates` that no video references any more.
fn prune_fingerprints(
    tx: &Transaction<'_>,
    candidates: impl IntoIterator<Item = i64>,
) -> Result<(), StoreError> {
    let mut stmt = tx
        .prepare_cached(
            "DELETE FROM fingerprint WHERE id = ?1 \
             AND NOT EXISTS (SELECT 1 FROM video WHERE fingerprint_id = ?1)",
        )
        .map_err(classify)?;
    let mut pruned = 0;
    for id in candidates {
        pruned += stmt.execute(params![id]).map_err(classify)?;
    }
    if pruned > 0 {
        debug!(pruned, "Removed unreferenced fingerprints");
    }
    Ok(())
}

/// Map a video row, returning the fingerprint row id it references.
fn video_from_row(row: &Row<'_>) -> rusqlite::Result<(VideoDescriptor, Option<i64>)> {
    let path: String = row.get(1)?;
    let mut video = VideoDescriptor::new(
        PathBuf::from(path),
        row.get::<_, i64>(3)? as u64,
        from_nanos(row.get(4)?),
        InodeInfo::new(row.get::<_, i64>(5)? as u64, row.get::<_, i64>(6)? as u64),
    );
    video.id = Some(row.get(0)?);
    video.file_name = CompactString::new(row.get::<_, String>(2)?);
    video.nlink = row.get::<_, i64>(7)? as u64;
    video.symlink_target = row.get::<_, Option<String>>(8)?.map(CompactString::from);
    video.content_hash = row.get::<_, Option<i64>>(9)?.map(|h| h as u64);
    video.media = match row.get::<_, Option<f64>>(10)? {
        Some(duration) => Some(MediaInfo {
            duration,
            width: row.get::<_, Option<u32>>(11)?.unwrap_or_default(),
            height: row.get::<_, Option<u32>>(12)?.unwrap_or_default(),
            video_codec: row
                .get::<_, Option<String>>(13)?
                .map(CompactString::from)
                .unwrap_or_default(),
            audio_codec: row.get::<_, Option<String>>(14)?.map(CompactString::from),
            bitrate: row.get::<_, Option<i64>>(15)?.unwrap_or_default() as u64,
            size: video.size,
        }),
        None => None,
    };
    video.corrupted = row.get(16)?;
    Ok((video, row.get(17)?))
}

fn attach(
    mut video: VideoDescriptor,
    fingerprint_id: Option<i64>,
    fingerprints: &HashMap<i64, FingerprintRef>,
) -> VideoDescriptor {
    video.fingerprint = fingerprint_id
        .and_then(|id| fingerprints.get(&id))
        .map(FingerprintRef::clone);
    video
}

fn corrupt(id: i64, column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::CorruptRow {
        message: format!("fingerprint {id} {column}: {err}"),
    }
}
