//! The required `PostStore` implementation, backed by a single serialized
//! `rusqlite::Connection` — writers are exclusive, readers are pipelined
//! through the same connection via `spawn_blocking`. Schema and connection
//! lifecycle follow an open-once-reuse-the-handle pattern, generalised from
//! one append-only events table to the full post/fingerprint/settings
//! schema this core needs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::StoreError;
use crate::store::models::*;
use crate::store::PostStore;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Malformed(format!("store worker task panicked: {e}")))?
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL,
            author_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            approved_at TEXT,
            scheduled_at TEXT,
            published_at TEXT,
            caption TEXT,
            media_json TEXT NOT NULL,
            duplicate_info TEXT,
            channel_message_id INTEGER,
            notified_status TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
        CREATE INDEX IF NOT EXISTS idx_posts_channel_message_id ON posts(channel_message_id);

        CREATE TABLE IF NOT EXISTS image_fingerprints (
            post_id INTEGER NOT NULL,
            item_index INTEGER NOT NULL,
            kind TEXT NOT NULL,
            file_id TEXT NOT NULL,
            file_unique_id TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            dhash TEXT NOT NULL,
            phash TEXT NOT NULL,
            whash TEXT NOT NULL,
            PRIMARY KEY (post_id, item_index)
        );
        CREATE INDEX IF NOT EXISTS idx_image_fp_unique_id ON image_fingerprints(file_unique_id);
        CREATE INDEX IF NOT EXISTS idx_image_fp_file_size ON image_fingerprints(file_size);

        CREATE TABLE IF NOT EXISTS video_fingerprints (
            post_id INTEGER NOT NULL,
            item_index INTEGER NOT NULL,
            kind TEXT NOT NULL,
            file_unique_id TEXT,
            file_size INTEGER,
            duration_ms INTEGER NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            fps REAL NOT NULL,
            frames_json TEXT NOT NULL,
            audio_hash TEXT,
            segments_count INTEGER,
            PRIMARY KEY (post_id, item_index)
        );
        CREATE INDEX IF NOT EXISTS idx_video_fp_unique_id ON video_fingerprints(file_unique_id);

        CREATE TABLE IF NOT EXISTS approval_tally (
            day TEXT PRIMARY KEY,
            count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS publications (
            post_id INTEGER PRIMARY KEY,
            author_id INTEGER NOT NULL,
            published_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_publications_author ON publications(author_id);
        CREATE INDEX IF NOT EXISTS idx_publications_published_at ON publications(published_at);

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed(format!("bad timestamp {raw}: {e}")))
}

fn opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| parse_ts(&s)).transpose()
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<(Post, String)> {
    let status_raw: String = row.get("status")?;
    let media_json: String = row.get("media_json")?;
    let created_raw: String = row.get("created_at")?;
    Ok((
        Post {
            id: row.get("id")?,
            status: PostStatus::parse(&status_raw).unwrap_or(PostStatus::Pending),
            author_id: row.get("author_id")?,
            created_at: created_raw.parse().unwrap_or_else(|_| Utc::now()),
            approved_at: None,
            scheduled_at: None,
            published_at: None,
            caption: row.get("caption")?,
            media: MediaDescriptor {
                kind: MediaKind::Text,
                items: Vec::new(),
            },
            duplicate_info: row.get("duplicate_info")?,
            channel_message_id: row.get("channel_message_id")?,
            notified_status: row.get("notified_status")?,
        },
        media_json,
    ))
}

fn hydrate_post(conn: &Connection, id: i64) -> Result<Option<Post>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, status, author_id, created_at, approved_at, scheduled_at, published_at,
                caption, media_json, duplicate_info, channel_message_id, notified_status
         FROM posts WHERE id = ?1",
    )?;
    let found = stmt
        .query_row(params![id], |row| {
            let approved_at: Option<String> = row.get("approved_at")?;
            let scheduled_at: Option<String> = row.get("scheduled_at")?;
            let published_at: Option<String> = row.get("published_at")?;
            let (post, media_json) = row_to_post(row)?;
            Ok((post, media_json, approved_at, scheduled_at, published_at))
        })
        .optional()?;

    let Some((mut post, media_json, approved_at, scheduled_at, published_at)) = found else {
        return Ok(None);
    };
    post.approved_at = opt_ts(approved_at)?;
    post.scheduled_at = opt_ts(scheduled_at)?;
    post.published_at = opt_ts(published_at)?;
    post.media = serde_json::from_str(&media_json)
        .map_err(|e| StoreError::Malformed(format!("media_json: {e}")))?;
    Ok(Some(post))
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn upsert_post(&self, post: &Post) -> Result<i64, StoreError> {
        let post = post.clone();
        self.with_conn(move |conn| {
            let media_json = serde_json::to_string(&post.media)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            conn.execute(
                "INSERT INTO posts (id, status, author_id, created_at, approved_at, scheduled_at,
                    published_at, caption, media_json, duplicate_info, channel_message_id, notified_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    status=excluded.status, approved_at=excluded.approved_at,
                    scheduled_at=excluded.scheduled_at, published_at=excluded.published_at,
                    caption=excluded.caption, media_json=excluded.media_json,
                    duplicate_info=excluded.duplicate_info,
                    channel_message_id=excluded.channel_message_id,
                    notified_status=excluded.notified_status",
                params![
                    post.id,
                    post.status.as_str(),
                    post.author_id,
                    post.created_at.to_rfc3339(),
                    post.approved_at.map(|t| t.to_rfc3339()),
                    post.scheduled_at.map(|t| t.to_rfc3339()),
                    post.published_at.map(|t| t.to_rfc3339()),
                    post.caption,
                    media_json,
                    post.duplicate_info,
                    post.channel_message_id,
                    post.notified_status,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        self.with_conn(move |conn| hydrate_post(conn, id)).await
    }

    async fn get_post_by_channel_message_id(
        &self,
        channel_message_id: i64,
    ) -> Result<Option<Post>, StoreError> {
        self.with_conn(move |conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM posts WHERE channel_message_id = ?1",
                    params![channel_message_id],
                    |row| row.get(0),
                )
                .optional()?;
            match id {
                Some(id) => hydrate_post(conn, id),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set_post_status(
        &self,
        id: i64,
        status: PostStatus,
        scheduled_at: Option<DateTime<Utc>>,
        approved_at: Option<DateTime<Utc>>,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE posts SET status=?1, scheduled_at=?2, approved_at=?3, published_at=?4 WHERE id=?5",
                params![
                    status.as_str(),
                    scheduled_at.map(|t| t.to_rfc3339()),
                    approved_at.map(|t| t.to_rfc3339()),
                    published_at.map(|t| t.to_rfc3339()),
                    id,
                ],
            )?;
            if status == PostStatus::Published {
                if let Some(ts) = published_at {
                    let author: i64 = conn.query_row(
                        "SELECT author_id FROM posts WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )?;
                    conn.execute(
                        "INSERT INTO publications (post_id, author_id, published_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(post_id) DO UPDATE SET published_at=excluded.published_at",
                        params![id, author, ts.to_rfc3339()],
                    )?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn set_scheduled_at(&self, id: i64, scheduled_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE posts SET scheduled_at = ?1 WHERE id = ?2",
                params![scheduled_at.to_rfc3339(), id],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_channel_message_id(&self, id: i64, channel_message_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE posts SET channel_message_id = ?1 WHERE id = ?2",
                params![channel_message_id, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_notified_status(&self, id: i64, status: &str) -> Result<(), StoreError> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE posts SET notified_status = ?1 WHERE id = ?2",
                params![status, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_duplicate_info(&self, id: i64, info: &str) -> Result<(), StoreError> {
        let info = info.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE posts SET duplicate_info = ?1 WHERE id = ?2",
                params![info, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_scheduled(&self) -> Result<Vec<Post>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM posts WHERE status = ?1
                 ORDER BY COALESCE(approved_at, created_at), id",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(params![PostStatus::Scheduled.as_str()], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids.into_iter()
                .map(|id| {
                    hydrate_post(conn, id)?
                        .ok_or_else(|| StoreError::Malformed(format!("post {id} vanished during listing")))
                })
                .collect()
        })
        .await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM posts WHERE status = ?1 AND scheduled_at <= ?2 ORDER BY scheduled_at, id",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(params![PostStatus::Scheduled.as_str(), now.to_rfc3339()], |row| {
                    row.get(0)
                })?
                .collect::<rusqlite::Result<_>>()?;
            ids.into_iter()
                .map(|id| {
                    hydrate_post(conn, id)?
                        .ok_or_else(|| StoreError::Malformed(format!("post {id} vanished during listing")))
                })
                .collect()
        })
        .await
    }

    async fn scheduled_timestamps(&self) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT scheduled_at FROM posts WHERE scheduled_at IS NOT NULL")?;
            let raw: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            raw.iter().map(|s| parse_ts(s)).collect()
        })
        .await
    }

    async fn insert_image_fingerprints(
        &self,
        post_id: i64,
        fps: &[ImageFingerprint],
    ) -> Result<(), StoreError> {
        let fps = fps.to_vec();
        self.with_conn(move |conn| {
            for fp in &fps {
                conn.execute(
                    "INSERT INTO image_fingerprints (post_id, item_index, kind, file_id, file_unique_id,
                        file_size, width, height, dhash, phash, whash)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                     ON CONFLICT(post_id, item_index) DO UPDATE SET
                        kind=excluded.kind, file_id=excluded.file_id, file_unique_id=excluded.file_unique_id,
                        file_size=excluded.file_size, width=excluded.width, height=excluded.height,
                        dhash=excluded.dhash, phash=excluded.phash, whash=excluded.whash",
                    params![
                        post_id,
                        fp.item_index,
                        fp.kind.as_str(),
                        fp.file_id,
                        fp.file_unique_id,
                        fp.file_size,
                        fp.width,
                        fp.height,
                        fp.dhash,
                        fp.phash,
                        fp.whash,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn insert_video_fingerprints(
        &self,
        post_id: i64,
        fps: &[VideoFingerprint],
    ) -> Result<(), StoreError> {
        let fps = fps.to_vec();
        self.with_conn(move |conn| {
            for fp in &fps {
                let frames_json = serde_json::to_string(&fp.frames)
                    .map_err(|e| StoreError::Malformed(e.to_string()))?;
                conn.execute(
                    "INSERT INTO video_fingerprints (post_id, item_index, kind, file_unique_id, file_size,
                        duration_ms, width, height, fps, frames_json, audio_hash, segments_count)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                     ON CONFLICT(post_id, item_index) DO UPDATE SET
                        kind=excluded.kind, file_unique_id=excluded.file_unique_id,
                        file_size=excluded.file_size, duration_ms=excluded.duration_ms,
                        width=excluded.width, height=excluded.height, fps=excluded.fps,
                        frames_json=excluded.frames_json, audio_hash=excluded.audio_hash,
                        segments_count=excluded.segments_count",
                    params![
                        post_id,
                        fp.item_index,
                        fp.kind.as_str(),
                        fp.file_unique_id,
                        fp.file_size,
                        fp.duration_ms,
                        fp.width,
                        fp.height,
                        fp.fps,
                        frames_json,
                        fp.audio_hash,
                        fp.segments_count,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn delete_fingerprints(&self, post_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM image_fingerprints WHERE post_id = ?1", params![post_id])?;
            conn.execute("DELETE FROM video_fingerprints WHERE post_id = ?1", params![post_id])?;
            Ok(())
        })
        .await
    }

    async fn image_fingerprints_by_size_window(
        &self,
        target_size: u64,
        tolerance: u64,
        limit: usize,
    ) -> Result<Vec<ImageFingerprint>, StoreError> {
        let lo = target_size.saturating_sub(tolerance) as i64;
        let hi = target_size.saturating_add(tolerance) as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT if2.post_id, if2.item_index, if2.kind, if2.file_id, if2.file_unique_id,
                        if2.file_size, if2.width, if2.height, if2.dhash, if2.phash, if2.whash
                 FROM image_fingerprints if2
                 JOIN posts p ON p.id = if2.post_id
                 WHERE p.status = 'published' AND if2.file_size BETWEEN ?1 AND ?2
                 ORDER BY ABS(if2.file_size - ?3)
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(params![lo, hi, target_size as i64, limit as i64], row_to_image_fp)?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
        .await
    }

    async fn published_image_fingerprints(
        &self,
        limit: usize,
    ) -> Result<Vec<ImageFingerprint>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT if2.post_id, if2.item_index, if2.kind, if2.file_id, if2.file_unique_id,
                        if2.file_size, if2.width, if2.height, if2.dhash, if2.phash, if2.whash
                 FROM image_fingerprints if2
                 JOIN posts p ON p.id = if2.post_id
                 WHERE p.status = 'published'
                 ORDER BY p.published_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_image_fp)?
                .collect::<rusqlite::Result<_>>()?;
            Ok(rows)
        })
        .await
    }

    async fn image_fingerprint_by_unique_id(
        &self,
        file_unique_id: &str,
    ) -> Result<Option<ImageFingerprint>, StoreError> {
        let file_unique_id = file_unique_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT if2.post_id, if2.item_index, if2.kind, if2.file_id, if2.file_unique_id,
                        if2.file_size, if2.width, if2.height, if2.dhash, if2.phash, if2.whash
                 FROM image_fingerprints if2
                 JOIN posts p ON p.id = if2.post_id
                 WHERE p.status = 'published' AND if2.file_unique_id = ?1
                 LIMIT 1",
            )?;
            stmt.query_row(params![file_unique_id], row_to_image_fp)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn published_video_fingerprints(
        &self,
        limit: usize,
    ) -> Result<Vec<VideoFingerprint>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT vf.post_id, vf.item_index, vf.kind, vf.file_unique_id, vf.file_size,
                        vf.duration_ms, vf.width, vf.height, vf.fps, vf.frames_json, vf.audio_hash,
                        vf.segments_count
                 FROM video_fingerprints vf
                 JOIN posts p ON p.id = vf.post_id
                 WHERE p.status = 'published'
                 ORDER BY p.published_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_video_fp)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().collect::<Result<Vec<_>, StoreError>>()
        })
        .await
    }

    async fn video_fingerprint_by_unique_id(
        &self,
        file_unique_id: &str,
    ) -> Result<Option<VideoFingerprint>, StoreError> {
        let file_unique_id = file_unique_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT vf.post_id, vf.item_index, vf.kind, vf.file_unique_id, vf.file_size,
                        vf.duration_ms, vf.width, vf.height, vf.fps, vf.frames_json, vf.audio_hash,
                        vf.segments_count
                 FROM video_fingerprints vf
                 JOIN posts p ON p.id = vf.post_id
                 WHERE p.status = 'published' AND vf.file_unique_id = ?1
                 LIMIT 1",
            )?;
            let found = stmt.query_row(params![file_unique_id], row_to_video_fp).optional()?;
            found.transpose()
        })
        .await
    }

    async fn increment_approval(&self, day: NaiveDate) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO approval_tally (day, count) VALUES (?1, 1)
                 ON CONFLICT(day) DO UPDATE SET count = count + 1",
                params![day.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn approvals_history(&self, days: u32) -> Result<Vec<ApprovalTally>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT day, count FROM approval_tally ORDER BY day DESC LIMIT ?1",
            )?;
            let mut rows: Vec<ApprovalTally> = stmt
                .query_map(params![days as i64], |row| {
                    let day_raw: String = row.get(0)?;
                    let count: u32 = row.get(1)?;
                    Ok((day_raw, count))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .map(|(day_raw, count)| ApprovalTally {
                    day: day_raw.parse().unwrap_or_else(|_| Utc::now().date_naive()),
                    count,
                })
                .collect();
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    async fn pending_count_for_user(&self, user_id: i64) -> Result<u32, StoreError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE status = 'scheduled' AND author_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
        .await
    }

    async fn last_published_at(&self, user_id: i64) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT published_at FROM publications WHERE author_id = ?1 ORDER BY published_at DESC LIMIT 1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            opt_ts(raw)
        })
        .await
    }

    async fn recent_publication_authors(&self, limit: usize) -> Result<Vec<i64>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT author_id FROM publications ORDER BY published_at DESC LIMIT ?1",
            )?;
            let mut rows: Vec<i64> = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rows.reverse();
            Ok(rows)
        })
        .await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_image_fp(row: &rusqlite::Row) -> rusqlite::Result<ImageFingerprint> {
    let kind_raw: String = row.get(2)?;
    Ok(ImageFingerprint {
        post_id: row.get(0)?,
        item_index: row.get(1)?,
        kind: MediaKind::parse(&kind_raw).unwrap_or(MediaKind::Photo),
        file_id: row.get(3)?,
        file_unique_id: row.get(4)?,
        file_size: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        dhash: row.get(8)?,
        phash: row.get(9)?,
        whash: row.get(10)?,
    })
}

fn row_to_video_fp(row: &rusqlite::Row) -> rusqlite::Result<Result<VideoFingerprint, StoreError>> {
    let kind_raw: String = row.get(2)?;
    let frames_json: String = row.get(9)?;
    let frames: Result<Vec<FrameHash>, StoreError> =
        serde_json::from_str(&frames_json).map_err(|e| StoreError::Malformed(e.to_string()));
    Ok(frames.map(|frames| VideoFingerprint {
        post_id: row.get(0).unwrap_or_default(),
        item_index: row.get(1).unwrap_or_default(),
        kind: FingerprintKind::parse(&kind_raw).unwrap_or(FingerprintKind::Video),
        file_unique_id: row.get(3).unwrap_or_default(),
        file_size: row.get(4).unwrap_or_default(),
        duration_ms: row.get(5).unwrap_or_default(),
        width: row.get(6).unwrap_or_default(),
        height: row.get(7).unwrap_or_default(),
        fps: row.get(8).unwrap_or_default(),
        frames,
        audio_hash: row.get(10).unwrap_or_default(),
        segments_count: row.get(11).unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MediaDescriptor;

    fn sample_post(id: i64) -> Post {
        Post {
            id,
            status: PostStatus::Pending,
            author_id: 42,
            created_at: Utc::now(),
            approved_at: None,
            scheduled_at: None,
            published_at: None,
            caption: Some("hello".into()),
            media: MediaDescriptor {
                kind: MediaKind::Photo,
                items: vec![],
            },
            duplicate_info: None,
            channel_message_id: None,
            notified_status: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_post() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.upsert_post(&sample_post(0)).await.unwrap();
        let loaded = store.get_post(id).await.unwrap().unwrap();
        assert_eq!(loaded.caption.as_deref(), Some("hello"));
        assert_eq!(loaded.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_setting("chronos_mode", "dynamic").await.unwrap();
        assert_eq!(
            store.get_setting("chronos_mode").await.unwrap().as_deref(),
            Some("dynamic")
        );
        assert_eq!(store.get_setting("missing").await.unwrap(), None);
    }
}
