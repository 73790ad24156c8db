//! Persistent store boundary. `PostStore` is the full contract; `sqlite`
//! provides the one required implementation. Any ordered key/value store
//! with range scans would satisfy the contract — sqlite (`rusqlite`,
//! bundled) is simply what this binary ships with.

pub mod models;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use models::*;

use crate::errors::StoreError;

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn upsert_post(&self, post: &Post) -> Result<i64, StoreError>;
    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError>;
    async fn get_post_by_channel_message_id(
        &self,
        channel_message_id: i64,
    ) -> Result<Option<Post>, StoreError>;

    async fn set_post_status(
        &self,
        id: i64,
        status: PostStatus,
        scheduled_at: Option<DateTime<Utc>>,
        approved_at: Option<DateTime<Utc>>,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    /// Narrow mutation used by the planner: rewrites only `scheduled_at`,
    /// leaving `status`/`approved_at`/`published_at` untouched.
    async fn set_scheduled_at(&self, id: i64, scheduled_at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn set_channel_message_id(&self, id: i64, channel_message_id: i64)
    -> Result<(), StoreError>;
    async fn set_notified_status(&self, id: i64, status: &str) -> Result<(), StoreError>;
    async fn set_duplicate_info(&self, id: i64, info: &str) -> Result<(), StoreError>;

    /// `status = scheduled` ordered by `(approved_at or created_at, id)`.
    async fn list_scheduled(&self) -> Result<Vec<Post>, StoreError>;
    /// `status = scheduled and scheduled_at <= now`.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Post>, StoreError>;
    /// Every currently-booked `scheduled_at` timestamp (for the static
    /// planner's slot-collision check).
    async fn scheduled_timestamps(&self) -> Result<Vec<DateTime<Utc>>, StoreError>;

    async fn insert_image_fingerprints(
        &self,
        post_id: i64,
        fps: &[ImageFingerprint],
    ) -> Result<(), StoreError>;
    async fn insert_video_fingerprints(
        &self,
        post_id: i64,
        fps: &[VideoFingerprint],
    ) -> Result<(), StoreError>;
    async fn delete_fingerprints(&self, post_id: i64) -> Result<(), StoreError>;

    /// Published image fingerprints with `file_size` in `[target - tol,
    /// target + tol]`, ordered by `|size - target|` ascending, capped.
    async fn image_fingerprints_by_size_window(
        &self,
        target_size: u64,
        tolerance: u64,
        limit: usize,
    ) -> Result<Vec<ImageFingerprint>, StoreError>;
    /// Most-recent-first published image fingerprints, up to `limit`.
    async fn published_image_fingerprints(
        &self,
        limit: usize,
    ) -> Result<Vec<ImageFingerprint>, StoreError>;
    async fn image_fingerprint_by_unique_id(
        &self,
        file_unique_id: &str,
    ) -> Result<Option<ImageFingerprint>, StoreError>;

    /// Most-recent-first published video/album fingerprints, up to `limit`.
    async fn published_video_fingerprints(
        &self,
        limit: usize,
    ) -> Result<Vec<VideoFingerprint>, StoreError>;
    async fn video_fingerprint_by_unique_id(
        &self,
        file_unique_id: &str,
    ) -> Result<Option<VideoFingerprint>, StoreError>;

    async fn increment_approval(&self, day: chrono::NaiveDate) -> Result<(), StoreError>;
    /// Chronological, oldest-first, count per day for the last `days` days.
    async fn approvals_history(&self, days: u32) -> Result<Vec<ApprovalTally>, StoreError>;

    async fn pending_count_for_user(&self, user_id: i64) -> Result<u32, StoreError>;
    async fn last_published_at(&self, user_id: i64) -> Result<Option<DateTime<Utc>>, StoreError>;
    /// Author ids of the last `limit` publications, most-recent-last.
    async fn recent_publication_authors(&self, limit: usize) -> Result<Vec<i64>, StoreError>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
