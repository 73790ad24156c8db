//! Data model: posts, media items, and the two fingerprint kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Scheduled,
    Published,
    Rejected,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PostStatus::Pending),
            "scheduled" => Some(PostStatus::Scheduled),
            "published" => Some(PostStatus::Published),
            "rejected" => Some(PostStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Document,
    Audio,
    Voice,
    VideoNote,
    Text,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Animation => "animation",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
            MediaKind::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "photo" => MediaKind::Photo,
            "video" => MediaKind::Video,
            "animation" => MediaKind::Animation,
            "document" => MediaKind::Document,
            "audio" => MediaKind::Audio,
            "voice" => MediaKind::Voice,
            "video_note" => MediaKind::VideoNote,
            "text" => MediaKind::Text,
            _ => return None,
        })
    }

    /// Whether this kind is routed through the image duplicate pipeline.
    pub fn is_image_like(&self) -> bool {
        matches!(self, MediaKind::Photo | MediaKind::Document)
    }

    /// Whether this kind is routed through the video duplicate pipeline.
    pub fn is_video_like(&self) -> bool {
        matches!(
            self,
            MediaKind::Video | MediaKind::Animation | MediaKind::VideoNote
        )
    }
}

/// One item in a draft's ordered media list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub file_id: String,
    pub file_unique_id: String,
    pub file_size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
}

/// Ordered media descriptor carried by a draft/post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub items: Vec<MediaItem>,
}

/// Content submitted for moderation, prior to being assigned a post id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftContent {
    pub kind: String,
    pub items: Vec<serde_json::Value>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub status: PostStatus,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub caption: Option<String>,
    pub media: MediaDescriptor,
    pub duplicate_info: Option<String>,
    pub channel_message_id: Option<i64>,
    pub notified_status: Option<String>,
}

/// One `{t_ms, dhash, phash, whash}` video frame sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameHash {
    pub t_ms: i64,
    pub dhash: String,
    pub phash: String,
    pub whash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFingerprint {
    pub post_id: i64,
    pub item_index: u32,
    pub kind: MediaKind,
    pub file_id: String,
    pub file_unique_id: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub dhash: String,
    pub phash: String,
    pub whash: String,
}

/// Fingerprint-level kind tag for the video pipeline. Distinct from
/// `MediaKind`: an album composite has no single `MediaItem` kind of its
/// own (design note c), so `album` lives here rather than in the item
/// union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    Video,
    Animation,
    VideoNote,
    Album,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintKind::Video => "video",
            FingerprintKind::Animation => "animation",
            FingerprintKind::VideoNote => "video_note",
            FingerprintKind::Album => "album",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "video" => FingerprintKind::Video,
            "animation" => FingerprintKind::Animation,
            "video_note" => FingerprintKind::VideoNote,
            "album" => FingerprintKind::Album,
            _ => return None,
        })
    }

    pub fn from_media_kind(kind: MediaKind) -> Option<Self> {
        Some(match kind {
            MediaKind::Video => FingerprintKind::Video,
            MediaKind::Animation => FingerprintKind::Animation,
            MediaKind::VideoNote => FingerprintKind::VideoNote,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFingerprint {
    pub post_id: i64,
    pub item_index: u32,
    pub kind: FingerprintKind,
    pub file_unique_id: Option<String>,
    pub file_size: Option<u64>,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: Vec<FrameHash>,
    pub audio_hash: Option<String>,
    pub segments_count: Option<u32>,
}

impl VideoFingerprint {
    /// True when this fingerprint represents an album composite rather than a single clip.
    pub fn is_album(&self) -> bool {
        self.segments_count.is_some()
    }
}

/// Per-day counter of first-time approvals.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalTally {
    pub day: chrono::NaiveDate,
    pub count: u32,
}
