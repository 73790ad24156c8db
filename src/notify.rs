//! Submission/admin notifier collaborator: the bot front-end's inbound
//! boundary for status changes and admin-view refresh signals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifiedStatus {
    Scheduled,
    Rejected,
}

impl NotifiedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifiedStatus::Scheduled => "scheduled",
            NotifiedStatus::Rejected => "rejected",
        }
    }
}

#[async_trait]
pub trait SubmissionNotifier: Send + Sync {
    async fn notify_status(
        &self,
        post_id: i64,
        status: NotifiedStatus,
        reason: Option<String>,
        scheduled_at: Option<DateTime<Utc>>,
    );

    /// Signals the admin-facing view for `post_id` to re-render, e.g. once
    /// an async duplicate report replaces the pending placeholder.
    async fn refresh_admin_view(&self, post_id: i64);
}
