//! Mnemosyne orchestration: the fast/deep submission flow with a
//! synchronous deadline and cancellable async finalisation, the report
//! string formatter, and the two administrative backfills.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::MnemosyneError;
use crate::mnemosyne::image_pipeline::{self, CandidateImageSource, ImageMatch, ImagePipelineConfig, MatchType, QueryImage};
use crate::mnemosyne::transport::MediaTransport;
use crate::notify::SubmissionNotifier;
use crate::store::{MediaDescriptor, MediaKind, PostStore};

/// One reported duplicate, unified across the image and video pipelines so
/// the final dedup/ordering pass and report formatter see a single shape.
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub post_id: i64,
    pub distance: u32,
    pub details: Option<String>,
    pub exact: bool,
}

/// Always one of five canonical shapes, byte-for-byte.
pub mod report {
    pub const PENDING: &str = "Повторки: ищу в базе данных...";
    pub const EMPTY: &str = "Повторки: совпадений с опубликованными не найдено";
    pub const INSPECTION_FAILED: &str = "Повторки: не удалось проверить";
    pub const UNCAUGHT_ERROR: &str = "Повторки: ошибка проверки";
    const HEADER: &str = "Повторки: возможный повтор (опубликованные):\n";

    pub fn format(matches: &[super::DuplicateMatch]) -> String {
        if matches.is_empty() {
            return EMPTY.to_string();
        }
        let lines: Vec<String> = matches
            .iter()
            .map(|m| {
                let details = m
                    .details
                    .clone()
                    .unwrap_or_else(|| if m.exact { "точная копия".to_string() } else { String::new() });
                format!("#{} ({})", m.post_id, details)
            })
            .collect();
        format!("{HEADER}{}", lines.join(",\n"))
    }
}

fn dedup_and_order(mut matches: Vec<DuplicateMatch>) -> Vec<DuplicateMatch> {
    matches.sort_by_key(|m| m.post_id);
    matches.dedup_by(|a, b| {
        if a.post_id == b.post_id {
            if a.distance < b.distance {
                std::mem::swap(a, b);
            }
            true
        } else {
            false
        }
    });
    matches.sort_by(|a, b| a.distance.cmp(&b.distance).then(a.post_id.cmp(&b.post_id)));
    matches
}

impl From<ImageMatch> for DuplicateMatch {
    fn from(m: ImageMatch) -> Self {
        DuplicateMatch {
            post_id: m.post_id,
            distance: m.distance,
            details: m.details,
            exact: m.match_type == MatchType::UniqueId,
        }
    }
}

pub struct OrchestratorConfig {
    pub sync_timeout: Duration,
    pub image: ImagePipelineConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(2),
            image: ImagePipelineConfig::default(),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn PostStore>,
    transport: Arc<dyn MediaTransport>,
    image_source: Arc<dyn CandidateImageSource>,
    notifier: Arc<dyn SubmissionNotifier>,
    cfg: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PostStore>,
        transport: Arc<dyn MediaTransport>,
        image_source: Arc<dyn CandidateImageSource>,
        notifier: Arc<dyn SubmissionNotifier>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            transport,
            image_source,
            notifier,
            cfg,
        }
    }

    /// Stage A only, run synchronously at submission time.
    async fn fast_stage(&self, media: &MediaDescriptor) -> Result<Vec<DuplicateMatch>, MnemosyneError> {
        let mut out = Vec::new();
        for item in &media.items {
            if !item.kind.is_image_like() || item.file_unique_id.is_empty() {
                continue;
            }
            if let Some(fp) = self.store.image_fingerprint_by_unique_id(&item.file_unique_id).await? {
                out.push(DuplicateMatch {
                    post_id: fp.post_id,
                    distance: 0,
                    details: None,
                    exact: true,
                });
            }
        }
        Ok(dedup_and_order(out))
    }

    /// The full deep check: download, hash, ensemble-match, ORB-verify.
    async fn deep_stage(
        self: Arc<Self>,
        post_id: i64,
        media: MediaDescriptor,
        cancel: CancellationToken,
    ) -> Result<Vec<DuplicateMatch>, MnemosyneError> {
        let mut queries = Vec::new();
        for (idx, item) in media.items.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(MnemosyneError::Cancelled);
            }
            if !item.kind.is_image_like() {
                continue;
            }
            let bytes = match self.transport.download_bytes(&item.file_id).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            let Ok(decoded) = image::load_from_memory(&bytes) else {
                continue;
            };
            queries.push(QueryImage::from_image(
                idx as u32,
                item.file_unique_id.clone(),
                item.file_size.unwrap_or(bytes.len() as u64),
                &decoded,
                &self.cfg.image,
            ));
        }

        if queries.is_empty() {
            return Err(MnemosyneError::NoMedia);
        }

        let matches = image_pipeline::detect_image_duplicates(
            &queries,
            &self.cfg.image,
            self.store.clone(),
            self.image_source.clone(),
        )
        .await?;

        let mut fps = Vec::new();
        for q in &queries {
            fps.push(crate::store::ImageFingerprint {
                post_id,
                item_index: q.item_index,
                kind: MediaKind::Photo,
                file_id: String::new(),
                file_unique_id: q.file_unique_id.clone(),
                file_size: q.file_size,
                width: q.width,
                height: q.height,
                dhash: q.dhash.clone(),
                phash: q.phash.clone(),
                whash: q.whash.clone(),
            });
        }
        if !cancel.is_cancelled() {
            self.store.insert_image_fingerprints(post_id, &fps).await?;
        }

        Ok(dedup_and_order(matches.into_iter().map(DuplicateMatch::from).collect()))
    }

    /// The full bounded-latency submission flow.
    pub async fn submit(self: Arc<Self>, post_id: i64, media: MediaDescriptor) -> Result<String, MnemosyneError> {
        if media.items.is_empty() {
            self.store
                .set_duplicate_info(post_id, report::INSPECTION_FAILED)
                .await?;
            return Ok(report::INSPECTION_FAILED.to_string());
        }

        let fast = self.fast_stage(&media).await.unwrap_or_default();
        if !fast.is_empty() {
            let initial = report::format(&fast);
            self.store.set_duplicate_info(post_id, &initial).await?;
        }

        let cancel = CancellationToken::new();
        let deep_cancel = cancel.clone();
        let this = self.clone();
        let media_for_deep = media.clone();
        let mut deep_handle =
            tokio::spawn(async move { this.deep_stage(post_id, media_for_deep, deep_cancel).await });

        tokio::select! {
            res = &mut deep_handle => {
                Ok(self.finish_deep(post_id, fast, res).await?)
            }
            _ = tokio::time::sleep(self.cfg.sync_timeout) => {
                self.store.set_duplicate_info(post_id, report::PENDING).await?;
                let this = self.clone();
                tokio::spawn(async move {
                    let res = deep_handle.await;
                    if let Err(e) = this.finish_deep(post_id, fast, res).await {
                        warn!(error = %e, post_id, "async duplicate finalisation failed");
                    }
                    this.notifier.refresh_admin_view(post_id).await;
                });
                Ok(report::PENDING.to_string())
            }
        }
    }

    /// Merges the fast-stage matches with a completed deep-stage outcome,
    /// persists the final report, and returns it. Shared by the synchronous
    /// and the post-deadline async-finalisation paths.
    async fn finish_deep(
        &self,
        post_id: i64,
        fast: Vec<DuplicateMatch>,
        res: Result<Result<Vec<DuplicateMatch>, MnemosyneError>, tokio::task::JoinError>,
    ) -> Result<String, MnemosyneError> {
        let report_str = match res {
            Ok(Ok(deep_matches)) => {
                let merged = dedup_and_order(fast.into_iter().chain(deep_matches).collect());
                report::format(&merged)
            }
            Ok(Err(MnemosyneError::NoMedia)) => report::INSPECTION_FAILED.to_string(),
            Ok(Err(e)) => {
                warn!(error = %e, post_id, "deep duplicate check failed");
                report::UNCAUGHT_ERROR.to_string()
            }
            Err(_join_err) => report::UNCAUGHT_ERROR.to_string(),
        };
        self.store.set_duplicate_info(post_id, &report_str).await?;
        Ok(report_str)
    }

    /// Cancels an in-flight deep check for a post whose submission failed
    /// before completion.
    pub fn cancel_submission(cancel: &CancellationToken) {
        cancel.cancel();
    }

    /// Backfill (a): recompute fingerprints for the most-recent N locally
    /// known posts, optionally forcing recomputation of posts that already
    /// have one. Streams progress at <=2s intervals.
    pub async fn backfill_recompute(
        self: Arc<Self>,
        post_ids: Vec<i64>,
        force: bool,
    ) -> Result<(usize, usize), MnemosyneError> {
        let mut done = 0usize;
        let mut skipped = 0usize;
        let mut last_tick = tokio::time::Instant::now();

        for post_id in post_ids {
            let Some(post) = self.store.get_post(post_id).await? else {
                continue;
            };
            if force {
                self.store.delete_fingerprints(post_id).await?;
            }
            let cancel = CancellationToken::new();
            match self.clone().deep_stage(post_id, post.media.clone(), cancel).await {
                Ok(_) => done += 1,
                Err(MnemosyneError::NoMedia) => skipped += 1,
                Err(e) => {
                    warn!(error = %e, post_id, "backfill recompute failed for post");
                    skipped += 1;
                }
            }

            if last_tick.elapsed() >= Duration::from_secs(2) {
                info!(done, skipped, "backfill progress");
                last_tick = tokio::time::Instant::now();
            }
        }
        Ok((done, skipped))
    }
}

/// Backfill (b): a remote channel importer, kept as an external collaborator
/// boundary for importing posts directly from a remote channel.
#[async_trait::async_trait]
pub trait RemoteImporter: Send + Sync {
    /// Streams the next un-fingerprinted post from the remote channel, or
    /// `None` once exhausted (resumable: a subsequent call picks up where
    /// the last run left off).
    async fn next_unfingerprinted(&self) -> Option<(i64, MediaDescriptor)>;
}

pub async fn backfill_import(
    orchestrator: Arc<Orchestrator>,
    importer: Arc<dyn RemoteImporter>,
) -> Result<usize, MnemosyneError> {
    let mut imported = 0usize;
    let mut last_tick = tokio::time::Instant::now();
    while let Some((post_id, media)) = importer.next_unfingerprinted().await {
        let cancel = CancellationToken::new();
        if let Err(e) = orchestrator.clone().deep_stage(post_id, media, cancel).await {
            warn!(error = %e, post_id, "backfill import failed for post");
            continue;
        }
        imported += 1;
        if last_tick.elapsed() >= Duration::from_secs(2) {
            info!(imported, "backfill import progress");
            last_tick = tokio::time::Instant::now();
        }
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_empty_is_exact_sentinel() {
        assert_eq!(report::format(&[]), report::EMPTY);
    }

    #[test]
    fn report_exact_match_without_details_uses_tochnaya_kopiya() {
        let m = DuplicateMatch {
            post_id: 7,
            distance: 0,
            details: None,
            exact: true,
        };
        let out = report::format(&[m]);
        assert!(out.contains("точная копия"));
        assert!(out.starts_with("Повторки: возможный повтор"));
    }

    #[test]
    fn dedup_keeps_lowest_distance() {
        let matches = vec![
            DuplicateMatch {
                post_id: 1,
                distance: 9,
                details: None,
                exact: false,
            },
            DuplicateMatch {
                post_id: 1,
                distance: 2,
                details: None,
                exact: false,
            },
        ];
        let out = dedup_and_order(matches);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].distance, 2);
    }
}
