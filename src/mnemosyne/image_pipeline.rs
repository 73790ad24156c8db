//! Image duplicate pipeline: fast exact-id match, perceptual ensemble match
//! over size-bucketed candidate windows, ORB+RANSAC re-verification, and
//! the final filter/dedup/ordering pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use image::GrayImage;
use rayon::prelude::*;

use crate::errors::MnemosyneError;
use crate::mnemosyne::math::{self, EnsembleThresholds, HashDistances, GreyBuffers};
use crate::mnemosyne::orb::{self, FeatureCache, FeatureSet};
use crate::store::{ImageFingerprint, PostStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    UniqueId,
    HashFast,
    HashSlow,
    HashFullscan,
    OrbFallback,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::UniqueId => "unique_id",
            MatchType::HashFast => "hash_fast",
            MatchType::HashSlow => "hash_slow",
            MatchType::HashFullscan => "hash_fullscan",
            MatchType::OrbFallback => "orb_fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageMatch {
    pub item_index: u32,
    pub match_type: MatchType,
    pub post_id: i64,
    pub distance: u32,
    pub details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImagePipelineConfig {
    pub blur_radius: f32,
    pub fast_tolerance_bytes: u64,
    pub fast_candidate_limit: usize,
    pub slow_tolerance_bytes: u64,
    pub slow_candidate_limit: usize,
    pub fullscan_limit: usize,
    pub variant_limit: usize,
    pub orb_topk_hash: usize,
    pub orb_topk_size: usize,
    pub max_keypoints: usize,
    pub lowe_ratio: f32,
    pub min_good: usize,
    pub min_matches: usize,
    pub min_ratio: f64,
    pub reproj_threshold: f64,
    pub ransac_iterations: usize,
}

impl Default for ImagePipelineConfig {
    fn default() -> Self {
        Self {
            blur_radius: 1.0,
            fast_tolerance_bytes: 4 * 1024,
            fast_candidate_limit: 500,
            slow_tolerance_bytes: 64 * 1024,
            slow_candidate_limit: 5000,
            fullscan_limit: 50_000,
            variant_limit: 6,
            orb_topk_hash: 80,
            orb_topk_size: 60,
            max_keypoints: 500,
            lowe_ratio: 0.8,
            min_good: 6,
            min_matches: 10,
            min_ratio: 0.05,
            reproj_threshold: 5.0,
            ransac_iterations: 300,
        }
    }
}

/// One image item queued for duplicate checking, already downloaded and
/// decoded by the orchestrator (decode/download failures never reach here).
pub struct QueryImage {
    pub item_index: u32,
    pub file_unique_id: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub raw: GrayImage,
    pub dhash: String,
    pub phash: String,
    pub whash: String,
}

impl QueryImage {
    pub fn from_image(
        item_index: u32,
        file_unique_id: String,
        file_size: u64,
        image: &image::DynamicImage,
        cfg: &ImagePipelineConfig,
    ) -> Self {
        let GreyBuffers { raw, blurred } = math::prepare_greyscale(image, cfg.blur_radius);
        let dhash = math::dhash(&blurred, 8);
        let phash = math::phash(&blurred, 8);
        let whash = math::whash(&blurred, 8);
        Self {
            item_index,
            file_unique_id,
            file_size,
            width: image.width(),
            height: image.height(),
            raw,
            dhash,
            phash,
            whash,
        }
    }
}

/// Media transport capable of re-fetching a candidate post's original image
/// bytes, keyed by the fingerprint's `file_id`. ORB verification needs the
/// candidate's pixels, not just its hashes.
#[async_trait::async_trait]
pub trait CandidateImageSource: Send + Sync {
    async fn fetch_candidate(&self, fp: &ImageFingerprint) -> Option<GrayImage>;
}

fn distances(query: &QueryImage, fp: &ImageFingerprint) -> HashDistances {
    HashDistances {
        d: Some(math::hamming_hex(&query.dhash, &fp.dhash)),
        p: Some(math::hamming_hex(&query.phash, &fp.phash)),
        w: Some(math::hamming_hex(&query.whash, &fp.whash)),
    }
}

/// Stage A: fast exact `file_unique_id` match against published fingerprints.
async fn stage_a(
    item_index: u32,
    file_unique_id: &str,
    store: &dyn PostStore,
) -> Result<Option<ImageMatch>, MnemosyneError> {
    if file_unique_id.is_empty() {
        return Ok(None);
    }
    let hit = store
        .image_fingerprint_by_unique_id(file_unique_id)
        .await?;
    Ok(hit.map(|fp| ImageMatch {
        item_index,
        match_type: MatchType::UniqueId,
        post_id: fp.post_id,
        distance: 0,
        details: None,
    }))
}

struct CandidateHit {
    fp: ImageFingerprint,
    dist: HashDistances,
    min_dist: u32,
    match_type: MatchType,
}

/// Stage B: fast/slow size-bucketed windows plus a full-scan pass, each
/// evaluated against the ensemble gate for its own threshold tier.
async fn stage_b(
    query: &QueryImage,
    cfg: &ImagePipelineConfig,
    store: &dyn PostStore,
) -> Result<Vec<CandidateHit>, MnemosyneError> {
    let mut seen_lowest: HashMap<i64, CandidateHit> = HashMap::new();

    let fast = store
        .image_fingerprints_by_size_window(
            query.file_size,
            cfg.fast_tolerance_bytes,
            cfg.fast_candidate_limit,
        )
        .await?;
    evaluate_window(
        query,
        &fast,
        &EnsembleThresholds::FAST,
        MatchType::HashFast,
        &mut seen_lowest,
    );

    let slow = store
        .image_fingerprints_by_size_window(
            query.file_size,
            cfg.slow_tolerance_bytes,
            cfg.slow_candidate_limit,
        )
        .await?;
    evaluate_window(
        query,
        &slow,
        &EnsembleThresholds::SLOW,
        MatchType::HashSlow,
        &mut seen_lowest,
    );

    let fullscan = store
        .published_image_fingerprints(cfg.fullscan_limit)
        .await?;
    evaluate_window(
        query,
        &fullscan,
        &EnsembleThresholds::SLOW,
        MatchType::HashFullscan,
        &mut seen_lowest,
    );

    Ok(seen_lowest.into_values().collect())
}

fn evaluate_window(
    query: &QueryImage,
    candidates: &[ImageFingerprint],
    thresholds: &EnsembleThresholds,
    match_type: MatchType,
    out: &mut HashMap<i64, CandidateHit>,
) {
    for fp in candidates {
        let dist = distances(query, fp);
        let Some(min_dist) = math::ensemble_match(&dist, thresholds) else {
            continue;
        };
        out.entry(fp.post_id)
            .and_modify(|existing| {
                if min_dist < existing.min_dist {
                    existing.min_dist = min_dist;
                    existing.dist = dist;
                    existing.match_type = match_type;
                    existing.fp = fp.clone();
                }
            })
            .or_insert(CandidateHit {
                fp: fp.clone(),
                dist,
                min_dist,
                match_type,
            });
    }
}

/// Stage C: ORB+RANSAC re-verification over the union of the top hash-ranked
/// and top aspect/area-ranked candidates.
async fn stage_c(
    query: &QueryImage,
    hits: &[CandidateHit],
    fullscan_pool: &[ImageFingerprint],
    cfg: &ImagePipelineConfig,
    image_source: &dyn CandidateImageSource,
    feature_cache: &mut FeatureCache,
) -> HashMap<i64, (orb::OrbVerdict, ImageFingerprint)> {
    let mut by_hash: Vec<&ImageFingerprint> = hits.iter().map(|h| &h.fp).collect();
    by_hash.sort_by_key(|fp| hits.iter().find(|h| h.fp.post_id == fp.post_id).unwrap().min_dist);
    by_hash.truncate(cfg.orb_topk_hash);

    let mut by_size: Vec<&ImageFingerprint> = fullscan_pool.iter().collect();
    by_size.sort_by(|a, b| {
        orb::aspect_area_score((query.width, query.height), (a.width, a.height))
            .partial_cmp(&orb::aspect_area_score(
                (query.width, query.height),
                (b.width, b.height),
            ))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    by_size.truncate(cfg.orb_topk_size);

    let mut seen = HashSet::new();
    let mut targets: Vec<ImageFingerprint> = Vec::new();
    for fp in by_hash.into_iter().chain(by_size.into_iter()) {
        if seen.insert(fp.post_id) {
            targets.push(fp.clone());
        }
    }

    let query_variants: Vec<(orb::Variant, FeatureSet)> = orb::default_variants(cfg.variant_limit)
        .into_par_iter()
        .map(|v| {
            let rendered = orb::render_variant(&query.raw, v);
            (v, orb::extract_features(&rendered, cfg.max_keypoints))
        })
        .collect();

    let mut verdicts = HashMap::new();
    for fp in targets {
        let Some(candidate_img) = image_source.fetch_candidate(&fp).await else {
            continue;
        };
        let candidate_features = feature_cache
            .get_or_compute(fp.post_id, || {
                orb::extract_features(&candidate_img, cfg.max_keypoints)
            })
            .clone();

        let mut best: Option<orb::OrbVerdict> = None;
        for (_variant, qfs) in &query_variants {
            let good = orb::match_descriptors(qfs, &candidate_features, cfg.lowe_ratio);
            let good_ratio =
                good.len() as f64 / qfs.descriptors.len().min(candidate_features.descriptors.len()).max(1) as f64;
            let query_pts: Vec<(f32, f32)> = good
                .iter()
                .map(|m| (qfs.keypoints[m.query_idx].x, qfs.keypoints[m.query_idx].y))
                .collect();
            let candidate_pts: Vec<(f32, f32)> = good
                .iter()
                .map(|m| {
                    (
                        candidate_features.keypoints[m.candidate_idx].x,
                        candidate_features.keypoints[m.candidate_idx].y,
                    )
                })
                .collect();
            let ransac = orb::ransac_homography(
                &query_pts,
                &candidate_pts,
                cfg.reproj_threshold,
                cfg.ransac_iterations,
            );
            let verdict = orb::OrbVerdict {
                good: good.len(),
                good_ratio,
                inliers: ransac.inliers,
                inlier_ratio: ransac.inlier_ratio,
            };
            if !verdict.passes_gate(cfg.min_good, cfg.min_matches, cfg.min_ratio) {
                continue;
            }
            if !(verdict.passes_strict() || verdict.passes_loose()) {
                continue;
            }
            best = orb::best_verdict(vec![best.unwrap_or(verdict), verdict]);
        }
        if let Some(v) = best {
            verdicts.insert(fp.post_id, (v, fp));
        }
    }
    verdicts
}

fn orb_details(v: &orb::OrbVerdict) -> String {
    format!(
        "orb={}, r={:.2}, inl={}, ir={:.2}",
        v.good, v.good_ratio, v.inliers, v.inlier_ratio
    )
}

/// Stage D filter: keep exact-id, ORB-annotated, `hash_fast`, or fast-gate
/// passing hash matches; drop everything else.
fn passes_stage_d(m: &ImageMatch, dist: Option<&HashDistances>) -> bool {
    match m.match_type {
        MatchType::UniqueId | MatchType::OrbFallback | MatchType::HashFast => true,
        MatchType::HashSlow | MatchType::HashFullscan => dist
            .map(|d| math::ensemble_match(d, &EnsembleThresholds::FAST).is_some())
            .unwrap_or(false),
    }
}

/// Runs the full Stage A-D pipeline for one decoded query image.
pub async fn run_for_item(
    query: &QueryImage,
    cfg: &ImagePipelineConfig,
    store: &dyn PostStore,
    image_source: &dyn CandidateImageSource,
    feature_cache: &mut FeatureCache,
) -> Result<Vec<ImageMatch>, MnemosyneError> {
    let mut matches = Vec::new();

    if let Some(m) = stage_a(query.item_index, &query.file_unique_id, store).await? {
        matches.push(m);
    }

    let hits = stage_b(query, cfg, store).await?;
    let fullscan_pool = store.published_image_fingerprints(cfg.fullscan_limit).await?;
    let dist_by_post: HashMap<i64, HashDistances> =
        hits.iter().map(|h| (h.fp.post_id, h.dist)).collect();

    for hit in &hits {
        matches.push(ImageMatch {
            item_index: query.item_index,
            match_type: hit.match_type,
            post_id: hit.fp.post_id,
            distance: hit.min_dist,
            details: None,
        });
    }

    let orb_verdicts = stage_c(query, &hits, &fullscan_pool, cfg, image_source, feature_cache).await;
    for (post_id, (verdict, _fp)) in &orb_verdicts {
        let details = orb_details(verdict);
        if let Some(existing) = matches
            .iter_mut()
            .find(|m| m.post_id == *post_id && m.item_index == query.item_index)
        {
            existing.details = Some(details);
        } else {
            matches.push(ImageMatch {
                item_index: query.item_index,
                match_type: MatchType::OrbFallback,
                post_id: *post_id,
                distance: 0,
                details: Some(details),
            });
        }
    }

    let filtered = matches
        .into_iter()
        .filter(|m| passes_stage_d(m, dist_by_post.get(&m.post_id)))
        .collect();
    Ok(filtered)
}

/// Global dedup across all items of a draft: collapse multiple matches with
/// the same `post_id` into the minimum-distance one, ordered
/// `(distance asc, post_id asc)`.
pub fn dedup_and_order(matches: Vec<ImageMatch>) -> Vec<ImageMatch> {
    let mut best: HashMap<i64, ImageMatch> = HashMap::new();
    for m in matches {
        best.entry(m.post_id)
            .and_modify(|existing| {
                if m.distance < existing.distance {
                    *existing = m.clone();
                }
            })
            .or_insert(m);
    }
    let mut out: Vec<ImageMatch> = best.into_values().collect();
    out.sort_by(|a, b| a.distance.cmp(&b.distance).then(a.post_id.cmp(&b.post_id)));
    out
}

/// Runs the pipeline for every item in a draft and returns the final,
/// filtered, deduplicated, ordered match list.
pub async fn detect_image_duplicates(
    queries: &[QueryImage],
    cfg: &ImagePipelineConfig,
    store: Arc<dyn PostStore>,
    image_source: Arc<dyn CandidateImageSource>,
) -> Result<Vec<ImageMatch>, MnemosyneError> {
    let mut feature_cache = FeatureCache::new();
    let mut all = Vec::new();
    for query in queries {
        let item_matches = run_for_item(
            query,
            cfg,
            store.as_ref(),
            image_source.as_ref(),
            &mut feature_cache,
        )
        .await?;
        all.extend(item_matches);
    }
    Ok(dedup_and_order(all))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(post_id: i64, dhash: &str, phash: &str, whash: &str, size: u64) -> ImageFingerprint {
        ImageFingerprint {
            post_id,
            item_index: 0,
            kind: crate::store::MediaKind::Photo,
            file_id: "fid".into(),
            file_unique_id: format!("u{post_id}"),
            file_size: size,
            width: 1080,
            height: 1350,
            dhash: dhash.into(),
            phash: phash.into(),
            whash: whash.into(),
        }
    }

    #[test]
    fn stage_d_keeps_hash_fast_and_drops_weak_fullscan() {
        let dist = HashDistances {
            d: Some(28),
            p: Some(31),
            w: Some(29),
        };
        let weak = ImageMatch {
            item_index: 0,
            match_type: MatchType::HashFullscan,
            post_id: 1,
            distance: 28,
            details: None,
        };
        assert!(!passes_stage_d(&weak, Some(&dist)));

        let strong_fast = ImageMatch {
            match_type: MatchType::HashFast,
            ..weak.clone_for_test()
        };
        assert!(passes_stage_d(&strong_fast, Some(&dist)));
    }

    #[test]
    fn dedup_keeps_minimum_distance_per_post() {
        let matches = vec![
            ImageMatch {
                item_index: 0,
                match_type: MatchType::HashSlow,
                post_id: 7,
                distance: 5,
                details: None,
            },
            ImageMatch {
                item_index: 1,
                match_type: MatchType::HashFast,
                post_id: 7,
                distance: 1,
                details: None,
            },
        ];
        let out = dedup_and_order(matches);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].distance, 1);
    }

    impl ImageMatch {
        fn clone_for_test(&self) -> Self {
            self.clone()
        }
    }

    #[test]
    fn fingerprints_carry_expected_hex_length() {
        let f = fp(1, "0".repeat(16).as_str(), "0".repeat(16).as_str(), "0".repeat(16).as_str(), 1000);
        assert_eq!(f.dhash.len(), 16);
    }
}
