//! Video/album duplicate pipeline: frame budget and target timestamp
//! placement, salvage-aware frame selection, album virtual-timeline
//! composition, metadata scoring, and frame-aligned comparison with shift
//! search.

use std::path::Path;

use image::GrayImage;

use crate::errors::MnemosyneError;
use crate::mnemosyne::math::{self, EnsembleThresholds, HashDistances};
use crate::mnemosyne::media_tool::MediaInspectionTool;
use crate::store::{FingerprintKind, FrameHash, VideoFingerprint};

#[derive(Debug, Clone)]
pub struct VideoPipelineConfig {
    pub every_secs: f64,
    pub frame_min: usize,
    pub frame_max: usize,
    pub short_seconds: f64,
    pub short_count: usize,
    pub album_frame_min: usize,
    pub album_frame_max: usize,
    pub edge_ratio: f64,
    pub photo_duration_ms: u64,
    pub blur_radius: f32,
    pub fullscan_limit: usize,
    pub topk: usize,
    pub shift_limit: usize,
    pub relative_static_shifts: Vec<f64>,
    pub absolute_static_shifts_secs: Vec<f64>,
    pub match_min: usize,
    pub match_ratio: f64,
    pub bins_count: usize,
    pub salvage_offsets_secs: Vec<f64>,
    pub flat_std_threshold: f64,
    pub black_mean_threshold: f64,
    pub white_mean_threshold: f64,
}

impl Default for VideoPipelineConfig {
    fn default() -> Self {
        Self {
            every_secs: 20.0,
            frame_min: 4,
            frame_max: 16,
            short_seconds: 6.0,
            short_count: 3,
            album_frame_min: 4,
            album_frame_max: 16,
            edge_ratio: 0.05,
            photo_duration_ms: 1200,
            blur_radius: 0.8,
            fullscan_limit: 20_000,
            topk: 400,
            shift_limit: 25,
            relative_static_shifts: vec![0.0, 0.04, -0.04, 0.08, -0.08],
            absolute_static_shifts_secs: vec![0.0, 0.5, -0.5, 1.0, -1.0, 2.0, -2.0],
            match_min: 2,
            match_ratio: 0.2,
            bins_count: 3,
            salvage_offsets_secs: vec![0.0, 0.5, -0.5, 1.0, -1.0],
            flat_std_threshold: 6.0,
            black_mean_threshold: 12.0,
            white_mean_threshold: 243.0,
        }
    }
}

/// `F = clamp(ceil(D/every), F_min, F_max)`, with the short-video override.
pub fn frame_budget(duration_secs: f64, cfg: &VideoPipelineConfig) -> usize {
    if duration_secs <= cfg.short_seconds {
        return cfg.short_count.max(2);
    }
    let raw = (duration_secs / cfg.every_secs).ceil() as i64;
    raw.clamp(cfg.frame_min as i64, cfg.frame_max as i64) as usize
}

/// Evenly spaced target timestamps inside `[D*edge, D*(1-edge)]`.
pub fn target_timestamps(duration_secs: f64, count: usize, cfg: &VideoPipelineConfig) -> Vec<f64> {
    if count == 0 || duration_secs <= 0.0 {
        return Vec::new();
    }
    let lo = duration_secs * cfg.edge_ratio;
    let hi = duration_secs * (1.0 - cfg.edge_ratio);
    let span = (hi - lo).max(0.0);
    let step = span / count as f64;
    (0..count).map(|i| lo + step * (i as f64 + 1.0)).collect()
}

fn grey_stats(img: &GrayImage) -> (f64, f64) {
    let n = (img.width() * img.height()) as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let sum: f64 = img.pixels().map(|p| p[0] as f64).sum();
    let mean = sum / n;
    let var = img
        .pixels()
        .map(|p| {
            let d = p[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Try offsets in salvage order, decode+score each, accept the first
/// non-rejected frame or fall back to the highest-std candidate.
async fn select_and_hash_frame(
    tool: &dyn MediaInspectionTool,
    path: &Path,
    target_secs: f64,
    cfg: &VideoPipelineConfig,
) -> Result<FrameHash, MnemosyneError> {
    let mut best: Option<(f64, GrayImage)> = None; // (std, image) salvage candidate
    for offset in &cfg.salvage_offsets_secs {
        let at = (target_secs + offset).max(0.0);
        let frame_path = tool
            .extract_frame(path, at)
            .await
            .map_err(|e| MnemosyneError::MediaTool(e.to_string()))?;
        let decoded = image::open(&frame_path)
            .map_err(|e| MnemosyneError::MediaTool(e.to_string()))?
            .into_luma8();
        let _ = std::fs::remove_file(&frame_path);

        let (mean, std) = grey_stats(&decoded);
        let rejected =
            std < cfg.flat_std_threshold || mean <= cfg.black_mean_threshold || mean >= cfg.white_mean_threshold;

        if !rejected {
            return Ok(hash_frame(&decoded, (target_secs * 1000.0) as i64, cfg));
        }
        if best.as_ref().map(|(s, _)| std > *s).unwrap_or(true) {
            best = Some((std, decoded));
        }
    }
    let (_std, salvage) = best.ok_or_else(|| MnemosyneError::MediaTool("no frame decoded".into()))?;
    Ok(hash_frame(&salvage, (target_secs * 1000.0) as i64, cfg))
}

fn hash_frame(raw: &GrayImage, t_ms: i64, cfg: &VideoPipelineConfig) -> FrameHash {
    let blurred = image::imageops::blur(raw, cfg.blur_radius);
    FrameHash {
        t_ms,
        dhash: math::dhash(&blurred, 8),
        phash: math::phash(&blurred, 8),
        whash: math::whash(&blurred, 8),
    }
}

/// Full single-video extraction: probe, budget, targets, salvage-hash each.
pub async fn fingerprint_video(
    tool: &dyn MediaInspectionTool,
    path: &Path,
    item_index: u32,
    kind: FingerprintKind,
    file_unique_id: Option<String>,
    file_size: Option<u64>,
    cfg: &VideoPipelineConfig,
) -> Result<VideoFingerprint, MnemosyneError> {
    let meta = tool
        .probe(path)
        .await
        .map_err(|e| MnemosyneError::MediaTool(e.to_string()))?;
    let budget = frame_budget(meta.duration_secs, cfg);
    let targets = target_timestamps(meta.duration_secs, budget, cfg);

    let mut frames = Vec::with_capacity(targets.len());
    for t in targets {
        frames.push(select_and_hash_frame(tool, path, t, cfg).await?);
    }

    Ok(VideoFingerprint {
        post_id: 0,
        item_index,
        kind,
        file_unique_id,
        file_size,
        duration_ms: (meta.duration_secs * 1000.0) as u64,
        width: meta.width,
        height: meta.height,
        fps: if meta.avg_frame_rate > 0.0 {
            meta.avg_frame_rate
        } else {
            meta.r_frame_rate
        },
        frames,
        audio_hash: None,
        segments_count: None,
    })
}

/// One member of an album's virtual timeline.
pub enum AlbumSegment<'a> {
    Video { path: &'a Path },
    Photo { image: &'a image::DynamicImage },
}

impl<'a> AlbumSegment<'a> {
    fn is_photo(&self) -> bool {
        matches!(self, AlbumSegment::Photo { .. })
    }
}

/// Largest-remainder apportionment of `total` across `weights`, each segment
/// guaranteed at least 1 when `weights.len() <= total`.
fn apportion(weights: &[f64], total: usize) -> Vec<usize> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        let base = total / weights.len().max(1);
        return vec![base.max(1); weights.len()];
    }
    let raw: Vec<f64> = weights.iter().map(|w| w / sum * total as f64).collect();
    let mut alloc: Vec<usize> = raw.iter().map(|r| r.floor() as usize).collect();
    let mut remainder = total.saturating_sub(alloc.iter().sum::<usize>());
    let mut fracs: Vec<(usize, f64)> = raw
        .iter()
        .enumerate()
        .map(|(i, r)| (i, r - r.floor()))
        .collect();
    fracs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (idx, _) in fracs {
        if remainder == 0 {
            break;
        }
        alloc[idx] += 1;
        remainder -= 1;
    }
    alloc
}

/// Evenly spaced segment indices when `segment_count > budget`.
fn evenly_spaced_indices(n: usize, budget: usize) -> Vec<usize> {
    if budget == 0 || n == 0 {
        return Vec::new();
    }
    if budget == 1 {
        return vec![n / 2];
    }
    let mut idxs: Vec<usize> = (0..budget)
        .map(|i| ((i as f64) * (n as f64 - 1.0) / (budget as f64 - 1.0)).round() as usize)
        .collect();
    idxs.dedup();
    idxs
}

/// Builds the virtual album timeline and fingerprints the selected segments.
pub async fn fingerprint_album(
    segments: &[AlbumSegment<'_>],
    durations_ms: &[u64],
    tool: &dyn MediaInspectionTool,
    item_index: u32,
    cfg: &VideoPipelineConfig,
) -> Result<VideoFingerprint, MnemosyneError> {
    let n = segments.len();
    let total_ms: u64 = durations_ms.iter().sum();
    let budget = frame_budget(total_ms as f64 / 1000.0, &VideoPipelineConfig {
        frame_min: cfg.album_frame_min,
        frame_max: cfg.album_frame_max,
        ..cfg.clone()
    });

    let cumulative: Vec<u64> = durations_ms
        .iter()
        .scan(0u64, |acc, d| {
            let start = *acc;
            *acc += d;
            Some(start)
        })
        .collect();

    let mut frames = Vec::new();

    if n <= budget {
        let weights: Vec<f64> = durations_ms.iter().map(|d| *d as f64).collect();
        let per_segment = apportion(&weights, budget.max(n));
        for (i, seg) in segments.iter().enumerate() {
            let allowed = per_segment[i].max(1);
            let offset_ms = cumulative[i];
            match seg {
                AlbumSegment::Photo { image } => {
                    let blurred_grey = image::imageops::blur(&image::imageops::grayscale(*image), cfg.blur_radius);
                    let t_ms = offset_ms as i64 + (cfg.photo_duration_ms / 2) as i64;
                    frames.push(FrameHash {
                        t_ms,
                        dhash: math::dhash(&blurred_grey, 8),
                        phash: math::phash(&blurred_grey, 8),
                        whash: math::whash(&blurred_grey, 8),
                    });
                }
                AlbumSegment::Video { path } => {
                    let meta = tool
                        .probe(path)
                        .await
                        .map_err(|e| MnemosyneError::MediaTool(e.to_string()))?;
                    let targets = target_timestamps(meta.duration_secs, allowed, cfg);
                    for t in targets {
                        let mut fh = select_and_hash_frame(tool, path, t, cfg).await?;
                        fh.t_ms += offset_ms as i64;
                        frames.push(fh);
                    }
                }
            }
        }
    } else {
        let indices = evenly_spaced_indices(n, budget);
        for i in indices {
            let offset_ms = cumulative[i];
            match &segments[i] {
                AlbumSegment::Photo { image } => {
                    let blurred_grey = image::imageops::blur(&image::imageops::grayscale(*image), cfg.blur_radius);
                    let t_ms = offset_ms as i64 + (cfg.photo_duration_ms / 2) as i64;
                    frames.push(FrameHash {
                        t_ms,
                        dhash: math::dhash(&blurred_grey, 8),
                        phash: math::phash(&blurred_grey, 8),
                        whash: math::whash(&blurred_grey, 8),
                    });
                }
                AlbumSegment::Video { path } => {
                    let meta = tool
                        .probe(path)
                        .await
                        .map_err(|e| MnemosyneError::MediaTool(e.to_string()))?;
                    let mut fh =
                        select_and_hash_frame(tool, path, meta.duration_secs / 2.0, cfg).await?;
                    fh.t_ms += offset_ms as i64;
                    frames.push(fh);
                }
            }
        }
    }

    frames.sort_by_key(|f| f.t_ms);

    Ok(VideoFingerprint {
        post_id: 0,
        item_index,
        kind: FingerprintKind::Album,
        file_unique_id: None,
        file_size: None,
        duration_ms: total_ms,
        width: 0,
        height: 0,
        fps: 0.0,
        frames,
        audio_hash: None,
        segments_count: Some(n as u32),
    })
}

/// Weighted-sum metadata discrepancy score; lower is more similar (spec
/// §4.3 "Matching" step 3).
pub fn metadata_score(q: &VideoFingerprint, c: &VideoFingerprint) -> f64 {
    let divisor = |fp: &VideoFingerprint| fp.segments_count.unwrap_or(1).max(1) as f64;

    let dur_w = 1.0 / divisor(q).max(divisor(c));
    let size_w = 0.4 / divisor(q).max(divisor(c));

    let dur_term = if q.duration_ms > 0 && c.duration_ms > 0 {
        ((q.duration_ms as f64 - c.duration_ms as f64).abs()) / q.duration_ms.max(c.duration_ms) as f64
    } else {
        1.0
    } * dur_w;

    let fps_term = if q.fps > 0.0 && c.fps > 0.0 {
        (q.fps - c.fps).abs() / q.fps.max(c.fps)
    } else {
        1.0
    } * 0.3;

    let aspect_term = if q.width > 0 && q.height > 0 && c.width > 0 && c.height > 0 {
        ((q.width as f64 / q.height as f64) / (c.width as f64 / c.height as f64))
            .ln()
            .abs()
    } else {
        1.0
    } * 1.2;

    let size_term = match (q.file_size, c.file_size) {
        (Some(qs), Some(cs)) if qs > 0 && cs > 0 => (qs as f64 / cs as f64).ln().abs(),
        _ => 1.0,
    } * size_w;

    dur_term + fps_term + aspect_term + size_term
}

struct ShiftOutcome {
    matched: usize,
    distinct_bins: usize,
    shift: f64,
}

fn bin_index(position_ms: f64, duration_ms: f64, bins: usize) -> usize {
    if duration_ms <= 0.0 {
        return 0;
    }
    (((position_ms / duration_ms).clamp(0.0, 0.999) * bins as f64) as usize).min(bins - 1)
}

/// Greedy time-closest pairing under one shift hypothesis, honoring the
/// ensemble hash gate per pair.
fn try_shift(
    q: &VideoFingerprint,
    c: &VideoFingerprint,
    shift: f64,
    absolute: bool,
    tolerance: f64,
    cfg: &VideoPipelineConfig,
) -> ShiftOutcome {
    let mut used = vec![false; c.frames.len()];
    let mut matched = 0usize;
    let mut bins = std::collections::HashSet::new();

    let q_span = q.duration_ms as f64;
    for qf in &q.frames {
        let q_pos = if absolute {
            qf.t_ms as f64 / 1000.0
        } else {
            qf.t_ms as f64 / q.duration_ms.max(1) as f64
        };
        let target = q_pos + shift;

        let mut best: Option<(usize, f64)> = None;
        for (i, cf) in c.frames.iter().enumerate() {
            if used[i] {
                continue;
            }
            let c_pos = if absolute {
                cf.t_ms as f64 / 1000.0
            } else {
                cf.t_ms as f64 / c.duration_ms.max(1) as f64
            };
            let d = (c_pos - target).abs();
            if d > tolerance {
                continue;
            }
            if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((i, d));
            }
        }

        if let Some((i, _)) = best {
            let dist = HashDistances {
                d: Some(math::hamming_hex(&qf.dhash, &c.frames[i].dhash)),
                p: Some(math::hamming_hex(&qf.phash, &c.frames[i].phash)),
                w: Some(math::hamming_hex(&qf.whash, &c.frames[i].whash)),
            };
            if math::ensemble_match(&dist, &EnsembleThresholds::VIDEO).is_some() {
                used[i] = true;
                matched += 1;
                bins.insert(bin_index(qf.t_ms as f64, q_span, cfg.bins_count));
            }
        }
    }

    ShiftOutcome {
        matched,
        distinct_bins: bins.len(),
        shift,
    }
}

/// Frame-aligned comparison across a shift search. Returns
/// `(matched, total, distance, details)` on acceptance.
pub fn frame_aligned_compare(
    q: &VideoFingerprint,
    c: &VideoFingerprint,
    cfg: &VideoPipelineConfig,
) -> Option<(usize, usize, u32, String)> {
    let total = q.frames.len();
    if total == 0 || c.frames.is_empty() {
        return None;
    }

    let absolute = q.is_album() || c.is_album();
    let tolerance = if absolute {
        1.0
    } else {
        (0.04_f64).min(1.0 / q.duration_ms.min(c.duration_ms).max(1) as f64 * 1000.0)
    };

    let mut shifts: Vec<f64> = if absolute {
        cfg.absolute_static_shifts_secs.clone()
    } else {
        cfg.relative_static_shifts.clone()
    };

    if absolute {
        let mut pairwise: Vec<f64> = Vec::new();
        for qf in &q.frames {
            for cf in &c.frames {
                pairwise.push((cf.t_ms as f64 - qf.t_ms as f64) / 1000.0);
            }
        }
        pairwise.sort_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap());
        pairwise.truncate(cfg.shift_limit);
        shifts.extend(pairwise);
    }

    let required = cfg
        .match_min
        .max((total as f64 * cfg.match_ratio).ceil() as usize);

    let mut best: Option<ShiftOutcome> = None;
    for shift in shifts {
        let outcome = try_shift(q, c, shift, absolute, tolerance, cfg);
        if outcome.matched < required {
            continue;
        }
        if total >= 4 && outcome.distinct_bins < 2 {
            continue;
        }
        let better = match &best {
            None => true,
            Some(b) => {
                (outcome.matched, outcome.distinct_bins, -outcome.shift.abs())
                    > (b.matched, b.distinct_bins, -b.shift.abs())
            }
        };
        if better {
            best = Some(outcome);
        }
    }

    best.map(|b| {
        let distance = (100.0 * (1.0 - b.matched as f64 / total as f64)).round().max(0.0) as u32;
        let details = if b.shift.abs() > 1e-9 {
            format!("v={}/{}, s={:.2}", b.matched, total, b.shift)
        } else {
            format!("v={}/{}", b.matched, total)
        };
        (b.matched, total, distance, details)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_budget_respects_short_video_override() {
        let cfg = VideoPipelineConfig::default();
        assert_eq!(frame_budget(3.0, &cfg), 3);
        assert_eq!(frame_budget(200.0, &cfg), cfg.frame_max);
        assert_eq!(frame_budget(30.0, &cfg), 4.max((30.0f64 / 20.0).ceil() as usize));
    }

    #[test]
    fn target_timestamps_respect_edges() {
        let cfg = VideoPipelineConfig::default();
        let ts = target_timestamps(100.0, 4, &cfg);
        assert_eq!(ts.len(), 4);
        assert!(ts[0] > 5.0 && ts[3] < 95.0);
    }

    #[test]
    fn apportion_sums_to_total() {
        let out = apportion(&[10.0, 20.0, 30.0], 6);
        assert_eq!(out.iter().sum::<usize>(), 6);
    }

    #[test]
    fn evenly_spaced_single_budget_is_middle() {
        assert_eq!(evenly_spaced_indices(10, 1), vec![5]);
    }
}
