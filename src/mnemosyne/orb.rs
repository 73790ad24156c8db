//! ORB-style feature re-verification stage.
//!
//! Keypoints come from FAST corner detection (`imageproc::corners`);
//! descriptors are steered BRIEF binary strings sampled around the
//! intensity-centroid orientation of each keypoint, matched with a
//! brute-force Hamming matcher and verified with a RANSAC-fitted
//! homography (`nalgebra` for the linear algebra).

use std::collections::HashMap;

use image::{GenericImageView, GrayImage};
use imageproc::corners::{Corner, corners_fast9};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use nalgebra::{Matrix3, Vector3};
use ordered_float::NotNan;
use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;

pub const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_BYTES: usize = DESCRIPTOR_BITS / 8;
const PATCH_RADIUS: i32 = 15;

#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// A fixed 256-pair sampling pattern over a unit patch, generated once from
/// a deterministic seed (a stand-in for the learned ORB pattern).
fn sampling_pattern() -> &'static [(f32, f32, f32, f32); DESCRIPTOR_BITS] {
    use std::sync::OnceLock;
    static PATTERN: OnceLock<[(f32, f32, f32, f32); DESCRIPTOR_BITS]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xA11CE);
        let mut pat = [(0f32, 0f32, 0f32, 0f32); DESCRIPTOR_BITS];
        for slot in pat.iter_mut() {
            let gauss = |rng: &mut rand::rngs::StdRng| -> f32 {
                let u1: f32 = rng.gen_range(1e-6..1.0);
                let u2: f32 = rng.gen_range(0.0..1.0);
                (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
            };
            *slot = (
                (gauss(&mut rng) * 0.3).clamp(-1.0, 1.0),
                (gauss(&mut rng) * 0.3).clamp(-1.0, 1.0),
                (gauss(&mut rng) * 0.3).clamp(-1.0, 1.0),
                (gauss(&mut rng) * 0.3).clamp(-1.0, 1.0),
            );
        }
        pat
    })
}

fn sample(img: &GrayImage, x: i32, y: i32) -> u8 {
    let (w, h) = img.dimensions();
    let cx = x.clamp(0, w as i32 - 1) as u32;
    let cy = y.clamp(0, h as i32 - 1) as u32;
    img.get_pixel(cx, cy)[0]
}

fn intensity_centroid_angle(img: &GrayImage, kp: &Keypoint) -> f32 {
    let mut m01 = 0f64;
    let mut m10 = 0f64;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            let intensity = sample(img, kp.x as i32 + dx, kp.y as i32 + dy) as f64;
            m10 += dx as f64 * intensity;
            m01 += dy as f64 * intensity;
        }
    }
    m01.atan2(m10) as f32
}

fn describe(img: &GrayImage, kp: &Keypoint) -> Descriptor {
    let theta = intensity_centroid_angle(img, kp);
    let (sin, cos) = theta.sin_cos();
    let pattern = sampling_pattern();
    let mut bytes = [0u8; DESCRIPTOR_BYTES];
    for (i, (x1, y1, x2, y2)) in pattern.iter().enumerate() {
        let rx1 = x1 * cos - y1 * sin;
        let ry1 = x1 * sin + y1 * cos;
        let rx2 = x2 * cos - y2 * sin;
        let ry2 = x2 * sin + y2 * cos;
        let p1 = sample(
            img,
            kp.x as i32 + (rx1 * PATCH_RADIUS as f32) as i32,
            kp.y as i32 + (ry1 * PATCH_RADIUS as f32) as i32,
        );
        let p2 = sample(
            img,
            kp.x as i32 + (rx2 * PATCH_RADIUS as f32) as i32,
            kp.y as i32 + (ry2 * PATCH_RADIUS as f32) as i32,
        );
        if p1 < p2 {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    Descriptor(bytes)
}

/// Extract ORB-style features from a raw (unblurred) greyscale image,
/// keeping at most `max_keypoints` by corner score.
pub fn extract_features(img: &GrayImage, max_keypoints: usize) -> FeatureSet {
    let mut corners: Vec<Corner> = corners_fast9(img, 30);
    corners.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    corners.truncate(max_keypoints);

    let mut keypoints = Vec::with_capacity(corners.len());
    let mut descriptors = Vec::with_capacity(corners.len());
    for c in corners {
        let kp = Keypoint {
            x: c.x as f32,
            y: c.y as f32,
        };
        descriptors.push(describe(img, &kp));
        keypoints.push(kp);
    }
    FeatureSet {
        keypoints,
        descriptors,
    }
}

/// One `(scale, rotation_degrees)` variant of an image, part of the
/// configured `variant_limit` cartesian product.
#[derive(Debug, Clone, Copy)]
pub struct Variant {
    pub scale: f32,
    pub rotation_deg: f32,
}

pub fn default_variants(limit: usize) -> Vec<Variant> {
    const SCALES: [f32; 2] = [1.0, 0.85];
    const ROTATIONS: [f32; 3] = [0.0, 7.0, -7.0];
    let mut variants = Vec::new();
    'outer: for scale in SCALES {
        for rotation_deg in ROTATIONS {
            if variants.len() >= limit {
                break 'outer;
            }
            variants.push(Variant {
                scale,
                rotation_deg,
            });
        }
    }
    variants
}

/// Render one variant of a raw greyscale buffer: center-crop to `scale`
/// fraction of each dimension, then rotate by `rotation_deg`.
pub fn render_variant(raw: &GrayImage, variant: Variant) -> GrayImage {
    let (w, h) = raw.dimensions();
    let cropped = if variant.scale < 1.0 {
        let cw = ((w as f32) * variant.scale).round().max(1.0) as u32;
        let ch = ((h as f32) * variant.scale).round().max(1.0) as u32;
        let ox = (w - cw) / 2;
        let oy = (h - ch) / 2;
        image::imageops::crop_imm(raw, ox, oy, cw, ch).to_image()
    } else {
        raw.clone()
    };
    if variant.rotation_deg == 0.0 {
        cropped
    } else {
        rotate_about_center(
            &cropped,
            variant.rotation_deg.to_radians(),
            Interpolation::Bilinear,
            image::Luma([0u8]),
        )
    }
}

/// A single good match between a query and candidate descriptor, after the
/// Lowe ratio test.
#[derive(Debug, Clone, Copy)]
pub struct GoodMatch {
    pub query_idx: usize,
    pub candidate_idx: usize,
}

/// Brute-force Hamming matcher with k=2 nearest neighbours and Lowe's ratio
/// test.
pub fn match_descriptors(
    query: &FeatureSet,
    candidate: &FeatureSet,
    ratio: f32,
) -> Vec<GoodMatch> {
    let mut good = Vec::new();
    for (qi, qd) in query.descriptors.iter().enumerate() {
        let mut best = (u32::MAX, usize::MAX);
        let mut second = u32::MAX;
        for (ci, cd) in candidate.descriptors.iter().enumerate() {
            let dist = qd.hamming(cd);
            if dist < best.0 {
                second = best.0;
                best = (dist, ci);
            } else if dist < second {
                second = dist;
            }
        }
        if best.1 == usize::MAX {
            continue;
        }
        if second == u32::MAX || (best.0 as f32) <= ratio * (second as f32) {
            good.push(GoodMatch {
                query_idx: qi,
                candidate_idx: best.1,
            });
        }
    }
    good
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RansacResult {
    pub inliers: usize,
    pub inlier_ratio: f64,
}

/// RANSAC-fitted homography between matched keypoint pairs, reprojection
/// threshold `reproj`.
pub fn ransac_homography(
    query_pts: &[(f32, f32)],
    candidate_pts: &[(f32, f32)],
    reproj: f64,
    iterations: usize,
) -> RansacResult {
    let n = query_pts.len();
    if n < 4 {
        return RansacResult::default();
    }
    let mut rng = rand::thread_rng();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut best = RansacResult::default();

    for _ in 0..iterations {
        indices.shuffle(&mut rng);
        let sample: Vec<usize> = indices[..4].to_vec();
        let Some(h) = fit_homography(&sample, query_pts, candidate_pts) else {
            continue;
        };
        let mut inliers = 0usize;
        for i in 0..n {
            let (qx, qy) = query_pts[i];
            let (cx, cy) = candidate_pts[i];
            let src = Vector3::new(qx as f64, qy as f64, 1.0);
            let proj = h * src;
            let px = proj.x / proj.z;
            let py = proj.y / proj.z;
            let err = ((px - cx as f64).powi(2) + (py - cy as f64).powi(2)).sqrt();
            if err <= reproj {
                inliers += 1;
            }
        }
        if inliers > best.inliers {
            best = RansacResult {
                inliers,
                inlier_ratio: inliers as f64 / n as f64,
            };
        }
    }
    best
}

fn fit_homography(
    sample: &[usize],
    query_pts: &[(f32, f32)],
    candidate_pts: &[(f32, f32)],
) -> Option<Matrix3<f64>> {
    // Direct Linear Transform over the 4 sampled correspondences.
    let mut a = nalgebra::DMatrix::<f64>::zeros(8, 9);
    for (row, &idx) in sample.iter().enumerate() {
        let (x, y) = query_pts[idx];
        let (xp, yp) = candidate_pts[idx];
        let (x, y, xp, yp) = (x as f64, y as f64, xp as f64, yp as f64);
        a.set_row(
            2 * row,
            &nalgebra::RowDVector::from_row_slice(&[
                -x,
                -y,
                -1.0,
                0.0,
                0.0,
                0.0,
                x * xp,
                y * xp,
                xp,
            ]),
        );
        a.set_row(
            2 * row + 1,
            &nalgebra::RowDVector::from_row_slice(&[
                0.0,
                0.0,
                0.0,
                -x,
                -y,
                -1.0,
                x * yp,
                y * yp,
                yp,
            ]),
        );
    }
    let svd = nalgebra::linalg::SVD::new(a, true, true);
    let v_t = svd.v_t?;
    let last_row = v_t.row(v_t.nrows() - 1);
    if last_row.iter().all(|v| v.abs() < 1e-12) {
        return None;
    }
    Some(Matrix3::new(
        last_row[0],
        last_row[1],
        last_row[2],
        last_row[3],
        last_row[4],
        last_row[5],
        last_row[6],
        last_row[7],
        last_row[8],
    ))
}

/// Per-candidate ORB verification outcome across all variants, selected
/// lexicographically by `(inliers, inlier_ratio, good, good_ratio)`.
#[derive(Debug, Clone, Copy)]
pub struct OrbVerdict {
    pub good: usize,
    pub good_ratio: f64,
    pub inliers: usize,
    pub inlier_ratio: f64,
}

impl OrbVerdict {
    fn key(&self) -> (usize, NotNan<f64>, usize, NotNan<f64>) {
        (
            self.inliers,
            NotNan::new(self.inlier_ratio).unwrap_or(NotNan::new(0.0).unwrap()),
            self.good,
            NotNan::new(self.good_ratio).unwrap_or(NotNan::new(0.0).unwrap()),
        )
    }

    pub fn passes_gate(&self, min_good: usize, min_matches: usize, min_ratio: f64) -> bool {
        self.good >= min_good
            && (self.good >= min_matches || self.good_ratio >= min_ratio)
    }

    pub fn passes_strict(&self) -> bool {
        self.inliers >= 6 && self.inlier_ratio >= 0.25
    }

    pub fn passes_loose(&self) -> bool {
        self.inliers >= 4 && self.inlier_ratio >= 0.6 && self.good_ratio >= 0.08
    }
}

/// Select the best verdict across several variant attempts, lexicographic
/// by `(inliers, inlier_ratio, good, good_ratio)`.
pub fn best_verdict(candidates: Vec<OrbVerdict>) -> Option<OrbVerdict> {
    candidates.into_iter().max_by_key(|v| v.key())
}

/// Candidate selection: union of top-K by minimum hash distance and top-K
/// by aspect/area similarity.
pub fn aspect_area_score(q: (u32, u32), c: (u32, u32)) -> f64 {
    let aspect_q = q.0 as f64 / q.1 as f64;
    let aspect_c = c.0 as f64 / c.1 as f64;
    let area_q = (q.0 * q.1) as f64;
    let area_c = (c.0 * c.1) as f64;
    (aspect_q - aspect_c).abs() + 0.4 * (area_q / area_c).ln().abs()
}

/// A lazily-populated, per-invocation ORB feature cache keyed by post id
/// re-extracting features for the same candidate across query variants.
#[derive(Default)]
pub struct FeatureCache {
    cache: HashMap<i64, FeatureSet>,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        post_id: i64,
        compute: impl FnOnce() -> FeatureSet,
    ) -> &FeatureSet {
        self.cache.entry(post_id).or_insert_with(compute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_zero_for_identical_descriptor() {
        let d = Descriptor([0xAB; DESCRIPTOR_BYTES]);
        assert_eq!(d.hamming(&d), 0);
    }

    #[test]
    fn default_variants_respects_limit() {
        assert_eq!(default_variants(2).len(), 2);
        assert_eq!(default_variants(100).len(), 6);
    }

    #[test]
    fn ransac_needs_at_least_four_points() {
        let r = ransac_homography(&[(0.0, 0.0)], &[(0.0, 0.0)], 5.0, 10);
        assert_eq!(r.inliers, 0);
    }
}
