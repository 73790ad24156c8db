//! Shared perceptual primitives: Gaussian pre-blur, dHash, pHash,
//! wHash, Hamming distance, the ensemble match decision, plus the sigmoid and
//! EWMA helpers Chronos also depends on.

use image::{DynamicImage, GrayImage, imageops};

/// Hex-encoded bitstring length for a hash built from `size * size` bits.
///
/// Matches the expected `(hash_size^2 + 3) / 4` hex characters (16
/// for the 8x8 default, i.e. 64 bits).
pub fn hex_len_for(size: u32) -> usize {
    ((size * size + 3) / 4) as usize
}

/// Per-hash and single-hash distance thresholds used by the ensemble
/// decision. Defaults below match the "fast" tier; callers
/// construct the "slow" and video tiers from the same struct.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleThresholds {
    pub d: u32,
    pub p: u32,
    pub w: u32,
    pub single: u32,
}

impl EnsembleThresholds {
    pub const FAST: EnsembleThresholds = EnsembleThresholds {
        d: 6,
        p: 10,
        w: 10,
        single: 4,
    };
    pub const SLOW: EnsembleThresholds = EnsembleThresholds {
        d: 26,
        p: 30,
        w: 34,
        single: 4,
    };
    pub const VIDEO: EnsembleThresholds = EnsembleThresholds {
        d: 26,
        p: 30,
        w: 34,
        single: 6,
    };
}

/// Up to three hash distances against a candidate, one per hash kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashDistances {
    pub d: Option<u32>,
    pub p: Option<u32>,
    pub w: Option<u32>,
}

impl HashDistances {
    pub fn min(&self) -> Option<u32> {
        [self.d, self.p, self.w].into_iter().flatten().min()
    }
}

/// The ensemble decision: match iff at least two distances are
/// within their per-hash threshold, or the minimum available distance is
/// within the single-hash threshold. Returns the reported (minimum)
/// distance on a match.
pub fn ensemble_match(dist: &HashDistances, t: &EnsembleThresholds) -> Option<u32> {
    let mut under = 0;
    if let Some(d) = dist.d {
        if d <= t.d {
            under += 1;
        }
    }
    if let Some(p) = dist.p {
        if p <= t.p {
            under += 1;
        }
    }
    if let Some(w) = dist.w {
        if w <= t.w {
            under += 1;
        }
    }
    let min = dist.min()?;
    if under >= 2 || min <= t.single {
        Some(min)
    } else {
        None
    }
}

/// Greyscale buffers kept for one image: raw (for ORB) and Gaussian-blurred
/// (for the three hashes).
pub struct GreyBuffers {
    pub raw: GrayImage,
    pub blurred: GrayImage,
}

pub fn prepare_greyscale(image: &DynamicImage, blur_radius: f32) -> GreyBuffers {
    let raw = imageops::grayscale(image);
    let blurred = imageops::blur(&raw, blur_radius);
    GreyBuffers { raw, blurred }
}

/// Difference hash: resize to `(n+1, n)`, emit 1 iff left pixel strictly
/// exceeds its right neighbour. Returns a hex string of `hex_len_for(n)`
/// characters.
pub fn dhash(blurred: &GrayImage, n: u32) -> String {
    let resized = imageops::resize(blurred, n + 1, n, imageops::FilterType::Triangle);
    let mut bits: Vec<bool> = Vec::with_capacity((n * n) as usize);
    for y in 0..n {
        for x in 0..n {
            let left = resized.get_pixel(x, y)[0];
            let right = resized.get_pixel(x + 1, y)[0];
            bits.push(left > right);
        }
    }
    bits_to_hex(&bits)
}

/// Perceptual hash via separable Type-II DCT.
pub fn phash(blurred: &GrayImage, n: u32) -> String {
    let resized = imageops::resize(blurred, 32, 32, imageops::FilterType::Triangle);
    let mut samples = [[0f64; 32]; 32];
    for y in 0..32u32 {
        for x in 0..32u32 {
            samples[y as usize][x as usize] = resized.get_pixel(x, y)[0] as f64;
        }
    }
    let dct = dct2_2d(&samples, 32);

    let block = n as usize;
    let mut coeffs = Vec::with_capacity(block * block);
    for y in 0..block {
        for x in 0..block {
            coeffs.push(dct[y][x]);
        }
    }
    threshold_block(&coeffs, block)
}

/// Wavelet hash via two stages of the 2-D Haar transform.
pub fn whash(blurred: &GrayImage, n: u32) -> String {
    let resized = imageops::resize(blurred, 32, 32, imageops::FilterType::Triangle);
    let mut samples = vec![vec![0f64; 32]; 32];
    for y in 0..32usize {
        for x in 0..32usize {
            samples[y][x] = resized.get_pixel(x as u32, y as u32)[0] as f64;
        }
    }

    let mut size = 32usize;
    for _ in 0..2 {
        samples = haar_stage(&samples, size);
        size /= 2;
    }

    let block = n as usize;
    let mut coeffs = Vec::with_capacity(block * block);
    for y in 0..block {
        for x in 0..block {
            coeffs.push(samples[y][x]);
        }
    }
    threshold_block(&coeffs, block)
}

fn threshold_block(coeffs: &[f64], block: usize) -> String {
    debug_assert_eq!(coeffs.len(), block * block);
    let mut without_dc: Vec<f64> = coeffs[1..].to_vec();
    without_dc.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if without_dc.is_empty() {
        coeffs[0]
    } else {
        without_dc[without_dc.len() / 2]
    };
    let bits: Vec<bool> = coeffs.iter().map(|c| *c > median).collect();
    bits_to_hex(&bits)
}

/// One stage of the 2-D Haar transform: row pass then column pass, each
/// producing `(a+b)/2` in the low half and `(a-b)/2` in the high half. Only
/// the top-left LL quadrant is kept by the caller across stages.
fn haar_stage(data: &[Vec<f64>], size: usize) -> Vec<Vec<f64>> {
    let half = size / 2;
    let mut row_pass = vec![vec![0f64; size]; size];
    for y in 0..size {
        for x in 0..half {
            let a = data[y][2 * x];
            let b = data[y][2 * x + 1];
            row_pass[y][x] = (a + b) / 2.0;
            row_pass[y][half + x] = (a - b) / 2.0;
        }
    }
    let mut col_pass = vec![vec![0f64; size]; size];
    for x in 0..size {
        for y in 0..half {
            let a = row_pass[2 * y][x];
            let b = row_pass[2 * y + 1][x];
            col_pass[y][x] = (a + b) / 2.0;
            col_pass[half + y][x] = (a - b) / 2.0;
        }
    }
    col_pass
}

/// 2-D separable Type-II DCT over an `n x n` sample grid, orthonormal
/// normalisation (`sqrt(1/n)` for k=0, `sqrt(2/n)` otherwise).
fn dct2_2d(samples: &[[f64; 32]; 32], n: usize) -> Vec<Vec<f64>> {
    let basis = dct_basis(n);

    // Rows: transform each row vector.
    let mut tmp = vec![vec![0f64; n]; n];
    for y in 0..n {
        for k in 0..n {
            let mut sum = 0.0;
            for x in 0..n {
                sum += samples[y][x] * basis[k][x];
            }
            tmp[y][k] = sum;
        }
    }
    // Columns: transform each column vector of the row-transformed matrix.
    let mut out = vec![vec![0f64; n]; n];
    for k in 0..n {
        for ky in 0..n {
            let mut sum = 0.0;
            for y in 0..n {
                sum += tmp[y][k] * basis[ky][y];
            }
            out[ky][k] = sum;
        }
    }
    out
}

fn dct_basis(n: usize) -> Vec<Vec<f64>> {
    let mut basis = vec![vec![0f64; n]; n];
    for k in 0..n {
        let c = if k == 0 {
            (1.0 / n as f64).sqrt()
        } else {
            (2.0 / n as f64).sqrt()
        };
        for x in 0..n {
            basis[k][x] =
                c * (std::f64::consts::PI * (2.0 * x as f64 + 1.0) * k as f64 / (2.0 * n as f64))
                    .cos();
        }
    }
    basis
}

fn bits_to_hex(bits: &[bool]) -> String {
    let mut out = String::with_capacity((bits.len() + 3) / 4);
    for chunk in bits.chunks(4) {
        let mut nibble = 0u8;
        for (i, b) in chunk.iter().enumerate() {
            if *b {
                nibble |= 1 << (chunk.len() - 1 - i);
            }
        }
        out.push(std::char::from_digit(nibble as u32, 16).unwrap());
    }
    out
}

/// Hamming distance between two equal-length hex-encoded bitstrings.
pub fn hamming_hex(a: &str, b: &str) -> u32 {
    if a.len() != b.len() {
        return u32::MAX;
    }
    let mut dist = 0u32;
    for (ca, cb) in a.chars().zip(b.chars()) {
        let va = ca.to_digit(16).unwrap_or(0);
        let vb = cb.to_digit(16).unwrap_or(0);
        dist += (va ^ vb).count_ones();
    }
    dist
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Exponentially weighted moving average over a chronological slice,
/// oldest first, smoothing parameter `alpha`.
pub fn ewma(values: &[f64], alpha: f64) -> f64 {
    let mut acc = match values.first() {
        Some(v) => *v,
        None => return 0.0,
    };
    for v in &values[1..] {
        acc = alpha * v + (1.0 - alpha) * acc;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImage, Rgba};

    fn solid(w: u32, h: u32, px: u8) -> DynamicImage {
        let mut img = DynamicImage::new_rgb8(w, h);
        for y in 0..h {
            for x in 0..w {
                img.put_pixel(x, y, Rgba([px, px, px, 255]));
            }
        }
        img
    }

    #[test]
    fn hash_len_matches_invariant() {
        assert_eq!(hex_len_for(8), 16);
    }

    #[test]
    fn dhash_deterministic_and_zero_self_distance() {
        let img = solid(64, 64, 128);
        let bufs = prepare_greyscale(&img, 1.0);
        let h1 = dhash(&bufs.blurred, 8);
        let h2 = dhash(&bufs.blurred, 8);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert_eq!(hamming_hex(&h1, &h1), 0);
    }

    #[test]
    fn phash_and_whash_deterministic() {
        let img = solid(64, 64, 90);
        let bufs = prepare_greyscale(&img, 1.0);
        assert_eq!(phash(&bufs.blurred, 8), phash(&bufs.blurred, 8));
        assert_eq!(whash(&bufs.blurred, 8), whash(&bufs.blurred, 8));
    }

    #[test]
    fn ensemble_requires_two_or_single_gate() {
        let t = EnsembleThresholds::FAST;
        let ok = HashDistances {
            d: Some(3),
            p: Some(4),
            w: Some(50),
        };
        assert_eq!(ensemble_match(&ok, &t), Some(3));

        let single_only = HashDistances {
            d: Some(2),
            p: Some(50),
            w: Some(50),
        };
        assert_eq!(ensemble_match(&single_only, &t), Some(2));

        let fail = HashDistances {
            d: Some(20),
            p: Some(20),
            w: Some(20),
        };
        assert_eq!(ensemble_match(&fail, &t), None);
    }

    #[test]
    fn ewma_of_single_value_is_identity() {
        assert_eq!(ewma(&[3.0], 1.0 / 3.0), 3.0);
    }
}
