//! Media-inspection tool collaborator: a process-external tool that reports
//! video metadata and extracts single PNG frames. Follows the familiar
//! `ffprobe`/`ffmpeg` subprocess pattern (temp-dir lifetime via `Drop`,
//! bounded timeouts via `tokio::time::timeout`).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub avg_frame_rate: f64,
    pub r_frame_rate: f64,
    pub duration_secs: f64,
}

#[async_trait]
pub trait MediaInspectionTool: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoMetadata>;
    async fn extract_frame(&self, path: &Path, at_secs: f64) -> Result<PathBuf>;
}

pub struct FfmpegMediaTool {
    ffprobe_bin: String,
    ffmpeg_bin: String,
    probe_timeout: Duration,
    extract_timeout: Duration,
    scratch_dir: PathBuf,
}

impl FfmpegMediaTool {
    pub fn new(ffprobe_bin: String, ffmpeg_bin: String, scratch_dir: PathBuf) -> Self {
        Self {
            ffprobe_bin,
            ffmpeg_bin,
            probe_timeout: Duration::from_secs(20),
            extract_timeout: Duration::from_secs(30),
            scratch_dir,
        }
    }
}

#[async_trait]
impl MediaInspectionTool for FfmpegMediaTool {
    async fn probe(&self, path: &Path) -> Result<VideoMetadata> {
        let output = tokio::time::timeout(
            self.probe_timeout,
            Command::new(&self.ffprobe_bin)
                .args([
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=width,height,avg_frame_rate,r_frame_rate:format=duration",
                    "-of",
                    "json",
                ])
                .arg(path)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output(),
        )
        .await
        .context("ffprobe timed out")?
        .context("failed to spawn ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe exited with {}", output.status));
        }
        parse_ffprobe_json(&output.stdout)
    }

    async fn extract_frame(&self, path: &Path, at_secs: f64) -> Result<PathBuf> {
        let out_path = self
            .scratch_dir
            .join(format!("frame_{}.png", Uuid::new_v4()));

        let status = tokio::time::timeout(
            self.extract_timeout,
            Command::new(&self.ffmpeg_bin)
                .args(["-y", "-ss", &format!("{:.3}", at_secs.max(0.0)), "-i"])
                .arg(path)
                .args(["-frames:v", "1"])
                .arg(&out_path)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await
        .context("ffmpeg frame extraction timed out")?
        .context("failed to spawn ffmpeg")?;

        if !status.success() || !out_path.exists() {
            return Err(anyhow!("ffmpeg failed to extract frame at {:.3}s", at_secs));
        }
        debug!(?out_path, at_secs, "extracted video frame");
        Ok(out_path)
    }
}

fn parse_ffprobe_json(bytes: &[u8]) -> Result<VideoMetadata> {
    let v: serde_json::Value = serde_json::from_slice(bytes).context("malformed ffprobe json")?;
    let stream = v
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| anyhow!("no video stream in ffprobe output"))?;

    let width = stream.get("width").and_then(|w| w.as_u64()).unwrap_or(0) as u32;
    let height = stream.get("height").and_then(|h| h.as_u64()).unwrap_or(0) as u32;
    let avg_frame_rate = parse_rational(stream.get("avg_frame_rate").and_then(|v| v.as_str()));
    let r_frame_rate = parse_rational(stream.get("r_frame_rate").and_then(|v| v.as_str()));
    let duration_secs = v
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        width,
        height,
        avg_frame_rate,
        r_frame_rate,
        duration_secs,
    })
}

fn parse_rational(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else { return 0.0 };
    match raw.split_once('/') {
        Some((num, den)) => {
            let n: f64 = num.parse().unwrap_or(0.0);
            let d: f64 = den.parse().unwrap_or(1.0);
            if d == 0.0 { 0.0 } else { n / d }
        }
        None => raw.parse().unwrap_or(0.0),
    }
}

/// Cleans up any frame PNGs it extracted, on every exit path including
/// panics during the probe/extract sequence.
pub struct TempFrame {
    pub path: PathBuf,
}

impl Drop for TempFrame {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = ?self.path, error = %e, "failed to clean up temp frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_frame_rate() {
        assert_eq!(parse_rational(Some("30000/1001")), 30000.0 / 1001.0);
        assert_eq!(parse_rational(Some("0/0")), 0.0);
        assert_eq!(parse_rational(None), 0.0);
    }
}
