//! Process-start configuration: loaded from TOML with `#[serde(default)]`
//! fallbacks. Values that must change at runtime (`chronos_*`, `bot_paused`,
//! `super_admins`) are NOT here — they live in the persistent settings
//! store and are only seeded from this file on first run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::chronos::grid::Grid;
use crate::mnemosyne::image_pipeline::ImagePipelineConfig;
use crate::mnemosyne::orchestrator::OrchestratorConfig;
use crate::mnemosyne::video_pipeline::VideoPipelineConfig;
use crate::settings::ChronosMode;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mnemosyne: MnemosyneConfig,
    #[serde(default)]
    pub chronos: ChronosConfig,
    #[serde(default)]
    pub media_tool: MediaToolConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "mnemosyne-chronos.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MnemosyneConfig {
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default)]
    pub image: ImageHashConfig,
    #[serde(default)]
    pub video: VideoHashConfig,
}

fn default_sync_timeout_secs() -> u64 {
    2
}

impl Default for MnemosyneConfig {
    fn default() -> Self {
        Self {
            sync_timeout_secs: default_sync_timeout_secs(),
            image: ImageHashConfig::default(),
            video: VideoHashConfig::default(),
        }
    }
}

/// TOML-facing mirror of [`ImagePipelineConfig`]; kept as a
/// separate `Deserialize` shape so pipeline internals don't need to derive
/// serde just to be configurable.
#[derive(Deserialize, Debug, Clone)]
pub struct ImageHashConfig {
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

impl Default for ImageHashConfig {
    fn default() -> Self {
        let d = ImagePipelineConfig::default();
        Self {
            blur_radius: d.blur_radius,
            fast_tolerance_bytes: d.fast_tolerance_bytes,
            fast_candidate_limit: d.fast_candidate_limit,
            slow_tolerance_bytes: d.slow_tolerance_bytes,
            slow_candidate_limit: d.slow_candidate_limit,
            fullscan_limit: d.fullscan_limit,
            variant_limit: d.variant_limit,
            orb_topk_hash: d.orb_topk_hash,
            orb_topk_size: d.orb_topk_size,
            max_keypoints: d.max_keypoints,
            lowe_ratio: d.lowe_ratio,
            min_good: d.min_good,
            min_matches: d.min_matches,
            min_ratio: d.min_ratio,
            reproj_threshold: d.reproj_threshold,
            ransac_iterations: d.ransac_iterations,
        }
    }
}

impl From<ImageHashConfig> for ImagePipelineConfig {
    fn from(c: ImageHashConfig) -> Self {
        Self {
            blur_radius: c.blur_radius,
            fast_tolerance_bytes: c.fast_tolerance_bytes,
            fast_candidate_limit: c.fast_candidate_limit,
            slow_tolerance_bytes: c.slow_tolerance_bytes,
            slow_candidate_limit: c.slow_candidate_limit,
            fullscan_limit: c.fullscan_limit,
            variant_limit: c.variant_limit,
            orb_topk_hash: c.orb_topk_hash,
            orb_topk_size: c.orb_topk_size,
            max_keypoints: c.max_keypoints,
            lowe_ratio: c.lowe_ratio,
            min_good: c.min_good,
            min_matches: c.min_matches,
            min_ratio: c.min_ratio,
            reproj_threshold: c.reproj_threshold,
            ransac_iterations: c.ransac_iterations,
        }
    }
}

/// TOML-facing mirror of [`VideoPipelineConfig`].
#[derive(Deserialize, Debug, Clone)]
pub struct VideoHashConfig {
    pub every_secs: f64,
    pub frame_min: usize,
    pub frame_max: usize,
    pub short_seconds: f64,
    pub short_count: usize,
    pub album_frame_min: usize,
    pub album_frame_max: usize,
    pub edge_ratio: f64,
    pub fullscan_limit: usize,
    pub topk: usize,
    pub shift_limit: usize,
}

impl Default for VideoHashConfig {
    fn default() -> Self {
        let d = VideoPipelineConfig::default();
        Self {
            every_secs: d.every_secs,
            frame_min: d.frame_min,
            frame_max: d.frame_max,
            short_seconds: d.short_seconds,
            short_count: d.short_count,
            album_frame_min: d.album_frame_min,
            album_frame_max: d.album_frame_max,
            edge_ratio: d.edge_ratio,
            fullscan_limit: d.fullscan_limit,
            topk: d.topk,
            shift_limit: d.shift_limit,
        }
    }
}

impl VideoHashConfig {
    /// Applies the TOML-overridable fields onto the pipeline's full default,
    /// leaving the fields with no configuration-file analogue untouched.
    pub fn apply(self, mut base: VideoPipelineConfig) -> VideoPipelineConfig {
        base.every_secs = self.every_secs;
        base.frame_min = self.frame_min;
        base.frame_max = self.frame_max;
        base.short_seconds = self.short_seconds;
        base.short_count = self.short_count;
        base.album_frame_min = self.album_frame_min;
        base.album_frame_max = self.album_frame_max;
        base.edge_ratio = self.edge_ratio;
        base.fullscan_limit = self.fullscan_limit;
        base.topk = self.topk;
        base.shift_limit = self.shift_limit;
        base
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChronosConfig {
    #[serde(default = "default_chronos_start")]
    pub start_hour: u32,
    #[serde(default = "default_chronos_end")]
    pub end_hour: u32,
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,
    #[serde(default)]
    pub instant: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_chronos_start() -> u32 {
    9
}
fn default_chronos_end() -> u32 {
    23
}
fn default_step_minutes() -> u32 {
    20
}
fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}
fn default_mode() -> String {
    "dynamic".to_string()
}

impl Default for ChronosConfig {
    fn default() -> Self {
        Self {
            start_hour: default_chronos_start(),
            end_hour: default_chronos_end(),
            step_minutes: default_step_minutes(),
            instant: false,
            timezone: default_timezone(),
            mode: default_mode(),
        }
    }
}

impl ChronosConfig {
    pub fn mode(&self) -> ChronosMode {
        ChronosMode::parse(&self.mode)
    }

    pub fn grid(&self) -> Result<Grid> {
        let tz: chrono_tz::Tz = self
            .timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown timezone: {}", self.timezone))?;
        Ok(Grid {
            start_hour: self.start_hour,
            end_hour: self.end_hour,
            step_minutes: self.step_minutes,
            tz,
            instant: self.instant,
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MediaToolConfig {
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}
fn default_scratch_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

impl Default for MediaToolConfig {
    fn default() -> Self {
        Self {
            ffprobe_bin: default_ffprobe_bin(),
            ffmpeg_bin: default_ffmpeg_bin(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            mnemosyne: MnemosyneConfig::default(),
            chronos: ChronosConfig::default(),
            media_tool: MediaToolConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("failed to read config file")?;
        let config: Config = toml::from_str(&content).context("failed to parse config file")?;
        Ok(config)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            sync_timeout: std::time::Duration::from_secs(self.mnemosyne.sync_timeout_secs),
            image: self.mnemosyne.image.clone().into(),
        }
    }

    pub fn video_config(&self) -> VideoPipelineConfig {
        self.mnemosyne.video.clone().apply(VideoPipelineConfig::default())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        PathBuf::from(&self.media_tool.scratch_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_into_a_valid_grid() {
        let cfg = Config::default();
        let grid = cfg.chronos.grid().unwrap();
        assert_eq!(grid.start_hour, 9);
        assert_eq!(grid.end_hour, 23);
    }
}
