//! Mnemosyne: perceptual near-duplicate detection for images, videos, and
//! albums.

pub mod image_pipeline;
pub mod math;
pub mod media_tool;
pub mod orb;
pub mod orchestrator;
pub mod transport;
pub mod video_pipeline;
