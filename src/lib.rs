//! Core of a moderated content-suggestion pipeline: perceptual near-
//! duplicate detection (`mnemosyne`) and fairness-aware publication
//! scheduling (`chronos`). The chat front-end, keyboards, and outbound
//! formatting are external collaborators, contracted only through the
//! trait boundaries in `store`, `notify`, and `mnemosyne::{transport,
//! media_tool, image_pipeline::CandidateImageSource}`.

pub mod chronos;
pub mod config;
pub mod errors;
pub mod mnemosyne;
pub mod notify;
pub mod settings;
pub mod store;
