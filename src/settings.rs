//! Typed accessors over the persisted key-value settings: `chronos_*`,
//! `bot_paused`, `super_admins`, `chronos_last_plan`.

use std::sync::Arc;

use crate::errors::StoreError;
use crate::store::PostStore;

pub const KEY_CHRONOS_START: &str = "chronos_start";
pub const KEY_CHRONOS_END: &str = "chronos_end";
pub const KEY_CHRONOS_STEP_MINUTES: &str = "chronos_step_minutes";
pub const KEY_CHRONOS_INSTANT: &str = "chronos_instant";
pub const KEY_CHRONOS_MODE: &str = "chronos_mode";
pub const KEY_CHRONOS_LAST_PLAN: &str = "chronos_last_plan";
pub const KEY_BOT_PAUSED: &str = "bot_paused";
pub const KEY_SUPER_ADMINS: &str = "super_admins";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChronosMode {
    Static,
    Dynamic,
}

impl ChronosMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "static" => ChronosMode::Static,
            _ => ChronosMode::Dynamic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChronosMode::Static => "static",
            ChronosMode::Dynamic => "dynamic",
        }
    }
}

/// Thin typed wrapper over the store's settings map, with defaults supplied
/// by the static `Config` when a key has never been written.
pub struct Settings {
    store: Arc<dyn PostStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn PostStore>) -> Self {
        Self { store }
    }

    pub async fn bool_or(&self, key: &str, default: bool) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_setting(key)
            .await?
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(default))
    }

    pub async fn int_or(&self, key: &str, default: i64) -> Result<i64, StoreError> {
        Ok(self
            .store
            .get_setting(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.store
            .set_setting(key, if value { "1" } else { "0" })
            .await
    }

    pub async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.store.set_setting(key, &value.to_string()).await
    }

    pub async fn bot_paused(&self) -> Result<bool, StoreError> {
        self.bool_or(KEY_BOT_PAUSED, false).await
    }

    pub async fn chronos_mode(&self, default: ChronosMode) -> Result<ChronosMode, StoreError> {
        Ok(self
            .store
            .get_setting(KEY_CHRONOS_MODE)
            .await?
            .map(|v| ChronosMode::parse(&v))
            .unwrap_or(default))
    }

    pub async fn super_admins(&self) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .store
            .get_setting(KEY_SUPER_ADMINS)
            .await?
            .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
            .unwrap_or_default())
    }
}
