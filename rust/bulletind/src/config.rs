use crate::db;
use crate::years::SchoolYearConfig;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENGINE_CONFIG_KEY: &str = "engine.config";
pub const SCHOOL_YEAR_CONFIG_KEY: &str = "school_year.config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: 15,
            poll_interval_secs: 30,
            reconnect_attempts: 3,
            reconnect_base_delay_ms: 1000,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Overlays the fields present in `patch` on top of `self`.
    pub fn merged(&self, patch: &serde_json::Value) -> Result<Self, String> {
        let mut current = serde_json::to_value(self).map_err(|e| e.to_string())?;
        let (Some(obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) else {
            return Ok(self.clone());
        };
        for key in [
            "apiBaseUrl",
            "requestTimeoutSecs",
            "pollIntervalSecs",
            "reconnectAttempts",
            "reconnectBaseDelayMs",
        ] {
            if let Some(v) = patch_obj.get(key) {
                obj.insert(key.to_string(), v.clone());
            }
        }
        let mut merged: EngineConfig =
            serde_json::from_value(current).map_err(|e| format!("invalid engine config: {e}"))?;
        merged.api_base_url = merged
            .api_base_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if merged.reconnect_attempts == 0 {
            return Err("reconnectAttempts must be at least 1".to_string());
        }
        Ok(merged)
    }
}

pub fn load_engine_config(conn: &Connection) -> anyhow::Result<EngineConfig> {
    let Some(v) = db::settings_get_json(conn, ENGINE_CONFIG_KEY)? else {
        return Ok(EngineConfig::default());
    };
    match serde_json::from_value::<EngineConfig>(v) {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            log::warn!(
                "event=engine_config_ignored reason=invalid_stored_value error={}",
                e
            );
            Ok(EngineConfig::default())
        }
    }
}

pub fn save_engine_config(conn: &Connection, config: &EngineConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, ENGINE_CONFIG_KEY, &serde_json::to_value(config)?)
}

/// Falls back to the default calendar when nothing (or something unreadable)
/// is stored.
pub fn load_school_year_config(conn: &Connection) -> anyhow::Result<SchoolYearConfig> {
    let Some(v) = db::settings_get_json(conn, SCHOOL_YEAR_CONFIG_KEY)? else {
        return Ok(SchoolYearConfig::default());
    };
    match serde_json::from_value::<SchoolYearConfig>(v) {
        Ok(cfg) if cfg.validate().is_empty() => Ok(cfg),
        _ => {
            log::warn!("event=school_year_config_ignored reason=invalid_stored_value");
            Ok(SchoolYearConfig::default())
        }
    }
}

pub fn save_school_year_config(conn: &Connection, config: &SchoolYearConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, SCHOOL_YEAR_CONFIG_KEY, &serde_json::to_value(config)?)
}
