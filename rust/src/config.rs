use std::path::Path;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "parley_config.json";

/// A sliding-window quota: at most `max` hits per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub max: usize,
    pub window_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub message: RateWindow,
    pub friend_request: RateWindow,
    pub search: RateWindow,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message: RateWindow {
                max: 30,
                window_ms: 60_000,
            },
            friend_request: RateWindow {
                max: 20,
                window_ms: 3_600_000,
            },
            search: RateWindow {
                max: 10,
                window_ms: 60_000,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub friend_page_limit: usize,
    pub message_page_limit: usize,
    pub friend_debounce_ms: i64,
    pub freshness_ttl_ms: i64,
    pub typing_idle_ms: i64,
    // Readers must tolerate a full idle interval between heartbeats.
    pub typing_stale_ms: i64,
    pub send_cooldown_ms: i64,
    pub rate_limits: RateLimitConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            friend_page_limit: 20,
            message_page_limit: 30,
            friend_debounce_ms: 700,
            freshness_ttl_ms: 5 * 60 * 1000,
            typing_idle_ms: 5_000,
            typing_stale_ms: 6_000,
            send_cooldown_ms: 2_000,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Fixes combinations that would make the sync components misbehave.
    pub fn normalized(mut self) -> Self {
        if self.typing_stale_ms <= self.typing_idle_ms {
            let corrected = self.typing_idle_ms + 1_000;
            tracing::warn!(
                typing_idle_ms = self.typing_idle_ms,
                typing_stale_ms = self.typing_stale_ms,
                corrected,
                "typing stale window must exceed the idle window"
            );
            self.typing_stale_ms = corrected;
        }
        if self.friend_page_limit == 0 {
            self.friend_page_limit = Self::default().friend_page_limit;
        }
        if self.message_page_limit == 0 {
            self.message_page_limit = Self::default().message_page_limit;
        }
        self
    }
}

/// Loads `<data_dir>/parley_config.json`, falling back to defaults when the
/// file is missing or unreadable.
pub fn load_config(data_dir: &str) -> SyncConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return SyncConfig::default();
    };
    match serde_json::from_slice::<SyncConfig>(&bytes) {
        Ok(config) => config.normalized(),
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "ignoring malformed config");
            SyncConfig::default()
        }
    }
}

/// The default config payload, pretty-printed.
pub fn default_config_json() -> String {
    serde_json::to_string_pretty(&SyncConfig::default()).unwrap_or_else(|_| "{}".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_other_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"message_page_limit": 10}"#).unwrap();
        assert_eq!(cfg.message_page_limit, 10);
        assert_eq!(cfg.friend_page_limit, 20);
        assert_eq!(cfg.rate_limits.message.max, 30);
    }

    #[test]
    fn stale_window_is_forced_past_idle_window() {
        let cfg = SyncConfig {
            typing_idle_ms: 5_000,
            typing_stale_ms: 4_000,
            ..SyncConfig::default()
        }
        .normalized();
        assert_eq!(cfg.typing_stale_ms, 6_000);
    }

    #[test]
    fn default_json_round_trips() {
        let parsed: SyncConfig = serde_json::from_str(&default_config_json()).unwrap();
        assert_eq!(parsed, SyncConfig::default());
    }
}
