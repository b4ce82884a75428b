//! Persistent application configuration model and defaults.

/// Root configuration persisted to `tunelink.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Presence service identity and payload options.
    pub presence: PresenceConfig,
    #[serde(default)]
    /// Poll cadence and player reconnect behavior.
    pub bridge: BridgeConfig,
    #[serde(default)]
    /// Shell preferences, round-tripped for external front-ends.
    pub ui: UiConfig,
}

/// Presence service identity and payload options.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PresenceConfig {
    /// Application identifier registered with the presence service.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Render the search action buttons under the presence card.
    #[serde(default = "default_true")]
    pub show_buttons: bool,
}

/// Poll cadence and player reconnect behavior.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BridgeConfig {
    /// Seconds between player polls. Clamped to 5..=15 by `sanitize_config`;
    /// the presence protocol tolerates at most one update per ~15s, which the
    /// push-on-change policy keeps us far under.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds between player connect attempts while searching.
    #[serde(default = "default_player_search_backoff_secs")]
    pub player_search_backoff_secs: u64,
    /// Issue the start command automatically on launch.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// Shell preferences. The headless runtime never reads these; they are kept
/// in the document so a tray/GUI front-end finds them in place.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UiConfig {
    #[serde(default = "default_true")]
    pub start_minimized: bool,
    #[serde(default = "default_true")]
    pub minimize_to_tray: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            show_buttons: true,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            player_search_backoff_secs: default_player_search_backoff_secs(),
            auto_connect: true,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            start_minimized: true,
            minimize_to_tray: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_client_id() -> String {
    "1462375131782447321".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_player_search_backoff_secs() -> u64 {
    3
}
