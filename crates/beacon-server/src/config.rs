use serde::Deserialize;

/// Top-level server configuration, loaded from `beacon.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub listen_addr: String,
    /// Allowed CORS origins for the HTTP API. Empty = allow any.
    pub cors_allowed_origins: Vec<String>,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub timing: TimingConfig,
    /// Rooms pre-created at startup.
    pub rooms: Vec<DefaultRoom>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            cors_allowed_origins: Vec::new(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            timing: TimingConfig::default(),
            rooms: default_rooms(),
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Bearer string required from connecting clients and API callers.
    /// None = auth disabled.
    pub bearer_token: Option<String>,
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Per-client outbound message buffer (frames).
    pub client_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
    /// Maximum chat message body length in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            client_buffer: 256,
            ws_rate_limit_per_sec: 50.0,
            max_body_bytes: 1024,
        }
    }
}

/// Lifecycle timing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long a constrained client's membership survives a transport loss.
    pub grace_period_ms: u64,
    pub heartbeat_secs: u64,
    /// Constrained clients are probed more often.
    pub constrained_heartbeat_secs: u64,
    /// Most recent messages sent in the first history batch to constrained clients.
    pub constrained_history_batch: usize,
    /// Delay before the older remainder follows.
    pub history_tail_delay_ms: u64,
    /// Messages resent when a client returns to the foreground.
    pub recovery_history: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 15_000,
            heartbeat_secs: 30,
            constrained_heartbeat_secs: 15,
            constrained_history_batch: 15,
            history_tail_delay_ms: 1_000,
            recovery_history: 20,
        }
    }
}

impl TimingConfig {
    pub fn grace_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.grace_period_ms)
    }

    pub fn heartbeat_interval(
        &self,
        class: beacon_core::client::ClientClass,
    ) -> std::time::Duration {
        let secs = match class {
            beacon_core::client::ClientClass::Standard => self.heartbeat_secs,
            beacon_core::client::ClientClass::Constrained => self.constrained_heartbeat_secs,
        };
        std::time::Duration::from_secs(secs)
    }
}

/// A room created at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultRoom {
    pub id: String,
    pub display_name: String,
    pub welcome: String,
}

fn default_rooms() -> Vec<DefaultRoom> {
    vec![
        DefaultRoom {
            id: "general".to_string(),
            display_name: "General Chat".to_string(),
            welcome: "Welcome to the General Chat!".to_string(),
        },
        DefaultRoom {
            id: "emergency".to_string(),
            display_name: "Emergency Coordination".to_string(),
            welcome: "This channel is for emergency coordination only.".to_string(),
        },
    ]
}

impl BeaconConfig {
    /// Validate configuration, logging errors and exiting on fatal issues.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file — use BEACON_API_TOKEN env var in production"
            );
        }

        if self.limits.max_ws_connections == 0 {
            tracing::error!("limits.max_ws_connections must be > 0");
            std::process::exit(1);
        }
        if self.limits.client_buffer == 0 {
            tracing::error!("limits.client_buffer must be > 0");
            std::process::exit(1);
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            tracing::error!("limits.ws_rate_limit_per_sec must be > 0");
            std::process::exit(1);
        }
        if self.limits.max_body_bytes == 0 {
            tracing::error!("limits.max_body_bytes must be > 0");
            std::process::exit(1);
        }

        if self.timing.grace_period_ms == 0 {
            tracing::error!("timing.grace_period_ms must be > 0");
            std::process::exit(1);
        }
        if self.timing.heartbeat_secs == 0 || self.timing.constrained_heartbeat_secs == 0 {
            tracing::error!("heartbeat intervals must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `beacon.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("beacon.toml") {
            Ok(content) => match toml::from_str::<BeaconConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from beacon.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse beacon.toml: {e}, using defaults");
                    BeaconConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No beacon.toml found, using defaults");
                BeaconConfig::default()
            },
        };

        // Environment variable overrides
        if let Ok(addr) = std::env::var("BEACON_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(token) = std::env::var("BEACON_API_TOKEN")
            && !token.is_empty()
        {
            config.auth.bearer_token = Some(token);
        }
        if let Ok(val) = std::env::var("BEACON_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("BEACON_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            config.limits.ws_rate_limit_per_sec = n;
        }
        if let Ok(val) = std::env::var("BEACON_GRACE_PERIOD_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.timing.grace_period_ms = n;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::client::ClientClass;

    #[test]
    fn default_config_values() {
        let cfg = BeaconConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert!(cfg.auth.bearer_token.is_none());
        assert_eq!(cfg.limits.max_ws_connections, 200);
        assert_eq!(cfg.timing.grace_period_ms, 15_000);
        assert_eq!(cfg.rooms.len(), 2);
        assert_eq!(cfg.rooms[0].id, "general");
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[auth]
bearer_token = "secret123"
"#;
        let cfg: BeaconConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.auth.bearer_token.as_deref(), Some("secret123"));
        // Untouched sections fall back to defaults
        assert_eq!(cfg.limits.client_buffer, 256);
    }

    #[test]
    fn parse_timing_and_rooms_toml() {
        let toml_str = r#"
[timing]
grace_period_ms = 5000
heartbeat_secs = 60
constrained_heartbeat_secs = 20

[[rooms]]
id = "ops"
display_name = "Operations"
welcome = "Ops only."
"#;
        let cfg: BeaconConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.timing.grace_period_ms, 5000);
        assert_eq!(cfg.timing.heartbeat_secs, 60);
        assert_eq!(cfg.rooms.len(), 1);
        assert_eq!(cfg.rooms[0].id, "ops");
    }

    #[test]
    fn heartbeat_interval_by_class() {
        let timing = TimingConfig::default();
        assert_eq!(
            timing.heartbeat_interval(ClientClass::Standard).as_secs(),
            30
        );
        assert_eq!(
            timing
                .heartbeat_interval(ClientClass::Constrained)
                .as_secs(),
            15
        );
    }

    #[test]
    fn validate_accepts_default_config() {
        let cfg = BeaconConfig::default();
        cfg.validate();
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = BeaconConfig {
            listen_addr: "not-an-address".to_string(),
            ..BeaconConfig::default()
        };
        // validate() calls process::exit, so we test the underlying check
        assert!(cfg.listen_addr.parse::<std::net::SocketAddr>().is_err());
    }
}
