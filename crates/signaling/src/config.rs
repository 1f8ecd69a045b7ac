//! Configuration types for the signaling coordinator

use serde::{Deserialize, Serialize};

use crate::signaling::reconnect::ReconnectPolicy;

/// Public reflection endpoints used when no relay credentials can be fetched
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Main configuration for a [`crate::SignalingCoordinator`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket signaling endpoint (ws:// or wss://), e.g. `wss://host/api/signal`
    pub signaling_url: String,

    /// Query parameter carrying the session token (default: `token`)
    pub token_query_param: String,

    /// HTTP endpoint returning relay credentials (optional)
    ///
    /// When unset, or when the fetch fails, `fallback_stun_servers` is used.
    pub relay_credentials_url: Option<String>,

    /// Reflection-only endpoints used when relay credentials are unavailable
    pub fallback_stun_servers: Vec<String>,

    /// Keepalive interval while the channel is open (default: 20000ms)
    pub keepalive_interval_ms: u64,

    /// Quality sampling interval (default: 3000ms)
    pub quality_interval_ms: u64,

    /// ICE candidate pool size for new peer links (default: 10)
    pub ice_candidate_pool_size: u8,

    /// Channel reconnection policy (default: fixed 3000ms, unbounded)
    pub reconnect: ReconnectPolicy,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/api/signal".to_string(),
            token_query_param: "token".to_string(),
            relay_credentials_url: None,
            fallback_stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            keepalive_interval_ms: 20_000,
            quality_interval_ms: 3_000,
            ice_candidate_pool_size: 10,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SignalingConfig {
    /// Create a configuration with defaults for everything but the endpoint
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `relay_credentials_url` is set but not an http(s) URL
    /// - `fallback_stun_servers` is empty
    /// - `token_query_param` is empty
    /// - either interval is zero
    /// - the reconnect policy is inconsistent
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        let parsed = url::Url::parse(&self.signaling_url).map_err(|e| {
            Error::InvalidConfig(format!(
                "signaling_url is not a valid URL ({}): {}",
                e, self.signaling_url
            ))
        })?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if let Some(relay) = &self.relay_credentials_url {
            let parsed = url::Url::parse(relay).map_err(|e| {
                Error::InvalidConfig(format!("relay_credentials_url is not a valid URL: {}", e))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(Error::InvalidConfig(format!(
                    "relay_credentials_url must be http:// or https://, got {}",
                    relay
                )));
            }
        }

        if self.fallback_stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one fallback STUN server is required".to_string(),
            ));
        }

        if self.token_query_param.is_empty() {
            return Err(Error::InvalidConfig(
                "token_query_param must not be empty".to_string(),
            ));
        }

        if self.keepalive_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "keepalive_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.quality_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "quality_interval_ms must be greater than zero".to_string(),
            ));
        }

        self.reconnect.validate()
    }

    /// Create a configuration preset with hardened reconnection
    ///
    /// Settings:
    /// - Reconnect: jittered exponential backoff, 500ms to 30s, 10 attempts
    /// - Everything else: defaults
    ///
    /// # Example
    ///
    /// ```
    /// use peercall_signaling::config::SignalingConfig;
    ///
    /// let config = SignalingConfig::hardened_preset("wss://example.com/api/signal");
    /// assert_eq!(config.reconnect.max_attempts, Some(10));
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn hardened_preset(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            reconnect: ReconnectPolicy::hardened(),
            ..Default::default()
        }
    }

    /// Fetch relay credentials from this endpoint before creating peer links
    pub fn with_relay_credentials_url(mut self, url: impl Into<String>) -> Self {
        self.relay_credentials_url = Some(url.into());
        self
    }

    /// Replace the reconnection policy
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Override keepalive and quality sampling intervals
    pub fn with_intervals(mut self, keepalive_ms: u64, quality_ms: u64) -> Self {
        self.keepalive_interval_ms = keepalive_ms;
        self.quality_interval_ms = quality_ms;
        self
    }

    /// Build the channel URL for a given session token
    ///
    /// The token is appended as a query parameter, preserving any query the
    /// configured URL already carries.
    pub fn channel_url(&self, token: &str) -> crate::Result<url::Url> {
        let mut url = url::Url::parse(&self.signaling_url)
            .map_err(|e| crate::Error::InvalidConfig(format!("signaling_url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair(&self.token_query_param, token);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SignalingConfig::default();
        assert_eq!(config.keepalive_interval_ms, 20_000);
        assert_eq!(config.quality_interval_ms, 3_000);
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert_eq!(config.token_query_param, "token");
        assert_eq!(config.fallback_stun_servers.len(), 2);
        assert_eq!(config.reconnect.initial_delay_ms, 3_000);
        assert_eq!(config.reconnect.max_attempts, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_signaling_url() {
        let config = SignalingConfig::new("http://localhost:8080/api/signal");
        assert!(config.validate().is_err());

        let config = SignalingConfig::new("not a url");
        assert!(config.validate().is_err());

        let config = SignalingConfig::new("wss://example.com/api/signal");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_relay_url() {
        let config = SignalingConfig::default().with_relay_credentials_url("ftp://example.com/turn");
        assert!(config.validate().is_err());

        let config =
            SignalingConfig::default().with_relay_credentials_url("https://example.com/api/turn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_intervals() {
        let config = SignalingConfig::default().with_intervals(0, 3_000);
        assert!(config.validate().is_err());

        let config = SignalingConfig::default().with_intervals(20_000, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_fallback_required() {
        let mut config = SignalingConfig::default();
        config.fallback_stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_url_appends_token() {
        let config = SignalingConfig::new("wss://example.com/rooms/api/signal");
        let url = config.channel_url("abc def").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.com/rooms/api/signal?token=abc+def"
        );

        let config = SignalingConfig::new("ws://localhost:9000/api/signal?room=7");
        let url = config.channel_url("t").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:9000/api/signal?room=7&token=t");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SignalingConfig =
            serde_json::from_str(r#"{"signaling_url":"wss://example.com/api/signal"}"#).unwrap();
        assert_eq!(config.signaling_url, "wss://example.com/api/signal");
        assert_eq!(config.keepalive_interval_ms, 20_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hardened_preset() {
        let config = SignalingConfig::hardened_preset("ws://localhost:8080/api/signal");
        assert!(config.reconnect.jitter);
        assert!(config.validate().is_ok());
    }
}
