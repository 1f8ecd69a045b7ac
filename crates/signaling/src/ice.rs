//! Relay/reflection endpoints for new peer links
//!
//! Relay (TURN) credentials are short-lived and issued by the application
//! backend. [`RelayCredentialClient`] fetches them with the session token and
//! falls back to public STUN servers when the fetch fails for any reason.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::identity::SessionIdentity;
use crate::{Error, Result};

/// One ICE server entry handed to the peer link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// `stun:`, `turn:` or `turns:` URLs sharing the same credentials
    pub urls: Vec<String>,
    /// Username for relay authentication
    pub username: Option<String>,
    /// Credential (password) for relay authentication
    pub credential: Option<String>,
}

impl IceServer {
    /// Unauthenticated reflection endpoint(s)
    pub fn stun(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }

    /// Authenticated relay endpoint(s)
    pub fn turn(urls: Vec<String>, username: String, credential: String) -> Self {
        Self {
            urls,
            username: Some(username),
            credential: Some(credential),
        }
    }

    /// Whether this entry carries relay credentials
    pub fn is_relay(&self) -> bool {
        self.username.is_some()
    }
}

/// Response body of the relay credential endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RelayCredentials {
    /// Time-limited relay username (`<expiry>:<user>`)
    pub username: Option<String>,
    /// HMAC-derived relay password
    pub password: Option<String>,
    /// Credential lifetime in seconds
    #[serde(default)]
    pub ttl: u64,
    /// Endpoint URIs (`turn:`, `turns:`, `stun:`)
    #[serde(default)]
    pub uris: Vec<String>,
}

impl RelayCredentials {
    /// Split the URIs into one authenticated relay entry and one reflection entry
    ///
    /// # Errors
    ///
    /// Returns an error when relay URIs are listed without a username and
    /// password, or when no usable URI is present at all.
    pub fn into_ice_servers(self) -> Result<Vec<IceServer>> {
        let (relay, reflect): (Vec<String>, Vec<String>) = self
            .uris
            .into_iter()
            .filter(|uri| uri.starts_with("turn:") || uri.starts_with("turns:") || uri.starts_with("stun:"))
            .partition(|uri| !uri.starts_with("stun:"));

        let mut servers = Vec::with_capacity(2);
        if !relay.is_empty() {
            match (self.username, self.password) {
                (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                    servers.push(IceServer::turn(relay, username, password));
                }
                _ => {
                    return Err(Error::RelayCredentialsError(
                        "relay URIs returned without username/password".to_string(),
                    ))
                }
            }
        }
        if !reflect.is_empty() {
            servers.push(IceServer::stun(reflect));
        }

        if servers.is_empty() {
            return Err(Error::RelayCredentialsError(
                "no usable ICE URIs in response".to_string(),
            ));
        }
        Ok(servers)
    }
}

/// Source of ICE servers for a new peer link
#[async_trait]
pub trait IceServerSource: Send + Sync {
    /// Resolve the ICE servers for `identity`; never fails, falls back instead
    async fn ice_servers(&self, identity: &SessionIdentity) -> Vec<IceServer>;
}

/// Fixed ICE server list
#[derive(Debug, Clone)]
pub struct StaticIceServers(pub Vec<IceServer>);

impl StaticIceServers {
    /// Reflection-only list built from STUN URLs
    pub fn from_stun_urls(urls: &[String]) -> Self {
        Self(vec![IceServer::stun(urls.to_vec())])
    }
}

#[async_trait]
impl IceServerSource for StaticIceServers {
    async fn ice_servers(&self, _identity: &SessionIdentity) -> Vec<IceServer> {
        self.0.clone()
    }
}

/// Fetches relay credentials over HTTP with the session token
pub struct RelayCredentialClient {
    /// Relay credential endpoint (e.g. "https://example.com/api/turn")
    endpoint: String,

    /// Used when the endpoint is unreachable or returns garbage
    fallback: Vec<IceServer>,

    /// Reqwest HTTP client
    client: reqwest::Client,
}

impl RelayCredentialClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, fallback_stun: &[String]) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                Error::RelayCredentialsError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoint: endpoint.into(),
            fallback: vec![IceServer::stun(fallback_stun.to_vec())],
            client,
        })
    }

    /// Fetch and convert relay credentials without falling back
    pub async fn fetch(&self, identity: &SessionIdentity) -> Result<Vec<IceServer>> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Authorization", format!("Bearer {}", identity.token()))
            .send()
            .await
            .map_err(|e| Error::RelayCredentialsError(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RelayCredentialsError(format!(
                "endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let credentials: RelayCredentials = response
            .json()
            .await
            .map_err(|e| Error::RelayCredentialsError(format!("malformed body: {}", e)))?;
        debug!(ttl = credentials.ttl, uris = credentials.uris.len(), "Relay credentials received");

        credentials.into_ice_servers()
    }
}

#[async_trait]
impl IceServerSource for RelayCredentialClient {
    async fn ice_servers(&self, identity: &SessionIdentity) -> Vec<IceServer> {
        match self.fetch(identity).await {
            Ok(servers) => {
                info!(
                    relays = servers.iter().filter(|s| s.is_relay()).count(),
                    "Using fetched ICE servers"
                );
                servers
            }
            Err(e) => {
                warn!("Relay credential fetch failed, using public STUN fallback: {}", e);
                self.fallback.clone()
            }
        }
    }
}
