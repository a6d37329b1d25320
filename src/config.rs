//! Gateway configuration file
//!
//! YAML, with `${ENV_VAR}` references expanded before parsing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tunnelgate_overlay::{RelayMap, RelayRegion};
use tunnelgate_proxy::ProxyConfig;
use tunnelgate_tunnel::DialerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP server binds
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub dial: DialConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Tag passed to the embedded relay server
    #[serde(default = "default_relay_tag")]
    pub tag: String,

    /// Relay regions handed to every overlay endpoint
    #[serde(default)]
    pub regions: Vec<RelayRegion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialConfig {
    #[serde(default = "default_reachable_timeout")]
    pub reachable_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long an unused agent connection stays open
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u64,

    /// How long shutdown waits for live sessions before cancelling them
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_relay_tag() -> String {
    "internal".to_string()
}

fn default_reachable_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_heartbeat() -> u64 {
    15
}

fn default_drain_timeout() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            relay: RelayConfig::default(),
            dial: DialConfig::default(),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tag: default_relay_tag(),
            regions: Vec::new(),
        }
    }
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            reachable_timeout_seconds: default_reachable_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: default_heartbeat(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse config from a YAML string
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: GatewayConfig =
            serde_yaml::from_str(&expanded).context("Failed to parse YAML config")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.relay.tag.trim().is_empty() {
            anyhow::bail!("relay.tag must not be empty");
        }
        self.relay_map()?;

        let timeouts = [
            ("dial.reachable_timeout_seconds", self.dial.reachable_timeout_seconds),
            ("cache.idle_timeout_seconds", self.cache.idle_timeout_seconds),
            ("session.heartbeat_seconds", self.session.heartbeat_seconds),
            ("session.drain_timeout_seconds", self.session.drain_timeout_seconds),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        Ok(())
    }

    /// Relay regions as a map, rejecting duplicate or zero region ids
    pub fn relay_map(&self) -> Result<RelayMap> {
        RelayMap::from_regions(self.relay.regions.iter().cloned())
            .context("Invalid relay regions")
    }

    pub fn dialer_config(&self) -> DialerConfig {
        DialerConfig {
            reachable_timeout: Duration::from_secs(self.dial.reachable_timeout_seconds),
            relay_tag: self.relay.tag.clone(),
            extra_region_dialers: Vec::new(),
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            heartbeat_interval: Duration::from_secs(self.session.heartbeat_seconds),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.cache.idle_timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.session.drain_timeout_seconds)
    }

    /// Generate a template config file content
    pub fn template() -> String {
        r#"# Tunnelgate Configuration

listen: "127.0.0.1:3000"

relay:
  tag: internal
  regions:
    - region_id: 999
      region_code: gateway
      region_name: Embedded relay
      embedded_relay: true
    # - region_id: 1
    #   region_code: nyc
    #   region_name: New York
    #   nodes:
    #     - name: 1a
    #       host_name: "${RELAY_HOST}"
    #       relay_port: 443

dial:
  reachable_timeout_seconds: 30

cache:
  idle_timeout_seconds: 300

session:
  heartbeat_seconds: 15
  drain_timeout_seconds: 10
"#
        .to_string()
    }
}

/// Expand environment variables in a string
///
/// Supports `${VAR}` syntax. Unset variables expand to an empty string.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").context("Invalid env var pattern")?;
    let expanded = re.replace_all(input, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    });
    Ok(expanded.into_owned())
}
