//! Configuration management for the transaction client
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::tx::SignatureScheme;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub gas_station: GasStationConfig,
}

/// JSON-RPC node connection
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub rpc_url: String,
    #[serde(default = "default_node_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Client behaviour shared by every bound contract
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Chain identifier used for EIP-155 signatures
    pub chain_id: u64,
    /// Upper bound for account listing calls
    pub account_sync_timeout_secs: u64,
    /// Defaults to EIP-155, unlike the fixed Homestead signer this client replaces
    pub signature_scheme: SchemeKind,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchemeKind {
    Homestead,
    Eip155,
}

/// Gas price oracle polling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasStationConfig {
    pub endpoint_url: String,
    pub refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
}

fn default_node_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            account_sync_timeout_secs: 30,
            signature_scheme: SchemeKind::Eip155,
        }
    }
}

impl ClientConfig {
    pub fn account_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.account_sync_timeout_secs)
    }

    /// Scheme every transaction from this client is signed with
    pub fn signature_scheme(&self) -> SignatureScheme {
        match self.signature_scheme {
            SchemeKind::Homestead => SignatureScheme::Homestead,
            SchemeKind::Eip155 => SignatureScheme::Eip155 {
                chain_id: self.chain_id,
            },
        }
    }
}

impl Default for GasStationConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://ethgasstation.info/json/ethgasAPI.json".to_string(),
            refresh_interval_ms: 60_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl GasStationConfig {
    /// Sub-millisecond intervals round up to 1 ms; only zero stays zero
    pub fn new(endpoint_url: impl Into<String>, refresh_interval: Duration) -> Self {
        let millis = refresh_interval.as_nanos().div_ceil(1_000_000);
        Self {
            endpoint_url: endpoint_url.into(),
            refresh_interval_ms: u64::try_from(millis).unwrap_or(u64::MAX),
            ..Default::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl NodeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Settings {
    /// Load settings from the file named by `TXCLIENT_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXCLIENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.node.rpc_url.trim().is_empty() {
            anyhow::bail!("Node RPC URL must be configured");
        }

        reqwest::Url::parse(&self.gas_station.endpoint_url).with_context(|| {
            format!(
                "Invalid gas station endpoint: {}",
                self.gas_station.endpoint_url
            )
        })?;

        if self.gas_station.refresh_interval_ms == 0 {
            anyhow::bail!("Gas station refresh interval must be positive");
        }

        if self.client.signature_scheme == SchemeKind::Homestead {
            tracing::warn!("Homestead signatures carry no replay protection");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
