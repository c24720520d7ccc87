/**
 * config.rs
 * Allocator configuration (YAML format)
 *
 * Format:
 * ```yaml
 * startPort: 3000
 * endPort: 4000
 * cacheTtlMs: 300000
 * preferredPorts: [3000, 3001, 3002, 3003]
 * probeTimeoutMs: 100
 * host: 127.0.0.1
 * ```
 *
 * Every field is optional; missing fields take the defaults below.
 */

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::errors::AllocError;

pub const DEFAULT_START_PORT: u16 = 3000;
pub const DEFAULT_END_PORT: u16 = 4000;
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Allocator configuration. Immutable once handed to an engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AllocatorConfig {
    pub start_port: u16,
    pub end_port: u16,
    pub cache_ttl_ms: u64,
    /// Tried in list order before any scanning. Out-of-range entries are skipped.
    pub preferred_ports: Vec<u16>,
    /// Ceiling for a single bind probe
    pub probe_timeout_ms: u64,
    /// Address probes bind to
    pub host: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            start_port: DEFAULT_START_PORT,
            end_port: DEFAULT_END_PORT,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            preferred_ports: vec![3000, 3001, 3002, 3003],
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            host: DEFAULT_HOST.to_string(),
        }
    }
}

impl AllocatorConfig {
    /// Config covering `[start_port, end_port]` with no preferred ports
    pub fn with_range(start_port: u16, end_port: u16) -> Self {
        AllocatorConfig {
            start_port,
            end_port,
            preferred_ports: Vec::new(),
            ..Default::default()
        }
    }

    /// Load config from a YAML file
    ///
    /// # Errors
    /// - `FileNotFound` if the path does not exist
    /// - `ParseError` if the YAML is malformed
    /// - `InvalidConfig` if validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AllocError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(AllocError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(path)?;

        let config: AllocatorConfig = serde_yaml::from_str(&content).map_err(|e| {
            AllocError::ParseError(format!("Invalid allocator YAML: {}", e))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Save config to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AllocError> {
        let yaml = serde_yaml::to_string(self)?;

        fs::write(path.as_ref(), yaml)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), AllocError> {
        if self.start_port > self.end_port {
            return Err(AllocError::InvalidConfig(format!(
                "startPort {} is greater than endPort {}",
                self.start_port, self.end_port
            )));
        }

        if self.probe_timeout_ms == 0 {
            return Err(AllocError::InvalidConfig(
                "probeTimeoutMs must be greater than zero".to_string(),
            ));
        }

        self.host_addr()?;

        Ok(())
    }

    /// Parsed probe host
    pub fn host_addr(&self) -> Result<IpAddr, AllocError> {
        self.host.parse().map_err(|_| {
            AllocError::InvalidConfig(format!("host '{}' is not an IP address", self.host))
        })
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start_port && port <= self.end_port
    }

    /// Number of ports in the range (inclusive)
    pub fn port_count(&self) -> usize {
        (self.end_port as usize).saturating_sub(self.start_port as usize) + 1
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
