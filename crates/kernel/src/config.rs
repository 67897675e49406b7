// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of CoordSpace.
//
// CoordSpace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// CoordSpace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with CoordSpace. If not, see <https://www.gnu.org/licenses/>.

//! Kernel configuration
//!
//! ## Configuration Hierarchy
//! 1. **CODE**: explicit `KernelConfig` passed to [`crate::Kernel::start`] (highest priority)
//! 2. **ENV**: `COORDSPACE_*` environment variables
//! 3. **FILE**: YAML, TOML or JSON file named by `COORDSPACE_CONFIG`
//! 4. **DEFAULT**: [`KernelConfig::default`] (lowest priority)
//!
//! ## Environment Variables
//! - `COORDSPACE_LOCAL_ID`: owner id of this process (default: 1)
//! - `COORDSPACE_COMPONENT_NAME`: name published as `kernel.name` (default: "coordspace")
//! - `COORDSPACE_TICK_HZ`: dispatch loop frequency (default: 100)
//! - `COORDSPACE_BLOCKING_TIMEOUT_MS`: default bound for blocking reads (default: unbounded)
//! - `COORDSPACE_INSERT_ACK_TIMEOUT_MS`: bound for acknowledged remote writes (default: 5000)
//! - `COORDSPACE_CASE_INSENSITIVE_PAYLOAD`: compare payloads ignoring ASCII case (default: true)
//! - `COORDSPACE_ALLOW_REMOTE_WRITES`: forward writes of foreign tuples to their owner (default: true)
//! - `COORDSPACE_PUBLISH_ALL_KEYS`: maintain `kernel.all-keys` (default: true)
//! - `COORDSPACE_CONNECT`: comma-separated urls to connect at start
//! - `COORDSPACE_AUTO_CONNECT`: comma-separated urls to keep connected
//!
//! ## Example file
//! ```yaml
//! local_id: 42
//! component_name: arm-controller
//! tick_hz: 50
//! blocking_timeout_ms: 2000
//! connect:
//!   - tcp://10.0.0.2:8000
//! ```

use crate::error::{KernelError, KernelResult};
use coordspace_tuplespace::{Matcher, OwnerId, PayloadCase};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming a configuration file.
pub const CONFIG_FILE_ENV: &str = "COORDSPACE_CONFIG";

const ENV_PREFIX: &str = "COORDSPACE_";

/// Kernel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Owner id of this process
    pub local_id: OwnerId,
    /// Component name published as `kernel.name`
    pub component_name: String,
    /// Dispatch loop frequency in Hz
    pub tick_hz: u32,
    /// Default bound for blocking reads; `None` waits forever
    pub blocking_timeout_ms: Option<u64>,
    /// Bound for acknowledged remote writes
    pub insert_ack_timeout_ms: u64,
    /// Compare payloads ignoring ASCII case
    pub case_insensitive_payload: bool,
    /// Forward writes of foreign-owned tuples to their owner
    pub allow_remote_writes: bool,
    /// Maintain the `kernel.all-keys` tuple
    pub publish_all_keys: bool,
    /// Urls to connect once at start
    pub connect: Vec<String>,
    /// Urls the transport keeps connected
    pub auto_connect: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            local_id: 1,
            component_name: "coordspace".to_string(),
            tick_hz: 100,
            blocking_timeout_ms: None,
            insert_ack_timeout_ms: 5_000,
            case_insensitive_payload: true,
            allow_remote_writes: true,
            publish_all_keys: true,
            connect: Vec::new(),
            auto_connect: Vec::new(),
        }
    }
}

impl KernelConfig {
    /// Defaults overlaid with `COORDSPACE_*` environment variables.
    pub fn from_env() -> KernelResult<Self> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Load a YAML, TOML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config: KernelConfig = match extension.as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| KernelError::InvalidConfiguration(format!("YAML: {}", e)))?,
            Some("toml") => toml::from_str(&content)
                .map_err(|e| KernelError::InvalidConfiguration(format!("TOML: {}", e)))?,
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| KernelError::InvalidConfiguration(format!("JSON: {}", e)))?,
            _ => {
                return Err(KernelError::InvalidConfiguration(format!(
                    "unsupported config file: {}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// File named by `COORDSPACE_CONFIG` (if set) overlaid with the
    /// environment, falling back to defaults on any error.
    pub fn from_env_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            warn!(error = %e, "invalid kernel configuration, using defaults");
            Self::default()
        })
    }

    /// File named by `COORDSPACE_CONFIG` (if set) overlaid with the environment.
    pub fn load() -> KernelResult<Self> {
        let base = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        base.overlay(|name| std::env::var(name).ok())
    }

    /// Apply variables found through `lookup` on top of this configuration.
    pub fn overlay<F>(mut self, lookup: F) -> KernelResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        if let Some(v) = parse_var(&var, "LOCAL_ID")? {
            self.local_id = v;
        }
        if let Some(v) = var("COMPONENT_NAME") {
            self.component_name = v;
        }
        if let Some(v) = parse_var(&var, "TICK_HZ")? {
            self.tick_hz = v;
        }
        if let Some(v) = parse_var(&var, "BLOCKING_TIMEOUT_MS")? {
            self.blocking_timeout_ms = Some(v);
        }
        if let Some(v) = parse_var(&var, "INSERT_ACK_TIMEOUT_MS")? {
            self.insert_ack_timeout_ms = v;
        }
        if let Some(v) = parse_var(&var, "CASE_INSENSITIVE_PAYLOAD")? {
            self.case_insensitive_payload = v;
        }
        if let Some(v) = parse_var(&var, "ALLOW_REMOTE_WRITES")? {
            self.allow_remote_writes = v;
        }
        if let Some(v) = parse_var(&var, "PUBLISH_ALL_KEYS")? {
            self.publish_all_keys = v;
        }
        if let Some(v) = var("CONNECT") {
            self.connect = split_list(&v);
        }
        if let Some(v) = var("AUTO_CONNECT") {
            self.auto_connect = split_list(&v);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the kernel cannot run with.
    pub fn validate(&self) -> KernelResult<()> {
        if self.tick_hz == 0 || self.tick_hz > 10_000 {
            return Err(KernelError::InvalidConfiguration(format!(
                "tick_hz must be between 1 and 10000, got {}",
                self.tick_hz
            )));
        }
        if self.component_name.trim().is_empty() {
            return Err(KernelError::InvalidConfiguration(
                "component_name must not be empty".to_string(),
            ));
        }
        if self.insert_ack_timeout_ms == 0 {
            return Err(KernelError::InvalidConfiguration(
                "insert_ack_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Period of one dispatch loop tick.
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_hz.max(1)))
    }

    /// Default bound for blocking reads.
    pub fn blocking_timeout(&self) -> Option<Duration> {
        self.blocking_timeout_ms.map(Duration::from_millis)
    }

    /// Bound for acknowledged remote writes.
    pub fn insert_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.insert_ack_timeout_ms)
    }

    /// Matcher implementing the configured payload policy.
    pub fn matcher(&self) -> Matcher {
        Matcher::new(if self.case_insensitive_payload {
            PayloadCase::Insensitive
        } else {
            PayloadCase::Sensitive
        })
    }

    /// Set the owner id.
    pub fn with_local_id(mut self, local_id: OwnerId) -> Self {
        self.local_id = local_id;
        self
    }

    /// Set the component name.
    pub fn with_component_name(mut self, name: &str) -> Self {
        self.component_name = name.to_string();
        self
    }
}

fn parse_var<T, F>(var: &F, suffix: &str) -> KernelResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(suffix) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            KernelError::InvalidConfiguration(format!("{}{}={}: {}", ENV_PREFIX, suffix, raw, e))
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
