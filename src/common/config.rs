// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

static CONFIG: OnceLock<EngineConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hash_join_threshold_mb() -> u64 {
    128
}

fn default_max_table_size_mb() -> u64 {
    128
}

fn default_bloom_filter_bits() -> u64 {
    33_554_432
}

fn default_chunk_size() -> u64 {
    1_000_000
}

/// Engine-level defaults consumed by per-operator `Settings` when the
/// corresponding `key=value` parameter is absent.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Byte threshold is derived as `hash_join_threshold_mb * MiB`.
    #[serde(default = "default_hash_join_threshold_mb")]
    pub hash_join_threshold_mb: u64,

    /// Memory ceiling for the join hash table, in MiB. Also drives the
    /// bucket-count tier.
    #[serde(default = "default_max_table_size_mb")]
    pub max_table_size_mb: u64,

    #[serde(default = "default_bloom_filter_bits")]
    pub bloom_filter_bits: u64,

    /// Output chunk size along the `value_no` dimension.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            hash_join_threshold_mb: default_hash_join_threshold_mb(),
            max_table_size_mb: default_max_table_size_mb(),
            bloom_filter_bits: default_bloom_filter_bits(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: EngineConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn hash_join_threshold_bytes(&self) -> u64 {
        self.hash_join_threshold_mb * 1024 * 1024
    }
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static EngineConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = EngineConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

/// Resolve the global config: `$ARRAYJOIN_CONFIG`, then `./arrayjoin.toml`,
/// then built-in defaults.
pub fn config() -> &'static EngineConfig {
    if let Some(cfg) = CONFIG.get() {
        return cfg;
    }
    let cfg = config_path_from_env_or_default()
        .and_then(|p| EngineConfig::load_from_file(&p))
        .unwrap_or_default();
    let _ = CONFIG.set(cfg);
    CONFIG.get().expect("CONFIG set")
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("ARRAYJOIN_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let candidate = PathBuf::from("arrayjoin.toml");
    if candidate.exists() {
        return Ok(candidate);
    }
    Err(anyhow::anyhow!("no config file present"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.hash_join_threshold_bytes(), 128 * 1024 * 1024);
        assert_eq!(cfg.chunk_size, 1_000_000);
        assert!(cfg.bloom_filter_bits > 0);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: EngineConfig = toml::from_str("hash_join_threshold_mb = 4").expect("toml");
        assert_eq!(cfg.hash_join_threshold_mb, 4);
        assert_eq!(cfg.max_table_size_mb, 128);
    }
}
