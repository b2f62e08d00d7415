//! Admin tool configuration.
//!
//! A TOML file with optional `[storage]`, `[archiving]` and `[policy]`
//! tables. Without a file, archiving settings come from the `QC_*`
//! environment variables and segments from `QC_SEGMENT_DIR`.

use anyhow::{bail, Context, Result};
use qc_02_block_archive::{ArchivingConfig, ArchivingSettings, SegmentStoreConfig};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CHANNEL: &str = "mychannel";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub channel: Option<String>,
    pub storage: Option<SegmentStoreConfig>,
    pub archiving: Option<ArchivingSettings>,
    pub policy: PolicySettings,
}

/// Signature policy used by `verify`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Hex-encoded Ed25519 public keys.
    pub trusted_keys: Vec<String>,
    pub threshold: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            trusted_keys: Vec::new(),
            threshold: 1,
        }
    }
}

impl AdminConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `--channel` wins over the file.
    pub fn channel(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| self.channel.clone())
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
    }

    pub fn archiving_config(&self) -> ArchivingConfig {
        match &self.archiving {
            Some(settings) => ArchivingConfig::from_settings(settings.clone()),
            None => ArchivingConfig::from_env(),
        }
    }

    pub fn store_config(&self) -> SegmentStoreConfig {
        match &self.storage {
            Some(storage) => storage.clone(),
            None => match std::env::var("QC_SEGMENT_DIR") {
                Ok(dir) => SegmentStoreConfig::new(dir),
                Err(_) => SegmentStoreConfig::default(),
            },
        }
    }

    pub fn trusted_keys(&self) -> Result<Vec<[u8; 32]>> {
        self.policy
            .trusted_keys
            .iter()
            .map(|encoded| {
                let bytes = hex::decode(encoded.trim_start_matches("0x"))
                    .with_context(|| format!("trusted key {encoded} is not hex"))?;
                match <[u8; 32]>::try_from(bytes.as_slice()) {
                    Ok(key) => Ok(key),
                    Err(_) => bail!("trusted key {encoded} is {} bytes, want 32", bytes.len()),
                }
            })
            .collect()
    }
}
