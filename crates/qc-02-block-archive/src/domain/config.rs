//! # Configuration
//!
//! Role and storage settings, read once at startup.
//!
//! ## Environment
//!
//! | Variable | Default |
//! |----------|---------|
//! | `QC_ARCHIVER_ENABLED` | `false` |
//! | `QC_ARCHIVING_CLIENT_ENABLED` | `false` |
//! | `QC_ARCHIVING_KEEP_BLOCKS` | `100` |
//! | `QC_ARCHIVING_MAX_CATCH_UP` | `16` |
//! | `QC_ARCHIVING_DELETE_LOCAL` | `true` |
//! | `QC_ARCHIVING_CHECK_INTERVAL_SECS` | unset (no periodic check) |
//! | `QC_ARCHIVE_REPOSITORY_URL` | `memory://` |
//! | `QC_ORG_ID` | `org1` |

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_KEEP_LATEST_BLOCKS: u64 = 100;
pub const DEFAULT_MAX_CATCH_UP_SEGMENTS: usize = 16;
/// Writer-to-coordinator hand-off bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// What this node does with finalized segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivingRole {
    /// Archiving disabled.
    #[default]
    None,
    /// Ships finalized segments to the remote repository.
    Archiver,
    /// Discards local segments the cluster reports as archived.
    Client,
}

impl ArchivingRole {
    /// Resolve the two startup flags. Both set is a misconfiguration and
    /// disables archiving entirely.
    #[must_use]
    pub fn from_flags(archiver_enabled: bool, client_enabled: bool) -> Self {
        match (archiver_enabled, client_enabled) {
            (true, true) => {
                warn!("[qc-02] Archiver and client roles both enabled; archiving disabled");
                Self::None
            }
            (true, false) => Self::Archiver,
            (false, true) => Self::Client,
            (false, false) => Self::None,
        }
    }

    #[must_use]
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }
}

/// Settings as written in a config file or environment, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivingSettings {
    pub archiver_enabled: bool,
    pub client_enabled: bool,
    pub keep_latest_blocks: u64,
    pub max_catch_up_segments: usize,
    pub queue_capacity: usize,
    pub delete_after_archive: bool,
    pub check_interval_secs: Option<u64>,
    pub repository_url: String,
    pub org_id: String,
}

impl Default for ArchivingSettings {
    fn default() -> Self {
        Self {
            archiver_enabled: false,
            client_enabled: false,
            keep_latest_blocks: DEFAULT_KEEP_LATEST_BLOCKS,
            max_catch_up_segments: DEFAULT_MAX_CATCH_UP_SEGMENTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delete_after_archive: true,
            check_interval_secs: None,
            repository_url: "memory://".to_string(),
            org_id: "org1".to_string(),
        }
    }
}

/// Validated archiving configuration.
///
/// Built once and handed to the coordinator by value; nothing changes it
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivingConfig {
    pub role: ArchivingRole,
    /// Blocks always kept locally behind the chain head.
    pub keep_latest_blocks: u64,
    /// Upper bound on segments archived by one trigger.
    pub max_catch_up_segments: usize,
    pub queue_capacity: usize,
    /// Archiver removes its local copy after a confirmed transfer.
    pub delete_after_archive: bool,
    pub check_interval: Option<Duration>,
    pub repository_url: String,
    /// Organization used to scope cluster notifications.
    pub org_id: String,
}

impl Default for ArchivingConfig {
    fn default() -> Self {
        Self::from_settings(ArchivingSettings::default())
    }
}

impl ArchivingConfig {
    /// Validate raw settings.
    #[must_use]
    pub fn from_settings(settings: ArchivingSettings) -> Self {
        Self {
            role: ArchivingRole::from_flags(settings.archiver_enabled, settings.client_enabled),
            keep_latest_blocks: settings.keep_latest_blocks,
            max_catch_up_segments: settings.max_catch_up_segments.max(1),
            queue_capacity: settings.queue_capacity.max(1),
            delete_after_archive: settings.delete_after_archive,
            check_interval: settings
                .check_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            repository_url: settings.repository_url,
            org_id: settings.org_id,
        }
    }

    /// Role flags plus keep count, everything else default.
    #[must_use]
    pub fn from_flags(archiver_enabled: bool, client_enabled: bool, keep_latest_blocks: u64) -> Self {
        Self::from_settings(ArchivingSettings {
            archiver_enabled,
            client_enabled,
            keep_latest_blocks,
            ..ArchivingSettings::default()
        })
    }

    /// Load from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = ArchivingSettings::default();
        Self::from_settings(ArchivingSettings {
            archiver_enabled: env_flag("QC_ARCHIVER_ENABLED").unwrap_or(false),
            client_enabled: env_flag("QC_ARCHIVING_CLIENT_ENABLED").unwrap_or(false),
            keep_latest_blocks: env::var("QC_ARCHIVING_KEEP_BLOCKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.keep_latest_blocks),
            max_catch_up_segments: env::var("QC_ARCHIVING_MAX_CATCH_UP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_catch_up_segments),
            queue_capacity: defaults.queue_capacity,
            delete_after_archive: env_flag("QC_ARCHIVING_DELETE_LOCAL")
                .unwrap_or(defaults.delete_after_archive),
            check_interval_secs: env::var("QC_ARCHIVING_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            repository_url: env::var("QC_ARCHIVE_REPOSITORY_URL")
                .unwrap_or_else(|_| defaults.repository_url.clone()),
            org_id: env::var("QC_ORG_ID").unwrap_or_else(|_| defaults.org_id.clone()),
        })
    }

    #[must_use]
    pub fn with_role(mut self, role: ArchivingRole) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_keep_latest_blocks(mut self, keep: u64) -> Self {
        self.keep_latest_blocks = keep;
        self
    }

    #[must_use]
    pub fn with_max_catch_up_segments(mut self, max: usize) -> Self {
        self.max_catch_up_segments = max.max(1);
        self
    }

    #[must_use]
    pub fn with_delete_after_archive(mut self, delete: bool) -> Self {
        self.delete_after_archive = delete;
        self
    }

    #[must_use]
    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = url.into();
        self
    }

    #[must_use]
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Local segment storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentStoreConfig {
    /// Parent of the per-channel directories.
    pub root_dir: PathBuf,
    /// A segment is finalized before a write would take it past this size.
    pub max_segment_size: u64,
    /// `fsync` data after every append.
    pub sync_writes: bool,
}

impl Default for SegmentStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/chains"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            sync_writes: false,
        }
    }
}

impl SegmentStoreConfig {
    #[must_use]
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Directory of one channel's segments.
    #[must_use]
    pub fn channel_dir(&self, channel_id: &str) -> PathBuf {
        self.root_dir.join(channel_id)
    }
}
