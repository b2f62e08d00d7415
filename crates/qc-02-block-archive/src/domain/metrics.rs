//! # Archive Metrics
//!
//! Prometheus metrics for the archiving subsystem.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-02-block-archive = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `blockarchive_archived_size_bytes{channel}` - Gauge of bytes shipped to the repository
//! - `blockarchive_segments_archived_total{channel}` - Counter of archived segments
//! - `blockarchive_segments_discarded_total{channel}` - Counter of locally discarded segments
//! - `blockarchive_notifications_dropped_total` - Counter of hand-off queue drops

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_gauge_vec, register_int_counter, register_int_counter_vec, GaugeVec, IntCounter,
    IntCounterVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Cumulative archived bytes, labeled by channel
    pub static ref ARCHIVED_SIZE: GaugeVec = register_gauge_vec!(
        "blockarchive_archived_size_bytes",
        "Total size of segments transferred to the remote repository",
        &["channel"]
    )
    .expect("Failed to create ARCHIVED_SIZE metric");

    /// Archived segments, labeled by channel
    pub static ref SEGMENTS_ARCHIVED: IntCounterVec = register_int_counter_vec!(
        "blockarchive_segments_archived_total",
        "Total number of segments archived",
        &["channel"]
    )
    .expect("Failed to create SEGMENTS_ARCHIVED metric");

    /// Locally discarded segments, labeled by channel
    pub static ref SEGMENTS_DISCARDED: IntCounterVec = register_int_counter_vec!(
        "blockarchive_segments_discarded_total",
        "Total number of segments discarded from local storage",
        &["channel"]
    )
    .expect("Failed to create SEGMENTS_DISCARDED metric");

    /// Notifications dropped because the hand-off queue was full
    pub static ref NOTIFICATIONS_DROPPED: IntCounter = register_int_counter!(
        "blockarchive_notifications_dropped_total",
        "Total number of archive notifications dropped on a full queue"
    )
    .expect("Failed to create NOTIFICATIONS_DROPPED metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

/// Record a segment transfer
#[cfg(feature = "metrics")]
pub fn record_segment_archived(channel: &str, bytes: u64) {
    SEGMENTS_ARCHIVED.with_label_values(&[channel]).inc();
    ARCHIVED_SIZE.with_label_values(&[channel]).add(bytes as f64);
}

/// Record a local discard
#[cfg(feature = "metrics")]
pub fn record_segment_discarded(channel: &str) {
    SEGMENTS_DISCARDED.with_label_values(&[channel]).inc();
}

/// Record a dropped hand-off notification
#[cfg(feature = "metrics")]
pub fn record_notification_dropped() {
    NOTIFICATIONS_DROPPED.inc();
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_segment_archived(_channel: &str, _bytes: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_segment_discarded(_channel: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_notification_dropped() {}
