//! # Domain Layer
//!
//! Segment files, record framing, the archive watermark and the value types
//! the coordinator reasons about. Nothing here talks to the network.

pub mod chain;
pub mod config;
pub mod errors;
pub mod framing;
pub mod manifest;
pub mod metrics;
pub mod segment;
pub mod verification;
pub mod watermark;

pub use chain::SegmentChainReader;
pub use config::{ArchivingConfig, ArchivingRole, ArchivingSettings, SegmentStoreConfig};
pub use errors::{ArchiveError, ArchiveResult};
pub use manifest::ArchiveManifest;
pub use segment::{segment_file_name, segment_path, RecordPlacement, SegmentReader};
pub use verification::{ConsistencyFailure, FailureKind, VerificationReport};
pub use watermark::{ArchiveWatermark, SharedWatermark};
