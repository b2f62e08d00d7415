//! # Domain Errors
//!
//! Error types for the block archive subsystem.
//!
//! ## Taxonomy
//!
//! | Class | Variant(s) | Handling |
//! |-------|------------|----------|
//! | Torn write | `UnexpectedEndOfSegment` | Writer resumes appending at `offset` |
//! | Remote unreachable | `RemoteUnreachable` | Retried at the next trigger, no watermark advance |
//! | Corruption | `Corruption`, `MalformedLength` | Fatal for the segment, blocks the watermark |
//! | Misuse | `InvalidStartOffset`, `InvalidSegmentRange` | Programmer error, never retried |
//! | Policy | `ConfigBlockProtected`, `ReadOnly` | Refused and logged, never escalated |
//!
//! "Already archived" is not an error; see `TransferOutcome`.

use shared_types::Hash;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in segment storage and archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The segment ends inside a record: a length prefix or payload was cut
    /// short by a crash mid-append.
    #[error("unexpected end of segment {segment} at offset {offset}")]
    UnexpectedEndOfSegment { segment: u64, offset: u64 },

    /// A length prefix that can never be valid (more than ten varint bytes).
    #[error("malformed record length in segment {segment} at offset {offset}")]
    MalformedLength { segment: u64, offset: u64 },

    /// A reader was asked to start somewhere it cannot be positioned.
    #[error("cannot position segment {segment} at offset {requested}: file is {file_size} bytes")]
    InvalidStartOffset {
        segment: u64,
        requested: u64,
        file_size: u64,
    },

    #[error("invalid segment range {start}..={end}")]
    InvalidSegmentRange { start: u64, end: u64 },

    #[error("segment {segment} not found at {}", .path.display())]
    SegmentNotFound { segment: u64, path: PathBuf },

    /// Only finalized segments have an end block and can be archived.
    #[error("segment {segment} of channel {channel} is not finalized")]
    SegmentNotFinalized { channel: String, segment: u64 },

    #[error("segment {segment} of channel {channel} is corrupt: {reason}")]
    Corruption {
        channel: String,
        segment: u64,
        reason: String,
    },

    #[error("remote repository unreachable for channel {channel} ({target}): {reason}")]
    RemoteUnreachable {
        channel: String,
        target: String,
        reason: String,
    },

    /// Deleting this segment would remove the channel's latest config block.
    #[error("segment {segment} holds latest config block {config_block}; refusing to delete")]
    ConfigBlockProtected { segment: u64, config_block: u64 },

    #[error("block {number} not found in channel {channel}")]
    BlockNotFound { channel: String, number: u64 },

    #[error("block {:02x?}... not found in channel {channel}", &.hash[..4])]
    BlockHashNotFound { channel: String, hash: Hash },

    #[error("transaction {tx_id} not found in channel {channel}")]
    TransactionNotFound { channel: String, tx_id: String },

    /// Appends must be sequential.
    #[error("out of order block: expected {expected}, got {got}")]
    OutOfOrderBlock { expected: u64, got: u64 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("archive index error: {message}")]
    Index { message: String },

    /// Repository misconfiguration (bad URL, unsupported scheme).
    #[error("remote repository error: {message}")]
    Repository { message: String },

    /// Writes through a store opened for inspection only.
    #[error("segment store of channel {channel} is open read-only")]
    ReadOnly { channel: String },

    #[error("segment reader already closed")]
    AlreadyClosed,
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

impl ArchiveError {
    /// Wrap an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }

    /// Worth retrying at the next trigger.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnreachable { .. })
    }

    /// Requires operator attention.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. }
                | Self::MalformedLength { .. }
                | Self::InvalidStartOffset { .. }
                | Self::InvalidSegmentRange { .. }
        )
    }

    #[must_use]
    pub fn is_torn_write(&self) -> bool {
        matches!(self, Self::UnexpectedEndOfSegment { .. })
    }

    /// The data exists logically but not in local storage.
    #[must_use]
    pub fn is_local_miss(&self) -> bool {
        matches!(
            self,
            Self::BlockNotFound { .. } | Self::SegmentNotFound { .. }
        )
    }
}
