//! # Verification Results
//!
//! Outcome of a full-chain consistency walk.

use serde::{Deserialize, Serialize};
use shared_types::Hash;

/// Which per-block invariant failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// `previous_hash` does not match the preceding header's hash.
    PreviousHashMismatch { expected: Hash, found: Hash },
    /// `data_hash` does not match the block's envelopes.
    DataHashMismatch { expected: Hash, found: Hash },
    /// Signatures do not satisfy the channel policy.
    SignaturePolicy { reason: String },
}

impl FailureKind {
    #[must_use]
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(
            self,
            Self::PreviousHashMismatch { .. } | Self::DataHashMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyFailure {
    pub block_number: u64,
    #[serde(flatten)]
    pub kind: FailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub channel_id: String,
    pub pass: bool,
    /// Blocks examined, the genesis anchor included.
    pub blocks_checked: u64,
    pub height: u64,
    pub failure: Option<ConsistencyFailure>,
}

impl VerificationReport {
    #[must_use]
    pub fn passed(channel_id: impl Into<String>, height: u64) -> Self {
        Self {
            channel_id: channel_id.into(),
            pass: true,
            blocks_checked: height,
            height,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(
        channel_id: impl Into<String>,
        height: u64,
        block_number: u64,
        kind: FailureKind,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            pass: false,
            blocks_checked: block_number + 1,
            height,
            failure: Some(ConsistencyFailure { block_number, kind }),
        }
    }
}
