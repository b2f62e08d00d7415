//! # Consistency Checker
//!
//! Linear walk over `[1, height)` anchored at genesis. Each block must
//! chain to its predecessor's header hash, carry the data hash of its own
//! envelopes and satisfy the signature policy. The walk stops at the first
//! failing block; nothing is repaired.
//!
//! Blocks are read through a [`BlockSource`], normally the
//! [`ArchivedLedger`](crate::service::ArchivedLedger), so discarded blocks
//! come back from the archive transparently.

use crate::domain::errors::ArchiveResult;
use crate::domain::verification::{FailureKind, VerificationReport};
use crate::ports::outbound::{BlockSource, BlockVerifier};
use shared_types::{compute_data_hash, Block};
use std::sync::Arc;
use tracing::{error, info};

pub struct ConsistencyChecker {
    channel_id: String,
    source: Arc<dyn BlockSource>,
    verifier: Arc<dyn BlockVerifier>,
}

impl ConsistencyChecker {
    pub fn new(
        channel_id: impl Into<String>,
        source: Arc<dyn BlockSource>,
        verifier: Arc<dyn BlockVerifier>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            source,
            verifier,
        }
    }

    /// Walk the whole chain.
    ///
    /// Read failures are errors; a broken invariant is a failed report.
    pub async fn verify(&self) -> ArchiveResult<VerificationReport> {
        let height = self.source.height();
        if height == 0 {
            return Ok(VerificationReport::passed(&self.channel_id, 0));
        }

        let mut previous = self.source.block_by_number(0).await?;
        for number in 1..height {
            let block = self.source.block_by_number(number).await?;
            if let Some(kind) = self.check_block(&previous, &block) {
                error!(
                    channel = %self.channel_id,
                    block = number,
                    failure = ?kind,
                    "[qc-02] Chain verification failed"
                );
                return Ok(VerificationReport::failed(
                    &self.channel_id,
                    height,
                    number,
                    kind,
                ));
            }
            previous = block;
        }

        info!(channel = %self.channel_id, height, "[qc-02] Chain verified");
        Ok(VerificationReport::passed(&self.channel_id, height))
    }

    fn check_block(&self, previous: &Block, block: &Block) -> Option<FailureKind> {
        let expected = previous.header.hash();
        if block.header.previous_hash != expected {
            return Some(FailureKind::PreviousHashMismatch {
                expected,
                found: block.header.previous_hash,
            });
        }

        let computed = compute_data_hash(&block.data);
        if block.header.data_hash != computed {
            return Some(FailureKind::DataHashMismatch {
                expected: computed,
                found: block.header.data_hash,
            });
        }

        self.verifier
            .verify_block(&self.channel_id, block)
            .err()
            .map(|reason| FailureKind::SignaturePolicy { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::verifier::Ed25519PolicyVerifier;
    use crate::test_utils::{build_chain, sign_block, test_signer, VecBlockSource};

    struct AcceptAll;

    impl BlockVerifier for AcceptAll {
        fn verify_block(&self, _channel_id: &str, _block: &Block) -> Result<(), String> {
            Ok(())
        }
    }

    fn checker(blocks: Vec<Block>) -> ConsistencyChecker {
        let source = Arc::new(VecBlockSource::new(blocks));
        ConsistencyChecker::new("mychannel", source, Arc::new(AcceptAll))
    }

    #[tokio::test]
    async fn test_empty_and_genesis_only_chains_pass() {
        let empty = checker(Vec::new());
        assert!(empty.verify().await.unwrap().pass);

        let genesis = checker(build_chain(1));
        let report = genesis.verify().await.unwrap();
        assert!(report.pass);
        assert_eq!(report.height, 1);
    }

    #[tokio::test]
    async fn test_linked_chain_passes() {
        let checker = checker(build_chain(20));
        let report = checker.verify().await.unwrap();
        assert!(report.pass);
        assert_eq!(report.blocks_checked, 20);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn test_broken_link_reports_first_offender() {
        let mut chain = build_chain(10);
        chain[4].header.previous_hash = [9; 32];
        let checker = checker(chain);

        let report = checker.verify().await.unwrap();
        assert!(!report.pass);
        let failure = report.failure.unwrap();
        assert_eq!(failure.block_number, 4);
        assert!(matches!(
            failure.kind,
            FailureKind::PreviousHashMismatch { found, .. } if found == [9; 32]
        ));
        assert_eq!(report.blocks_checked, 5);
    }

    #[tokio::test]
    async fn test_tampered_payload_reports_data_hash() {
        let mut chain = build_chain(6);
        chain[3].data[0].payload = b"tampered".to_vec();
        let checker = checker(chain);

        let failure = checker.verify().await.unwrap().failure.unwrap();
        assert_eq!(failure.block_number, 3);
        assert!(matches!(failure.kind, FailureKind::DataHashMismatch { .. }));
        assert!(failure.kind.is_hash_mismatch());
    }

    #[tokio::test]
    async fn test_signature_policy_failure() {
        let trusted = test_signer(1);
        let stranger = test_signer(2);
        let mut chain = build_chain(4);
        for block in chain.iter_mut().skip(1) {
            sign_block(block, &trusted);
        }
        // Block 2 carries only an untrusted signature.
        chain[2].metadata.signatures.clear();
        sign_block(&mut chain[2], &stranger);

        let source = Arc::new(VecBlockSource::new(chain));
        let verifier = Ed25519PolicyVerifier::new([trusted.verifying_key().to_bytes()], 1);
        let checker = ConsistencyChecker::new("mychannel", source, Arc::new(verifier));

        let failure = checker.verify().await.unwrap().failure.unwrap();
        assert_eq!(failure.block_number, 2);
        assert!(matches!(failure.kind, FailureKind::SignaturePolicy { .. }));
        assert!(!failure.kind.is_hash_mismatch());
    }
}
