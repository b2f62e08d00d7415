//! # Ledger Entities
//!
//! The block model shared by the block store, the archiving subsystem and the
//! cluster messaging fabric.
//!
//! ## Clusters
//!
//! - **Chain**: `Block`, `BlockHeader`, `Envelope`
//! - **Metadata**: `BlockMetadata`, `BlockSignature`
//!
//! A block's on-disk representation is a bincode encoding of [`Block`]. The
//! storage layer treats it as an opaque payload behind a length prefix.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

// =============================================================================
// PRIMITIVES
// =============================================================================

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// The all-zero hash, used as the genesis block's previous hash.
pub const ZERO_HASH: Hash = [0u8; 32];

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// The header of a block.
///
/// The header hash links blocks together: block `n` carries the hash of
/// block `n - 1`'s header in `previous_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Block number in the channel's chain, starting at 0.
    pub number: u64,
    /// Header hash of the preceding block.
    pub previous_hash: Hash,
    /// Hash over the block's envelopes.
    pub data_hash: Hash,
}

impl BlockHeader {
    /// Compute the canonical header hash.
    ///
    /// Layout: `number (u64 LE) || previous_hash || data_hash`.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.number.to_le_bytes());
        hasher.update(self.previous_hash);
        hasher.update(self.data_hash);
        hasher.finalize().into()
    }
}

/// A transaction envelope carried in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Transaction identifier, unique within a channel.
    pub tx_id: String,
    /// Opaque transaction bytes.
    pub payload: Vec<u8>,
}

/// A signature over a block header hash.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Public key of the signer.
    pub signer: PublicKey,
    /// Ed25519 signature over [`BlockHeader::hash`].
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// Block metadata written by the ordering service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockMetadata {
    /// Signatures attesting to the block header.
    pub signatures: Vec<BlockSignature>,
    /// Number of the most recent configuration block, as of this block.
    pub last_config_index: u64,
}

/// A ledger block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Vec<Envelope>,
    pub metadata: BlockMetadata,
}

impl Block {
    /// Block number shorthand.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Whether this block is itself a configuration block.
    #[must_use]
    pub fn is_config_block(&self) -> bool {
        self.metadata.last_config_index == self.header.number
    }

    /// Position of a transaction inside this block.
    #[must_use]
    pub fn position_of(&self, tx_id: &str) -> Option<usize> {
        self.data.iter().position(|env| env.tx_id == tx_id)
    }

    /// Encode for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Hash over a block's envelopes, in order.
#[must_use]
pub fn compute_data_hash(data: &[Envelope]) -> Hash {
    let mut hasher = Sha256::new();
    for env in data {
        hasher.update((env.tx_id.len() as u64).to_le_bytes());
        hasher.update(env.tx_id.as_bytes());
        hasher.update((env.payload.len() as u64).to_le_bytes());
        hasher.update(&env.payload);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(number: u64) -> Block {
        let data = vec![Envelope {
            tx_id: format!("tx-{number}"),
            payload: vec![1, 2, 3],
        }];
        Block {
            header: BlockHeader {
                number,
                previous_hash: ZERO_HASH,
                data_hash: compute_data_hash(&data),
            },
            data,
            metadata: BlockMetadata::default(),
        }
    }

    #[test]
    fn test_header_hash_changes_with_number() {
        let a = sample_block(1).header;
        let mut b = a.clone();
        b.number = 2;
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn test_config_block_detection() {
        let mut block = sample_block(7);
        assert!(!block.is_config_block());
        block.metadata.last_config_index = 7;
        assert!(block.is_config_block());
    }

    #[test]
    fn test_position_of() {
        let block = sample_block(3);
        assert_eq!(block.position_of("tx-3"), Some(0));
        assert_eq!(block.position_of("missing"), None);
    }

    #[test]
    fn test_bincode_encoding_preserves_signatures() {
        let mut block = sample_block(4);
        block.metadata.signatures.push(BlockSignature {
            signer: [9u8; 32],
            signature: [7u8; 64],
        });
        let bytes = block.to_bytes().unwrap();
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);
    }
}
