//! # Ed25519 Block Policy
//!
//! A block passes when at least `threshold` distinct trusted signers have a
//! valid Ed25519 signature over its header hash. Untrusted or malformed
//! signatures are ignored rather than rejected outright.

use crate::ports::outbound::BlockVerifier;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use shared_types::{Block, PublicKey};
use std::collections::{HashMap, HashSet};

pub struct Ed25519PolicyVerifier {
    trusted: HashMap<PublicKey, VerifyingKey>,
    threshold: usize,
}

impl Ed25519PolicyVerifier {
    /// Keys that are not valid curve points are skipped.
    pub fn new(trusted_keys: impl IntoIterator<Item = PublicKey>, threshold: usize) -> Self {
        let trusted = trusted_keys
            .into_iter()
            .filter_map(|bytes| {
                VerifyingKey::from_bytes(&bytes)
                    .ok()
                    .map(|key| (bytes, key))
            })
            .collect();
        Self {
            trusted,
            threshold: threshold.max(1),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl BlockVerifier for Ed25519PolicyVerifier {
    fn verify_block(&self, _channel_id: &str, block: &Block) -> Result<(), String> {
        let message = block.header.hash();
        let mut valid = HashSet::new();

        for sig in &block.metadata.signatures {
            let Some(key) = self.trusted.get(&sig.signer) else {
                continue;
            };
            let signature = Signature::from_bytes(&sig.signature);
            if key.verify(&message, &signature).is_ok() {
                valid.insert(sig.signer);
            }
        }

        if valid.len() >= self.threshold {
            Ok(())
        } else {
            Err(format!(
                "{} of {} required signatures valid",
                valid.len(),
                self.threshold
            ))
        }
    }
}
