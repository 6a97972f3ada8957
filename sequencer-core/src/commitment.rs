//! Block commitments
//!
//! Hashes follow the anchor contract's packed ABI encoding so any party can
//! recompute them from anchored data:
//!
//! - header hash: `keccak256(uint256 index ‖ bytes32 previousBlockHash ‖ bytes32 stateRoot ‖ bytes payload ‖ uint256 timestamp)`
//! - state root: `keccak256(keccak256(uint256 balance_0) ‖ … ‖ keccak256(uint256 balance_n))`
//!   over accounts in address order

use crate::crypto::{keccak256, u256_word};
use crate::types::{Address, Balance, Block, Hash32, Transaction};
use crate::Result;

/// Hash of a block's full header, as linked from its successor
pub fn hash_block_header(block: &Block) -> Hash32 {
    let mut packed = Vec::with_capacity(32 * 4 + block.payload.len());
    packed.extend_from_slice(&u256_word(block.index as u128));
    packed.extend_from_slice(&block.previous_block_hash);
    packed.extend_from_slice(&block.state_root);
    packed.extend_from_slice(&block.payload);
    packed.extend_from_slice(&u256_word(block.timestamp as u128));
    keccak256(&packed)
}

/// Two-level commitment over a canonical balance snapshot
pub fn state_root(snapshot: &[(Address, Balance)]) -> Hash32 {
    let mut leaves = Vec::with_capacity(32 * snapshot.len());
    for (_, balance) in snapshot {
        leaves.extend_from_slice(&keccak256(&u256_word(*balance)));
    }
    keccak256(&leaves)
}

/// Encode a batch as the block payload
pub fn encode_payload(batch: &[Transaction]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(batch)?)
}

/// Derives the next block from the prior anchored one
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitmentBuilder;

impl CommitmentBuilder {
    /// Create builder
    pub fn new() -> Self {
        Self
    }

    /// Build the block that follows `prior`
    ///
    /// `snapshot` must be address-ordered and already include the effects of
    /// `batch`. Identical inputs always yield an identical block.
    pub fn build_next_block(
        &self,
        prior: Option<&Block>,
        batch: &[Transaction],
        snapshot: &[(Address, Balance)],
        timestamp: u64,
    ) -> Result<Block> {
        let (index, previous_block_hash) = match prior {
            Some(prior) => (prior.index + 1, hash_block_header(prior)),
            None => (0, [0u8; 32]),
        };

        Ok(Block {
            index,
            previous_block_hash,
            state_root: state_root(snapshot),
            payload: encode_payload(batch)?,
            timestamp,
        })
    }
}

/// Check that `block` links to `prior`
pub fn links_to(block: &Block, prior: &Block) -> bool {
    block.index == prior.index + 1 && block.previous_block_hash == hash_block_header(prior)
}
