use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};

/// Merkle commitment over an ordered list of transaction digests.
///
/// Levels with an odd number of nodes pair their last node with itself;
/// the tree is folded until a single digest remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<Hash256>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(LedgerError::EmptyBlock);
        }

        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next_level = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => Hash256::hash_pair(left, right),
                    [last] => Hash256::hash_pair(last, last),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next_level);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> Hash256 {
        // `new` guarantees a non-empty top level
        self.levels[self.levels.len() - 1][0]
    }
}

pub fn merkle_root(leaves: &[Hash256]) -> Result<Hash256> {
    Ok(MerkleTree::new(leaves.to_vec())?.root())
}
