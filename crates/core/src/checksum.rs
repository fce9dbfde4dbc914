//! Table checksums
//!
//! A checksum folds the CRC-32 of every scanned cell's text form into a running
//! value, in scan order. Two replicas agree only if they return the same cells
//! in the same order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::Value;

/// Order-dependent digest over scanned cells. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumDigest(pub u64);

impl ChecksumDigest {
    /// Digest of an empty or absent table
    pub const EMPTY: ChecksumDigest = ChecksumDigest(0);

    /// Fold one cell into the digest
    pub fn accumulate(self, cell: &str) -> Self {
        let cell_hash = crc32fast::hash(cell.as_bytes()) as u64;
        ChecksumDigest(self.0.wrapping_mul(31).wrapping_add(cell_hash))
    }

    /// Digest of a row-major cell matrix
    pub fn of_rows(rows: &[Vec<Value>]) -> Self {
        rows.iter()
            .flat_map(|row| row.iter())
            .fold(Self::EMPTY, |acc, cell| acc.accumulate(&cell.to_string()))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChecksumDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
