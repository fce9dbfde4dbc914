//! Hash-range partitions
//!
//! Every table is split into contiguous `[start, end)` slices of a fixed hash
//! space. A row belongs to the slice containing `hash_key(primary_key)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shard ID (slot index `0..max_shards`)
pub type ShardId = u32;

/// Default size of the key hash space
pub const DEFAULT_HASH_SPACE: u32 = 65536;

/// Hash a primary-key value into `[0, space)`.
///
/// IEEE CRC-32 of the UTF-8 bytes. Both the coordinator (insert routing) and
/// the shard nodes (migration scans) use this function, so it must never change
/// for a running cluster.
pub fn hash_key(key: &str, space: u32) -> u32 {
    debug_assert!(space > 0);
    crc32fast::hash(key.as_bytes()) % space
}

/// Range parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("malformed range: {0:?}")]
    Malformed(String),
    #[error("inverted range: start={start}, end={end}")]
    Inverted { start: u32, end: u32 },
}

/// Hash range [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashRange {
    /// Start hash (inclusive)
    pub start: u32,
    /// End hash (exclusive)
    pub end: u32,
}

impl HashRange {
    pub fn new(start: u32, end: u32) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// The whole hash space
    pub fn full(space: u32) -> Self {
        Self { start: 0, end: space }
    }

    /// Number of hash values covered
    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0
    }

    pub fn contains(&self, hash: u32) -> bool {
        hash >= self.start && hash < self.end
    }

    pub fn overlaps(&self, other: &HashRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Split into lower and upper halves at the midpoint.
    ///
    /// Returns `None` for ranges of width <= 1, which cannot be split further.
    pub fn split_at_midpoint(&self) -> Option<(HashRange, HashRange)> {
        if self.width() <= 1 {
            return None;
        }
        let mid = self.start + self.width() / 2;
        Some((
            HashRange { start: self.start, end: mid },
            HashRange { start: mid, end: self.end },
        ))
    }

    /// Encode as the coordination-store payload `"{start},{end}"`
    pub fn encode(&self) -> String {
        format!("{},{}", self.start, self.end)
    }

    /// Parse the coordination-store payload `"{start},{end}"`
    pub fn parse(s: &str) -> Result<Self, RangeError> {
        let (start, end) = s
            .trim()
            .split_once(',')
            .ok_or_else(|| RangeError::Malformed(s.to_string()))?;
        let start = start
            .trim()
            .parse::<u32>()
            .map_err(|_| RangeError::Malformed(s.to_string()))?;
        let end = end
            .trim()
            .parse::<u32>()
            .map_err(|_| RangeError::Malformed(s.to_string()))?;
        Self::new(start, end)
    }
}

impl fmt::Display for HashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl FromStr for HashRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One table's slice on one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePartition {
    pub table_name: String,
    pub range: HashRange,
}

impl TablePartition {
    pub fn new(table_name: impl Into<String>, range: HashRange) -> Self {
        Self {
            table_name: table_name.into(),
            range,
        }
    }

    /// Whether a primary-key value falls inside this partition
    pub fn owns_key(&self, key: &str, space: u32) -> bool {
        self.range.contains(hash_key(key, space))
    }
}

/// Tiling violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilingError {
    #[error("no partitions")]
    Empty,
    #[error("gap before hash {0}")]
    Gap(u32),
    #[error("overlap at hash {0}")]
    Overlap(u32),
    #[error("partitions end at {end}, hash space is {space}")]
    Incomplete { end: u32, space: u32 },
}

/// Check that `ranges` tile `[0, space)` with no gaps and no overlaps.
pub fn check_tiling(ranges: &[HashRange], space: u32) -> Result<(), TilingError> {
    if ranges.is_empty() {
        return Err(TilingError::Empty);
    }
    let mut sorted = ranges.to_vec();
    sorted.sort();

    let mut cursor = 0u32;
    for range in sorted {
        if range.start > cursor {
            return Err(TilingError::Gap(cursor));
        }
        if range.start < cursor {
            return Err(TilingError::Overlap(range.start));
        }
        cursor = range.end;
    }
    if cursor != space {
        return Err(TilingError::Incomplete { end: cursor, space });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_is_stable() {
        // IEEE CRC-32 check value for "123456789"
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
        assert_eq!(hash_key("123456789", DEFAULT_HASH_SPACE), 0xCBF4_3926 % 65536);
        assert!(hash_key("anything", 100) < 100);
    }

    #[test]
    fn test_range_parse_and_encode() {
        let range = HashRange::parse("0,65536").unwrap();
        assert_eq!(range, HashRange::full(DEFAULT_HASH_SPACE));
        assert_eq!(range.encode(), "0,65536");
        assert_eq!(" 10 , 20 ".parse::<HashRange>().unwrap(), HashRange { start: 10, end: 20 });

        assert!(matches!(HashRange::parse("10"), Err(RangeError::Malformed(_))));
        assert!(matches!(HashRange::parse("a,b"), Err(RangeError::Malformed(_))));
        assert_eq!(
            HashRange::parse("20,10"),
            Err(RangeError::Inverted { start: 20, end: 10 })
        );
    }

    #[test]
    fn test_range_contains() {
        let range = HashRange { start: 50, end: 100 };
        assert!(!range.contains(49));
        assert!(range.contains(50));
        assert!(range.contains(99));
        assert!(!range.contains(100));
        assert_eq!(range.to_string(), "[50, 100)");
    }

    #[test]
    fn test_split_at_midpoint() {
        let (lower, upper) = HashRange { start: 0, end: 100 }.split_at_midpoint().unwrap();
        assert_eq!(lower, HashRange { start: 0, end: 50 });
        assert_eq!(upper, HashRange { start: 50, end: 100 });

        let (lower, upper) = HashRange { start: 3, end: 6 }.split_at_midpoint().unwrap();
        assert_eq!(lower, HashRange { start: 3, end: 4 });
        assert_eq!(upper, HashRange { start: 4, end: 6 });

        assert!(HashRange { start: 7, end: 8 }.split_at_midpoint().is_none());
        assert!(HashRange { start: 7, end: 7 }.split_at_midpoint().is_none());
    }

    #[test]
    fn test_tiling_survives_repeated_splits() {
        let mut ranges = vec![HashRange::full(DEFAULT_HASH_SPACE)];
        for _ in 0..5 {
            let widest = ranges
                .iter()
                .enumerate()
                .max_by_key(|(_, r)| r.width())
                .map(|(i, _)| i)
                .unwrap();
            let (lower, upper) = ranges[widest].split_at_midpoint().unwrap();
            ranges[widest] = lower;
            ranges.push(upper);
            assert_eq!(check_tiling(&ranges, DEFAULT_HASH_SPACE), Ok(()));
        }
    }

    #[test]
    fn test_tiling_violations() {
        let space = 100;
        assert_eq!(check_tiling(&[], space), Err(TilingError::Empty));
        assert_eq!(
            check_tiling(&[HashRange { start: 0, end: 40 }, HashRange { start: 50, end: 100 }], space),
            Err(TilingError::Gap(40))
        );
        assert_eq!(
            check_tiling(&[HashRange { start: 0, end: 60 }, HashRange { start: 50, end: 100 }], space),
            Err(TilingError::Overlap(50))
        );
        assert_eq!(
            check_tiling(&[HashRange { start: 0, end: 60 }], space),
            Err(TilingError::Incomplete { end: 60, space })
        );
    }

    #[test]
    fn test_partition_owns_key() {
        let key = "order-42";
        let hash = hash_key(key, 1000);
        let owner = TablePartition::new("orders", HashRange { start: hash, end: hash + 1 });
        let other = TablePartition::new("orders", HashRange { start: hash + 1, end: 1000 });
        assert!(owner.owns_key(key, 1000));
        assert!(!other.owns_key(key, 1000));
    }
}
