//! Coordination-store layout
//!
//! ```text
//! /shard{i}/leader            ephemeral, data = leader address
//! /shard{i}/followers/f{j}    ephemeral, data = follower address
//! /shard{i}/followerCount     persistent, data = integer count
//! /shard{i}/tables/{t}        persistent, data = "{start},{end}"
//! /shard{i}/migrating         ephemeral, data = coordinator instance id
//! /coordinator/leader         ephemeral, data = coordinator instance id
//! ```

use crate::partition::ShardId;

pub const COORDINATOR_LEADER: &str = "/coordinator/leader";

pub fn shard_root(shard: ShardId) -> String {
    format!("/shard{}", shard)
}

pub fn leader(shard: ShardId) -> String {
    format!("/shard{}/leader", shard)
}

pub fn followers_dir(shard: ShardId) -> String {
    format!("/shard{}/followers", shard)
}

pub fn follower(shard: ShardId, slot: u32) -> String {
    format!("/shard{}/followers/f{}", shard, slot)
}

pub fn follower_count(shard: ShardId) -> String {
    format!("/shard{}/followerCount", shard)
}

pub fn tables_dir(shard: ShardId) -> String {
    format!("/shard{}/tables", shard)
}

pub fn table(shard: ShardId, table: &str) -> String {
    format!("/shard{}/tables/{}", shard, table)
}

pub fn migrating(shard: ShardId) -> String {
    format!("/shard{}/migrating", shard)
}

/// Parse a follower node name `f{j}`
pub fn follower_slot(name: &str) -> Option<u32> {
    name.strip_prefix('f')?.parse().ok()
}

/// Last path segment
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// A node under some `/shard{i}` subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardPath {
    Root(ShardId),
    Leader(ShardId),
    FollowersDir(ShardId),
    Follower(ShardId, u32),
    FollowerCount(ShardId),
    TablesDir(ShardId),
    Table(ShardId, String),
    Migrating(ShardId),
}

impl ShardPath {
    pub fn shard(&self) -> ShardId {
        match self {
            ShardPath::Root(s)
            | ShardPath::Leader(s)
            | ShardPath::FollowersDir(s)
            | ShardPath::Follower(s, _)
            | ShardPath::FollowerCount(s)
            | ShardPath::TablesDir(s)
            | ShardPath::Table(s, _)
            | ShardPath::Migrating(s) => *s,
        }
    }

    /// Classify a path. Returns `None` for anything outside the shard layout.
    pub fn parse(path: &str) -> Option<ShardPath> {
        let mut segments = path.strip_prefix('/')?.split('/');
        let shard: ShardId = segments.next()?.strip_prefix("shard")?.parse().ok()?;
        let parsed = match (segments.next(), segments.next(), segments.next()) {
            (None, _, _) => ShardPath::Root(shard),
            (Some("leader"), None, _) => ShardPath::Leader(shard),
            (Some("followerCount"), None, _) => ShardPath::FollowerCount(shard),
            (Some("migrating"), None, _) => ShardPath::Migrating(shard),
            (Some("followers"), None, _) => ShardPath::FollowersDir(shard),
            (Some("followers"), Some(name), None) => {
                ShardPath::Follower(shard, follower_slot(name)?)
            }
            (Some("tables"), None, _) => ShardPath::TablesDir(shard),
            (Some("tables"), Some(name), None) if !name.is_empty() => {
                ShardPath::Table(shard, name.to_string())
            }
            _ => return None,
        };
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(leader(3), "/shard3/leader");
        assert_eq!(follower(3, 1), "/shard3/followers/f1");
        assert_eq!(follower_count(0), "/shard0/followerCount");
        assert_eq!(table(2, "orders"), "/shard2/tables/orders");
        assert_eq!(migrating(1), "/shard1/migrating");
    }

    #[test]
    fn test_parse() {
        assert_eq!(ShardPath::parse("/shard3/leader"), Some(ShardPath::Leader(3)));
        assert_eq!(
            ShardPath::parse("/shard3/followers/f12"),
            Some(ShardPath::Follower(3, 12))
        );
        assert_eq!(
            ShardPath::parse("/shard0/tables/orders"),
            Some(ShardPath::Table(0, "orders".to_string()))
        );
        assert_eq!(ShardPath::parse("/shard0"), Some(ShardPath::Root(0)));
        assert_eq!(ShardPath::parse("/shard0/followers/x"), None);
        assert_eq!(ShardPath::parse("/coordinator/leader"), None);
        assert_eq!(ShardPath::parse("/shardx/leader"), None);
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/shard1/tables/t"), "t");
        assert_eq!(follower_slot("f7"), Some(7));
        assert_eq!(follower_slot("leader"), None);
    }
}
