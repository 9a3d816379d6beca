use std::hash::Hasher;

use mpchash::HashRing;
use serde::Deserialize;

/// How a pod name is mapped onto a shard index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStrategy {
    /// FNV-1a of the name, modulo the slot count.
    #[default]
    Modulo,
    /// Consistent-hash ring with one node per slot.
    Ring,
}

#[derive(Hash)]
struct ShardNode(u64);

/// Maps pod names to shard pod names (`<prefix><index>`).
pub struct ShardSelector {
    slot_count: usize,
    prefix: String,
    ring: Option<HashRing<ShardNode>>,
}

impl ShardSelector {
    /// `slot_count` must be non-zero; config validation enforces it.
    pub fn new(slot_count: usize, strategy: ShardStrategy, prefix: impl Into<String>) -> Self {
        let slot_count = slot_count.max(1);
        let ring = match strategy {
            ShardStrategy::Modulo => None,
            ShardStrategy::Ring => {
                let ring = HashRing::new();
                for i in 0..slot_count {
                    ring.add(ShardNode(i as u64));
                }
                Some(ring)
            }
        };

        Self {
            slot_count,
            prefix: prefix.into(),
            ring,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn strategy(&self) -> ShardStrategy {
        if self.ring.is_some() {
            ShardStrategy::Ring
        } else {
            ShardStrategy::Modulo
        }
    }

    pub fn shard_index(&self, name: &str) -> usize {
        match &self.ring {
            Some(ring) => ring
                .node(&name)
                .map(|token| token.node().0 as usize)
                .unwrap_or(0),
            None => {
                let mut hasher = fnv::FnvHasher::default();
                hasher.write(name.as_bytes());
                hasher.finish() as usize % self.slot_count
            }
        }
    }

    pub fn shard_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, self.shard_index(name))
    }
}
