//! Consistent hash ring that maps partition keys to destination nodes.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Each node owns `replicas` virtual points on the ring. A key belongs to the
/// first point at or after its hash, wrapping around.
#[derive(Clone, Debug)]
pub struct HashRing {
    replicas: usize,
    ring: BTreeMap<u64, String>,
    nodes: BTreeSet<String>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            ring: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn with_nodes<I, S>(replicas: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::new(replicas);
        for node in nodes {
            ring.add(node);
        }
        ring
    }

    pub fn add<S: Into<String>>(&mut self, node: S) {
        let node = node.into();
        if !self.nodes.insert(node.clone()) {
            return;
        }
        for i in 0..self.replicas {
            self.ring.insert(hash_of(&format!("{}#{}", node, i)), node.clone());
        }
    }

    pub fn remove(&mut self, node: &str) {
        if !self.nodes.remove(node) {
            return;
        }
        self.ring.retain(|_, owner| owner != node);
    }

    /// Node responsible for `key`, `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        let h = hash_of(key);
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
