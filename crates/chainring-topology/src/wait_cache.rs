//! Short-lived "settling" marks for nodes whose controller-side change has
//! not propagated yet. Wait-cached nodes are neither mutated again nor
//! reclaimed as orphans until their mark expires.

use std::collections::HashMap;
use std::time::Duration;

use chainring_index::NodeId;
use tokio::time::Instant;

/// Node ID to expiry time. Expired entries read as absent.
#[derive(Debug, Clone, Default)]
pub struct WaitCache {
    entries: HashMap<NodeId, Instant>,
}

impl WaitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `node` for `ttl`. An existing mark is extended, never shortened.
    pub fn insert(&mut self, node: &NodeId, ttl: Duration) {
        let expiry = Instant::now() + ttl;
        self.entries
            .entry(node.clone())
            .and_modify(|e| *e = (*e).max(expiry))
            .or_insert(expiry);
    }

    /// True if `node` is marked and the mark has not expired. Expired marks
    /// are dropped on read.
    pub fn contains(&mut self, node: &NodeId) -> bool {
        match self.entries.get(node) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                self.entries.remove(node);
                false
            }
            None => false,
        }
    }

    /// Drop every expired mark.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, expiry| *expiry > now);
    }

    /// Number of live marks.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.values().filter(|e| **e > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn marks_expire() {
        let mut cache = WaitCache::new();
        let a = node("02beefdead");
        cache.insert(&a, Duration::from_secs(90));
        assert!(cache.contains(&a));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(89)).await;
        assert!(cache.contains(&a));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.contains(&a));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn insert_never_shortens() {
        let mut cache = WaitCache::new();
        let a = node("02beefdead");
        cache.insert(&a, Duration::from_secs(120));
        cache.insert(&a, Duration::from_secs(90));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(cache.contains(&a));
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
    }
}
