//! Ordered key/value store with prefix lookup.

use std::collections::BTreeMap;

use serde::Serialize;

/// An ordered string-keyed store supporting prefix queries.
///
/// Writes are visible to the next read. There is no locking here: the
/// controller service owns each index and mutates it from a single task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PrefixIndex<V> {
    entries: BTreeMap<String, V>,
}

impl<V> Default for PrefixIndex<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> PrefixIndex<V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record.
    pub fn put(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    /// Get a record by exact key.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    /// Get a mutable record by exact key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a record.
    pub fn delete(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key)
    }

    /// Iterate entries whose key starts with `prefix`, in key order.
    pub fn iter_prefix(&self, prefix: &str) -> impl Iterator<Item = (&String, &V)> + '_ {
        let prefix = prefix.to_string();
        self.entries
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(prefix.as_str()))
    }

    /// All keys starting with `prefix`.
    pub fn prefix_keys(&self, prefix: &str) -> Vec<String> {
        self.iter_prefix(prefix).map(|(k, _)| k.clone()).collect()
    }

    /// All values whose key starts with `prefix`.
    pub fn prefix_values(&self, prefix: &str) -> Vec<&V> {
        self.iter_prefix(prefix).map(|(_, v)| v).collect()
    }

    /// Remove every record whose key starts with `prefix`.
    /// Returns number of records removed.
    pub fn delete_prefix(&mut self, prefix: &str) -> usize {
        let keys = self.prefix_keys(prefix);
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    /// All keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all records.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let mut index = PrefixIndex::new();
        index.put("a", 1);
        assert_eq!(index.get("a"), Some(&1));

        index.put("a", 2);
        assert_eq!(index.get("a"), Some(&2));

        assert_eq!(index.delete("a"), Some(2));
        assert!(index.is_empty());
    }

    #[test]
    fn prefix_queries() {
        let mut index = PrefixIndex::new();
        index.put("7ac4235ec5d3d938", "net");
        index.put("7ac4235ec5d3d93802beefdead", "member");
        index.put("7ac4235ec5d3d939", "other");
        index.put("7ac4", "short");

        let keys = index.prefix_keys("7ac4235ec5d3d938");
        assert_eq!(keys, vec!["7ac4235ec5d3d938", "7ac4235ec5d3d93802beefdead"]);
        assert_eq!(index.prefix_values("7ac4235ec5d3d938"), vec![&"net", &"member"]);
        assert_eq!(index.prefix_keys("7ac4").len(), 4);
        assert!(index.prefix_keys("ffff").is_empty());
    }

    #[test]
    fn prefix_results_outlive_the_prefix() {
        let mut index = PrefixIndex::new();
        index.put("7ac4235ec5d3d938", 1);
        index.put("7ac4235ec5d3d93802beefdead", 2);

        let values = {
            let prefix = String::from("7ac4235ec5d3d938");
            index.prefix_values(&prefix)
        };
        assert_eq!(values, vec![&1, &2]);
    }

    #[test]
    fn delete_prefix_leaves_neighbours() {
        let mut index = PrefixIndex::new();
        index.put("7ac4235ec5d3d938", 1);
        index.put("7ac4235ec5d3d93802beefdead", 2);
        index.put("7ac4235ec5d3d939", 3);

        assert_eq!(index.delete_prefix("7ac4235ec5d3d938"), 2);
        assert_eq!(index.len(), 1);
        assert!(index.contains("7ac4235ec5d3d939"));
    }
}
