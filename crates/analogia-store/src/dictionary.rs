use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::ids::Id;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum KeyIndex {
    Ordered(BTreeMap<String, Id>),
    Hashed(AHashMap<String, Id>),
}

/// Bidirectional `string <-> Id` mapping.
///
/// Every key has at most one id and every id at most one key. Inserting an
/// existing key (or reusing a bound id) is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdDictionary {
    keys: KeyIndex,
    ids: AHashMap<Id, String>,
}

impl IdDictionary {
    /// Keys iterate in lexicographic order.
    pub fn ordered() -> Self {
        Self {
            keys: KeyIndex::Ordered(BTreeMap::new()),
            ids: AHashMap::new(),
        }
    }

    pub fn hashed() -> Self {
        Self {
            keys: KeyIndex::Hashed(AHashMap::new()),
            ids: AHashMap::new(),
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self.keys, KeyIndex::Ordered(_))
    }

    /// Bind `key` to `id`. Returns `false` if either side is already bound.
    pub fn put(&mut self, key: &str, id: Id) -> bool {
        if self.get_id(key).is_some() || self.ids.contains_key(&id) {
            return false;
        }
        match &mut self.keys {
            KeyIndex::Ordered(map) => {
                map.insert(key.to_string(), id);
            }
            KeyIndex::Hashed(map) => {
                map.insert(key.to_string(), id);
            }
        }
        self.ids.insert(id, key.to_string());
        true
    }

    pub fn get_id(&self, key: &str) -> Option<Id> {
        match &self.keys {
            KeyIndex::Ordered(map) => map.get(key).copied(),
            KeyIndex::Hashed(map) => map.get(key).copied(),
        }
    }

    pub fn get_key(&self, id: Id) -> Option<&str> {
        self.ids.get(&id).map(String::as_str)
    }

    /// Remove a key together with its inverse entry.
    pub fn remove(&mut self, key: &str) -> Option<Id> {
        let id = match &mut self.keys {
            KeyIndex::Ordered(map) => map.remove(key),
            KeyIndex::Hashed(map) => map.remove(key),
        }?;
        self.ids.remove(&id);
        Some(id)
    }

    pub fn clear(&mut self) {
        match &mut self.keys {
            KeyIndex::Ordered(map) => map.clear(),
            KeyIndex::Hashed(map) => map.clear(),
        }
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All ids, in key order for ordered dictionaries.
    pub fn ids(&self) -> Box<dyn Iterator<Item = Id> + '_> {
        match &self.keys {
            KeyIndex::Ordered(map) => Box::new(map.values().copied()),
            KeyIndex::Hashed(map) => Box::new(map.values().copied()),
        }
    }

    pub fn keys(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match &self.keys {
            KeyIndex::Ordered(map) => Box::new(map.keys().map(String::as_str)),
            KeyIndex::Hashed(map) => Box::new(map.keys().map(String::as_str)),
        }
    }

    pub fn max_id(&self) -> Option<Id> {
        self.ids.keys().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_is_idempotent() {
        let mut dict = IdDictionary::hashed();
        assert!(dict.put("Berlin", Id::new(1)));
        assert!(!dict.put("Berlin", Id::new(2)));
        assert!(!dict.put("Paris", Id::new(1)));
        assert_eq!(dict.get_id("Berlin"), Some(Id::new(1)));
        assert_eq!(dict.get_key(Id::new(1)), Some("Berlin"));
        assert_eq!(dict.get_key(Id::new(2)), None);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_ordered_iteration() {
        let mut dict = IdDictionary::ordered();
        dict.put("c", Id::new(0));
        dict.put("a", Id::new(1));
        dict.put("b", Id::new(2));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(
            dict.ids().collect::<Vec<_>>(),
            vec![Id::new(1), Id::new(2), Id::new(0)]
        );
    }

    #[test]
    fn test_remove_drops_inverse() {
        let mut dict = IdDictionary::ordered();
        dict.put("x", Id::new(9));
        assert_eq!(dict.remove("x"), Some(Id::new(9)));
        assert_eq!(dict.get_key(Id::new(9)), None);
        assert!(dict.put("y", Id::new(9)));
        dict.clear();
        assert!(dict.is_empty());
    }
}
