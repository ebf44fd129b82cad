use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::ids::Id;

/// IDF placeholder until the post-load pass fills it in.
pub const UNSET_IDF: f64 = -1.0;

/// Knowledge-graph type label with its IDF weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Type {
    label: String,
    idf: f64,
}

impl Type {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_idf(label, UNSET_IDF)
    }

    pub fn with_idf(label: impl Into<String>, idf: f64) -> Self {
        Self {
            label: label.into(),
            idf,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn idf(&self) -> f64 {
        self.idf
    }

    pub fn set_idf(&mut self, idf: f64) {
        self.idf = idf;
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.idf.to_bits() == other.idf.to_bits()
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.hash(state);
        self.idf.to_bits().hash(state);
    }
}

impl Ord for Type {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label
            .cmp(&other.label)
            .then_with(|| self.idf.total_cmp(&other.idf))
    }
}

impl PartialOrd for Type {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Knowledge-graph entity: URI, types, predicates and IDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    uri: String,
    types: Vec<Type>,
    predicates: Vec<String>,
    idf: f64,
}

impl Entity {
    pub fn new(uri: impl Into<String>, types: Vec<Type>, predicates: Vec<String>) -> Self {
        Self {
            uri: uri.into(),
            types,
            predicates,
            idf: UNSET_IDF,
        }
    }

    pub fn bare(uri: impl Into<String>) -> Self {
        Self::new(uri, Vec::new(), Vec::new())
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn types(&self) -> &[Type] {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut Vec<Type> {
        &mut self.types
    }

    pub fn predicates(&self) -> &[String] {
        &self.predicates
    }

    pub fn idf(&self) -> f64 {
        self.idf
    }

    pub fn set_idf(&mut self, idf: f64) {
        self.idf = idf;
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.types == other.types
    }
}

impl Eq for Entity {}

/// Entity store keyed by KG entity identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityTable {
    entities: AHashMap<Id, Entity>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already present (the stored entity is kept).
    pub fn insert(&mut self, id: Id, entity: Entity) -> bool {
        if self.entities.contains_key(&id) {
            return false;
        }
        self.entities.insert(id, entity);
        true
    }

    pub fn remove(&mut self, id: Id) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn find(&self, id: Id) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn find_mut(&mut self, id: Id) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &Entity)> {
        self.entities.iter().map(|(id, e)| (*id, e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut Entity)> {
        self.entities.iter_mut().map(|(id, e)| (*id, e))
    }

    /// Distinct types across all entities, sorted.
    pub fn all_types(&self) -> Vec<Type> {
        self.entities
            .values()
            .flat_map(|e| e.types.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct type labels across all entities, sorted.
    pub fn all_type_labels(&self) -> Vec<String> {
        self.entities
            .values()
            .flat_map(|e| e.types.iter().map(|t| t.label.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn all_predicates(&self) -> Vec<String> {
        self.entities
            .values()
            .flat_map(|e| e.predicates.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn all_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(labels: &[&str]) -> Vec<Type> {
        labels.iter().map(|l| Type::new(*l)).collect()
    }

    #[test]
    fn test_type_ordering() {
        let a = Type::with_idf("Person", 1.0);
        let b = Type::with_idf("Person", 2.0);
        let c = Type::with_idf("Athlete", 5.0);
        assert!(a < b);
        assert!(c < a);
        assert_ne!(a, b);
        assert_eq!(a, Type::with_idf("Person", 1.0));
    }

    #[test]
    fn test_entity_equality_ignores_idf() {
        let mut a = Entity::new("http://dbpedia.org/A", types(&["T"]), vec![]);
        let b = Entity::new("http://dbpedia.org/A", types(&["T"]), vec!["p".into()]);
        a.set_idf(3.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unions_are_deduplicated() {
        let mut table = EntityTable::new();
        table.insert(
            Id::new(0),
            Entity::new("a", types(&["T1", "T2"]), vec!["p1".into()]),
        );
        table.insert(
            Id::new(1),
            Entity::new("b", types(&["T2", "T3"]), vec!["p1".into(), "p2".into()]),
        );
        assert!(!table.insert(Id::new(1), Entity::bare("c")));

        assert_eq!(table.all_types(), types(&["T1", "T2", "T3"]));
        assert_eq!(table.all_predicates(), vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(table.all_ids(), vec![Id::new(0), Id::new(1)]);
        assert_eq!(table.find(Id::new(1)).map(Entity::uri), Some("b"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut table = EntityTable::new();
        table.insert(Id::new(4), Entity::bare("x"));
        assert!(table.contains(Id::new(4)));
        assert!(table.remove(Id::new(4)).is_some());
        assert!(!table.contains(Id::new(4)));
        table.insert(Id::new(5), Entity::bare("y"));
        table.clear();
        assert!(table.is_empty());
    }
}
