use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashSet;

use super::EntitySet;
use crate::entity::EntityTable;
use crate::error::LshError;
use crate::linking::EntityLinking;
use crate::table::Table;

/// Frequency statistics over the type or predicate sets of stored entities.
pub struct ElementStats<'a> {
    entities: &'a EntityTable,
    set: EntitySet,
}

impl<'a> ElementStats<'a> {
    pub fn new(entities: &'a EntityTable, set: EntitySet) -> Self {
        Self { entities, set }
    }

    /// Number of entities carrying each element.
    pub fn occurrences(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, entity) in self.entities.iter() {
            for element in self.set.of(entity) {
                *counts.entry(element).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Elements at or above the `percentile` of the entity-frequency ranking.
    pub fn popular_by_percentile(&self, percentile: f64) -> Result<BTreeSet<String>, LshError> {
        if !(0.0..=1.0).contains(&percentile) {
            return Err(LshError::InvalidPercentile(percentile));
        }
        let mut ranked: Vec<(String, usize)> = self.occurrences().into_iter().collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let start = (percentile * ranked.len() as f64) as usize;
        Ok(ranked.into_iter().skip(start).map(|(e, _)| e).collect())
    }

    /// Elements present in at least `fraction` of `tables`.
    ///
    /// A table "has" an element when any of its linked entities carries it.
    pub fn popular_by_table<'t, I>(
        &self,
        fraction: f64,
        tables: I,
        linker: &EntityLinking,
    ) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'t Table<String>>,
    {
        let mut per_table: BTreeMap<String, usize> = BTreeMap::new();
        let mut table_count = 0usize;
        for table in tables {
            table_count += 1;
            let mut seen: AHashSet<String> = AHashSet::new();
            for uri in table.rows().iter().flatten() {
                let Some(entity) = linker.kg_uri_lookup(uri).and_then(|id| self.entities.find(id)) else {
                    continue;
                };
                seen.extend(self.set.of(entity));
            }
            for element in seen {
                *per_table.entry(element).or_insert(0) += 1;
            }
        }
        if table_count == 0 {
            return BTreeSet::new();
        }
        per_table
            .into_iter()
            .filter(|(_, count)| *count as f64 / table_count as f64 >= fraction)
            .map(|(element, _)| element)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Type};
    use crate::ids::IdAllocator;

    fn fixture() -> (EntityLinking, EntityTable) {
        let ids = IdAllocator::in_memory();
        let mut linker = EntityLinking::new("wiki:", "kg:");
        let mut entities = EntityTable::new();
        for (name, types) in [
            ("a", vec!["Thing", "Person"]),
            ("b", vec!["Thing", "Place"]),
            ("c", vec!["Thing", "Place", "City"]),
        ] {
            let uri = format!("kg:{name}");
            linker.add_mapping(&format!("wiki:{name}"), &uri, &ids).unwrap();
            let id = linker.kg_uri_lookup(&uri).unwrap();
            entities.insert(
                id,
                Entity::new(uri, types.into_iter().map(Type::new).collect(), vec![]),
            );
        }
        (linker, entities)
    }

    #[test]
    fn test_popular_by_percentile() {
        let (_, entities) = fixture();
        let stats = ElementStats::new(&entities, EntitySet::Types);
        // City:1 Person:1 Place:2 Thing:3
        let top = stats.popular_by_percentile(0.5).unwrap();
        assert_eq!(top.into_iter().collect::<Vec<_>>(), vec!["Place", "Thing"]);
        assert_eq!(stats.popular_by_percentile(0.0).unwrap().len(), 4);
        assert!(stats.popular_by_percentile(1.5).is_err());
    }

    #[test]
    fn test_popular_by_table() {
        let (linker, entities) = fixture();
        let stats = ElementStats::new(&entities, EntitySet::Types);
        let tables = vec![
            Table::from_rows(vec![vec!["kg:a".to_string()]]),
            Table::from_rows(vec![vec!["kg:b".to_string()], vec!["kg:c".to_string()]]),
            Table::from_rows(vec![vec!["kg:unknown".to_string()]]),
        ];
        let popular = stats.popular_by_table(0.5, &tables, &linker);
        assert_eq!(popular.into_iter().collect::<Vec<_>>(), vec!["Thing"]);
        let popular = stats.popular_by_table(0.3, &tables, &linker);
        assert_eq!(popular.len(), 4);
        assert!(stats.popular_by_table(0.5, &Vec::<Table<String>>::new(), &linker).is_empty());
    }
}
