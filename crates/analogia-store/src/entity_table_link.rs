//! Inverted index from entity to the tables (and cells) mentioning it.
//!
//! Persisted through an explicit row schema ([`EntityLocationRowsV1`]) rather
//! than the nested map, so the on-disk format stays stable when the in-memory
//! layout changes.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::ids::Id;

/// `(row, column)` of a mention inside a table.
pub type Location = (u32, u32);

pub const ENTITY_LOCATION_ROWS_VERSION_V1: &str = "entity_location_rows_v1";

/// One persisted row: `(entity, table, row, column)`; `(-1, -1)` means the
/// entity is in the table but its location is unknown.
pub type LocationRow = (u32, String, i64, i64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLocationRowsV1 {
    pub version: String,
    pub directory: Option<String>,
    pub rows: Vec<LocationRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "EntityLocationRowsV1", try_from = "EntityLocationRowsV1")]
pub struct EntityTableLink {
    directory: Option<String>,
    index: AHashMap<Id, BTreeMap<String, Vec<Location>>>,
}

impl EntityTableLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(&self) -> Option<&str> {
        self.directory.as_deref()
    }

    pub fn set_directory(&mut self, directory: impl Into<String>) {
        self.directory = Some(directory.into());
    }

    /// Register `id` in each table (no locations yet). Existing locations are kept.
    pub fn insert<S: AsRef<str>>(&mut self, id: Id, tables: &[S]) {
        let entry = self.index.entry(id).or_default();
        for table in tables {
            entry.entry(table.as_ref().to_string()).or_default();
        }
    }

    /// Append locations, creating the entity/table entries as needed.
    pub fn add_location(&mut self, id: Id, table: &str, locations: &[Location]) {
        self.index
            .entry(id)
            .or_default()
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(locations);
    }

    /// Tables mentioning `id`, sorted. Unknown ids yield an empty list.
    pub fn find(&self, id: Id) -> Vec<String> {
        self.index
            .get(&id)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_locations(&self, id: Id, table: &str) -> Option<&[Location]> {
        self.index
            .get(&id)
            .and_then(|tables| tables.get(table))
            .map(Vec::as_slice)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.index.contains_key(&id)
    }

    pub fn remove(&mut self, id: Id) -> bool {
        self.index.remove(&id).is_some()
    }

    /// Entities mentioned in `table`. Scans the whole index.
    pub fn table_to_entities(&self, table: &str) -> BTreeSet<Id> {
        self.index
            .iter()
            .filter(|(_, tables)| tables.contains_key(table))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every table name referenced by the index.
    pub fn tables(&self) -> BTreeSet<String> {
        self.index
            .values()
            .flat_map(|tables| tables.keys().cloned())
            .collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.index.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }

    /// Flatten into persisted rows, sorted by entity then table.
    pub fn to_rows(&self) -> EntityLocationRowsV1 {
        let mut entries: Vec<_> = self.index.iter().collect();
        entries.sort_unstable_by_key(|(id, _)| **id);

        let mut rows = Vec::new();
        for (id, tables) in entries {
            for (table, locations) in tables {
                if locations.is_empty() {
                    rows.push((id.raw(), table.clone(), -1, -1));
                    continue;
                }
                for (row, column) in locations {
                    rows.push((id.raw(), table.clone(), *row as i64, *column as i64));
                }
            }
        }

        EntityLocationRowsV1 {
            version: ENTITY_LOCATION_ROWS_VERSION_V1.to_string(),
            directory: self.directory.clone(),
            rows,
        }
    }

    pub fn from_rows(rows: EntityLocationRowsV1) -> Result<Self, SchemaError> {
        if rows.version != ENTITY_LOCATION_ROWS_VERSION_V1 {
            return Err(SchemaError::Version {
                found: rows.version,
                expected: ENTITY_LOCATION_ROWS_VERSION_V1,
            });
        }

        let mut link = Self {
            directory: rows.directory,
            index: AHashMap::new(),
        };
        for (index, (id, table, row, column)) in rows.rows.into_iter().enumerate() {
            let id = Id::new(id);
            match (u32::try_from(row), u32::try_from(column)) {
                (Ok(r), Ok(c)) => link.add_location(id, &table, &[(r, c)]),
                _ if row == -1 && column == -1 => link.insert(id, &[table]),
                _ => return Err(SchemaError::PartialLocation { index, row, column }),
            }
        }
        Ok(link)
    }
}

impl From<EntityTableLink> for EntityLocationRowsV1 {
    fn from(link: EntityTableLink) -> Self {
        link.to_rows()
    }
}

impl TryFrom<EntityLocationRowsV1> for EntityTableLink {
    type Error = SchemaError;

    fn try_from(rows: EntityLocationRowsV1) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}
