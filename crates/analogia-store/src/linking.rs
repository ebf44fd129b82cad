use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::dictionary::IdDictionary;
use crate::error::LinkError;
use crate::ids::{Id, IdAllocator};

/// Links input mentions (e.g. wiki links) to knowledge-graph entities.
///
/// Both sides are stored prefix-stripped in their own dictionary. A mapping is
/// recorded per direction only if that direction is still unmapped, so the
/// first link wins and several mentions may resolve to the same entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLinking {
    input_prefix: String,
    kg_prefix: String,
    kg_ids: IdDictionary,
    input_ids: IdDictionary,
    input_to_kg: AHashMap<Id, Id>,
    kg_to_input: AHashMap<Id, Id>,
}

impl EntityLinking {
    pub fn new(input_prefix: impl Into<String>, kg_prefix: impl Into<String>) -> Self {
        Self {
            input_prefix: input_prefix.into(),
            kg_prefix: kg_prefix.into(),
            kg_ids: IdDictionary::ordered(),
            input_ids: IdDictionary::ordered(),
            input_to_kg: AHashMap::new(),
            kg_to_input: AHashMap::new(),
        }
    }

    pub fn input_prefix(&self) -> &str {
        &self.input_prefix
    }

    pub fn kg_prefix(&self) -> &str {
        &self.kg_prefix
    }

    fn strip<'a>(uri: &'a str, prefix: &str) -> Result<&'a str, LinkError> {
        uri.strip_prefix(prefix).ok_or_else(|| LinkError::MissingPrefix {
            uri: uri.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Input mention -> KG entity URI.
    pub fn map_to(&self, input_uri: &str) -> Result<Option<String>, LinkError> {
        let key = Self::strip(input_uri, &self.input_prefix)?;
        Ok(self
            .input_ids
            .get_id(key)
            .and_then(|id| self.input_to_kg.get(&id))
            .and_then(|kg| self.kg_uri(*kg)))
    }

    /// KG entity URI -> input mention.
    pub fn map_from(&self, kg_uri: &str) -> Result<Option<String>, LinkError> {
        let key = Self::strip(kg_uri, &self.kg_prefix)?;
        Ok(self
            .kg_ids
            .get_id(key)
            .and_then(|id| self.kg_to_input.get(&id))
            .and_then(|input| self.input_uri(*input)))
    }

    pub fn add_mapping(
        &mut self,
        input_uri: &str,
        kg_uri: &str,
        ids: &IdAllocator,
    ) -> Result<(), LinkError> {
        let input_key = Self::strip(input_uri, &self.input_prefix)?;
        let kg_key = Self::strip(kg_uri, &self.kg_prefix)?;

        let input_id = match self.input_ids.get_id(input_key) {
            Some(id) => id,
            None => {
                let id = ids.alloc();
                self.input_ids.put(input_key, id);
                id
            }
        };
        let kg_id = match self.kg_ids.get_id(kg_key) {
            Some(id) => id,
            None => {
                let id = ids.alloc();
                self.kg_ids.put(kg_key, id);
                id
            }
        };

        self.input_to_kg.entry(input_id).or_insert(kg_id);
        self.kg_to_input.entry(kg_id).or_insert(input_id);
        Ok(())
    }

    /// Identifier of a KG entity URI, `None` if unknown or not under the KG prefix.
    pub fn kg_uri_lookup(&self, kg_uri: &str) -> Option<Id> {
        kg_uri
            .strip_prefix(self.kg_prefix.as_str())
            .and_then(|key| self.kg_ids.get_id(key))
    }

    pub fn input_uri_lookup(&self, input_uri: &str) -> Option<Id> {
        input_uri
            .strip_prefix(self.input_prefix.as_str())
            .and_then(|key| self.input_ids.get_id(key))
    }

    /// Full KG URI for an identifier.
    pub fn kg_uri(&self, id: Id) -> Option<String> {
        self.kg_ids
            .get_key(id)
            .map(|key| format!("{}{}", self.kg_prefix, key))
    }

    pub fn input_uri(&self, id: Id) -> Option<String> {
        self.input_ids
            .get_key(id)
            .map(|key| format!("{}{}", self.input_prefix, key))
    }

    /// All linked KG entity identifiers. Each call starts a fresh pass.
    pub fn kg_uri_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.kg_ids.ids()
    }

    pub fn input_uri_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.input_ids.ids()
    }

    pub fn kg_entity_count(&self) -> usize {
        self.kg_ids.len()
    }

    /// Largest identifier bound on either side.
    pub fn max_id(&self) -> Option<Id> {
        self.kg_ids.max_id().max(self.input_ids.max_id())
    }

    pub fn clear(&mut self) {
        self.input_to_kg.clear();
        self.kg_to_input.clear();
        self.kg_ids.clear();
        self.input_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIKI: &str = "http://www.wikipedia.org/";
    const KG: &str = "http://dbpedia.org/";

    fn linker() -> EntityLinking {
        EntityLinking::new(WIKI, KG)
    }

    #[test]
    fn test_bidirectional_mapping() {
        let ids = IdAllocator::in_memory();
        let mut link = linker();
        link.add_mapping(
            "http://www.wikipedia.org/Berlin",
            "http://dbpedia.org/Berlin",
            &ids,
        )
        .unwrap();

        assert_eq!(
            link.map_to("http://www.wikipedia.org/Berlin").unwrap().as_deref(),
            Some("http://dbpedia.org/Berlin")
        );
        assert_eq!(
            link.map_from("http://dbpedia.org/Berlin").unwrap().as_deref(),
            Some("http://www.wikipedia.org/Berlin")
        );
        assert_eq!(link.map_to("http://www.wikipedia.org/Paris").unwrap(), None);
    }

    #[test]
    fn test_first_mapping_wins() {
        let ids = IdAllocator::in_memory();
        let mut link = linker();
        link.add_mapping("http://www.wikipedia.org/a", "http://dbpedia.org/A", &ids)
            .unwrap();
        link.add_mapping("http://www.wikipedia.org/a", "http://dbpedia.org/B", &ids)
            .unwrap();
        link.add_mapping("http://www.wikipedia.org/a2", "http://dbpedia.org/A", &ids)
            .unwrap();

        assert_eq!(
            link.map_to("http://www.wikipedia.org/a").unwrap().as_deref(),
            Some("http://dbpedia.org/A")
        );
        assert_eq!(
            link.map_to("http://www.wikipedia.org/a2").unwrap().as_deref(),
            Some("http://dbpedia.org/A")
        );
        assert_eq!(
            link.map_from("http://dbpedia.org/A").unwrap().as_deref(),
            Some("http://www.wikipedia.org/a")
        );
    }

    #[test]
    fn test_prefix_is_required() {
        let ids = IdAllocator::in_memory();
        let mut link = linker();
        let err = link
            .add_mapping("https://example.org/x", "http://dbpedia.org/X", &ids)
            .unwrap_err();
        assert!(matches!(err, LinkError::MissingPrefix { .. }));
        assert!(link.map_from("https://example.org/x").is_err());
        assert_eq!(link.kg_uri_lookup("https://example.org/x"), None);
    }

    #[test]
    fn test_id_lookups_round_trip() {
        let ids = IdAllocator::in_memory();
        let mut link = linker();
        link.add_mapping("http://www.wikipedia.org/b", "http://dbpedia.org/B", &ids)
            .unwrap();
        link.add_mapping("http://www.wikipedia.org/a", "http://dbpedia.org/A", &ids)
            .unwrap();

        let kg_id = link.kg_uri_lookup("http://dbpedia.org/A").unwrap();
        assert_eq!(link.kg_uri(kg_id).as_deref(), Some("http://dbpedia.org/A"));
        let input_id = link.input_uri_lookup("http://www.wikipedia.org/b").unwrap();
        assert_eq!(
            link.input_uri(input_id).as_deref(),
            Some("http://www.wikipedia.org/b")
        );

        let first: Vec<Id> = link.kg_uri_ids().collect();
        let second: Vec<Id> = link.kg_uri_ids().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(link.max_id(), Some(Id::new(3)));

        link.clear();
        assert_eq!(link.kg_uri_ids().count(), 0);
    }
}
