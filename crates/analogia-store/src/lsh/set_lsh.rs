//! MinHash LSH over entity type or predicate sets.

use std::collections::{BTreeSet, HashSet};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::bucket::{create_keys, BucketIndex};
use super::element_stats::ElementStats;
use super::hash::HashFunction;
use super::shingles;
use super::{ElementSource, EntitySet, LshParams, NamedTable, TableNames};
use crate::entity::EntityTable;
use crate::error::{ConnectorError, LshError};
use crate::ids::{Id, IdAllocator};
use crate::linking::EntityLinking;
use crate::table::ColumnAggregator;

/// Construction options for a [`SetLshIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetLshConfig {
    pub set: EntitySet,
    pub shingle_size: usize,
    pub params: LshParams,
    /// Elements present in at least this fraction of tables are ignored.
    pub unimportant_fraction: f64,
}

/// Affine permutation `x -> (a·x + b) mod n` of the index space `[0, n)`.
///
/// `a` is drawn coprime to `n`, so the map is a bijection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permutation {
    a: u64,
    b: u64,
    n: u64,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Permutation {
    pub fn random(n: u64, rng: &mut StdRng) -> Self {
        if n <= 1 {
            return Self { a: 1, b: 0, n: n.max(1) };
        }
        let mut a = rng.gen_range(1..n);
        while gcd(a, n) != 1 {
            a = rng.gen_range(1..n);
        }
        let b = rng.gen_range(0..n);
        Self { a, b, n }
    }

    pub fn apply(&self, x: u64) -> u64 {
        ((self.a as u128 * x as u128 + self.b as u128) % self.n as u128) as u64
    }

    pub fn len(&self) -> u64 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

/// The immutable half of the index: everything needed to turn an element set
/// into a signature. Shared lock-free by the build workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Signer {
    set: EntitySet,
    shingle_size: usize,
    band_size: usize,
    hash: HashFunction,
    dimension: u64,
    permutations: Vec<Permutation>,
    universe: AHashMap<String, u64>,
    unimportant: AHashSet<String>,
}

impl Signer {
    /// Shingle indices of the element set, skipping unimportant and unknown elements.
    fn bit_vector<S: AsRef<str>>(&self, elements: &[S]) -> BTreeSet<u64> {
        let kept: BTreeSet<&str> = elements
            .iter()
            .map(AsRef::as_ref)
            .filter(|e| !self.unimportant.contains(*e) && self.universe.contains_key(*e))
            .collect();
        shingles::shingles(&kept, self.shingle_size)
            .into_iter()
            .filter_map(|shingle| {
                let positions = shingle.iter().map(|e| self.universe[*e]).collect();
                shingles::shingle_index(positions)
            })
            .filter(|idx| *idx < self.dimension)
            .collect()
    }

    /// MinHash signature; all zeros for an empty support.
    fn signature(&self, bits: &BTreeSet<u64>) -> Vec<u64> {
        self.permutations
            .iter()
            .map(|p| bits.iter().map(|x| p.apply(*x)).min().unwrap_or(0))
            .collect()
    }

    fn keys(&self, signature: &[u64], group_size: usize) -> Vec<usize> {
        create_keys(signature, self.band_size, group_size, self.hash)
    }
}

#[derive(Debug, Default)]
struct BuildState {
    signatures: AHashMap<Id, Vec<u64>>,
    inserts: Vec<(Vec<usize>, Id, u32)>,
}

/// Banded MinHash index from entities (by type or predicate set) to tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLshIndex {
    signer: Signer,
    aggregate_columns: bool,
    signatures: AHashMap<Id, Vec<u64>>,
    tables: TableNames,
    buckets: BucketIndex<Id>,
}

impl SetLshIndex {
    /// Build the index over `tables` (cells hold KG entity URIs).
    ///
    /// Signatures are computed in parallel on a dedicated pool; bucket
    /// insertion happens under one lock. Column-aggregation mode allocates a
    /// fresh identifier per aggregated column from `ids`.
    pub fn build<E: ElementSource>(
        config: SetLshConfig,
        tables: &[NamedTable],
        linker: &EntityLinking,
        entities: &EntityTable,
        source: &E,
        ids: &IdAllocator,
    ) -> Result<Self, LshError> {
        let params = config.params;
        params.validate()?;
        if config.shingle_size == 0 {
            return Err(LshError::ZeroShingleSize);
        }

        let elements: Vec<String> = match config.set {
            EntitySet::Types => entities.all_type_labels(),
            EntitySet::Predicates => entities.all_predicates(),
        };
        let universe: AHashMap<String, u64> = elements
            .into_iter()
            .enumerate()
            .map(|(pos, e)| (e, pos as u64))
            .collect();
        let unimportant: AHashSet<String> = ElementStats::new(entities, config.set)
            .popular_by_table(
                config.unimportant_fraction,
                tables.iter().map(|(_, t)| t),
                linker,
            )
            .into_iter()
            .collect();

        let dimension = shingles::dimension(universe.len(), config.shingle_size).ok_or(
            LshError::DimensionTooLarge {
                universe: universe.len(),
            },
        )?;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let permutations = (0..params.permutations)
            .map(|_| Permutation::random(dimension, &mut rng))
            .collect();

        let signer = Signer {
            set: config.set,
            shingle_size: config.shingle_size,
            band_size: params.band_size,
            hash: HashFunction::Numeric,
            dimension,
            permutations,
            universe,
            unimportant,
        };

        let mut names = TableNames::new();
        let table_ids: Vec<u32> = tables.iter().map(|(name, _)| names.intern(name)).collect();
        let group_size = params.buckets_per_group();

        tracing::debug!(
            set = ?config.set,
            universe = signer.universe.len(),
            unimportant = signer.unimportant.len(),
            dimension,
            tables = tables.len(),
            "building set LSH index"
        );

        let state = Mutex::new(BuildState::default());
        let pool = params.thread_pool()?;
        pool.install(|| {
            tables
                .par_iter()
                .zip(table_ids.par_iter())
                .try_for_each(|((_, table), table_id)| -> Result<(), LshError> {
                    let mut matrix: Vec<(Id, Vec<u64>)> = Vec::new();

                    if params.aggregate_columns {
                        let mut cell_elements = crate::table::Table::new();
                        for row in table.rows() {
                            let row = row
                                .iter()
                                .map(|uri| source.elements(uri, signer.set))
                                .collect::<Result<Vec<_>, ConnectorError>>()?;
                            cell_elements.add_row(row);
                        }
                        let columns = ColumnAggregator::new(&cell_elements).aggregate(
                            |cell: &Vec<String>| Some(cell.clone()),
                            |column| column.into_iter().flatten().collect::<Vec<_>>(),
                        );
                        for column in columns {
                            let bits = signer.bit_vector(&column);
                            if !bits.is_empty() {
                                matrix.push((ids.alloc(), signer.signature(&bits)));
                            }
                        }
                    } else {
                        for uri in table.rows().iter().flatten() {
                            let Some(id) = linker.kg_uri_lookup(uri) else {
                                continue;
                            };
                            let bits = signer.bit_vector(&source.elements(uri, signer.set)?);
                            if !bits.is_empty() {
                                matrix.push((id, signer.signature(&bits)));
                            }
                        }
                    }

                    let mut guard = state.lock();
                    for (id, signature) in matrix {
                        let signature = guard.signatures.entry(id).or_insert(signature).clone();
                        let keys = signer.keys(&signature, group_size);
                        guard.inserts.push((keys, id, *table_id));
                    }
                    Ok(())
                })
        })?;

        let mut state = state.into_inner();
        state
            .inserts
            .sort_unstable_by_key(|(_, id, table_id)| (*table_id, *id));
        let mut buckets = BucketIndex::new(params.bucket_groups(), group_size);
        for (keys, id, table_id) in state.inserts {
            buckets.add_all(&keys, id, table_id);
        }

        Ok(Self {
            signer,
            aggregate_columns: params.aggregate_columns,
            signatures: state.signatures,
            tables: names,
            buckets,
        })
    }

    fn band_keys(&self, signature: &[u64]) -> Vec<usize> {
        self.signer.keys(signature, self.buckets.group_size())
    }

    fn entity_signature<E: ElementSource>(
        &self,
        uri: &str,
        id: Id,
        source: &E,
    ) -> Result<Option<Vec<u64>>, ConnectorError> {
        if let Some(signature) = self.signatures.get(&id) {
            return Ok(Some(signature.clone()));
        }
        let bits = self.signer.bit_vector(&source.elements(uri, self.signer.set)?);
        if bits.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.signer.signature(&bits)))
    }

    /// Tables sharing at least `vote` bands with the entity. Entities that
    /// are unknown to the linker or have an empty support match nothing.
    pub fn search<E: ElementSource>(
        &self,
        uri: &str,
        vote: usize,
        linker: &EntityLinking,
        source: &E,
    ) -> Result<BTreeSet<String>, ConnectorError> {
        let Some(id) = linker.kg_uri_lookup(uri) else {
            return Ok(BTreeSet::new());
        };
        let Some(signature) = self.entity_signature(uri, id, source)? else {
            return Ok(BTreeSet::new());
        };
        let hits = self.buckets.search(&self.band_keys(&signature), vote);
        Ok(self.tables.resolve(&hits))
    }

    /// Search with the union of the given entities' element sets.
    pub fn aggregated_search<E: ElementSource, S: AsRef<str>>(
        &self,
        vote: usize,
        uris: &[S],
        source: &E,
    ) -> Result<BTreeSet<String>, ConnectorError> {
        let mut merged: HashSet<String> = HashSet::new();
        for uri in uris {
            merged.extend(source.elements(uri.as_ref(), self.signer.set)?);
        }
        let merged: Vec<String> = merged.into_iter().collect();
        let bits = self.signer.bit_vector(&merged);
        if bits.is_empty() {
            return Ok(BTreeSet::new());
        }
        let signature = self.signer.signature(&bits);
        let hits = self.buckets.search(&self.band_keys(&signature), vote);
        Ok(self.tables.resolve(&hits))
    }

    /// Index one more entity occurrence. Returns `false` when the entity is
    /// unknown or has an empty support.
    pub fn insert<E: ElementSource>(
        &mut self,
        uri: &str,
        table: &str,
        linker: &EntityLinking,
        source: &E,
    ) -> Result<bool, ConnectorError> {
        let Some(id) = linker.kg_uri_lookup(uri) else {
            return Ok(false);
        };
        let Some(signature) = self.entity_signature(uri, id, source)? else {
            return Ok(false);
        };
        let keys = self.band_keys(&signature);
        self.signatures.entry(id).or_insert(signature);
        let table_id = self.tables.intern(table);
        self.buckets.add_all(&keys, id, table_id);
        Ok(true)
    }

    pub fn set(&self) -> EntitySet {
        self.signer.set
    }

    pub fn shingle_size(&self) -> usize {
        self.signer.shingle_size
    }

    pub fn band_size(&self) -> usize {
        self.signer.band_size
    }

    pub fn permutation_count(&self) -> usize {
        self.signer.permutations.len()
    }

    pub fn dimension(&self) -> u64 {
        self.signer.dimension
    }

    pub fn universe_len(&self) -> usize {
        self.signer.universe.len()
    }

    pub fn is_unimportant(&self, element: &str) -> bool {
        self.signer.unimportant.contains(element)
    }

    pub fn aggregates_columns(&self) -> bool {
        self.aggregate_columns
    }

    pub fn signature(&self, id: Id) -> Option<&[u64]> {
        self.signatures.get(&id).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> &TableNames {
        &self.tables
    }

    pub fn buckets(&self) -> &BucketIndex<Id> {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Type};
    use crate::lsh::StoredElements;
    use crate::table::Table;

    struct Fixture {
        ids: IdAllocator,
        linker: EntityLinking,
        entities: EntityTable,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ids: IdAllocator::in_memory(),
                linker: EntityLinking::new("wiki:", "kg:"),
                entities: EntityTable::new(),
            }
        }

        fn entity(&mut self, name: &str, types: &[&str], predicates: &[&str]) -> String {
            let uri = format!("kg:{name}");
            self.linker
                .add_mapping(&format!("wiki:{name}"), &uri, &self.ids)
                .unwrap();
            let id = self.linker.kg_uri_lookup(&uri).unwrap();
            self.entities.insert(
                id,
                Entity::new(
                    uri.clone(),
                    types.iter().map(|t| Type::new(*t)).collect(),
                    predicates.iter().map(|p| p.to_string()).collect(),
                ),
            );
            uri
        }
    }

    fn config(set: EntitySet, shingle_size: usize) -> SetLshConfig {
        SetLshConfig {
            set,
            shingle_size,
            params: LshParams {
                permutations: 12,
                band_size: 3,
                threads: 2,
                seed: 7,
                aggregate_columns: false,
            },
            unimportant_fraction: 1.1,
        }
    }

    fn corpus(fx: &mut Fixture) -> Vec<NamedTable> {
        let berlin = fx.entity("Berlin", &["City", "Capital", "Place"], &["country", "mayor"]);
        let paris = fx.entity("Paris", &["City", "Capital", "Place"], &["country", "mayor"]);
        let messi = fx.entity("Messi", &["Athlete", "Person"], &["team", "birthPlace"]);
        vec![
            ("cities.json".to_string(), Table::from_rows(vec![vec![berlin]])),
            ("capitals.json".to_string(), Table::from_rows(vec![vec![paris]])),
            ("players.json".to_string(), Table::from_rows(vec![vec![messi]])),
        ]
    }

    #[test]
    fn test_identical_sets_collide() {
        let mut fx = Fixture::new();
        let tables = corpus(&mut fx);
        let source = StoredElements {
            linker: &fx.linker,
            entities: &fx.entities,
        };
        let index = SetLshIndex::build(
            config(EntitySet::Types, 2),
            &tables,
            &fx.linker,
            &fx.entities,
            &source,
            &fx.ids,
        )
        .unwrap();

        let hits = index.search("kg:Berlin", 4, &fx.linker, &source).unwrap();
        assert!(hits.contains("cities.json"));
        assert!(hits.contains("capitals.json"));
        assert!(!hits.contains("players.json"));
        assert_eq!(index.buckets().len(), 4);
        assert_eq!(index.buckets().group_size(), 8);
    }

    #[test]
    fn test_unknown_entity_matches_nothing() {
        let mut fx = Fixture::new();
        let tables = corpus(&mut fx);
        let source = StoredElements {
            linker: &fx.linker,
            entities: &fx.entities,
        };
        let index = SetLshIndex::build(
            config(EntitySet::Predicates, 1),
            &tables,
            &fx.linker,
            &fx.entities,
            &source,
            &fx.ids,
        )
        .unwrap();
        assert!(index.search("kg:Nobody", 1, &fx.linker, &source).unwrap().is_empty());
        assert!(index
            .aggregated_search(1, &["kg:Nobody"], &source)
            .unwrap()
            .is_empty());
        let hits = index
            .aggregated_search(index.buckets().len(), &["kg:Messi"], &source)
            .unwrap();
        assert_eq!(hits.into_iter().collect::<Vec<_>>(), vec!["players.json"]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let mut fx = Fixture::new();
        let tables = corpus(&mut fx);
        let source = StoredElements {
            linker: &fx.linker,
            entities: &fx.entities,
        };
        let build = || {
            SetLshIndex::build(
                config(EntitySet::Types, 2),
                &tables,
                &fx.linker,
                &fx.entities,
                &source,
                &fx.ids,
            )
            .unwrap()
        };
        let (a, b) = (build(), build());
        let berlin = fx.linker.kg_uri_lookup("kg:Berlin").unwrap();
        assert_eq!(a.signature(berlin), b.signature(berlin));
        assert_eq!(a.buckets(), b.buckets());
    }

    #[test]
    fn test_unimportant_elements_are_dropped() {
        let mut fx = Fixture::new();
        let tables = corpus(&mut fx);
        let source = StoredElements {
            linker: &fx.linker,
            entities: &fx.entities,
        };
        let mut cfg = config(EntitySet::Types, 1);
        cfg.unimportant_fraction = 0.6;
        let index =
            SetLshIndex::build(cfg, &tables, &fx.linker, &fx.entities, &source, &fx.ids).unwrap();
        assert!(index.is_unimportant("City"));
        assert!(!index.is_unimportant("Athlete"));
    }

    #[test]
    fn test_insert_and_column_mode() {
        let mut fx = Fixture::new();
        let tables = corpus(&mut fx);
        let rome = fx.entity("Rome", &["City", "Capital", "Place"], &[]);
        let source = StoredElements {
            linker: &fx.linker,
            entities: &fx.entities,
        };
        let mut cfg = config(EntitySet::Types, 2);
        cfg.params.aggregate_columns = true;
        let mut index =
            SetLshIndex::build(cfg, &tables, &fx.linker, &fx.entities, &source, &fx.ids).unwrap();
        assert!(index.aggregates_columns());

        assert!(index.insert(&rome, "rome.json", &fx.linker, &source).unwrap());
        assert!(!index.insert("kg:Nobody", "x.json", &fx.linker, &source).unwrap());
        let hits = index
            .search(&rome, index.buckets().len(), &fx.linker, &source)
            .unwrap();
        assert!(hits.contains("rome.json"));
        assert!(hits.contains("cities.json"));
    }

    #[test]
    fn test_rejects_bad_bands() {
        let mut fx = Fixture::new();
        let tables = corpus(&mut fx);
        let source = StoredElements {
            linker: &fx.linker,
            entities: &fx.entities,
        };
        let mut cfg = config(EntitySet::Types, 2);
        cfg.params.band_size = 5;
        let err = SetLshIndex::build(cfg, &tables, &fx.linker, &fx.entities, &source, &fx.ids)
            .unwrap_err();
        assert!(matches!(err, LshError::IndivisibleBands { .. }));

        let mut cfg = config(EntitySet::Types, 0);
        cfg.params.band_size = 3;
        let err = SetLshIndex::build(cfg, &tables, &fx.linker, &fx.entities, &source, &fx.ids)
            .unwrap_err();
        assert!(matches!(err, LshError::ZeroShingleSize));
    }

    #[test]
    fn test_permutation_is_bijection() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = Permutation::random(97, &mut rng);
        let image: BTreeSet<u64> = (0..97).map(|x| p.apply(x)).collect();
        assert_eq!(image.len(), 97);
        let p = Permutation::random(100, &mut rng);
        let image: BTreeSet<u64> = (0..100).map(|x| p.apply(x)).collect();
        assert_eq!(image.len(), 100);
    }
}
