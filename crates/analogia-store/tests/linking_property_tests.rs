use analogia_store::ids::{FileIdStore, IdAllocator};
use analogia_store::linking::EntityLinking;
use proptest::prelude::*;
use std::collections::HashMap;

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,7}"
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn linker_is_first_write_wins_bijection(
        pairs in prop::collection::vec((name_strategy(), name_strategy()), 1..=24)
    ) {
        let ids = IdAllocator::in_memory();
        let mut linker = EntityLinking::new("http://www.wikipedia.org/", "http://dbpedia.org/");

        // Expected state: the first mapping for either side wins.
        let mut forward: HashMap<String, String> = HashMap::new();
        let mut backward: HashMap<String, String> = HashMap::new();

        for (input, kg) in &pairs {
            let input_uri = format!("http://www.wikipedia.org/{input}");
            let kg_uri = format!("http://dbpedia.org/{kg}");
            linker.add_mapping(&input_uri, &kg_uri, &ids).expect("prefixed uris");
            forward.entry(input_uri.clone()).or_insert_with(|| kg_uri.clone());
            backward.entry(kg_uri).or_insert(input_uri);
        }

        for (input_uri, kg_uri) in &forward {
            prop_assert_eq!(linker.map_to(input_uri).unwrap(), Some(kg_uri.clone()));
        }
        for (kg_uri, input_uri) in &backward {
            prop_assert_eq!(linker.map_from(kg_uri).unwrap(), Some(input_uri.clone()));
        }
        prop_assert_eq!(linker.kg_entity_count(), backward.len());
    }

    #[test]
    fn allocator_is_monotonic_across_restarts(batches in prop::collection::vec(1usize..20, 1..=5)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ids.json");

        let mut issued: Vec<u32> = Vec::new();
        for batch in &batches {
            let ids = IdAllocator::new(FileIdStore::new(&path)).expect("open id store");
            for _ in 0..*batch {
                issued.push(ids.alloc().raw());
            }
        }

        prop_assert_eq!(issued.len(), batches.iter().sum::<usize>());
        prop_assert!(issued.windows(2).all(|w| w[0] < w[1]));
    }
}
