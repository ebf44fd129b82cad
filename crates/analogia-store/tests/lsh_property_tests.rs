use analogia_store::lsh::{create_keys, BucketIndex, HashFunction};
use analogia_store::similarity::{jaccard, weighted_jaccard};
use proptest::prelude::*;

fn index_strategy() -> impl Strategy<Value = (usize, usize, Vec<(Vec<usize>, u32)>)> {
    (1usize..6, 2usize..16).prop_flat_map(|(groups, group_size)| {
        let entry = (
            prop::collection::vec(0..group_size, groups),
            0u32..32,
        );
        (
            Just(groups),
            Just(group_size),
            prop::collection::vec(entry, 0..=40),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn higher_vote_yields_subset((groups, group_size, entries) in index_strategy(), query_seed in any::<u64>()) {
        let mut index: BucketIndex<u32> = BucketIndex::new(groups, group_size);
        for (i, (keys, table)) in entries.iter().enumerate() {
            index.add_all(keys, i as u32, *table);
        }
        let query: Vec<usize> = (0..groups)
            .map(|g| ((query_seed >> (g * 4)) as usize) % group_size)
            .collect();

        let mut previous = index.search(&query, 1);
        for vote in 2..=groups {
            let current = index.search(&query, vote);
            prop_assert!(current.is_subset(&previous));
            previous = current;
        }
    }

    #[test]
    fn band_slicing_covers_signature(
        signature in prop::collection::vec(any::<u64>(), 1..64),
        band_size in 1usize..12,
        buckets in 1usize..4096,
    ) {
        let keys = create_keys(&signature, band_size, buckets, HashFunction::Numeric);
        prop_assert_eq!(keys.len(), signature.len().div_ceil(band_size));
        prop_assert!(keys.iter().all(|k| *k < buckets));

        // Each key depends only on its own band.
        for (i, band) in signature.chunks(band_size).enumerate() {
            prop_assert_eq!(keys[i], HashFunction::Numeric.hash(band, buckets));
        }
    }

    #[test]
    fn jaccard_is_bounded(
        a in prop::collection::btree_set("[a-f]", 0..6),
        b in prop::collection::btree_set("[a-f]", 0..6),
    ) {
        let a: Vec<String> = a.into_iter().collect();
        let b: Vec<String> = b.into_iter().collect();
        let score = jaccard(&a, &b);
        prop_assert!((0.0..=1.0).contains(&score));
        let weighted = weighted_jaccard(&a, &b, |e: &String| Some(e.len() as f64));
        prop_assert!((0.0..=1.0).contains(&weighted));

        if !a.is_empty() {
            prop_assert_eq!(jaccard(&a, &a), 1.0);
        }
        if a.iter().all(|e| !b.contains(e)) {
            prop_assert_eq!(jaccard(&a, &b), 0.0);
        }
    }
}
