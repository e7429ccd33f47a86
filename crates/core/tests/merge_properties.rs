//! Property tests for the key-set merge

use std::collections::HashMap;

use keyrotor_core::KeySetMerger;
use keyrotor_core::model::{Algorithm, Jwk, JwkSet};
use proptest::prelude::*;

const NOW: i64 = 1_700_000_000_000;

fn algorithm() -> impl Strategy<Value = Algorithm> {
    prop::sample::select(
        Algorithm::SIGNING
            .iter()
            .chain(Algorithm::ENCRYPTION.iter())
            .copied()
            .collect::<Vec<_>>(),
    )
}

/// Keys with unique kids under `prefix`, expiring around `NOW`
fn key_set(prefix: &'static str, max: usize) -> impl Strategy<Value = JwkSet> {
    prop::collection::vec((algorithm(), -5_000i64..5_000), 0..max).prop_map(move |specs| {
        let keys = specs
            .into_iter()
            .enumerate()
            .map(|(i, (alg, offset))| Jwk::new(format!("{prefix}{i}"), alg, NOW + offset))
            .collect();
        JwkSet::new(keys).unwrap()
    })
}

/// Greedy fold over `new ++ old`: every new key, then each old key that is
/// unexpired, under quota for its algorithm and not a duplicate `kid`
fn reference_merge(new: &JwkSet, old: &JwkSet, quota: usize) -> (Vec<Jwk>, Vec<String>) {
    let mut kept: Vec<Jwk> = new.keys().to_vec();
    let mut imports = Vec::new();
    for key in old {
        let same_alg = kept.iter().filter(|k| k.alg == key.alg).count();
        if key.exp > NOW && same_alg < quota && !kept.iter().any(|k| k.kid == key.kid) {
            kept.push(key.clone());
            imports.push(key.kid.clone());
        }
    }
    (kept, imports)
}

proptest! {
    #[test]
    fn merge_matches_greedy_reference(
        new in key_set("n", 6),
        old in key_set("o", 12),
        quota in 1usize..4,
    ) {
        let (expected, expected_imports) = reference_merge(&new, &old, quota);

        let outcome = KeySetMerger::new(quota).merge(new, &old, NOW);

        prop_assert_eq!(outcome.merged.keys(), &expected[..]);
        prop_assert_eq!(outcome.import_requests, expected_imports);
    }

    #[test]
    fn merge_matches_greedy_reference_with_shared_kids(
        new in key_set("k", 4),
        old in key_set("k", 10),
        quota in 1usize..4,
    ) {
        let (expected, expected_imports) = reference_merge(&new, &old, quota);

        let outcome = KeySetMerger::new(quota).merge(new, &old, NOW);

        prop_assert_eq!(outcome.merged.keys(), &expected[..]);
        prop_assert_eq!(outcome.import_requests, expected_imports);
    }

    #[test]
    fn merged_never_contains_expired_old_keys(
        new in key_set("n", 6),
        old in key_set("o", 12),
        quota in 1usize..4,
    ) {
        let outcome = KeySetMerger::new(quota).merge(new, &old, NOW);

        for key in outcome.merged.iter().filter(|k| k.kid.starts_with('o')) {
            prop_assert!(key.exp > NOW, "expired key {} survived", key.kid);
        }
    }

    #[test]
    fn old_keys_never_push_an_algorithm_over_quota(
        new in key_set("n", 6),
        old in key_set("o", 12),
        quota in 1usize..4,
    ) {
        let new_counts: HashMap<Algorithm, usize> =
            new.iter().fold(HashMap::new(), |mut acc, k| {
                *acc.entry(k.alg).or_default() += 1;
                acc
            });

        let outcome = KeySetMerger::new(quota).merge(new, &old, NOW);

        let mut counts: HashMap<Algorithm, usize> = HashMap::new();
        for key in &outcome.merged {
            *counts.entry(key.alg).or_default() += 1;
        }
        for (alg, count) in counts {
            let floor = new_counts.get(&alg).copied().unwrap_or(0);
            prop_assert!(count <= quota.max(floor), "{alg}: {count} keys with quota {quota}");
        }
    }

    #[test]
    fn new_keys_come_first_then_old_keys_in_order(
        new in key_set("n", 6),
        old in key_set("o", 12),
    ) {
        let new_kids = new.kids();
        let old_kids = old.kids();

        let outcome = KeySetMerger::default().merge(new, &old, NOW);
        let merged = outcome.merged.kids();

        prop_assert_eq!(&merged[..new_kids.len()], &new_kids[..]);

        let carried = &merged[new_kids.len()..];
        prop_assert_eq!(carried, &outcome.import_requests[..]);
        let positions: Vec<usize> = carried
            .iter()
            .map(|kid| old_kids.iter().position(|o| o == kid).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn merge_is_deterministic(
        new in key_set("n", 6),
        old in key_set("o", 12),
    ) {
        let merger = KeySetMerger::default();
        let first = merger.merge(new.clone(), &old, NOW);
        let second = merger.merge(new, &old, NOW);
        prop_assert_eq!(first, second);
    }
}
