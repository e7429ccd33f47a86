//! Key-set merge
//!
//! Combines a freshly generated key set with the still-valid keys of the
//! previous rotation. The policy is greedy and order-dependent:
//!
//! 1. The result starts as the new keys, in their order.
//! 2. Old keys are visited in their order. An old key is dropped when it is
//!    expired (`exp <= now`), when the result already holds `quota` keys of
//!    its algorithm, or when its `kid` is already present.
//! 3. A surviving old key is appended and its `kid` is emitted as an import
//!    request: the caller must copy that alias from the old keystore into
//!    the new one.
//!
//! New keys therefore always win over old keys of the same algorithm, and
//! among old keys earlier ones win.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Algorithm, JwkSet};
use crate::policy::DEFAULT_QUOTA_PER_ALG;

/// Result of a merge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    /// New keys followed by surviving old keys
    pub merged: JwkSet,

    /// `kid`s whose private material must be imported from the old keystore,
    /// in merge order
    pub import_requests: Vec<String>,
}

/// Merges key sets under an expiry rule and a per-algorithm quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySetMerger {
    quota_per_alg: usize,
}

impl Default for KeySetMerger {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_PER_ALG)
    }
}

impl KeySetMerger {
    pub fn new(quota_per_alg: usize) -> Self {
        Self { quota_per_alg }
    }

    pub fn quota_per_alg(&self) -> usize {
        self.quota_per_alg
    }

    /// Merge `old_keys` into `new_keys` as of `now_millis`
    pub fn merge(&self, new_keys: JwkSet, old_keys: &JwkSet, now_millis: i64) -> MergeOutcome {
        let mut counts: HashMap<Algorithm, usize> = HashMap::new();
        for key in &new_keys {
            *counts.entry(key.alg).or_default() += 1;
        }

        let mut merged = new_keys;
        let mut import_requests = Vec::new();

        for key in old_keys {
            if key.is_expired_at(now_millis) {
                tracing::debug!(
                    kid = %key.kid,
                    alg = %key.alg,
                    exp = key.exp,
                    "dropping expired key"
                );
                continue;
            }

            let count = counts.entry(key.alg).or_default();
            if *count >= self.quota_per_alg {
                tracing::debug!(
                    kid = %key.kid,
                    alg = %key.alg,
                    "dropping key, algorithm quota reached"
                );
                continue;
            }

            if merged.push(key.clone()).is_err() {
                tracing::warn!(kid = %key.kid, "dropping old key, kid already present in new set");
                continue;
            }

            *count += 1;
            import_requests.push(key.kid.clone());
        }

        MergeOutcome {
            merged,
            import_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Jwk;

    const NOW: i64 = 1_700_000_000_000;
    const FUTURE: i64 = NOW + 3_600_000;
    const FUTURE2: i64 = NOW + 7_200_000;
    const PAST: i64 = NOW - 1;

    fn set(keys: &[(&str, Algorithm, i64)]) -> JwkSet {
        JwkSet::new(
            keys.iter()
                .map(|(kid, alg, exp)| Jwk::new(*kid, *alg, *exp))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_quota_and_expiry_scenario() {
        let old = set(&[
            ("k1", Algorithm::Rs256, FUTURE),
            ("k2", Algorithm::Rs256, FUTURE),
            ("k3", Algorithm::Es256, PAST),
        ]);
        let new = set(&[("k4", Algorithm::Rs256, FUTURE2)]);

        let outcome = KeySetMerger::new(2).merge(new, &old, NOW);

        assert_eq!(outcome.merged.kids(), vec!["k4", "k1"]);
        assert_eq!(outcome.import_requests, vec!["k1"]);
    }

    #[test]
    fn test_empty_old_keys_is_identity() {
        let new = set(&[
            ("a", Algorithm::Rs256, FUTURE),
            ("b", Algorithm::RsaOaep, FUTURE),
        ]);

        let outcome = KeySetMerger::default().merge(new.clone(), &JwkSet::default(), NOW);

        assert_eq!(outcome.merged, new);
        assert!(outcome.import_requests.is_empty());
    }

    #[test]
    fn test_algorithm_absent_from_new_keys_still_capped() {
        let old = set(&[
            ("p1", Algorithm::Ps512, FUTURE),
            ("p2", Algorithm::Ps512, FUTURE),
            ("p3", Algorithm::Ps512, FUTURE),
        ]);
        let new = set(&[("r1", Algorithm::Rs256, FUTURE)]);

        let outcome = KeySetMerger::new(2).merge(new, &old, NOW);

        assert_eq!(outcome.merged.kids(), vec!["r1", "p1", "p2"]);
        assert_eq!(outcome.import_requests, vec!["p1", "p2"]);
    }

    #[test]
    fn test_key_expiring_exactly_now_is_dropped() {
        let old = set(&[("edge", Algorithm::Es384, NOW)]);

        let outcome = KeySetMerger::default().merge(JwkSet::default(), &old, NOW);

        assert!(outcome.merged.is_empty());
        assert!(outcome.import_requests.is_empty());
    }

    #[test]
    fn test_earlier_old_keys_win() {
        let old = set(&[
            ("older", Algorithm::Es256, FUTURE2),
            ("newer", Algorithm::Es256, FUTURE),
        ]);
        let new = set(&[("fresh", Algorithm::Es256, FUTURE2)]);

        let outcome = KeySetMerger::new(2).merge(new, &old, NOW);

        assert_eq!(outcome.merged.kids(), vec!["fresh", "older"]);
    }

    #[test]
    fn test_old_key_with_colliding_kid_is_not_imported() {
        let old = set(&[("same", Algorithm::Rs256, FUTURE)]);
        let new = set(&[("same", Algorithm::Es256, FUTURE)]);

        let outcome = KeySetMerger::new(2).merge(new, &old, NOW);

        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged.keys()[0].alg, Algorithm::Es256);
        assert!(outcome.import_requests.is_empty());
    }

    #[test]
    fn test_quota_one_keeps_only_new_keys() {
        let old = set(&[("o1", Algorithm::Rs256, FUTURE), ("o2", Algorithm::Es256, FUTURE)]);
        let new = set(&[("n1", Algorithm::Rs256, FUTURE)]);

        let outcome = KeySetMerger::new(1).merge(new, &old, NOW);

        assert_eq!(outcome.merged.kids(), vec!["n1", "o2"]);
        assert_eq!(outcome.import_requests, vec!["o2"]);
    }
}
