//! Rotation policy: expiration horizon and per-algorithm retention quota

use serde::{Deserialize, Serialize};

use crate::error::{RotationError, RotationResult};

/// Rotation interval used when none is configured
pub const DEFAULT_INTERVAL_HOURS: u64 = 48;

/// Maximum number of keys of one algorithm kept in a merged set
pub const DEFAULT_QUOTA_PER_ALG: usize = 2;

const SECS_PER_HOUR: u64 = 3600;

/// How long freshly generated keys must stay valid
///
/// One full rotation cycle plus the lifetime of the longest-lived token
/// that could be signed with them (whole hours, rounded down).
pub const fn compute_expiration_hours(
    rotation_interval_hours: u64,
    token_lifetime_secs: u64,
) -> u64 {
    rotation_interval_hours.saturating_add(token_lifetime_secs / SECS_PER_HOUR)
}

/// Validated rotation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    interval_hours: u64,
    quota_per_alg: usize,
}

impl RotationPolicy {
    /// Create a policy
    ///
    /// # Errors
    ///
    /// Returns `RotationError::InvalidPolicy` if the interval or the quota is zero.
    pub fn new(interval_hours: u64, quota_per_alg: usize) -> RotationResult<Self> {
        if interval_hours == 0 {
            return Err(RotationError::InvalidPolicy {
                reason: "rotation interval must be at least 1 hour".to_string(),
            });
        }
        if quota_per_alg == 0 {
            return Err(RotationError::InvalidPolicy {
                reason: "quota per algorithm must be at least 1".to_string(),
            });
        }
        Ok(Self {
            interval_hours,
            quota_per_alg,
        })
    }

    pub fn interval_hours(&self) -> u64 {
        self.interval_hours
    }

    pub fn quota_per_alg(&self) -> usize {
        self.quota_per_alg
    }

    /// Expiration horizon for a server issuing tokens of the given lifetime
    pub fn expiration_hours(&self, token_lifetime_secs: u64) -> u64 {
        compute_expiration_hours(self.interval_hours, token_lifetime_secs)
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            interval_hours: DEFAULT_INTERVAL_HOURS,
            quota_per_alg: DEFAULT_QUOTA_PER_ALG,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(48, 3600, 49)]
    #[case(48, 3599, 48)]
    #[case(48, 0, 48)]
    #[case(24, 86_400, 48)]
    #[case(1, 7199, 2)]
    fn test_expiration_hours(#[case] interval: u64, #[case] lifetime: u64, #[case] expected: u64) {
        assert_eq!(compute_expiration_hours(interval, lifetime), expected);
    }

    #[test]
    fn test_expiration_hours_saturates() {
        assert_eq!(compute_expiration_hours(u64::MAX, 7200), u64::MAX);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RotationPolicy::new(0, 2).is_err());
        assert!(RotationPolicy::new(48, 0).is_err());

        let policy = RotationPolicy::new(12, 3).unwrap();
        assert_eq!(policy.interval_hours(), 12);
        assert_eq!(policy.quota_per_alg(), 3);
        assert_eq!(policy.expiration_hours(3600), 13);
    }

    #[test]
    fn test_default_policy() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.interval_hours(), DEFAULT_INTERVAL_HOURS);
        assert_eq!(policy.quota_per_alg(), DEFAULT_QUOTA_PER_ALG);
    }
}
