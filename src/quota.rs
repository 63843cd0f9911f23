//! Quota and expiry arithmetic
//!
//! Pure functions only. Panels store expiry as a raw integer whose unit is
//! not documented: X-UI forks use milliseconds, Marzban uses seconds, and
//! some forks mix them. The unit of a value read from the panel is detected
//! once and the write-back of the same operation uses that unit.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Raw expiry values above this are milliseconds
pub const DEFAULT_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const SECS_PER_DAY: i64 = 86_400;

// ============================================================================
// Expiry Units
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryUnit {
    Seconds,
    Millis,
}

impl ExpiryUnit {
    pub fn per_day(&self) -> i64 {
        match self {
            ExpiryUnit::Seconds => SECS_PER_DAY,
            ExpiryUnit::Millis => SECS_PER_DAY * 1_000,
        }
    }

    pub fn now(&self, now: DateTime<Utc>) -> i64 {
        match self {
            ExpiryUnit::Seconds => now.timestamp(),
            ExpiryUnit::Millis => now.timestamp_millis(),
        }
    }

    /// Converts a raw value in this unit to seconds
    pub fn to_seconds(&self, raw: i64) -> i64 {
        match self {
            ExpiryUnit::Seconds => raw,
            ExpiryUnit::Millis => raw / 1_000,
        }
    }
}

impl fmt::Display for ExpiryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryUnit::Seconds => write!(f, "s"),
            ExpiryUnit::Millis => write!(f, "ms"),
        }
    }
}

/// Tunable unit detection and verification tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub millis_threshold: i64,
    pub tolerance_secs: i64,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            millis_threshold: DEFAULT_MILLIS_THRESHOLD,
            tolerance_secs: 2,
        }
    }
}

impl ExpiryPolicy {
    /// Detects the unit of a raw expiry value.
    ///
    /// Values that carry no magnitude (0 = never, negative = delayed start)
    /// fall back to the panel's native unit.
    pub fn detect_unit(&self, raw: i64, native: ExpiryUnit) -> ExpiryUnit {
        if raw <= 0 {
            return native;
        }
        if self.is_near_boundary(raw) {
            warn!(
                "Expiry value {} is within one order of magnitude of the unit threshold {}",
                raw, self.millis_threshold
            );
        }
        if raw > self.millis_threshold {
            ExpiryUnit::Millis
        } else {
            ExpiryUnit::Seconds
        }
    }

    fn is_near_boundary(&self, raw: i64) -> bool {
        let lower = self.millis_threshold / 10;
        let upper = self.millis_threshold.saturating_mul(10);
        raw >= lower && raw < upper
    }

    /// Normalizes a raw expiry to seconds, keeping the 0/negative sentinels
    pub fn seconds(&self, raw: i64, native: ExpiryUnit) -> i64 {
        if raw <= 0 {
            return raw;
        }
        self.detect_unit(raw, native).to_seconds(raw)
    }
}

// ============================================================================
// Extension
// ============================================================================

/// Current allowance of a client as read from the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub quota_bytes: u64,
    pub expiry: i64,
    /// Unit the panel uses when the value itself gives no hint
    pub native_unit: ExpiryUnit,
}

/// Amount to add on renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    pub quota_bytes: u64,
    pub duration_days: u32,
}

/// Computed post-renewal values, in the unit detected on read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub quota_bytes: u64,
    pub expiry: i64,
    pub unit: ExpiryUnit,
}

impl Target {
    /// Exact quota match and expiry within the policy tolerance
    pub fn is_met_by(&self, quota_bytes: u64, expiry: i64, policy: &ExpiryPolicy) -> bool {
        if quota_bytes != self.quota_bytes {
            return false;
        }
        if self.expiry <= 0 || expiry <= 0 {
            return expiry == self.expiry;
        }
        let wanted = self.unit.to_seconds(self.expiry);
        let actual = policy.seconds(expiry, self.unit);
        (wanted - actual).abs() <= policy.tolerance_secs
    }
}

/// Extends an allowance by a plan delta.
///
/// Quota 0 is unlimited and stays 0. A zero duration leaves the expiry
/// untouched; otherwise the new expiry is `max(current, now) + days`, so
/// expired, never-expiring and not-yet-started clients restart from now.
pub fn extend(
    current: Allowance,
    delta: Extension,
    now: DateTime<Utc>,
    policy: &ExpiryPolicy,
) -> Target {
    let unit = policy.detect_unit(current.expiry, current.native_unit);

    let quota_bytes = if current.quota_bytes == 0 {
        0
    } else {
        current.quota_bytes.saturating_add(delta.quota_bytes)
    };

    let expiry = if delta.duration_days == 0 {
        current.expiry
    } else {
        let base = current.expiry.max(unit.now(now));
        base.saturating_add(i64::from(delta.duration_days) * unit.per_day())
    };

    Target {
        quota_bytes,
        expiry,
        unit,
    }
}

/// Expiry for a newly created client; 0 days means never
pub fn initial_expiry(duration_days: u32, now: DateTime<Utc>, unit: ExpiryUnit) -> i64 {
    if duration_days == 0 {
        return 0;
    }
    unit.now(now) + i64::from(duration_days) * unit.per_day()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn allowance(quota_bytes: u64, expiry: i64) -> Allowance {
        Allowance {
            quota_bytes,
            expiry,
            native_unit: ExpiryUnit::Millis,
        }
    }

    #[test]
    fn test_unit_boundary() {
        let policy = ExpiryPolicy::default();
        assert_eq!(
            policy.detect_unit(9_999_999_999, ExpiryUnit::Millis),
            ExpiryUnit::Seconds
        );
        assert_eq!(
            policy.detect_unit(100_000_000_000, ExpiryUnit::Seconds),
            ExpiryUnit::Millis
        );
        assert_eq!(
            policy.detect_unit(100_000_000_001, ExpiryUnit::Seconds),
            ExpiryUnit::Millis
        );
    }

    #[test]
    fn test_unit_sentinels_use_native() {
        let policy = ExpiryPolicy::default();
        assert_eq!(policy.detect_unit(0, ExpiryUnit::Millis), ExpiryUnit::Millis);
        assert_eq!(
            policy.detect_unit(-86_400_000, ExpiryUnit::Seconds),
            ExpiryUnit::Seconds
        );
    }

    #[test]
    fn test_configurable_threshold() {
        let policy = ExpiryPolicy {
            millis_threshold: 1_000,
            tolerance_secs: 0,
        };
        assert_eq!(policy.detect_unit(1_001, ExpiryUnit::Seconds), ExpiryUnit::Millis);
        assert_eq!(policy.detect_unit(999, ExpiryUnit::Millis), ExpiryUnit::Seconds);
    }

    #[test]
    fn test_renew_five_gib_with_ten_gb() {
        let policy = ExpiryPolicy::default();
        let target = extend(
            allowance(5_368_709_120, 0),
            Extension {
                quota_bytes: 10_737_418_240,
                duration_days: 0,
            },
            now(),
            &policy,
        );
        assert_eq!(target.quota_bytes, 16_106_127_360);
        assert_eq!(target.expiry, 0);
    }

    #[test]
    fn test_unlimited_quota_is_absorbing() {
        let policy = ExpiryPolicy::default();
        for delta in [0, 1, 10_737_418_240, u64::MAX] {
            let target = extend(
                allowance(0, 0),
                Extension {
                    quota_bytes: delta,
                    duration_days: 30,
                },
                now(),
                &policy,
            );
            assert_eq!(target.quota_bytes, 0);
        }
    }

    #[test]
    fn test_quota_addition_is_exact() {
        let policy = ExpiryPolicy::default();
        for (quota, delta) in [(1, 0), (1, 1), (5_000, 7_000), (u64::MAX - 5, 3)] {
            let target = extend(
                allowance(quota, 0),
                Extension {
                    quota_bytes: delta,
                    duration_days: 0,
                },
                now(),
                &policy,
            );
            assert_eq!(target.quota_bytes, quota + delta);
        }
    }

    #[test]
    fn test_expiry_never_regresses() {
        let policy = ExpiryPolicy::default();
        let now_ms = now().timestamp_millis();
        let now_s = now().timestamp();
        let cases = [
            (0, now_ms),
            (-86_400_000, now_ms),
            (now_ms - 5 * 86_400_000, now_ms),
            (now_ms + 5 * 86_400_000, now_ms + 5 * 86_400_000),
            (now_s - 100, now_s),
            (now_s + 1_000, now_s + 1_000),
        ];
        for (expiry, floor) in cases {
            for days in [1, 30, 365] {
                let target = extend(
                    allowance(1, expiry),
                    Extension {
                        quota_bytes: 0,
                        duration_days: days,
                    },
                    now(),
                    &policy,
                );
                assert!(target.expiry >= expiry.max(floor));
                assert!(target.expiry > floor);
            }
        }
    }

    #[test]
    fn test_unit_is_preserved_on_write() {
        let policy = ExpiryPolicy::default();
        let future_s = now().timestamp() + 86_400;
        let target = extend(
            allowance(1, future_s),
            Extension {
                quota_bytes: 0,
                duration_days: 2,
            },
            now(),
            &policy,
        );
        assert_eq!(target.unit, ExpiryUnit::Seconds);
        assert_eq!(target.expiry, future_s + 2 * 86_400);

        let future_ms = now().timestamp_millis() + 86_400_000;
        let target = extend(
            allowance(1, future_ms),
            Extension {
                quota_bytes: 0,
                duration_days: 2,
            },
            now(),
            &policy,
        );
        assert_eq!(target.unit, ExpiryUnit::Millis);
        assert_eq!(target.expiry, future_ms + 2 * 86_400_000);
    }

    #[test]
    fn test_zero_duration_keeps_expiry() {
        let policy = ExpiryPolicy::default();
        let target = extend(
            allowance(1, 42),
            Extension {
                quota_bytes: 5,
                duration_days: 0,
            },
            now(),
            &policy,
        );
        assert_eq!(target.expiry, 42);
        assert_eq!(target.quota_bytes, 6);
    }

    #[test]
    fn test_initial_expiry() {
        assert_eq!(initial_expiry(0, now(), ExpiryUnit::Millis), 0);
        assert_eq!(
            initial_expiry(30, now(), ExpiryUnit::Millis),
            now().timestamp_millis() + 30 * 86_400_000
        );
        assert_eq!(
            initial_expiry(1, now(), ExpiryUnit::Seconds),
            now().timestamp() + 86_400
        );
    }

    #[test]
    fn test_target_tolerance() {
        let policy = ExpiryPolicy::default();
        let target = Target {
            quota_bytes: 10,
            expiry: 1_800_000_000_000,
            unit: ExpiryUnit::Millis,
        };
        assert!(target.is_met_by(10, 1_800_000_000_000, &policy));
        assert!(target.is_met_by(10, 1_800_000_001_500, &policy));
        assert!(target.is_met_by(10, 1_800_000_001, &policy));
        assert!(!target.is_met_by(10, 1_800_000_010_000, &policy));
        assert!(!target.is_met_by(11, 1_800_000_000_000, &policy));
    }

    #[test]
    fn test_target_never_expiring() {
        let policy = ExpiryPolicy::default();
        let target = Target {
            quota_bytes: 0,
            expiry: 0,
            unit: ExpiryUnit::Millis,
        };
        assert!(target.is_met_by(0, 0, &policy));
        assert!(!target.is_met_by(0, 1_800_000_000_000, &policy));
    }
}
