//! Crate-wide configuration defaults, loadable from the environment.
//!
//! Mirrors the teacher crate's `cache.rs` convention of pairing a named env
//! var constant with a typed default constant, rather than hard-coding magic
//! numbers inline.

/// Environment variable overriding the default per-cache utilization threshold.
pub const UTILIZATION_THRESHOLD_ENV: &str = "QCACHE_UTILIZATION_THRESHOLD";
/// Default utilization threshold: a filter keeps its memoized hit set only
/// while no more than half of evaluated items are misses.
pub const DEFAULT_UTILIZATION_THRESHOLD: f64 = 0.5;

/// Environment variable overriding the default dedup policy.
pub const DEDUP_POLICY_ENV: &str = "QCACHE_DEDUP_POLICY";
/// Default dedup policy: duplicate item references are collapsed.
pub const DEFAULT_DEDUP_POLICY: bool = true;

/// Crate-wide defaults applied at `QueryCore` construction and filter
/// registration time, unless a caller overrides them explicitly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Whether duplicate item references are collapsed in query results.
    pub dedup_policy: bool,
    /// Default `utilization_threshold` passed to newly registered filter caches.
    pub utilization_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_policy: DEFAULT_DEDUP_POLICY,
            utilization_threshold: DEFAULT_UTILIZATION_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// any variable that is unset or fails to parse.
    #[must_use]
    pub fn from_env() -> Self {
        let dedup_policy = parse_dedup_policy(std::env::var(DEDUP_POLICY_ENV).ok().as_deref());
        let utilization_threshold =
            parse_utilization_threshold(std::env::var(UTILIZATION_THRESHOLD_ENV).ok().as_deref());

        Self {
            dedup_policy,
            utilization_threshold,
        }
    }

    /// Build a config with dedup on/off and the default threshold.
    #[must_use]
    pub const fn with_dedup_policy(dedup_policy: bool) -> Self {
        Self {
            dedup_policy,
            utilization_threshold: DEFAULT_UTILIZATION_THRESHOLD,
        }
    }
}

/// Parse a raw `QCACHE_DEDUP_POLICY` value, falling back to the default on
/// anything unset or unparseable. Split out from `from_env` so the parsing
/// rules are unit-testable without mutating process-wide environment state.
fn parse_dedup_policy(raw: Option<&str>) -> bool {
    raw.and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_DEDUP_POLICY)
}

/// Parse a raw `QCACHE_UTILIZATION_THRESHOLD` value, rejecting anything
/// outside `[0.0, 1.0]` in addition to unparseable input.
fn parse_utilization_threshold(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.parse::<f64>().ok())
        .filter(|t| (0.0..=1.0).contains(t))
        .unwrap_or(DEFAULT_UTILIZATION_THRESHOLD)
}
