//! Typed lookups of the environment variables the controllers consume.
//!
//! Each value is read once at startup and handed around as a typed value;
//! nothing below the binaries touches `std::env` again.

use std::time::Duration;

/// Identity of the workload pod a volume sidecar is bound to.
pub const CSTOR_VOLUME_ID: &str = "OPENEBS_IO_CSTOR_VOLUME_ID";

/// Identity of the pool a pool manager is bound to.
pub const CSTOR_POOL_ID: &str = "OPENEBS_IO_CSTOR_ID";

/// Informer resync interval in seconds.
pub const RESYNC_INTERVAL: &str = "RESYNC_INTERVAL";

/// Resync interval used when `RESYNC_INTERVAL` is absent, zero or not a number.
pub const DEFAULT_RESYNC: Duration = Duration::from_secs(30);

/// Read a variable, treating an empty value as unset.
pub fn lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the informer resync interval from `RESYNC_INTERVAL`.
pub fn resync_interval(fallback: Duration) -> Duration {
    parse_resync(lookup(RESYNC_INTERVAL).as_deref(), fallback)
}

/// Parse a resync value in seconds. Absent, zero and non-numeric values
/// all yield `fallback`.
pub fn parse_resync(raw: Option<&str>, fallback: Duration) -> Duration {
    match raw.map(|r| r.trim().parse::<u64>()) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            tracing::warn!(
                value = raw.unwrap_or_default(),
                fallback_secs = fallback.as_secs(),
                "Invalid resync interval in environment, using default"
            );
            fallback
        }
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resync() {
        let fallback = Duration::from_secs(30);
        assert_eq!(parse_resync(None, fallback), fallback);
        assert_eq!(parse_resync(Some("0"), fallback), fallback);
        assert_eq!(parse_resync(Some("abc"), fallback), fallback);
        assert_eq!(parse_resync(Some("-4"), fallback), fallback);
        assert_eq!(parse_resync(Some(" 45 "), fallback), Duration::from_secs(45));
    }
}
