//! Provider credential rotation.
//!
//! Tracks an ordered list of interchangeable primary credentials plus an
//! optional secondary-family credential. Rate-limit and quota flags are
//! sticky for the process lifetime — free-tier quota exhaustion does not
//! heal, so a flagged key is never retried until restart. When every
//! credential is flagged, [`ProviderPool::acquire`] reports exhaustion and
//! the engine degrades to a pipeline miss.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::ProviderError;

/// Why a provider call failed, as relevant to rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// Temporary in principle, but treated as sticky here.
    RateLimited,
    /// Free-tier quota gone for the run.
    QuotaExhausted,
}

#[derive(Debug, Clone)]
struct Credential {
    identifier: String,
    request_count: u64,
    error_count: u64,
    rate_limited: bool,
    quota_exhausted: bool,
}

impl Credential {
    fn new(identifier: String) -> Self {
        Self {
            identifier,
            request_count: 0,
            error_count: 0,
            rate_limited: false,
            quota_exhausted: false,
        }
    }

    fn usable(&self) -> bool {
        !self.rate_limited && !self.quota_exhausted
    }
}

/// Read-only view of one credential's counters, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub identifier: String,
    pub request_count: u64,
    pub error_count: u64,
    pub rate_limited: bool,
    pub quota_exhausted: bool,
}

struct PoolState {
    primaries: Vec<Credential>,
    secondary: Option<Credential>,
    /// Rotation cursor over `primaries`.
    cursor: usize,
}

/// Thread-safe credential table with rotation.
///
/// Safe for concurrent `acquire`/`record_success`/`record_failure`; a plain
/// mutex is enough at this request volume.
pub struct ProviderPool {
    state: Mutex<PoolState>,
}

impl ProviderPool {
    /// Build a pool from primary credential identifiers and an optional
    /// secondary-family credential.
    pub fn new(primaries: Vec<String>, secondary: Option<String>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                primaries: primaries.into_iter().map(Credential::new).collect(),
                secondary: secondary.map(Credential::new),
                cursor: 0,
            }),
        }
    }

    /// Return the identifier of the first usable primary credential,
    /// advancing the rotation cursor past it; fall back to the secondary if
    /// every primary is flagged.
    pub fn acquire(&self) -> Result<String, ProviderError> {
        let mut state = self.state.lock().expect("provider pool poisoned");

        let count = state.primaries.len();
        for offset in 0..count {
            let idx = (state.cursor + offset) % count;
            if state.primaries[idx].usable() {
                state.cursor = (idx + 1) % count;
                let id = state.primaries[idx].identifier.clone();
                debug!(credential = %id, "Acquired primary credential");
                return Ok(id);
            }
        }

        if let Some(secondary) = &state.secondary {
            if secondary.usable() {
                debug!(credential = %secondary.identifier, "All primaries flagged, using secondary");
                return Ok(secondary.identifier.clone());
            }
        }

        warn!("All provider credentials exhausted");
        Err(ProviderError::Exhausted)
    }

    /// Record a successful request on `credential`.
    pub fn record_success(&self, credential: &str) {
        let mut state = self.state.lock().expect("provider pool poisoned");
        if let Some(c) = Self::find(&mut state, credential) {
            c.request_count += 1;
        }
    }

    /// Record a failed request. `signal` sets the matching sticky flag;
    /// plain failures only bump the error counter.
    pub fn record_failure(&self, credential: &str, signal: Option<FailureSignal>) {
        let mut state = self.state.lock().expect("provider pool poisoned");
        let Some(c) = Self::find(&mut state, credential) else {
            return;
        };
        c.error_count += 1;
        match signal {
            Some(FailureSignal::RateLimited) => {
                warn!(credential = %c.identifier, "Credential rate limited (sticky)");
                c.rate_limited = true;
            }
            Some(FailureSignal::QuotaExhausted) => {
                warn!(credential = %c.identifier, "Credential quota exhausted (sticky)");
                c.quota_exhausted = true;
            }
            None => {}
        }
    }

    /// True if at least one credential is still usable.
    pub fn has_capacity(&self) -> bool {
        let state = self.state.lock().expect("provider pool poisoned");
        state.primaries.iter().any(Credential::usable)
            || state.secondary.as_ref().is_some_and(Credential::usable)
    }

    /// Snapshot all credentials (primaries in order, then the secondary).
    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let state = self.state.lock().expect("provider pool poisoned");
        state
            .primaries
            .iter()
            .chain(state.secondary.iter())
            .map(|c| CredentialSnapshot {
                identifier: c.identifier.clone(),
                request_count: c.request_count,
                error_count: c.error_count,
                rate_limited: c.rate_limited,
                quota_exhausted: c.quota_exhausted,
            })
            .collect()
    }

    fn find<'a>(state: &'a mut PoolState, credential: &str) -> Option<&'a mut Credential> {
        state
            .primaries
            .iter_mut()
            .chain(state.secondary.iter_mut())
            .find(|c| c.identifier == credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(n: usize, secondary: bool) -> ProviderPool {
        ProviderPool::new(
            (1..=n).map(|i| format!("key-{i}")).collect(),
            secondary.then(|| "secondary".to_string()),
        )
    }

    #[test]
    fn acquire_rotates_through_primaries() {
        let pool = pool_of(3, false);
        assert_eq!(pool.acquire().unwrap(), "key-1");
        assert_eq!(pool.acquire().unwrap(), "key-2");
        assert_eq!(pool.acquire().unwrap(), "key-3");
        assert_eq!(pool.acquire().unwrap(), "key-1");
    }

    #[test]
    fn flagged_credentials_are_skipped() {
        let pool = pool_of(3, false);
        pool.record_failure("key-1", Some(FailureSignal::RateLimited));
        pool.record_failure("key-2", Some(FailureSignal::RateLimited));
        assert_eq!(pool.acquire().unwrap(), "key-3");
        // Sticky: still key-3 on the next round.
        assert_eq!(pool.acquire().unwrap(), "key-3");
    }

    #[test]
    fn secondary_used_when_primaries_exhausted() {
        let pool = pool_of(3, true);
        for key in ["key-1", "key-2", "key-3"] {
            pool.record_failure(key, Some(FailureSignal::QuotaExhausted));
        }
        assert_eq!(pool.acquire().unwrap(), "secondary");
    }

    #[test]
    fn full_exhaustion_reports_error() {
        let pool = pool_of(2, true);
        pool.record_failure("key-1", Some(FailureSignal::QuotaExhausted));
        pool.record_failure("key-2", Some(FailureSignal::RateLimited));
        pool.record_failure("secondary", Some(FailureSignal::QuotaExhausted));
        assert!(matches!(pool.acquire(), Err(ProviderError::Exhausted)));
        assert!(!pool.has_capacity());
    }

    #[test]
    fn plain_failure_does_not_flag() {
        let pool = pool_of(1, false);
        pool.record_failure("key-1", None);
        assert_eq!(pool.acquire().unwrap(), "key-1");
        let snap = &pool.snapshot()[0];
        assert_eq!(snap.error_count, 1);
        assert!(!snap.rate_limited && !snap.quota_exhausted);
    }

    #[test]
    fn success_increments_request_count() {
        let pool = pool_of(1, false);
        let key = pool.acquire().unwrap();
        pool.record_success(&key);
        pool.record_success(&key);
        assert_eq!(pool.snapshot()[0].request_count, 2);
    }

    #[test]
    fn unknown_credential_is_ignored() {
        let pool = pool_of(1, false);
        pool.record_failure("nope", Some(FailureSignal::RateLimited));
        assert_eq!(pool.acquire().unwrap(), "key-1");
    }
}
