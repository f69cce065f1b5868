//! Rate-limited metadata client with bounded retry.
//!
//! Every request goes through the shared [`Pacer`]. Transient failures are
//! retried with exponential back-off plus jitter; anything else fails fast.
//! Callers always get a [`LookupOutcome`], never a panic.

use governor::clock::DefaultClock;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::config::RetrySettings;
use crate::models::ArtistRecord;
use crate::musicbrainz::{ArtistSearch, ServiceError};
use crate::pacer::{Pacer, Wait};

/// Why a lookup produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("gave up after {attempts} attempts, last error: {last}")]
    Exhausted { attempts: u32, last: ServiceError },
    #[error("request rejected: {0}")]
    Rejected(ServiceError),
}

/// Result of resolving one artist name.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(ArtistRecord),
    /// The service answered and had no candidate.
    NotFound,
    Failed(LookupError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Back-off after the `attempt`-th failure (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Client for the metadata service, shared by the builder and the cleaner.
pub struct MetadataClient<S: ArtistSearch, C: Wait = DefaultClock> {
    service: S,
    pacer: Arc<Pacer<C>>,
    retry: RetryPolicy,
    rng: Mutex<StdRng>,
}

impl<S: ArtistSearch, C: Wait> MetadataClient<S, C> {
    pub fn new(service: S, pacer: Arc<Pacer<C>>, retry: RetryPolicy) -> Self {
        Self {
            service,
            pacer,
            retry,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fix the jitter sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn pacer(&self) -> &Arc<Pacer<C>> {
        &self.pacer
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Resolve `name` to the service's top-ranked artist.
    ///
    /// No similarity threshold is applied here; deciding whether the
    /// candidate is good enough is the caller's job.
    pub fn lookup_artist(&self, name: &str) -> LookupOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.pacer.acquire();
            match self.service.search_artist(name) {
                Ok(candidates) => {
                    return match top_candidate(candidates) {
                        Some(record) => LookupOutcome::Found(record),
                        None => LookupOutcome::NotFound,
                    };
                }
                Err(e) if !e.is_transient() => {
                    warn!("Lookup for {:?} rejected: {}", name, e);
                    return LookupOutcome::Failed(LookupError::Rejected(e));
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    warn!("Lookup for {:?} failed after {} attempts: {}", name, attempt, e);
                    return LookupOutcome::Failed(LookupError::Exhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt) + self.jitter();
                    debug!(
                        "Lookup for {:?} attempt {} failed ({}), retrying in {:?}",
                        name, attempt, e, delay
                    );
                    self.pacer.wait(delay);
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        let base_ms = self.retry.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_millis(rng.gen_range(0..base_ms))
    }
}

/// Highest relevance wins; ties go to the earlier position.
fn top_candidate(candidates: Vec<ArtistRecord>) -> Option<ArtistRecord> {
    let mut best: Option<ArtistRecord> = None;
    for candidate in candidates {
        match &best {
            Some(current) if current.relevance >= candidate.relevance => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;
    use std::collections::{HashMap, VecDeque};
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn record(name: &str, id: &str, relevance: u8) -> ArtistRecord {
        ArtistRecord {
            name: name.to_string(),
            external_id: Some(id.to_string()),
            sort_name: None,
            relevance,
        }
    }

    /// Scripted service: per-name queues of responses, then a fallback.
    #[derive(Default)]
    pub(crate) struct FakeService {
        scripts: Mutex<HashMap<String, VecDeque<Result<Vec<ArtistRecord>, ServiceError>>>>,
        pub calls: AtomicUsize,
        pub queried: Mutex<Vec<String>>,
    }

    impl FakeService {
        pub fn respond(self, name: &str, response: Result<Vec<ArtistRecord>, ServiceError>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default()
                .push_back(response);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArtistSearch for FakeService {
        fn search_artist(&self, name: &str) -> Result<Vec<ArtistRecord>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queried.lock().unwrap().push(name.to_string());
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(name) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap_or(Ok(Vec::new())),
                None => Ok(Vec::new()),
            }
        }
    }

    pub(crate) fn fake_client(service: FakeService) -> MetadataClient<FakeService, FakeRelativeClock> {
        let pacer = Arc::new(Pacer::with_clock(NonZeroU32::MIN, FakeRelativeClock::default()));
        MetadataClient::new(service, pacer, RetryPolicy::default()).with_seed(7)
    }

    fn elapsed(client: &MetadataClient<FakeService, FakeRelativeClock>) -> Duration {
        Duration::from(governor::clock::Clock::now(client.pacer().clock()))
    }

    #[test]
    fn test_found_picks_highest_relevance() {
        let service = FakeService::default().respond(
            "sun ra",
            Ok(vec![record("Sun Ra Arkestra", "b", 90), record("Sun Ra", "a", 100), record("Sun Ray", "c", 100)]),
        );
        let client = fake_client(service);
        match client.lookup_artist("sun ra") {
            LookupOutcome::Found(r) => assert_eq!(r.external_id.as_deref(), Some("a")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_result_is_not_found() {
        let client = fake_client(FakeService::default());
        assert_eq!(client.lookup_artist("nobody at all"), LookupOutcome::NotFound);
        assert_eq!(client.service().calls(), 1);
    }

    #[test]
    fn test_transient_then_success() {
        let service = FakeService::default()
            .respond("fela kuti", Err(ServiceError::Status(503)))
            .respond("fela kuti", Err(ServiceError::Transport("timed out".into())))
            .respond("fela kuti", Ok(vec![record("Fela Kuti", "f", 100)]));
        let client = fake_client(service);
        assert!(matches!(client.lookup_artist("fela kuti"), LookupOutcome::Found(_)));
        assert_eq!(client.service().calls(), 3);
        // back-off of 1s then 2s, before jitter
        assert!(elapsed(&client) >= Duration::from_secs(3));
    }

    #[test]
    fn test_rejection_fails_without_retry() {
        let service = FakeService::default().respond("x", Err(ServiceError::Status(404)));
        let client = fake_client(service);
        assert_eq!(
            client.lookup_artist("x"),
            LookupOutcome::Failed(LookupError::Rejected(ServiceError::Status(404)))
        );
        assert_eq!(client.service().calls(), 1);
    }

    #[test]
    fn test_exhaustion_is_bounded() {
        let service = FakeService::default().respond("x", Err(ServiceError::RateLimited));
        let client = fake_client(service);
        assert_eq!(
            client.lookup_artist("x"),
            LookupOutcome::Failed(LookupError::Exhausted {
                attempts: 3,
                last: ServiceError::RateLimited
            })
        );
        assert_eq!(client.service().calls(), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_below_base() {
        let client = fake_client(FakeService::default());
        for _ in 0..100 {
            assert!(client.jitter() < Duration::from_secs(1));
        }
    }

    #[test]
    fn test_top_candidate_tie_keeps_first() {
        let picked = top_candidate(vec![record("A", "1", 80), record("B", "2", 80)]).unwrap();
        assert_eq!(picked.name, "A");
        assert!(top_candidate(Vec::new()).is_none());
    }
}
