//! Rotating pool of synthetic client identities.
//!
//! An identity is a generated cookie string plus a browser User-Agent. The
//! executor presents one per request and reports the outcome back by id.
//! Identities that fail more than [`IDENTITY_FAILURE_THRESHOLD`] times are
//! invalidated for good; when none are left the whole pool is regenerated.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distributions::{Alphanumeric, Uniform};
use rand::seq::SliceRandom;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::network::headers::random_browser_user_agent;

/// Default number of identities kept in the pool.
pub const DEFAULT_IDENTITY_POOL_SIZE: usize = 10;

/// Failures an identity may accumulate before it is invalidated.
pub const IDENTITY_FAILURE_THRESHOLD: u32 = 3;

/// Size of the candidate set sampled by [`IdentityPool::next`].
const TOP_IDENTITIES: usize = 3;

/// An identity handed out for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedIdentity {
    /// Pool-unique id used to report the outcome.
    pub id: u64,
    /// `Cookie` header value.
    pub cookie: String,
    /// `User-Agent` header value.
    pub user_agent: String,
}

#[derive(Debug, Clone)]
struct Identity {
    id: u64,
    cookie: String,
    user_agent: &'static str,
    created_at: Instant,
    last_used: Option<Instant>,
    successes: u32,
    failures: u32,
    valid: bool,
}

impl Identity {
    fn generate(id: u64) -> Self {
        Self {
            id,
            cookie: generate_cookie(),
            user_agent: random_browser_user_agent(),
            created_at: Instant::now(),
            last_used: None,
            successes: 0,
            failures: 0,
            valid: true,
        }
    }

    /// Successes over attempts; zero attempts rates 0 but stays eligible.
    fn success_ratio(&self) -> f64 {
        let attempts = self.successes + self.failures;
        if attempts == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(attempts)
        }
    }
}

/// Builds a browser-like session cookie string.
///
/// Contains a hashed session id, a random browser id, a CSRF token, a
/// language and a tracking id, formatted as `k=v; k=v`.
#[must_use]
pub fn generate_cookie() -> String {
    let mut rng = rand::thread_rng();
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let nonce: u64 = rng.r#gen();

    let session_digest = hex_digest(format!("{millis}:{nonce}").as_bytes());
    let csrf_digest = hex_digest(format!("{nonce}:{millis}:csrf").as_bytes());
    let browser_id: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let tracking_id = random_upper_alphanumeric(&mut rng, 32);

    format!(
        "ndus=Y{}; browserid={browser_id}; csrfToken={}; lang=en; TSID=A{tracking_id}",
        &session_digest[..26],
        &csrf_digest[..32],
    )
}

fn hex_digest(input: &[u8]) -> String {
    Sha256::digest(input)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn random_upper_alphanumeric<R: Rng>(rng: &mut R, len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let index = Uniform::from(0..CHARSET.len());
    (0..len)
        .map(|_| char::from(CHARSET[rng.sample(index)]))
        .collect()
}

/// Read-only pool snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdentityStats {
    pub total: usize,
    pub valid: usize,
    /// How many times the pool has been generated, starting at 1.
    pub generation: u32,
}

#[derive(Debug)]
struct IdentityState {
    identities: Vec<Identity>,
    next_id: u64,
    generation: u32,
}

impl IdentityState {
    fn regenerate(&mut self, size: usize) {
        self.identities = (0..size)
            .map(|offset| Identity::generate(self.next_id + offset as u64))
            .collect();
        self.next_id += size as u64;
        self.generation += 1;
    }

    fn find_mut(&mut self, id: u64) -> Option<&mut Identity> {
        self.identities.iter_mut().find(|identity| identity.id == id)
    }
}

/// Shared identity pool. Wrap in `Arc` and share across tasks.
#[derive(Debug)]
pub struct IdentityPool {
    size: usize,
    state: Mutex<IdentityState>,
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_POOL_SIZE)
    }
}

impl IdentityPool {
    /// Creates a pool of `size` freshly generated identities (at least one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut state = IdentityState {
            identities: Vec::new(),
            next_id: 1,
            generation: 0,
        };
        state.regenerate(size);
        Self {
            size,
            state: Mutex::new(state),
        }
    }

    /// Hands out an identity for the next request.
    ///
    /// Samples uniformly from the three best valid identities by success
    /// ratio. Regenerates the pool when no identity is valid.
    pub async fn next(&self) -> IssuedIdentity {
        let mut state = self.state.lock().await;
        if !state.identities.iter().any(|identity| identity.valid) {
            warn!(
                generation = state.generation,
                "all identities invalidated, regenerating pool"
            );
            state.regenerate(self.size);
        }

        let mut ranked: Vec<(usize, f64)> = state
            .identities
            .iter()
            .enumerate()
            .filter(|(_, identity)| identity.valid)
            .map(|(index, identity)| (index, identity.success_ratio()))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(TOP_IDENTITIES);

        // `ranked` is non-empty: the pool was just checked or regenerated.
        let index = pick_index(&ranked).unwrap_or_default();
        let identity = &mut state.identities[index];
        let idle_secs = identity.last_used.map(|used| used.elapsed().as_secs());
        identity.last_used = Some(Instant::now());
        debug!(identity = identity.id, idle_secs = ?idle_secs, "issued identity");
        IssuedIdentity {
            id: identity.id,
            cookie: identity.cookie.clone(),
            user_agent: identity.user_agent.to_string(),
        }
    }

    /// Records a successful request made with identity `id`.
    pub async fn report_success(&self, id: u64) {
        let mut state = self.state.lock().await;
        if let Some(identity) = state.find_mut(id) {
            identity.successes = identity.successes.saturating_add(1);
        }
    }

    /// Records a rejected request made with identity `id`.
    ///
    /// Invalidates the identity once its failures exceed
    /// [`IDENTITY_FAILURE_THRESHOLD`]. Reports for ids from an earlier
    /// generation are ignored.
    pub async fn report_failure(&self, id: u64) {
        let mut state = self.state.lock().await;
        let Some(identity) = state.find_mut(id) else {
            debug!(identity = id, "failure reported for retired identity");
            return;
        };
        identity.failures = identity.failures.saturating_add(1);
        if identity.valid && identity.failures > IDENTITY_FAILURE_THRESHOLD {
            identity.valid = false;
            warn!(
                identity = id,
                failures = identity.failures,
                age_secs = identity.created_at.elapsed().as_secs(),
                "identity invalidated"
            );
        }
    }

    pub async fn stats(&self) -> IdentityStats {
        let state = self.state.lock().await;
        IdentityStats {
            total: state.identities.len(),
            valid: state.identities.iter().filter(|identity| identity.valid).count(),
            generation: state.generation,
        }
    }
}

fn pick_index(ranked: &[(usize, f64)]) -> Option<usize> {
    ranked
        .choose(&mut rand::thread_rng())
        .map(|(index, _)| *index)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn cookie_field<'a>(cookie: &'a str, key: &str) -> &'a str {
        cookie
            .split("; ")
            .find_map(|part| part.strip_prefix(&format!("{key}=")))
            .unwrap()
    }

    // ==================== Generation Tests ====================

    #[test]
    fn test_generate_cookie_shape() {
        let cookie = generate_cookie();
        assert_eq!(cookie_field(&cookie, "ndus").len(), 27);
        assert!(cookie_field(&cookie, "ndus").starts_with('Y'));
        assert_eq!(cookie_field(&cookie, "browserid").len(), 32);
        assert_eq!(cookie_field(&cookie, "csrfToken").len(), 32);
        assert_eq!(cookie_field(&cookie, "lang"), "en");
        let tsid = cookie_field(&cookie, "TSID");
        assert_eq!(tsid.len(), 33);
        assert!(
            tsid[1..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_generate_cookie_is_unique() {
        let cookies: HashSet<String> = (0..50).map(|_| generate_cookie()).collect();
        assert_eq!(cookies.len(), 50);
    }

    #[tokio::test]
    async fn test_new_pool_has_requested_size() {
        let pool = IdentityPool::new(4);
        assert_eq!(
            pool.stats().await,
            IdentityStats {
                total: 4,
                valid: 4,
                generation: 1
            }
        );
        assert_eq!(IdentityPool::new(0).stats().await.total, 1);
        assert_eq!(IdentityPool::default().stats().await.total, 10);
    }

    // ==================== Selection Tests ====================

    #[tokio::test]
    async fn test_next_issues_browser_identity() {
        let pool = IdentityPool::new(2);
        let issued = pool.next().await;
        assert!(issued.cookie.contains("browserid="));
        assert!(issued.user_agent.starts_with("Mozilla/5.0"));
        assert!(issued.id == 1 || issued.id == 2);
    }

    #[tokio::test]
    async fn test_next_prefers_successful_identities() {
        let pool = IdentityPool::new(10);
        for id in [3, 5, 7] {
            pool.report_success(id).await;
        }
        for _ in 0..30 {
            let issued = pool.next().await;
            assert!([3, 5, 7].contains(&issued.id), "picked unranked {}", issued.id);
        }
    }

    // ==================== Invalidation Tests ====================

    #[tokio::test]
    async fn test_invalidation_is_permanent() {
        let pool = IdentityPool::new(3);
        for _ in 0..=IDENTITY_FAILURE_THRESHOLD {
            pool.report_failure(2).await;
        }
        assert_eq!(pool.stats().await.valid, 2);

        // Successes on the dead id or on others never bring it back.
        pool.report_success(2).await;
        pool.report_success(1).await;
        pool.report_success(3).await;
        for _ in 0..50 {
            assert_ne!(pool.next().await.id, 2);
        }
    }

    #[tokio::test]
    async fn test_failures_at_threshold_keep_identity_valid() {
        let pool = IdentityPool::new(1);
        for _ in 0..IDENTITY_FAILURE_THRESHOLD {
            pool.report_failure(1).await;
        }
        assert_eq!(pool.stats().await.valid, 1);
        assert_eq!(pool.next().await.id, 1);
    }

    #[tokio::test]
    async fn test_pool_regenerates_when_all_invalid() {
        let pool = IdentityPool::new(2);
        for id in [1, 2] {
            for _ in 0..=IDENTITY_FAILURE_THRESHOLD {
                pool.report_failure(id).await;
            }
        }
        assert_eq!(pool.stats().await.valid, 0);

        let issued = pool.next().await;
        assert!(issued.id == 3 || issued.id == 4);
        assert_eq!(
            pool.stats().await,
            IdentityStats {
                total: 2,
                valid: 2,
                generation: 2
            }
        );

        // Reports against the retired generation are ignored.
        pool.report_failure(1).await;
        assert_eq!(pool.stats().await.valid, 2);
    }
}
