use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwap;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::{elapsed_between, Clock},
    jwk_set::KeySet,
    key_material::parse_key_set,
    key_source::KeySource,
    KeySetError,
};

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<KeySet>, KeySetError>>>;

/// A key set together with the time it was fetched. Swapped as a whole so readers never see one without the other.
#[derive(Default)]
struct Snapshot {
    key_set: Arc<KeySet>,
    fetched_at: Option<SystemTime>,
}

struct Inner {
    source: KeySource,
    clock: Arc<dyn Clock>,
    ttl: Option<Duration>,
    refresh_cooldown: Duration,
    current: ArcSwap<Snapshot>,
    /// When the last fetch completed, successful or not.
    last_attempt: Mutex<Option<SystemTime>>,
    in_flight: Mutex<Option<RefreshFuture>>,
}

/// Caches the key set of a single [`KeySource`].
///
/// Lookups never block: the current key set is immutable and replaced wholesale on refresh. Concurrent refreshes are
/// collapsed into a single fetch whose outcome every caller observes. A failed refresh leaves the previous key set in
/// place.
#[derive(Clone)]
pub(crate) struct KeyCache {
    inner: Arc<Inner>,
}

impl KeyCache {
    /// Creates an empty cache. `ttl` of `None` means the key set never goes stale by age alone.
    pub(crate) fn new(
        source: KeySource,
        clock: Arc<dyn Clock>,
        ttl: Option<Duration>,
        refresh_cooldown: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                ttl,
                refresh_cooldown,
                current: ArcSwap::from_pointee(Snapshot::default()),
                last_attempt: Mutex::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The current key set, without refreshing.
    pub(crate) fn key_set(&self) -> Arc<KeySet> {
        Arc::clone(&self.inner.current.load().key_set)
    }

    pub(crate) fn last_fetch(&self) -> Option<SystemTime> {
        self.inner.current.load().fetched_at
    }

    pub(crate) fn is_stale(&self) -> bool {
        match (self.last_fetch(), self.inner.ttl) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(fetched_at), Some(ttl)) => {
                elapsed_between(fetched_at, self.inner.clock.now()) >= ttl
            }
        }
    }

    /// Whether the cooldown since the last fetch attempt, failed ones included, has passed.
    fn cooldown_elapsed(&self) -> bool {
        match *self.inner.last_attempt.lock() {
            None => true,
            Some(attempted_at) => {
                elapsed_between(attempted_at, self.inner.clock.now()) >= self.inner.refresh_cooldown
            }
        }
    }

    /// The current key set, refreshed first if it is stale, and whether a fetch was attempted. Serves the stale set if
    /// the refresh fails; after a failed attempt the stale set is served without fetching until the cooldown has passed.
    async fn refresh_if_stale(&self) -> (Arc<KeySet>, bool) {
        if !self.is_stale() || !self.cooldown_elapsed() {
            return (self.key_set(), false);
        }
        if let Err(error) = self.refresh().await {
            warn!(source = %self.inner.source, %error, "failed to refresh stale key set, serving cached keys");
        }
        (self.key_set(), true)
    }

    /// The key set to look up `kid` in.
    ///
    /// If `kid` is unknown and the cooldown since the last fetch attempt has passed, refreshes once so freshly rotated
    /// keys are picked up before the TTL expires. Never fetches more than once per call.
    pub(crate) async fn key_set_for(&self, kid: &str) -> Arc<KeySet> {
        let (key_set, attempted) = self.refresh_if_stale().await;
        if attempted || key_set.contains(kid) || !self.cooldown_elapsed() {
            return key_set;
        }

        debug!(kid, source = %self.inner.source, "unknown kid, refreshing key set");
        match self.refresh().await {
            Ok(key_set) => key_set,
            Err(error) => {
                warn!(kid, source = %self.inner.source, %error, "failed to refresh key set");
                key_set
            }
        }
    }

    /// Fetches and parses the key material, then swaps it in.
    ///
    /// Joins the refresh already in flight, if any, instead of starting another fetch.
    pub(crate) async fn refresh(&self) -> Result<Arc<KeySet>, KeySetError> {
        let refresh = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.as_ref() {
                Some(refresh) => refresh.clone(),
                None => {
                    let refresh = Arc::clone(&self.inner).fetch_and_swap().boxed().shared();
                    *in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = refresh.clone().await;

        let mut in_flight = self.inner.in_flight.lock();
        if in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&refresh))
        {
            *in_flight = None;
        }
        result
    }
}

impl Inner {
    async fn fetch_and_swap(self: Arc<Self>) -> Result<Arc<KeySet>, KeySetError> {
        let loaded = self.load().await;
        let now = self.clock.now();
        *self.last_attempt.lock() = Some(now);

        let key_set = Arc::new(loaded?);
        self.current.store(Arc::new(Snapshot {
            key_set: Arc::clone(&key_set),
            fetched_at: Some(now),
        }));
        info!(
            source = %self.source,
            remote = self.source.is_remote(),
            key_count = key_set.len(),
            kids = ?key_set.kids().collect::<Vec<_>>(),
            "key set refreshed"
        );
        Ok(key_set)
    }

    async fn load(&self) -> Result<KeySet, KeySetError> {
        let bytes = self.source.fetch().await?;
        let key_set = parse_key_set(&bytes)?;
        if key_set.is_empty() {
            return Err(KeySetError::Empty);
        }
        Ok(key_set)
    }
}
