//! BGP speaker abstraction

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tracing::debug;

use crate::{Result, SpeakerError};

/// Client of a BGP speaker that owns the peer sessions and the local RIB.
///
/// Every call must be safe to issue concurrently and individually
/// idempotent; callers never hold a lock across calls.
#[async_trait]
pub trait RouteSpeaker: Send + Sync {
    /// Originate a route for `prefix`
    async fn announce(&self, prefix: &IpNetwork) -> Result<()>;

    /// Stop originating a route for `prefix`
    async fn withdraw(&self, prefix: &IpNetwork) -> Result<()>;

    /// Whether the speaker currently originates `prefix`. Query failures
    /// report `false`.
    async fn is_announced(&self, prefix: &IpNetwork) -> bool;

    /// Every prefix the speaker currently originates
    async fn announced(&self) -> Result<Vec<IpNetwork>>;
}

#[derive(Debug, thiserror::Error)]
#[error("injected failure for {0}")]
struct InjectedFailure(IpNetwork);

/// In-memory speaker, used for dry runs and tests
#[derive(Default)]
pub struct MemorySpeaker {
    routes: Mutex<BTreeSet<IpNetwork>>,
    failing: Mutex<HashSet<IpNetwork>>,
    announce_calls: AtomicUsize,
    withdraw_calls: AtomicUsize,
}

impl MemorySpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `routes` already announced
    pub fn with_routes(routes: impl IntoIterator<Item = IpNetwork>) -> Self {
        let speaker = Self::default();
        if let Ok(mut table) = speaker.routes.lock() {
            table.extend(routes);
        }
        speaker
    }

    /// Make every announce and withdraw of `prefix` fail
    pub fn fail_on(&self, prefix: IpNetwork) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(prefix);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Snapshot of the announced routes
    pub fn routes(&self) -> BTreeSet<IpNetwork> {
        self.routes.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn announce_calls(&self) -> usize {
        self.announce_calls.load(Ordering::SeqCst)
    }

    pub fn withdraw_calls(&self) -> usize {
        self.withdraw_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self, prefix: &IpNetwork) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(prefix))
            .unwrap_or(false);
        if failing {
            return Err(SpeakerError::backend(InjectedFailure(*prefix)));
        }
        Ok(())
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<IpNetwork>>> {
        self.routes
            .lock()
            .map_err(|_| SpeakerError::Internal("route table lock poisoned".to_string()))
    }
}

#[async_trait]
impl RouteSpeaker for MemorySpeaker {
    async fn announce(&self, prefix: &IpNetwork) -> Result<()> {
        self.announce_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(prefix)?;
        self.table()?.insert(*prefix);
        debug!("Memory speaker announced {}", prefix);
        Ok(())
    }

    async fn withdraw(&self, prefix: &IpNetwork) -> Result<()> {
        self.withdraw_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure(prefix)?;
        self.table()?.remove(prefix);
        debug!("Memory speaker withdrew {}", prefix);
        Ok(())
    }

    async fn is_announced(&self, prefix: &IpNetwork) -> bool {
        self.routes
            .lock()
            .map(|r| r.contains(prefix))
            .unwrap_or(false)
    }

    async fn announced(&self) -> Result<Vec<IpNetwork>> {
        Ok(self.table()?.iter().copied().collect())
    }
}
