//! Process-wide registry of in-flight builds, at most one per site.
//!
//! Registering a build for a site that already has one cancels the old
//! build and returns its handle, so the caller can wait for it to wind down
//! before starting its own work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pressroom_core::SiteName;

use crate::error::BuildError;

static NEXT_BUILD_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// BuildHandle
// ---------------------------------------------------------------------------

/// One build's identity plus its cancellation and completion signals.
///
/// Clones share both tokens.
#[derive(Debug, Clone)]
pub struct BuildHandle {
    site: SiteName,
    id: u64,
    started_at_unix: u64,
    cancel: CancellationToken,
    completed: CancellationToken,
}

impl BuildHandle {
    pub fn new(site: SiteName) -> Self {
        Self {
            site,
            id: NEXT_BUILD_ID.fetch_add(1, Ordering::Relaxed),
            started_at_unix: crate::unix_seconds_now(),
            cancel: CancellationToken::new(),
            completed: CancellationToken::new(),
        }
    }

    pub fn site(&self) -> &SiteName {
        &self.site
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn started_at_unix(&self) -> u64 {
        self.started_at_unix
    }

    /// Token the build's generator and deployments observe.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn mark_completed(&self) {
        self.completed.cancel();
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_cancelled()
    }

    /// Resolves once the build has fully stopped.
    pub async fn completed(&self) {
        self.completed.cancelled().await;
    }
}

/// Row of the registry's status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveBuild {
    pub site: String,
    pub id: u64,
    pub started_at_unix: u64,
}

// ---------------------------------------------------------------------------
// BuildRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct BuildRegistry {
    slots: Mutex<Slots>,
}

/// `active` holds the live build per site. `draining` holds builds that were
/// cancelled without a successor and have not finished yet; they are hidden
/// from lookups but still handed to the next [`BuildRegistry::add`].
#[derive(Debug, Default)]
struct Slots {
    active: HashMap<SiteName, BuildHandle>,
    draining: HashMap<SiteName, BuildHandle>,
}

impl BuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`, cancelling and returning any build it displaces.
    ///
    /// A build still winding down after [`safely_remove`](Self::safely_remove)
    /// is returned too, so the caller always waits for the previous build.
    pub fn add(&self, handle: BuildHandle) -> Option<BuildHandle> {
        let mut slots = self.lock();
        let draining = slots.draining.remove(handle.site());
        let displaced = slots.active.remove(handle.site()).or(draining);
        if let Some(previous) = &displaced {
            previous.cancel();
            info!(site = %previous.site(), build = previous.id(), "cancelled superseded build");
        }
        debug!(site = %handle.site(), build = handle.id(), "registered build");
        slots.active.insert(handle.site().clone(), handle);
        displaced
    }

    pub fn has(&self, site: &SiteName) -> bool {
        self.lock().active.contains_key(site)
    }

    pub fn get(&self, site: &SiteName) -> Result<BuildHandle, BuildError> {
        self.lock()
            .active
            .get(site)
            .cloned()
            .ok_or_else(|| BuildError::NotFound(site.clone()))
    }

    /// Forget the site's build without cancelling it.
    pub fn remove(&self, site: &SiteName) -> Option<BuildHandle> {
        self.lock().active.remove(site)
    }

    /// Cancel the site's build and hide it from lookups. It keeps draining
    /// until its [`BuildGuard`] drops.
    pub fn safely_remove(&self, site: &SiteName) -> Result<BuildHandle, BuildError> {
        let mut slots = self.lock();
        let handle = slots
            .active
            .remove(site)
            .ok_or_else(|| BuildError::NotFound(site.clone()))?;
        handle.cancel();
        if !handle.is_completed() {
            slots.draining.insert(site.clone(), handle.clone());
        }
        Ok(handle)
    }

    /// Whether a cancelled build for `site` is still winding down.
    pub fn is_draining(&self, site: &SiteName) -> bool {
        self.lock().draining.contains_key(site)
    }

    /// Forget `handle` if it is still tracked for its site.
    ///
    /// Returns `false` when a newer build has already replaced it.
    pub fn finish(&self, handle: &BuildHandle) -> bool {
        let mut slots = self.lock();
        let Slots { active, draining } = &mut *slots;
        for builds in [active, draining] {
            if builds.get(handle.site()).map(BuildHandle::id) == Some(handle.id()) {
                builds.remove(handle.site());
                return true;
            }
        }
        false
    }

    /// Live builds sorted by site name.
    pub fn active(&self) -> Vec<ActiveBuild> {
        let mut active: Vec<ActiveBuild> = self
            .lock()
            .active
            .values()
            .map(|h| ActiveBuild {
                site: h.site().0.clone(),
                id: h.id(),
                started_at_unix: h.started_at_unix(),
            })
            .collect();
        active.sort_by(|a, b| a.site.cmp(&b.site));
        active
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().active.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// BuildGuard
// ---------------------------------------------------------------------------

/// Deregisters a build and signals its completion when dropped, whether the
/// build returned, failed or panicked.
#[derive(Debug)]
pub struct BuildGuard {
    registry: Arc<BuildRegistry>,
    handle: BuildHandle,
}

impl BuildGuard {
    pub fn new(registry: Arc<BuildRegistry>, handle: BuildHandle) -> Self {
        Self { registry, handle }
    }

    pub fn handle(&self) -> &BuildHandle {
        &self.handle
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        self.registry.finish(&self.handle);
        self.handle.mark_completed();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn blog() -> SiteName {
        SiteName::from("blog")
    }

    #[test]
    fn second_add_cancels_first_and_keeps_only_second() {
        let registry = BuildRegistry::new();
        let first = BuildHandle::new(blog());
        let second = BuildHandle::new(blog());

        assert!(registry.add(first.clone()).is_none());
        let displaced = registry.add(second.clone()).expect("displaced handle");

        assert_eq!(displaced.id(), first.id());
        assert!(first.is_cancelled(), "first build must be cancelled");
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&blog()).expect("get").id(), second.id());
    }

    #[test]
    fn sites_are_independent() {
        let registry = BuildRegistry::new();
        let blog_build = BuildHandle::new(blog());
        registry.add(blog_build.clone());
        registry.add(BuildHandle::new(SiteName::from("docs")));

        assert!(!blog_build.is_cancelled());
        assert!(registry.has(&blog()));
        assert!(registry.has(&SiteName::from("docs")));
        let sites: Vec<String> = registry.active().into_iter().map(|b| b.site).collect();
        assert_eq!(sites, vec!["blog".to_string(), "docs".to_string()]);
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = BuildRegistry::new();
        assert_eq!(
            registry.get(&blog()).unwrap_err(),
            BuildError::NotFound(blog())
        );
        assert!(registry.safely_remove(&blog()).is_err());
    }

    #[test]
    fn remove_forgets_without_cancelling() {
        let registry = BuildRegistry::new();
        let handle = BuildHandle::new(blog());
        registry.add(handle.clone());

        let removed = registry.remove(&blog()).expect("removed");
        assert_eq!(removed.id(), handle.id());
        assert!(!handle.is_cancelled());
        assert!(!registry.has(&blog()));
    }

    #[test]
    fn safely_remove_cancels_then_forgets() {
        let registry = BuildRegistry::new();
        let handle = BuildHandle::new(blog());
        registry.add(handle.clone());

        registry.safely_remove(&blog()).expect("safely_remove");
        assert!(handle.is_cancelled());
        assert!(registry.is_empty());
        assert!(registry.is_draining(&blog()));
        assert!(registry.safely_remove(&blog()).is_err());
    }

    #[test]
    fn add_after_safely_remove_returns_draining_build() {
        let registry = Arc::new(BuildRegistry::new());
        let first = BuildHandle::new(blog());
        registry.add(first.clone());
        let guard = BuildGuard::new(registry.clone(), first.clone());
        registry.safely_remove(&blog()).expect("safely_remove");

        let second = BuildHandle::new(blog());
        let displaced = registry.add(second.clone()).expect("draining build handed over");
        assert_eq!(displaced.id(), first.id());
        assert!(!displaced.is_completed());
        assert!(!registry.is_draining(&blog()));

        drop(guard);
        assert!(displaced.is_completed());
        assert_eq!(registry.get(&blog()).expect("get").id(), second.id());
    }

    #[test]
    fn draining_build_is_forgotten_once_finished() {
        let registry = Arc::new(BuildRegistry::new());
        let handle = BuildHandle::new(blog());
        registry.add(handle.clone());
        let guard = BuildGuard::new(registry.clone(), handle);
        registry.safely_remove(&blog()).expect("safely_remove");

        drop(guard);
        assert!(!registry.is_draining(&blog()));
        assert!(registry.add(BuildHandle::new(blog())).is_none());
    }

    #[test]
    fn superseded_finish_does_not_evict_successor() {
        let registry = BuildRegistry::new();
        let first = BuildHandle::new(blog());
        let second = BuildHandle::new(blog());
        registry.add(first.clone());
        registry.add(second.clone());

        assert!(!registry.finish(&first));
        assert_eq!(registry.get(&blog()).expect("get").id(), second.id());
        assert!(registry.finish(&second));
        assert!(registry.is_empty());
    }

    #[test]
    fn guard_drop_finishes_and_signals_completion() {
        let registry = Arc::new(BuildRegistry::new());
        let handle = BuildHandle::new(blog());
        registry.add(handle.clone());

        let guard = BuildGuard::new(registry.clone(), handle.clone());
        assert!(!handle.is_completed());
        drop(guard);

        assert!(handle.is_completed());
        assert!(!registry.has(&blog()));
    }

    #[test]
    fn guard_drop_on_panic_signals_completion() {
        let registry = Arc::new(BuildRegistry::new());
        let handle = BuildHandle::new(blog());
        registry.add(handle.clone());

        let guarded = handle.clone();
        let shared = registry.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = BuildGuard::new(shared, guarded);
            panic!("build blew up");
        }));
        assert!(result.is_err());
        assert!(handle.is_completed());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancellation_is_observed_before_successor_starts() {
        let registry = Arc::new(BuildRegistry::new());
        let first = BuildHandle::new(blog());
        registry.add(first.clone());

        // Simulated first build: runs until cancelled, then winds down.
        let running = {
            let registry = registry.clone();
            let first = first.clone();
            tokio::spawn(async move {
                let _guard = BuildGuard::new(registry, first.clone());
                first.cancel_token().cancelled().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
        };
        tokio::task::yield_now().await;

        let second = BuildHandle::new(blog());
        let displaced = registry.add(second.clone()).expect("displaced");
        assert!(displaced.is_cancelled());
        assert!(!displaced.is_completed(), "first build still winding down");

        displaced.completed().await;
        assert!(displaced.is_completed());
        assert_eq!(registry.get(&blog()).expect("get").id(), second.id());
        running.await.expect("join");
    }
}
