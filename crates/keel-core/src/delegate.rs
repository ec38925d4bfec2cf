use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use keel_domain::api::PackageIdentity;

/// Observable events of a resolve cycle. All methods default to no-ops.
pub trait WorkspaceDelegate: Send + Sync {
    fn will_resolve_dependencies(&self, _reason: Option<&str>) {}
    fn did_resolve_dependencies(&self, _duration: Duration) {}
    fn will_update_dependencies(&self) {}
    fn did_update_dependencies(&self, _duration: Duration) {}
    fn will_compute_version(&self, _package: &PackageIdentity, _location: &str) {}
    fn did_compute_version(
        &self,
        _package: &PackageIdentity,
        _location: &str,
        _version: &str,
        _duration: Duration,
    ) {
    }
    fn dependencies_up_to_date(&self) {}
}

/// Delegate used when the embedder does not care about events.
#[derive(Debug, Default)]
pub struct NoopDelegate;

impl WorkspaceDelegate for NoopDelegate {}

/// Memoize-on-first-touch set. The solver may visit a package several times
/// across version ranges; per-package delegate events must fire once.
#[derive(Debug, Default)]
pub struct OncePerIdentity {
    seen: Mutex<BTreeSet<PackageIdentity>>,
}

impl OncePerIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per identity.
    pub fn first_touch(&self, identity: &PackageIdentity) -> bool {
        self.seen
            .lock()
            .expect("identity set poisoned")
            .insert(identity.clone())
    }

    pub fn reset(&self) {
        self.seen.lock().expect("identity set poisoned").clear();
    }
}
