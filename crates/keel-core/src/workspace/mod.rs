use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};

use keel_domain::api::{
    load_resolved_file_optional, origin_hash, save_resolved_file, DependencyManifests, GraphRoot,
    ManagedDependencyState, PackageIdentity, ResolutionError, ResolvedPackage,
    ResolvedPackagesStore, RESOLVED_FILE_NAME,
};

use crate::checkout::{
    apply_state_changes, materialize_pins, pins_requiring_materialization, prewarm_containers,
};
use crate::container::{PackageContainerProvider, UpdateStrategy};
use crate::delegate::{NoopDelegate, OncePerIdentity, WorkspaceDelegate};
use crate::diagnostics::DiagnosticsScope;
use crate::effects::{ArtifactsUpdater, DependencyResolver, ManifestLoader};
use crate::outcome::DependencyError;
use crate::precompute::{precompute_resolution, PrecomputationResult};
use crate::reconcile::{compute_state_changes, StateChanges};
use crate::store::{edited_packages_constraints, ManagedStore};

mod status;
pub use status::{ResolutionStateKind, ResolutionStateReport};


/// Knobs an embedder can set for a workspace.
#[derive(Clone, Debug)]
pub struct WorkspaceConfiguration {
    /// Force every container acquisition to `Never` fetch.
    pub skip_dependencies_updates: bool,
    /// Pre-warm containers for pinned packages before honoring the resolved
    /// file.
    pub prefetch_based_on_resolved_file: bool,
    /// Trait names enabled for the roots.
    pub enabled_traits: BTreeSet<String>,
}

impl Default for WorkspaceConfiguration {
    fn default() -> Self {
        Self {
            skip_dependencies_updates: false,
            prefetch_based_on_resolved_file: true,
            enabled_traits: BTreeSet::new(),
        }
    }
}

/// How `resolve_dependencies` treats the resolved file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// The resolved file is authoritative; demanded changes are an error.
    LockFile,
    /// Resolve and update; `force` skips precomputation entirely.
    Update { force: bool },
    /// Honor the resolved file when it is trustworthy, fall back to a full
    /// resolve otherwise.
    BestEffort,
}

/// The workspace dependency core: owns the managed-dependency store and the
/// resolved file, borrows containers from the provider, and drives the
/// precompute / reconcile / checkout pipeline.
pub struct Workspace {
    resolved_file_path: PathBuf,
    store: ManagedStore,
    provider: Arc<dyn PackageContainerProvider>,
    resolver: Arc<dyn DependencyResolver>,
    manifest_loader: Arc<dyn ManifestLoader>,
    artifacts: Option<Arc<dyn ArtifactsUpdater>>,
    delegate: Arc<dyn WorkspaceDelegate>,
    configuration: WorkspaceConfiguration,
    diagnostics: DiagnosticsScope,
    computed_versions: OncePerIdentity,
    active_resolver: Mutex<Option<Arc<dyn DependencyResolver>>>,
}

impl Workspace {
    pub fn open(
        working_dir: impl Into<PathBuf>,
        resolved_file_path: impl Into<PathBuf>,
        provider: Arc<dyn PackageContainerProvider>,
        resolver: Arc<dyn DependencyResolver>,
        manifest_loader: Arc<dyn ManifestLoader>,
    ) -> Result<Self> {
        Ok(Self {
            resolved_file_path: resolved_file_path.into(),
            store: ManagedStore::open(working_dir)?,
            provider,
            resolver,
            manifest_loader,
            artifacts: None,
            delegate: Arc::new(NoopDelegate),
            configuration: WorkspaceConfiguration::default(),
            diagnostics: DiagnosticsScope::new(),
            computed_versions: OncePerIdentity::new(),
            active_resolver: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn WorkspaceDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: WorkspaceConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    #[must_use]
    pub fn with_artifacts_updater(mut self, artifacts: Arc<dyn ArtifactsUpdater>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsScope {
        &self.diagnostics
    }

    #[must_use]
    pub fn managed_store(&self) -> &ManagedStore {
        &self.store
    }

    /// Signal the in-flight solve, if any, to stop at its next opportunity.
    pub fn cancel_active_resolution(&self) {
        let guard = self.active_resolver.lock().expect("active resolver");
        if let Some(resolver) = guard.as_ref() {
            resolver.cancel();
        }
    }

    /// Re-resolve and update dependencies, ignoring existing pins (all of
    /// them, or only those for `packages` when non-empty). With `dry_run`
    /// the planned changes are returned and nothing is touched.
    pub fn update_dependencies(
        &self,
        root_manifests: &[PathBuf],
        packages: &[String],
        dry_run: bool,
    ) -> Result<Option<StateChanges>> {
        self.begin_cycle();
        self.delegate.will_update_dependencies();
        let started = Instant::now();

        let root = self.load_graph_root(root_manifests)?;
        let pin_store = self.load_pin_store()?;
        if self.diagnostics.errors_reported() {
            return Ok(None);
        }

        // Full update: no hints at all. Partial update: keep every pin that
        // was not explicitly requested so only the requested packages move.
        let pin_hints = if packages.is_empty() {
            BTreeMap::new()
        } else {
            let requested: BTreeSet<PackageIdentity> =
                packages.iter().map(PackageIdentity::new).collect();
            pin_store
                .pins()
                .iter()
                .filter(|(identity, _)| !requested.contains(*identity))
                .map(|(identity, pin)| (identity.clone(), pin.clone()))
                .collect()
        };

        let outcome = self.run_resolution_cycle(&root, &pin_store, &pin_hints, true, dry_run)?;
        match outcome {
            None => Ok(None),
            Some(changes) if dry_run => Ok(Some(changes)),
            Some(_) => {
                self.delegate.did_update_dependencies(started.elapsed());
                Ok(None)
            }
        }
    }

    /// Resolve dependencies under the given strategy. Returns the loaded
    /// dependency manifests, or `None` when diagnostics aborted the cycle.
    pub fn resolve_dependencies(
        &self,
        root_manifests: &[PathBuf],
        strategy: &ResolutionStrategy,
    ) -> Result<Option<DependencyManifests>> {
        self.begin_cycle();
        let root = self.load_graph_root(root_manifests)?;

        match strategy {
            ResolutionStrategy::LockFile => {
                let (manifests, precomputation) = self.resolve_from_resolved_file_with_root(&root)?;
                if precomputation.is_required() {
                    self.diagnostics.report_error(format!(
                        "{RESOLVED_FILE_NAME} is out of date: {}; resolution is disabled by the \
                         lock-file strategy",
                        precomputation.describe()
                    ));
                } else {
                    self.delegate.dependencies_up_to_date();
                }
                // The computed manifests are still returned so callers can
                // decide whether a stale resolved file is a hard failure.
                Ok(Some(manifests))
            }
            ResolutionStrategy::Update { force } => {
                if !force {
                    let (manifests, precomputation) =
                        self.resolve_from_resolved_file_with_root(&root)?;
                    if !precomputation.is_required() {
                        self.delegate.dependencies_up_to_date();
                        return Ok(Some(manifests));
                    }
                    return self.resolve_and_update(&root, Some(precomputation.describe()));
                }
                self.resolve_and_update(&root, None)
            }
            ResolutionStrategy::BestEffort => {
                let managed = self.store.snapshot();
                let has_edited = managed
                    .values()
                    .any(|dependency| dependency.state.is_edited());
                if has_edited {
                    return self
                        .resolve_and_update(&root, Some("edited dependencies present".into()));
                }
                let current_hash = self.current_origin_hash(&root)?;
                let stored = load_resolved_file_optional(&self.resolved_file_path)?;
                let hash_clean = stored
                    .as_ref()
                    .and_then(|store| store.origin_hash.as_deref())
                    .is_some_and(|hash| hash == current_hash);
                if !hash_clean {
                    tracing::debug!("resolved_file_origin_hash_stale");
                    return self.resolve_and_update(&root, Some("root manifests changed".into()));
                }
                let (manifests, precomputation) = self.resolve_from_resolved_file_with_root(&root)?;
                if precomputation.is_required() {
                    return self.resolve_and_update(&root, Some(precomputation.describe()));
                }
                self.delegate.dependencies_up_to_date();
                Ok(Some(manifests))
            }
        }
    }

    /// Materialize the pinned state and report whether real resolution is
    /// still needed.
    pub fn resolve_from_resolved_file(
        &self,
        root_manifests: &[PathBuf],
    ) -> Result<(DependencyManifests, PrecomputationResult)> {
        self.begin_cycle();
        let root = self.load_graph_root(root_manifests)?;
        self.resolve_from_resolved_file_with_root(&root)
    }

    fn resolve_from_resolved_file_with_root(
        &self,
        root: &GraphRoot,
    ) -> Result<(DependencyManifests, PrecomputationResult)> {
        let pin_store = self.load_pin_store()?;

        if self.configuration.prefetch_based_on_resolved_file {
            let pins: Vec<ResolvedPackage> = pin_store.pins().values().cloned().collect();
            prewarm_containers(
                self.provider.as_ref(),
                &pins,
                self.configuration.skip_dependencies_updates,
            );
        }

        let managed = self.store.snapshot();
        let needed = pins_requiring_materialization(&pin_store, &managed);
        if !needed.is_empty() {
            materialize_pins(
                &self.store,
                self.provider.as_ref(),
                &needed,
                self.configuration.skip_dependencies_updates,
                &self.diagnostics,
            );
            self.store.save()?;
        }

        let managed = self.store.snapshot();
        let manifests = self
            .manifest_loader
            .load_dependency_manifests(root, &managed)?;
        // Artifacts are refreshed with an empty change set here: honoring the
        // resolved file is not an update cycle.
        self.refresh_artifacts(&manifests, &[])?;

        let precomputation = precompute_resolution(
            self.resolver.as_ref(),
            &manifests,
            &managed,
            &pin_store,
            &[],
            &self.diagnostics,
        );
        Ok((manifests, precomputation))
    }

    fn resolve_and_update(
        &self,
        root: &GraphRoot,
        reason: Option<String>,
    ) -> Result<Option<DependencyManifests>> {
        self.delegate.will_resolve_dependencies(reason.as_deref());
        let started = Instant::now();

        let pin_store = self.load_pin_store()?;
        if self.diagnostics.errors_reported() {
            return Ok(None);
        }
        let pin_hints: BTreeMap<PackageIdentity, ResolvedPackage> = pin_store
            .pins()
            .iter()
            .map(|(identity, pin)| (identity.clone(), pin.clone()))
            .collect();

        let changes = self.run_resolution_cycle(root, &pin_store, &pin_hints, false, false)?;
        if changes.is_none() {
            return Ok(None);
        }

        let managed = self.store.snapshot();
        let manifests = self
            .manifest_loader
            .load_dependency_manifests(root, &managed)?;
        self.delegate.did_resolve_dependencies(started.elapsed());
        Ok(Some(manifests))
    }

    /// One resolve/reconcile/apply cycle. Returns the reconciled changes, or
    /// `None` when diagnostics aborted before any side effect. The resolved
    /// file is written exactly once, strictly after every install finished.
    fn run_resolution_cycle(
        &self,
        root: &GraphRoot,
        pin_store: &ResolvedPackagesStore,
        pin_hints: &BTreeMap<PackageIdentity, ResolvedPackage>,
        update_branches: bool,
        dry_run: bool,
    ) -> Result<Option<StateChanges>> {
        let managed = self.store.snapshot();
        let mut constraints = edited_packages_constraints(&managed);
        constraints.extend(root.constraints());

        let bindings = {
            *self.active_resolver.lock().expect("active resolver") =
                Some(Arc::clone(&self.resolver));
            let result = self
                .resolver
                .solve(self.provider.as_ref(), &constraints, pin_hints);
            *self.active_resolver.lock().expect("active resolver") = None;
            match result {
                Ok(bindings) => bindings,
                Err(err @ ResolutionError::Provider(_)) => {
                    return Err(anyhow::Error::from(err)).context("dependency resolution failed");
                }
                Err(err) => {
                    self.diagnostics
                        .report_error(format!("dependency resolution failed: {err}"));
                    return Ok(None);
                }
            }
        };

        let changes = compute_state_changes(
            self.provider.as_ref(),
            root,
            &managed,
            pin_store,
            &bindings,
            update_branches,
            self.delegate.as_ref(),
            &self.computed_versions,
        )?;
        if dry_run {
            return Ok(Some(changes));
        }

        let applied = apply_state_changes(
            &self.store,
            self.provider.as_ref(),
            &changes,
            &UpdateStrategy::Never,
            &self.diagnostics,
        )?;
        tracing::debug!(
            installed = applied.added_or_updated.len(),
            removed = applied.removed.len(),
            "state_changes_applied"
        );

        let managed = self.store.snapshot();
        let manifests = self
            .manifest_loader
            .load_dependency_manifests(root, &managed)?;
        let missing = manifests.missing_packages();
        if !missing.is_empty() {
            return Err(DependencyError::ExhaustedAttempts {
                missing: missing
                    .into_iter()
                    .map(|package| package.identity)
                    .collect(),
            }
            .into());
        }

        self.refresh_artifacts(&manifests, &applied.added_or_updated)?;
        if self.diagnostics.errors_reported() {
            return Ok(None);
        }

        self.store.save()?;
        self.save_resolved_state(root, &manifests)?;
        Ok(Some(changes))
    }

    /// Rebuild the pin set from the live graph and persist it. Only packages
    /// the reloaded manifests still require are pinned; edited dependencies
    /// pin the state they are based on.
    fn save_resolved_state(&self, root: &GraphRoot, manifests: &DependencyManifests) -> Result<()> {
        let managed = self.store.snapshot();
        let mut next = ResolvedPackagesStore::new(
            Some(self.current_origin_hash(root)?),
            Some(root.minimum_tools_version()),
        );
        for package in manifests.required_packages() {
            let Some(dependency) = managed.get(&package.identity) else {
                continue;
            };
            match &dependency.state {
                ManagedDependencyState::Edited {
                    based_on: Some(base),
                    ..
                } => next.add(base),
                _ => next.add(dependency),
            }
        }
        save_resolved_file(&self.resolved_file_path, &next)
            .context("failed to write resolved file")
    }

    fn refresh_artifacts(
        &self,
        manifests: &DependencyManifests,
        added_or_updated: &[PackageIdentity],
    ) -> Result<()> {
        if let Some(artifacts) = &self.artifacts {
            artifacts.update_binary_artifacts(manifests, added_or_updated)?;
            artifacts.update_prebuilts(manifests, added_or_updated)?;
        }
        Ok(())
    }

    fn begin_cycle(&self) {
        self.diagnostics.reset();
        self.computed_versions.reset();
    }

    fn load_graph_root(&self, root_manifests: &[PathBuf]) -> Result<GraphRoot> {
        let manifests = self
            .manifest_loader
            .load_root_manifests(root_manifests)
            .context("failed to load root manifests")?;
        Ok(GraphRoot::new(manifests))
    }

    fn load_pin_store(&self) -> Result<ResolvedPackagesStore> {
        Ok(load_resolved_file_optional(&self.resolved_file_path)?.unwrap_or_default())
    }

    fn current_origin_hash(&self, root: &GraphRoot) -> Result<String> {
        origin_hash(&root.manifest_paths(), &root.dependency_locations())
    }
}
