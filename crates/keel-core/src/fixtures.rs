//! In-memory fakes for exercising the resolution core without a network.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use semver::Version;

use keel_domain::api::{
    BoundVersion, CheckoutState, DependencyManifests, DependencyResolverBinding, GraphRoot,
    ManagedDependency, Manifest, PackageContainerConstraint, PackageIdentity, PackageReference,
    PackageRequirement, ResolutionError,
};

use crate::container::{
    Container, PackageContainer, PackageContainerProvider, RegistryContainer,
    SourceControlContainer, UpdateStrategy,
};
use crate::delegate::WorkspaceDelegate;
use crate::effects::{ArtifactsUpdater, DependencyResolver, ManifestLoader};

pub(crate) fn version(raw: &str) -> Version {
    Version::parse(raw).expect("version")
}

#[derive(Debug)]
pub(crate) struct FakeScmContainer {
    pub package_ref: PackageReference,
    pub checkout_count: Mutex<usize>,
    tags: BTreeMap<Version, String>,
    revisions: BTreeMap<String, String>,
    fail_integrity: bool,
}

impl FakeScmContainer {
    pub fn new(url: &str) -> Self {
        Self {
            package_ref: PackageReference::remote_source_control(url),
            checkout_count: Mutex::new(0),
            tags: BTreeMap::new(),
            revisions: BTreeMap::new(),
            fail_integrity: false,
        }
    }

    pub fn with_version(mut self, raw: &str, revision: &str) -> Self {
        let version = version(raw);
        let tag = format!("v{version}");
        self.tags.insert(version, tag.clone());
        self.revisions.insert(tag, revision.to_string());
        self
    }

    pub fn with_branch(mut self, name: &str, revision: &str) -> Self {
        self.revisions.insert(name.to_string(), revision.to_string());
        self
    }

    pub fn failing_integrity(mut self) -> Self {
        self.fail_integrity = true;
        self
    }
}

impl PackageContainer for FakeScmContainer {
    fn package_ref(&self) -> &PackageReference {
        &self.package_ref
    }

    fn versions(&self) -> Result<Vec<Version>> {
        Ok(self.tags.keys().cloned().collect())
    }
}

impl SourceControlContainer for FakeScmContainer {
    fn tag_for_version(&self, version: &Version) -> Result<Option<String>> {
        Ok(self.tags.get(version).cloned())
    }

    fn revision_for_tag(&self, tag: &str) -> Result<String> {
        self.revisions
            .get(tag)
            .cloned()
            .ok_or_else(|| anyhow!("unknown tag {tag}"))
    }

    fn revision_for_identifier(&self, identifier: &str) -> Result<String> {
        if let Some(revision) = self.revisions.get(identifier) {
            return Ok(revision.clone());
        }
        if self.revisions.values().any(|known| known == identifier) {
            return Ok(identifier.to_string());
        }
        bail!("unknown identifier {identifier}")
    }

    fn check_integrity(&self, version: &Version, _revision: &str) -> Result<()> {
        if self.fail_integrity {
            bail!("integrity check failed for {version}")
        }
        Ok(())
    }

    fn checkout(&self, state: &CheckoutState, destination: &Path) -> Result<()> {
        *self.checkout_count.lock().expect("checkout count") += 1;
        fs::create_dir_all(destination)?;
        fs::write(destination.join("CHECKOUT"), state.describe())?;
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FakeRegistryContainer {
    pub package_ref: PackageReference,
    versions: BTreeSet<Version>,
}

impl FakeRegistryContainer {
    pub fn new(identity: &str) -> Self {
        Self {
            package_ref: PackageReference::registry(identity),
            versions: BTreeSet::new(),
        }
    }

    pub fn with_version(mut self, raw: &str) -> Self {
        self.versions.insert(version(raw));
        self
    }
}

impl PackageContainer for FakeRegistryContainer {
    fn package_ref(&self) -> &PackageReference {
        &self.package_ref
    }

    fn versions(&self) -> Result<Vec<Version>> {
        Ok(self.versions.iter().cloned().collect())
    }
}

impl RegistryContainer for FakeRegistryContainer {
    fn download(&self, version: &Version, destination: &Path) -> Result<()> {
        if !self.versions.contains(version) {
            bail!("{} has no release {version}", self.package_ref);
        }
        fs::create_dir_all(destination)?;
        fs::write(destination.join("ARCHIVE"), version.to_string())?;
        Ok(())
    }
}

/// Provider over a fixed container set, recording every acquisition.
#[derive(Default)]
pub(crate) struct FakeProvider {
    containers: BTreeMap<PackageIdentity, Container>,
    pub acquisitions: Mutex<Vec<(PackageIdentity, UpdateStrategy)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scm(self, container: FakeScmContainer) -> Self {
        self.with_scm_arc(Arc::new(container))
    }

    pub fn with_scm_arc(mut self, container: Arc<FakeScmContainer>) -> Self {
        let identity = container.package_ref.identity.clone();
        self.containers
            .insert(identity, Container::SourceControl(container));
        self
    }

    pub fn with_registry(mut self, container: FakeRegistryContainer) -> Self {
        let identity = container.package_ref.identity.clone();
        self.containers
            .insert(identity, Container::Registry(Arc::new(container)));
        self
    }

    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.lock().expect("acquisitions").len()
    }
}

impl PackageContainerProvider for FakeProvider {
    fn get_container(
        &self,
        package: &PackageReference,
        update_strategy: &UpdateStrategy,
    ) -> Result<Container> {
        self.acquisitions
            .lock()
            .expect("acquisitions")
            .push((package.identity.clone(), update_strategy.clone()));
        self.containers
            .get(&package.identity)
            .cloned()
            .ok_or_else(|| anyhow!("no container for {package}"))
    }
}

fn looks_like_revision(identifier: &str) -> bool {
    identifier.len() >= 7 && identifier.chars().all(|ch| ch.is_ascii_hexdigit())
}

/// A deliberately small solver: every constraint resolves independently,
/// version sets pick the highest available release. Enough to drive the
/// orchestrator and the precomputation provider in tests.
#[derive(Debug, Default)]
pub(crate) struct MiniResolver;

impl DependencyResolver for MiniResolver {
    fn solve(
        &self,
        provider: &dyn PackageContainerProvider,
        constraints: &[PackageContainerConstraint],
        pins: &BTreeMap<PackageIdentity, keel_domain::api::ResolvedPackage>,
    ) -> Result<Vec<DependencyResolverBinding>, ResolutionError> {
        let mut bindings = Vec::new();
        let mut seen = BTreeSet::new();
        for constraint in constraints {
            if !seen.insert(constraint.package_ref.identity.clone()) {
                continue;
            }
            match &constraint.requirement {
                PackageRequirement::Unversioned => {
                    bindings.push(DependencyResolverBinding::new(
                        constraint.package_ref.clone(),
                        BoundVersion::Unversioned,
                    ));
                }
                PackageRequirement::Revision(identifier) => {
                    let container = provider
                        .get_container(
                            &constraint.package_ref,
                            &UpdateStrategy::IfNeeded {
                                revision: identifier.clone(),
                            },
                        )
                        .map_err(|_| ResolutionError::MissingPackage {
                            package: constraint.package_ref.clone(),
                        })?;
                    let source_control = container.as_source_control().ok_or_else(|| {
                        ResolutionError::Provider(anyhow!(
                            "revision constraint on non-source-control {}",
                            constraint.package_ref
                        ))
                    })?;
                    let revision = source_control
                        .revision_for_identifier(identifier)
                        .map_err(ResolutionError::Provider)?;
                    let branch = if looks_like_revision(identifier) {
                        None
                    } else {
                        Some(identifier.clone())
                    };
                    bindings.push(DependencyResolverBinding::new(
                        constraint.package_ref.clone(),
                        BoundVersion::Revision { revision, branch },
                    ));
                }
                PackageRequirement::VersionSet(requirement) => {
                    let container = provider
                        .get_container(&constraint.package_ref, &UpdateStrategy::Always)
                        .map_err(|_| ResolutionError::MissingPackage {
                            package: constraint.package_ref.clone(),
                        })?;
                    let available = container.versions().map_err(ResolutionError::Provider)?;
                    // Pins act as hints: a satisfying pinned version wins
                    // over the newest release.
                    let pinned = pins
                        .get(&constraint.package_ref.identity)
                        .and_then(|pin| match &pin.state {
                            keel_domain::api::PinState::Version { version, .. } => {
                                Some(version.clone())
                            }
                            _ => None,
                        })
                        .filter(|candidate| requirement.matches(candidate));
                    let chosen = pinned.or_else(|| {
                        available
                            .iter()
                            .filter(|candidate| requirement.matches(candidate))
                            .max()
                            .cloned()
                    });
                    match chosen {
                        Some(version) => bindings.push(DependencyResolverBinding::new(
                            constraint.package_ref.clone(),
                            BoundVersion::Version(version),
                        )),
                        None => {
                            return Err(ResolutionError::DifferentRequirement {
                                package: constraint.package_ref.clone(),
                                state: format!(
                                    "available {:?}",
                                    available
                                        .iter()
                                        .map(Version::to_string)
                                        .collect::<Vec<_>>()
                                ),
                                requirement: requirement.to_string(),
                            });
                        }
                    }
                }
            }
        }
        Ok(bindings)
    }
}

type ResolverScript = Box<
    dyn Fn(
            &[PackageContainerConstraint],
        ) -> Result<Vec<DependencyResolverBinding>, ResolutionError>
        + Send
        + Sync,
>;

/// Resolver whose answer is scripted by the test.
pub(crate) struct ScriptedResolver {
    script: ResolverScript,
}

impl ScriptedResolver {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(
                &[PackageContainerConstraint],
            ) -> Result<Vec<DependencyResolverBinding>, ResolutionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            script: Box::new(script),
        }
    }
}

impl DependencyResolver for ScriptedResolver {
    fn solve(
        &self,
        _provider: &dyn PackageContainerProvider,
        constraints: &[PackageContainerConstraint],
        _pins: &BTreeMap<PackageIdentity, keel_domain::api::ResolvedPackage>,
    ) -> Result<Vec<DependencyResolverBinding>, ResolutionError> {
        (self.script)(constraints)
    }
}

/// Manifest loader over a fixed catalog: roots by path, dependency manifests
/// by identity for whatever is materialized.
#[derive(Default)]
pub(crate) struct StubManifestLoader {
    roots: Mutex<BTreeMap<PathBuf, Manifest>>,
    catalog: Mutex<BTreeMap<PackageIdentity, Manifest>>,
}

impl StubManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(self, manifest: Manifest) -> Self {
        self.replace_root(manifest);
        self
    }

    pub fn with_dependency_manifest(self, manifest: Manifest) -> Self {
        self.catalog
            .lock()
            .expect("catalog")
            .insert(manifest.identity().clone(), manifest);
        self
    }

    /// Swap a root in place, as an edited manifest would.
    pub fn replace_root(&self, manifest: Manifest) {
        self.roots
            .lock()
            .expect("roots")
            .insert(manifest.path.clone(), manifest);
    }

    pub fn add_dependency_manifest(&self, manifest: Manifest) {
        self.catalog
            .lock()
            .expect("catalog")
            .insert(manifest.identity().clone(), manifest);
    }
}

impl ManifestLoader for StubManifestLoader {
    fn load_root_manifests(&self, paths: &[PathBuf]) -> Result<Vec<Manifest>> {
        let roots = self.roots.lock().expect("roots");
        paths
            .iter()
            .map(|path| {
                roots
                    .get(path)
                    .cloned()
                    .ok_or_else(|| anyhow!("no root manifest at {}", path.display()))
            })
            .collect()
    }

    fn load_dependency_manifests(
        &self,
        root: &GraphRoot,
        managed: &BTreeMap<PackageIdentity, ManagedDependency>,
    ) -> Result<DependencyManifests> {
        let catalog = self.catalog.lock().expect("catalog");
        let mut manifests = BTreeMap::new();
        for identity in managed.keys() {
            if let Some(manifest) = catalog.get(identity) {
                manifests.insert(identity.clone(), manifest.clone());
            }
        }
        Ok(DependencyManifests::new(root.clone(), manifests))
    }
}

/// Artifacts updater recording which change sets it was handed.
#[derive(Debug, Default)]
pub(crate) struct RecordingArtifacts {
    calls: Mutex<Vec<(&'static str, Vec<String>)>>,
}

impl RecordingArtifacts {
    pub fn calls(&self) -> Vec<(&'static str, Vec<String>)> {
        self.calls.lock().expect("calls").clone()
    }

    fn record(&self, kind: &'static str, added_or_updated: &[PackageIdentity]) {
        let mut ids: Vec<String> = added_or_updated
            .iter()
            .map(|identity| identity.as_str().to_string())
            .collect();
        ids.sort();
        self.calls.lock().expect("calls").push((kind, ids));
    }
}

impl ArtifactsUpdater for RecordingArtifacts {
    fn update_binary_artifacts(
        &self,
        _manifests: &DependencyManifests,
        added_or_updated: &[PackageIdentity],
    ) -> Result<()> {
        self.record("binary", added_or_updated);
        Ok(())
    }

    fn update_prebuilts(
        &self,
        _manifests: &DependencyManifests,
        added_or_updated: &[PackageIdentity],
    ) -> Result<()> {
        self.record("prebuilts", added_or_updated);
        Ok(())
    }
}

/// Delegate recording event names in order.
#[derive(Debug, Default)]
pub(crate) struct RecordingDelegate {
    pub events: Mutex<Vec<String>>,
}

impl RecordingDelegate {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events").clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().expect("events").push(event.into());
    }
}

impl WorkspaceDelegate for RecordingDelegate {
    fn will_resolve_dependencies(&self, _reason: Option<&str>) {
        self.record("will_resolve");
    }

    fn did_resolve_dependencies(&self, _duration: std::time::Duration) {
        self.record("did_resolve");
    }

    fn will_update_dependencies(&self) {
        self.record("will_update");
    }

    fn did_update_dependencies(&self, _duration: std::time::Duration) {
        self.record("did_update");
    }

    fn will_compute_version(&self, package: &PackageIdentity, _location: &str) {
        self.record(format!("will_compute:{package}"));
    }

    fn did_compute_version(
        &self,
        package: &PackageIdentity,
        _location: &str,
        _version: &str,
        _duration: std::time::Duration,
    ) {
        self.record(format!("did_compute:{package}"));
    }

    fn dependencies_up_to_date(&self) {
        self.record("up_to_date");
    }
}
