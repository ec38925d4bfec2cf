use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use keel_domain::api::{
    DependencyManifests, DependencyResolverBinding, GraphRoot, ManagedDependency, Manifest,
    PackageContainerConstraint, PackageIdentity, ResolutionError, ResolvedPackage,
};

use crate::container::PackageContainerProvider;

/// Loads package descriptions. Parsing is outside the core; the core only
/// consumes the loaded form.
pub trait ManifestLoader: Send + Sync {
    /// Root manifests, in the order the roots are listed.
    fn load_root_manifests(&self, paths: &[PathBuf]) -> Result<Vec<Manifest>>;

    /// Manifests for every dependency that is currently materialized.
    fn load_dependency_manifests(
        &self,
        root: &GraphRoot,
        managed: &BTreeMap<PackageIdentity, ManagedDependency>,
    ) -> Result<DependencyManifests>;
}

/// The version solver. Given constraints and pin hints it either produces a
/// binding per package in the closure or explains why it cannot.
pub trait DependencyResolver: Send + Sync {
    fn solve(
        &self,
        provider: &dyn PackageContainerProvider,
        constraints: &[PackageContainerConstraint],
        pins: &BTreeMap<PackageIdentity, ResolvedPackage>,
    ) -> Result<Vec<DependencyResolverBinding>, ResolutionError>;

    /// Best-effort cancellation of an in-flight solve.
    fn cancel(&self) {}
}

/// Refreshes binary artifacts and prebuilt payloads after resolution.
pub trait ArtifactsUpdater: Send + Sync {
    fn update_binary_artifacts(
        &self,
        manifests: &DependencyManifests,
        added_or_updated: &[PackageIdentity],
    ) -> Result<()>;

    fn update_prebuilts(
        &self,
        manifests: &DependencyManifests,
        added_or_updated: &[PackageIdentity],
    ) -> Result<()>;
}
