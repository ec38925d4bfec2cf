use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use semver::Version;

use keel_domain::api::{
    CheckoutState, DependencyManifests, ManagedDependency, PackageContainerConstraint,
    PackageIdentity, PackageReference, PinState, ResolutionError, ResolvedPackagesStore,
};

use crate::container::{
    Container, PackageContainer, PackageContainerProvider, SourceControlContainer, UpdateStrategy,
};
use crate::diagnostics::DiagnosticsScope;
use crate::effects::DependencyResolver;
use crate::store::edited_packages_constraints;

/// Why full resolution cannot be skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrecomputationRequired {
    NewPackages { package: PackageReference },
    RequirementChange {
        package: PackageReference,
        state: String,
        requirement: String,
    },
    ErrorsPreviouslyReported,
    Other { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrecomputationResult {
    NotRequired,
    Required(PrecomputationRequired),
}

impl PrecomputationResult {
    #[must_use]
    pub fn is_required(&self) -> bool {
        matches!(self, PrecomputationResult::Required(_))
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            PrecomputationResult::NotRequired => "not required".to_string(),
            PrecomputationResult::Required(PrecomputationRequired::NewPackages { package }) => {
                format!("new package {package}")
            }
            PrecomputationResult::Required(PrecomputationRequired::RequirementChange {
                package,
                state,
                requirement,
            }) => format!("{package} is {state} but {requirement} is required"),
            PrecomputationResult::Required(PrecomputationRequired::ErrorsPreviouslyReported) => {
                "errors previously reported".to_string()
            }
            PrecomputationResult::Required(PrecomputationRequired::Other { reason }) => {
                reason.clone()
            }
        }
    }
}

/// Decide whether the current pins and materialized manifests already satisfy
/// the graph, without touching the network or any store.
pub fn precompute_resolution(
    resolver: &dyn DependencyResolver,
    manifests: &DependencyManifests,
    managed: &BTreeMap<PackageIdentity, ManagedDependency>,
    pin_store: &ResolvedPackagesStore,
    extra_constraints: &[PackageContainerConstraint],
    diagnostics: &DiagnosticsScope,
) -> PrecomputationResult {
    if diagnostics.errors_reported() {
        return PrecomputationResult::Required(PrecomputationRequired::ErrorsPreviouslyReported);
    }

    let mut constraints = manifests.root.constraints();
    constraints.extend(manifests.dependency_constraints());
    constraints.extend(edited_packages_constraints(managed));
    constraints.extend(extra_constraints.iter().cloned());

    let provider = PrecomputationProvider::new(manifests, pin_store);
    match resolver.solve(&provider, &constraints, pin_store.pins()) {
        Ok(_) => PrecomputationResult::NotRequired,
        Err(ResolutionError::MissingPackage { package }) => {
            PrecomputationResult::Required(PrecomputationRequired::NewPackages { package })
        }
        Err(ResolutionError::DifferentRequirement {
            package,
            state,
            requirement,
        }) => PrecomputationResult::Required(PrecomputationRequired::RequirementChange {
            package,
            state,
            requirement,
        }),
        Err(err) => {
            tracing::debug!(error = %err, "precomputation_solver_failed");
            PrecomputationResult::Required(PrecomputationRequired::Other {
                reason: err.to_string(),
            })
        }
    }
}

/// Answers container queries purely from already-loaded manifests and the
/// pin set. Acquisition never fetches; unknown packages are an error the
/// solver reports as missing.
pub struct PrecomputationProvider {
    known: BTreeMap<PackageIdentity, (PackageReference, Option<PinState>)>,
}

impl PrecomputationProvider {
    pub fn new(manifests: &DependencyManifests, pin_store: &ResolvedPackagesStore) -> Self {
        let mut known = BTreeMap::new();
        for manifest in &manifests.root.manifests {
            known.insert(
                manifest.identity().clone(),
                (manifest.package_ref.clone(), None),
            );
        }
        for (identity, manifest) in &manifests.manifests {
            let pinned = pin_store.pin(identity).map(|pin| pin.state.clone());
            known.insert(identity.clone(), (manifest.package_ref.clone(), pinned));
        }
        Self { known }
    }
}

impl PackageContainerProvider for PrecomputationProvider {
    fn get_container(
        &self,
        package: &PackageReference,
        _update_strategy: &UpdateStrategy,
    ) -> Result<Container> {
        match self.known.get(&package.identity) {
            Some((package_ref, pinned)) => {
                Ok(Container::SourceControl(Arc::new(PrecomputedContainer {
                    package_ref: package_ref.clone(),
                    pinned: pinned.clone(),
                })))
            }
            None => bail!("no loaded manifest for {package}"),
        }
    }
}

struct PrecomputedContainer {
    package_ref: PackageReference,
    pinned: Option<PinState>,
}

impl PackageContainer for PrecomputedContainer {
    fn package_ref(&self) -> &PackageReference {
        &self.package_ref
    }

    fn versions(&self) -> Result<Vec<Version>> {
        match &self.pinned {
            Some(PinState::Version { version, .. }) => Ok(vec![version.clone()]),
            _ => Ok(Vec::new()),
        }
    }
}

impl SourceControlContainer for PrecomputedContainer {
    fn tag_for_version(&self, version: &Version) -> Result<Option<String>> {
        match &self.pinned {
            Some(PinState::Version { version: pinned, .. }) if pinned == version => {
                Ok(Some(version.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn revision_for_tag(&self, _tag: &str) -> Result<String> {
        self.pinned_revision()
    }

    fn revision_for_identifier(&self, _identifier: &str) -> Result<String> {
        self.pinned_revision()
    }

    fn check_integrity(&self, _version: &Version, _revision: &str) -> Result<()> {
        Ok(())
    }

    fn checkout(&self, _state: &CheckoutState, _destination: &Path) -> Result<()> {
        bail!("precomputation container for {} performs no I/O", self.package_ref)
    }
}

impl PrecomputedContainer {
    fn pinned_revision(&self) -> Result<String> {
        match &self.pinned {
            Some(PinState::Version {
                revision: Some(revision),
                ..
            })
            | Some(PinState::Revision { revision })
            | Some(PinState::Branch { revision, .. }) => Ok(revision.clone()),
            _ => bail!("no pinned revision for {} while offline", self.package_ref),
        }
    }
}
