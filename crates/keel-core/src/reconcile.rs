use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use anyhow::{anyhow, Result};
use semver::Version;

use keel_domain::api::{
    BoundVersion, CheckoutState, DependencyResolverBinding, GraphRoot, ManagedDependency,
    ManagedDependencyState, PackageIdentity, PackageReference, PinState, ProductFilter,
    ResolvedPackagesStore,
};

use crate::container::{PackageContainerProvider, UpdateStrategy};
use crate::delegate::{OncePerIdentity, WorkspaceDelegate};
use crate::outcome::DependencyError;

/// The concrete requirement a state change installs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Version(Version),
    Revision {
        revision: String,
        branch: Option<String>,
    },
    Unversioned,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Version(version) => write!(f, "{version}"),
            Requirement::Revision {
                revision,
                branch: Some(branch),
            } => write!(f, "{branch}@{revision}"),
            Requirement::Revision {
                revision,
                branch: None,
            } => f.write_str(revision),
            Requirement::Unversioned => f.write_str("unversioned"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedState {
    pub requirement: Requirement,
    pub products: ProductFilter,
}

/// How one package moves between the resolver's answer and the disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackageStateChange {
    Added(PlannedState),
    Updated(PlannedState),
    Unchanged,
    Removed,
}

/// Reconciler output: one change per package, removals last.
pub type StateChanges = Vec<(PackageReference, PackageStateChange)>;

impl PackageStateChange {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, PackageStateChange::Unchanged)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            PackageStateChange::Added(state) => format!("added({})", state.requirement),
            PackageStateChange::Updated(state) => format!("updated({})", state.requirement),
            PackageStateChange::Unchanged => "unchanged".to_string(),
            PackageStateChange::Removed => "removed".to_string(),
        }
    }
}

/// Diff resolver bindings against the managed snapshot.
///
/// Bindings are processed in input order so diagnostics stay deterministic;
/// removals for untouched identities are appended last. Every package
/// appears at most once in the output.
#[allow(clippy::too_many_arguments)]
pub fn compute_state_changes(
    provider: &dyn PackageContainerProvider,
    root: &GraphRoot,
    managed: &BTreeMap<PackageIdentity, ManagedDependency>,
    pin_store: &ResolvedPackagesStore,
    bindings: &[DependencyResolverBinding],
    update_branches: bool,
    delegate: &dyn WorkspaceDelegate,
    computed_versions: &OncePerIdentity,
) -> Result<StateChanges> {
    let mut changes: StateChanges = Vec::new();
    let mut touched: BTreeSet<PackageIdentity> = BTreeSet::new();

    for binding in bindings {
        let identity = binding.package_ref.identity.clone();
        if touched.contains(&identity) {
            continue;
        }

        // Edited overrides survive resolution untouched; the change is
        // reported against the reference the edit is based on.
        if let Some(current) = managed.get(&identity) {
            if current.state.is_edited() {
                touched.insert(identity);
                changes.push((
                    current.original_reference().clone(),
                    PackageStateChange::Unchanged,
                ));
                continue;
            }
        }

        // Location-aware lookup: a package whose source moved while keeping
        // its identity reads as absent and re-installs at the new location.
        let current = managed
            .get(&identity)
            .filter(|dep| dep.package_ref.location == binding.package_ref.location);

        let change = match &binding.bound_version {
            BoundVersion::Excluded => {
                return Err(DependencyError::ExcludedBinding {
                    package: binding.package_ref.clone(),
                }
                .into());
            }
            BoundVersion::Unversioned => {
                if root.is_root_identity(&identity) {
                    touched.insert(identity);
                    continue;
                }
                match current.map(|dep| &dep.state) {
                    Some(
                        ManagedDependencyState::FileSystem { .. }
                        | ManagedDependencyState::Edited { .. },
                    ) => PackageStateChange::Unchanged,
                    Some(ManagedDependencyState::SourceControlCheckout { .. }) => {
                        PackageStateChange::Updated(PlannedState {
                            requirement: Requirement::Unversioned,
                            products: binding.products.clone(),
                        })
                    }
                    Some(
                        state @ (ManagedDependencyState::RegistryDownload { .. }
                        | ManagedDependencyState::Custom { .. }),
                    ) => {
                        return Err(DependencyError::IllegalStateTransition {
                            package: binding.package_ref.clone(),
                            from: state.describe(),
                            to: "unversioned".to_string(),
                        }
                        .into());
                    }
                    None => PackageStateChange::Added(PlannedState {
                        requirement: Requirement::Unversioned,
                        products: binding.products.clone(),
                    }),
                }
            }
            BoundVersion::Revision { revision, branch } => {
                let canonical = canonical_revision(
                    provider,
                    binding,
                    revision,
                    branch.as_deref(),
                    delegate,
                    computed_versions,
                )?;
                // Branch freeze: with updates disabled, a pin on the same
                // branch (at the same location) wins over the freshly
                // fetched head.
                let pinned = pin_store.pin_comparing_location(&binding.package_ref);
                let revision = match (update_branches, branch, pinned) {
                    (false, Some(branch), Some(pin)) => match &pin.state {
                        PinState::Branch { name, revision } if name == branch => revision.clone(),
                        _ => canonical,
                    },
                    _ => canonical,
                };
                let target = match branch {
                    Some(name) => CheckoutState::Branch {
                        name: name.clone(),
                        revision: revision.clone(),
                    },
                    None => CheckoutState::Revision {
                        revision: revision.clone(),
                    },
                };
                let planned = PlannedState {
                    requirement: Requirement::Revision {
                        revision,
                        branch: branch.clone(),
                    },
                    products: binding.products.clone(),
                };
                match current.map(|dep| &dep.state) {
                    Some(ManagedDependencyState::SourceControlCheckout { checkout })
                        if *checkout == target =>
                    {
                        PackageStateChange::Unchanged
                    }
                    Some(_) => PackageStateChange::Updated(planned),
                    None => PackageStateChange::Added(planned),
                }
            }
            BoundVersion::Version(version) => {
                let matches_current = match current.map(|dep| &dep.state) {
                    Some(ManagedDependencyState::SourceControlCheckout {
                        checkout: CheckoutState::Version { version: on_disk, .. },
                    })
                    | Some(ManagedDependencyState::RegistryDownload { version: on_disk })
                    | Some(ManagedDependencyState::Custom {
                        version: on_disk, ..
                    }) => on_disk == version,
                    _ => false,
                };
                let planned = PlannedState {
                    requirement: Requirement::Version(version.clone()),
                    products: binding.products.clone(),
                };
                if matches_current {
                    PackageStateChange::Unchanged
                } else if current.is_some() {
                    PackageStateChange::Updated(planned)
                } else {
                    PackageStateChange::Added(planned)
                }
            }
        };

        touched.insert(identity);
        changes.push((binding.package_ref.clone(), change));
    }

    for (identity, dependency) in managed {
        if !touched.contains(identity) {
            changes.push((dependency.package_ref.clone(), PackageStateChange::Removed));
        }
    }

    Ok(changes)
}

fn canonical_revision(
    provider: &dyn PackageContainerProvider,
    binding: &DependencyResolverBinding,
    revision: &str,
    branch: Option<&str>,
    delegate: &dyn WorkspaceDelegate,
    computed_versions: &OncePerIdentity,
) -> Result<String> {
    let identity = &binding.package_ref.identity;
    let announce = computed_versions.first_touch(identity);
    if announce {
        delegate.will_compute_version(identity, &binding.package_ref.location);
    }
    let started = Instant::now();
    let container = provider.get_container(
        &binding.package_ref,
        &UpdateStrategy::IfNeeded {
            revision: revision.to_string(),
        },
    )?;
    let source_control = container.as_source_control().ok_or_else(|| {
        anyhow!(
            "{} is bound to a revision but its container is {}",
            binding.package_ref,
            container.kind_name()
        )
    })?;
    let canonical = source_control.revision_for_identifier(branch.unwrap_or(revision))?;
    if announce {
        delegate.did_compute_version(
            identity,
            &binding.package_ref.location,
            &canonical,
            started.elapsed(),
        );
    }
    Ok(canonical)
}
