use std::collections::BTreeSet;
use std::fmt;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::identity::PackageReference;

/// Products of a dependency that the depending package actually uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductFilter {
    Everything,
    Specific(BTreeSet<String>),
}

impl ProductFilter {
    pub fn specific<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProductFilter::Specific(names.into_iter().map(Into::into).collect())
    }
}

impl Default for ProductFilter {
    fn default() -> Self {
        ProductFilter::Everything
    }
}

/// What a manifest asks of a dependency before solving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackageRequirement {
    /// Any version admitted by the requirement set.
    VersionSet(VersionReq),
    /// A branch name or explicit revision identifier.
    Revision(String),
    /// Local packages carry no version at all.
    Unversioned,
}

impl fmt::Display for PackageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageRequirement::VersionSet(req) => write!(f, "{req}"),
            PackageRequirement::Revision(revision) => write!(f, "revision {revision}"),
            PackageRequirement::Unversioned => f.write_str("unversioned"),
        }
    }
}

/// One constraint handed to the solver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageContainerConstraint {
    pub package_ref: PackageReference,
    pub requirement: PackageRequirement,
    pub products: ProductFilter,
}

impl PackageContainerConstraint {
    pub fn new(package_ref: PackageReference, requirement: PackageRequirement) -> Self {
        Self {
            package_ref,
            requirement,
            products: ProductFilter::Everything,
        }
    }
}

/// The concrete choice the solver made for one package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundVersion {
    /// The package must not be present. The solver never hands this to the
    /// workspace; seeing it there is fatal.
    Excluded,
    /// Local package without a version.
    Unversioned,
    Version(Version),
    Revision {
        revision: String,
        branch: Option<String>,
    },
}

impl fmt::Display for BoundVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundVersion::Excluded => f.write_str("excluded"),
            BoundVersion::Unversioned => f.write_str("unversioned"),
            BoundVersion::Version(version) => write!(f, "{version}"),
            BoundVersion::Revision {
                revision,
                branch: Some(branch),
            } => write!(f, "{branch}@{revision}"),
            BoundVersion::Revision {
                revision,
                branch: None,
            } => f.write_str(revision),
        }
    }
}

/// Solver output: one binding per package in the transitive closure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyResolverBinding {
    pub package_ref: PackageReference,
    pub bound_version: BoundVersion,
    pub products: ProductFilter,
}

impl DependencyResolverBinding {
    pub fn new(package_ref: PackageReference, bound_version: BoundVersion) -> Self {
        Self {
            package_ref,
            bound_version,
            products: ProductFilter::Everything,
        }
    }
}

/// Failure modes surfaced by the solver.
#[derive(thiserror::Error, Debug)]
pub enum ResolutionError {
    #[error("no container available for {package}")]
    MissingPackage { package: PackageReference },
    #[error("{package} is required as {requirement} but is currently {state}")]
    DifferentRequirement {
        package: PackageReference,
        state: String,
        requirement: String,
    },
    #[error("dependency graph is unsatisfiable: {0}")]
    Unsatisfiable(String),
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}
