use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use semver::Version;

use keel_domain::api::{CheckoutState, PackageReference};

/// How aggressively a container refreshes upstream state when acquired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Answer from local state only.
    Never,
    /// Fetch only when `revision` is not already known locally.
    IfNeeded { revision: String },
    /// Always fetch before answering.
    Always,
}

/// Capability surface shared by every container kind.
pub trait PackageContainer: Send + Sync {
    fn package_ref(&self) -> &PackageReference;

    /// Known versions, newest ordering not required.
    fn versions(&self) -> Result<Vec<Version>>;
}

/// A handle onto a source-control repository's history.
pub trait SourceControlContainer: PackageContainer {
    /// The tag a version was published under, if any.
    fn tag_for_version(&self, version: &Version) -> Result<Option<String>>;

    fn revision_for_tag(&self, tag: &str) -> Result<String>;

    /// Canonical revision for a branch name or revision identifier.
    fn revision_for_identifier(&self, identifier: &str) -> Result<String>;

    fn check_integrity(&self, version: &Version, revision: &str) -> Result<()>;

    fn checkout(&self, state: &CheckoutState, destination: &Path) -> Result<()>;
}

/// A handle onto a registry's published releases.
pub trait RegistryContainer: PackageContainer {
    fn download(&self, version: &Version, destination: &Path) -> Result<()>;
}

/// Out-of-band distribution; the container decides where the payload lands.
pub trait CustomContainer: PackageContainer {
    fn retrieve(&self, version: &Version) -> Result<PathBuf>;
}

/// The three container shapes the core can work with.
#[derive(Clone)]
pub enum Container {
    SourceControl(Arc<dyn SourceControlContainer>),
    Registry(Arc<dyn RegistryContainer>),
    Custom(Arc<dyn CustomContainer>),
}

impl Container {
    #[must_use]
    pub fn package_ref(&self) -> &PackageReference {
        match self {
            Container::SourceControl(container) => container.package_ref(),
            Container::Registry(container) => container.package_ref(),
            Container::Custom(container) => container.package_ref(),
        }
    }

    pub fn versions(&self) -> Result<Vec<Version>> {
        match self {
            Container::SourceControl(container) => container.versions(),
            Container::Registry(container) => container.versions(),
            Container::Custom(container) => container.versions(),
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Container::SourceControl(_) => "sourceControl",
            Container::Registry(_) => "registry",
            Container::Custom(_) => "custom",
        }
    }

    #[must_use]
    pub fn as_source_control(&self) -> Option<&Arc<dyn SourceControlContainer>> {
        match self {
            Container::SourceControl(container) => Some(container),
            _ => None,
        }
    }
}

/// Hands out containers for packages. Implementations must be safe for
/// concurrent calls with distinct packages and must coalesce concurrent
/// calls for the same package.
pub trait PackageContainerProvider: Send + Sync {
    fn get_container(
        &self,
        package: &PackageReference,
        update_strategy: &UpdateStrategy,
    ) -> Result<Container>;
}
