use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::identity::{PackageIdentity, PackageReference};

/// Position of a source-control checkout on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CheckoutState {
    /// Checked out at a tag that maps to `version`.
    Version { version: Version, revision: String },
    /// Detached checkout at a bare revision.
    Revision { revision: String },
    /// Tracking `name`, currently at `revision`.
    Branch { name: String, revision: String },
}

impl CheckoutState {
    #[must_use]
    pub fn revision(&self) -> &str {
        match self {
            CheckoutState::Version { revision, .. }
            | CheckoutState::Revision { revision }
            | CheckoutState::Branch { revision, .. } => revision,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            CheckoutState::Version { version, .. } => version.to_string(),
            CheckoutState::Revision { revision } => revision.clone(),
            CheckoutState::Branch { name, revision } => format!("{name}@{revision}"),
        }
    }
}

/// On-disk state of one managed dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ManagedDependencyState {
    SourceControlCheckout { checkout: CheckoutState },
    RegistryDownload { version: Version },
    FileSystem { path: PathBuf },
    Edited {
        based_on: Option<Box<ManagedDependency>>,
        unmanaged_path: Option<PathBuf>,
    },
    Custom { version: Version, path: PathBuf },
}

impl ManagedDependencyState {
    #[must_use]
    pub fn is_edited(&self) -> bool {
        matches!(self, ManagedDependencyState::Edited { .. })
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            ManagedDependencyState::SourceControlCheckout { checkout } => {
                format!("checkout({})", checkout.describe())
            }
            ManagedDependencyState::RegistryDownload { version } => {
                format!("download({version})")
            }
            ManagedDependencyState::FileSystem { path } => {
                format!("fileSystem({})", path.display())
            }
            ManagedDependencyState::Edited { .. } => "edited".to_string(),
            ManagedDependencyState::Custom { version, .. } => format!("custom({version})"),
        }
    }
}

/// One entry of the managed-dependency database. The identity of
/// `package_ref` is the primary key; no two entries share an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDependency {
    pub package_ref: PackageReference,
    pub state: ManagedDependencyState,
    /// Directory name under the working checkouts/downloads root.
    pub subpath: PathBuf,
}

impl ManagedDependency {
    pub fn source_control_checkout(package_ref: PackageReference, checkout: CheckoutState) -> Self {
        let subpath = PathBuf::from(package_ref.identity.as_str());
        Self {
            package_ref,
            state: ManagedDependencyState::SourceControlCheckout { checkout },
            subpath,
        }
    }

    pub fn registry_download(package_ref: PackageReference, version: Version) -> Self {
        let subpath = PathBuf::from(format!("{}-{version}", package_ref.identity));
        Self {
            package_ref,
            state: ManagedDependencyState::RegistryDownload { version },
            subpath,
        }
    }

    pub fn file_system(package_ref: PackageReference) -> Self {
        let path = PathBuf::from(&package_ref.location);
        Self {
            package_ref,
            state: ManagedDependencyState::FileSystem { path },
            subpath: PathBuf::new(),
        }
    }

    pub fn custom(package_ref: PackageReference, version: Version, path: PathBuf) -> Self {
        let subpath = PathBuf::from(package_ref.identity.as_str());
        Self {
            package_ref,
            state: ManagedDependencyState::Custom { version, path },
            subpath,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &PackageIdentity {
        &self.package_ref.identity
    }

    /// The reference resolution should treat this dependency as, unwrapping
    /// one level of edit indirection.
    #[must_use]
    pub fn original_reference(&self) -> &PackageReference {
        match &self.state {
            ManagedDependencyState::Edited {
                based_on: Some(base),
                ..
            } => &base.package_ref,
            _ => &self.package_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(raw: &str) -> Version {
        Version::parse(raw).expect("version")
    }

    #[test]
    fn checkout_state_exposes_revision() {
        let state = CheckoutState::Branch {
            name: "main".into(),
            revision: "abc123".into(),
        };
        assert_eq!(state.revision(), "abc123");
        assert_eq!(state.describe(), "main@abc123");
    }

    #[test]
    fn registry_download_subpath_includes_version() {
        let dep = ManagedDependency::registry_download(
            PackageReference::registry("acme.widgets"),
            version("2.3.1"),
        );
        assert_eq!(dep.subpath, PathBuf::from("acme.widgets-2.3.1"));
    }

    #[test]
    fn edited_dependency_reports_original_reference() {
        let base = ManagedDependency::source_control_checkout(
            PackageReference::remote_source_control("https://example.com/org/widgets.git"),
            CheckoutState::Revision {
                revision: "beef".into(),
            },
        );
        let package_ref = base.package_ref.clone();
        let edited = ManagedDependency {
            package_ref: package_ref.with_kind(crate::identity::RefKind::Edited),
            state: ManagedDependencyState::Edited {
                based_on: Some(Box::new(base)),
                unmanaged_path: None,
            },
            subpath: PathBuf::from("widgets"),
        };
        assert_eq!(edited.original_reference(), &package_ref);
    }

    #[test]
    fn managed_state_round_trips_through_json() {
        let dep = ManagedDependency::source_control_checkout(
            PackageReference::remote_source_control("https://example.com/org/widgets.git"),
            CheckoutState::Version {
                version: version("1.2.0"),
                revision: "deadbeef".into(),
            },
        );
        let encoded = serde_json::to_string(&dep).expect("encode");
        let decoded: ManagedDependency = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, dep);
    }
}
