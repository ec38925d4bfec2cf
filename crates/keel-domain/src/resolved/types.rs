use std::collections::BTreeMap;

use semver::Version;

use crate::identity::{PackageIdentity, PackageReference};
use crate::managed::{CheckoutState, ManagedDependency, ManagedDependencyState};

pub const RESOLVED_VERSION: i64 = 1;
pub const RESOLVED_FILE_NAME: &str = "keel.resolved";

/// Durable form of one binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinState {
    Version {
        version: Version,
        revision: Option<String>,
    },
    Revision {
        revision: String,
    },
    Branch {
        name: String,
        revision: String,
    },
}

impl PinState {
    /// The pin a managed state maps to. Filesystem, edited, and custom
    /// dependencies are not pinnable.
    pub fn from_managed_state(state: &ManagedDependencyState) -> Option<Self> {
        match state {
            ManagedDependencyState::SourceControlCheckout { checkout } => Some(match checkout {
                CheckoutState::Version { version, revision } => PinState::Version {
                    version: version.clone(),
                    revision: Some(revision.clone()),
                },
                CheckoutState::Revision { revision } => PinState::Revision {
                    revision: revision.clone(),
                },
                CheckoutState::Branch { name, revision } => PinState::Branch {
                    name: name.clone(),
                    revision: revision.clone(),
                },
            }),
            ManagedDependencyState::RegistryDownload { version } => Some(PinState::Version {
                version: version.clone(),
                revision: None,
            }),
            ManagedDependencyState::FileSystem { .. }
            | ManagedDependencyState::Edited { .. }
            | ManagedDependencyState::Custom { .. } => None,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            PinState::Version { version, .. } => version.to_string(),
            PinState::Revision { revision } => revision.clone(),
            PinState::Branch { name, revision } => format!("{name}@{revision}"),
        }
    }
}

/// One pinned package from the resolved file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub package_ref: PackageReference,
    pub state: PinState,
}

/// In-memory image of the resolved file. Pins are keyed by identity; a pin
/// may reference a package that is not materialized yet.
#[derive(Clone, Debug, Default)]
pub struct ResolvedPackagesStore {
    pins: BTreeMap<PackageIdentity, ResolvedPackage>,
    pub origin_hash: Option<String>,
    pub minimum_tools_version: Option<Version>,
}

impl ResolvedPackagesStore {
    pub fn new(origin_hash: Option<String>, minimum_tools_version: Option<Version>) -> Self {
        Self {
            pins: BTreeMap::new(),
            origin_hash,
            minimum_tools_version,
        }
    }

    #[must_use]
    pub fn pins(&self) -> &BTreeMap<PackageIdentity, ResolvedPackage> {
        &self.pins
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    #[must_use]
    pub fn pin(&self, identity: &PackageIdentity) -> Option<&ResolvedPackage> {
        self.pins.get(identity)
    }

    /// Lookup that also demands the stored location. A hit means the pin
    /// still points at the same source; a miss for a known identity means the
    /// package moved while keeping its name.
    #[must_use]
    pub fn pin_comparing_location(&self, package_ref: &PackageReference) -> Option<&ResolvedPackage> {
        self.pins
            .get(&package_ref.identity)
            .filter(|pin| pin.package_ref.location == package_ref.location)
    }

    pub fn insert(&mut self, pin: ResolvedPackage) {
        self.pins.insert(pin.package_ref.identity.clone(), pin);
    }

    /// Pin a managed dependency. Unpinnable states are skipped.
    pub fn add(&mut self, dependency: &ManagedDependency) {
        let Some(state) = PinState::from_managed_state(&dependency.state) else {
            return;
        };
        self.insert(ResolvedPackage {
            package_ref: dependency.package_ref.clone(),
            state,
        });
    }

    pub fn remove(&mut self, identity: &PackageIdentity) -> Option<ResolvedPackage> {
        self.pins.remove(identity)
    }

    /// Drop every pin whose identity is not in `keep`.
    pub fn retain_identities<F>(&mut self, mut keep: F)
    where
        F: FnMut(&PackageIdentity) -> bool,
    {
        self.pins.retain(|identity, _| keep(identity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn version(raw: &str) -> Version {
        Version::parse(raw).expect("version")
    }

    #[test]
    fn add_derives_pin_from_checkout_state() {
        let mut store = ResolvedPackagesStore::default();
        store.add(&ManagedDependency::source_control_checkout(
            PackageReference::remote_source_control("https://example.com/org/lib.git"),
            CheckoutState::Version {
                version: version("1.2.0"),
                revision: "deadbeef".into(),
            },
        ));
        let pin = store.pin(&PackageIdentity::new("lib")).expect("pin");
        assert_eq!(
            pin.state,
            PinState::Version {
                version: version("1.2.0"),
                revision: Some("deadbeef".into()),
            }
        );
    }

    #[test]
    fn add_skips_unpinnable_states() {
        let mut store = ResolvedPackagesStore::default();
        store.add(&ManagedDependency::file_system(
            PackageReference::file_system("/srv/local/helper"),
        ));
        store.add(&ManagedDependency::custom(
            PackageReference::registry("acme.blob"),
            version("0.3.0"),
            PathBuf::from("/blobs/acme"),
        ));
        assert!(store.pin(&PackageIdentity::new("helper")).is_none());
        assert!(store.pin(&PackageIdentity::new("acme.blob")).is_none());
    }

    #[test]
    fn location_comparing_lookup_detects_moved_source() {
        let mut store = ResolvedPackagesStore::default();
        store.add(&ManagedDependency::source_control_checkout(
            PackageReference::remote_source_control("https://example.com/org/lib.git"),
            CheckoutState::Revision {
                revision: "beef".into(),
            },
        ));
        let moved = PackageReference::remote_source_control("https://mirror.example.com/org/lib.git");
        assert!(store.pin(&moved.identity).is_some());
        assert!(store.pin_comparing_location(&moved).is_none());
    }

    #[test]
    fn registry_pin_has_no_revision() {
        let mut store = ResolvedPackagesStore::default();
        store.add(&ManagedDependency::registry_download(
            PackageReference::registry("acme.util"),
            version("2.3.1"),
        ));
        let pin = store.pin(&PackageIdentity::new("acme.util")).expect("pin");
        assert_eq!(
            pin.state,
            PinState::Version {
                version: version("2.3.1"),
                revision: None,
            }
        );
    }
}
