use std::collections::BTreeMap;

use crate::identity::PackageIdentity;
use crate::managed::{CheckoutState, ManagedDependency, ManagedDependencyState};

use super::types::{PinState, ResolvedPackagesStore};

/// Why a pin does not match the materialized dependency set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinDivergence {
    /// No managed dependency exists for the identity yet.
    NotMaterialized,
    /// The managed dependency points at a different location.
    LocationChanged { on_disk: String },
    /// The on-disk state disagrees with the pinned state.
    StateMismatch { on_disk: String },
    /// Filesystem, edited, and custom dependencies are always reprocessed.
    RequiresReprocessing { on_disk: String },
}

#[derive(Clone, Debug)]
pub struct PinDrift {
    pub identity: PackageIdentity,
    pub pinned: String,
    pub divergence: PinDivergence,
}

/// Whether the on-disk state satisfies a pin.
pub fn pin_matches_managed_state(pin: &PinState, state: &ManagedDependencyState) -> bool {
    match (pin, state) {
        (
            PinState::Version { version, revision },
            ManagedDependencyState::SourceControlCheckout {
                checkout:
                    CheckoutState::Version {
                        version: on_disk,
                        revision: on_disk_revision,
                    },
            },
        ) => {
            version == on_disk
                && revision
                    .as_deref()
                    .is_none_or(|pinned| pinned == on_disk_revision)
        }
        (
            PinState::Version {
                version,
                revision: None,
            },
            ManagedDependencyState::RegistryDownload { version: on_disk },
        ) => version == on_disk,
        (
            PinState::Revision { revision },
            ManagedDependencyState::SourceControlCheckout {
                checkout: CheckoutState::Revision { revision: on_disk },
            },
        ) => revision == on_disk,
        (
            PinState::Branch { name, revision },
            ManagedDependencyState::SourceControlCheckout {
                checkout:
                    CheckoutState::Branch {
                        name: on_disk_name,
                        revision: on_disk,
                    },
            },
        ) => name == on_disk_name && revision == on_disk,
        _ => false,
    }
}

/// Compare every pin against a snapshot of the managed store. An empty
/// report means the resolved file can be honored without touching disk.
pub fn detect_pin_drift(
    store: &ResolvedPackagesStore,
    managed: &BTreeMap<PackageIdentity, ManagedDependency>,
) -> Vec<PinDrift> {
    let mut drift = Vec::new();
    for (identity, pin) in store.pins() {
        let divergence = match managed.get(identity) {
            None => Some(PinDivergence::NotMaterialized),
            Some(dependency) => match &dependency.state {
                ManagedDependencyState::FileSystem { .. }
                | ManagedDependencyState::Edited { .. }
                | ManagedDependencyState::Custom { .. } => {
                    Some(PinDivergence::RequiresReprocessing {
                        on_disk: dependency.state.describe(),
                    })
                }
                _ if dependency.package_ref.location != pin.package_ref.location => {
                    Some(PinDivergence::LocationChanged {
                        on_disk: dependency.package_ref.location.clone(),
                    })
                }
                state if !pin_matches_managed_state(&pin.state, state) => {
                    Some(PinDivergence::StateMismatch {
                        on_disk: state.describe(),
                    })
                }
                _ => None,
            },
        };
        if let Some(divergence) = divergence {
            drift.push(PinDrift {
                identity: identity.clone(),
                pinned: pin.state.describe(),
                divergence,
            });
        }
    }
    drift
}
