#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod fingerprint;
pub mod identity;
pub mod managed;
pub mod manifest;
pub mod resolution;
pub mod resolved;

pub mod api;

pub use fingerprint::origin_hash;
pub use identity::{PackageIdentity, PackageReference, RefKind};
pub use managed::{CheckoutState, ManagedDependency, ManagedDependencyState};
pub use manifest::{DependencyManifests, GraphRoot, Manifest, PackageDependency};
pub use resolution::{
    BoundVersion, DependencyResolverBinding, PackageContainerConstraint, PackageRequirement,
    ProductFilter, ResolutionError,
};
pub use resolved::{
    detect_pin_drift, load_resolved_file, load_resolved_file_optional, parse_resolved_file,
    pin_matches_managed_state, render_resolved_file, save_resolved_file, PinDivergence, PinDrift,
    PinState, ResolvedPackage, ResolvedPackagesStore, RESOLVED_FILE_NAME, RESOLVED_VERSION,
};
