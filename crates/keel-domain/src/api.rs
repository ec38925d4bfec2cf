pub use crate::fingerprint::origin_hash;
pub use crate::identity::{PackageIdentity, PackageReference, RefKind};
pub use crate::managed::{CheckoutState, ManagedDependency, ManagedDependencyState};
pub use crate::manifest::{DependencyManifests, GraphRoot, Manifest, PackageDependency};
pub use crate::resolution::{
    BoundVersion, DependencyResolverBinding, PackageContainerConstraint, PackageRequirement,
    ProductFilter, ResolutionError,
};
pub use crate::resolved::{
    detect_pin_drift, load_resolved_file, load_resolved_file_optional, parse_resolved_file,
    pin_matches_managed_state, render_resolved_file, save_resolved_file, PinDivergence, PinDrift,
    PinState, ResolvedPackage, ResolvedPackagesStore, RESOLVED_FILE_NAME, RESOLVED_VERSION,
};
