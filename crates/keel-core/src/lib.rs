#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod checkout;
pub mod container;
pub mod delegate;
pub mod diagnostics;
pub mod effects;
pub mod outcome;
pub mod precompute;
pub mod reconcile;
pub mod store;
pub mod workspace;

#[cfg(test)]
pub(crate) mod fixtures;

pub const KEEL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use checkout::{
    apply_state_changes, materialize_pins, pins_requiring_materialization, prewarm_containers,
    AppliedChanges,
};
pub use container::{
    Container, CustomContainer, PackageContainer, PackageContainerProvider, RegistryContainer,
    SourceControlContainer, UpdateStrategy,
};
pub use delegate::{NoopDelegate, OncePerIdentity, WorkspaceDelegate};
pub use diagnostics::DiagnosticsScope;
pub use effects::{ArtifactsUpdater, DependencyResolver, ManifestLoader};
pub use outcome::{CommandStatus, DependencyError, ExecutionOutcome};
pub use precompute::{
    precompute_resolution, PrecomputationProvider, PrecomputationRequired, PrecomputationResult,
};
pub use reconcile::{
    compute_state_changes, PackageStateChange, PlannedState, Requirement, StateChanges,
};
pub use store::{edited_packages_constraints, ManagedStore};
pub use workspace::{
    ResolutionStateKind, ResolutionStateReport, ResolutionStrategy, Workspace,
    WorkspaceConfiguration,
};
