use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context, Result};

use keel_domain::api::{
    detect_pin_drift, CheckoutState, ManagedDependency, PackageIdentity, PackageReference,
    PinState, ResolvedPackage, ResolvedPackagesStore,
};

use crate::container::{Container, PackageContainerProvider, UpdateStrategy};
use crate::diagnostics::DiagnosticsScope;
use crate::reconcile::{PackageStateChange, PlannedState, Requirement};
use crate::store::ManagedStore;

/// Worker count for parallel acquisition, honoring `KEEL_JOBS` and clamped
/// to the machine.
pub(crate) fn job_concurrency(total: usize) -> usize {
    let requested = env::var("KEEL_JOBS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok());
    let available = thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .max(1);
    let max_workers = requested.unwrap_or(available).clamp(1, 16);
    max_workers.min(total.max(1))
}

/// The update strategy a pin asks of its container: revision pins only need
/// that revision present, version pins without a known revision must refresh.
pub(crate) fn pin_update_strategy(
    pin: &ResolvedPackage,
    skip_dependencies_updates: bool,
) -> UpdateStrategy {
    if skip_dependencies_updates {
        return UpdateStrategy::Never;
    }
    match &pin.state {
        PinState::Version {
            revision: Some(revision),
            ..
        }
        | PinState::Revision { revision }
        | PinState::Branch { revision, .. } => UpdateStrategy::IfNeeded {
            revision: revision.clone(),
        },
        PinState::Version { revision: None, .. } => UpdateStrategy::Always,
    }
}

#[derive(Debug, Default)]
pub struct AppliedChanges {
    pub added_or_updated: Vec<PackageIdentity>,
    pub removed: Vec<PackageIdentity>,
}

/// Apply reconciler output in two strict phases: removals first so identity
/// slots are free, then installs and updates on a worker pool. Per-package
/// install failures are trapped so siblings finish; the caller's
/// missing-package check decides whether the cycle fails.
pub fn apply_state_changes(
    store: &ManagedStore,
    provider: &dyn PackageContainerProvider,
    changes: &[(PackageReference, PackageStateChange)],
    update_strategy: &UpdateStrategy,
    diagnostics: &DiagnosticsScope,
) -> Result<AppliedChanges> {
    let mut applied = AppliedChanges::default();

    for (package_ref, change) in changes {
        if !matches!(change, PackageStateChange::Removed) {
            continue;
        }
        remove_dependency(store, &package_ref.identity)?;
        applied.removed.push(package_ref.identity.clone());
    }

    let jobs: Vec<(PackageReference, PlannedState)> = changes
        .iter()
        .filter_map(|(package_ref, change)| match change {
            PackageStateChange::Added(state) | PackageStateChange::Updated(state) => {
                Some((package_ref.clone(), state.clone()))
            }
            _ => None,
        })
        .collect();
    if jobs.is_empty() {
        return Ok(applied);
    }

    let installed = run_install_pool(store, provider, update_strategy, jobs, diagnostics);
    for dependency in installed {
        applied.added_or_updated.push(dependency.identity().clone());
        store.insert(dependency);
    }
    Ok(applied)
}

fn remove_dependency(store: &ManagedStore, identity: &PackageIdentity) -> Result<()> {
    let Some(dependency) = store.get(identity) else {
        return Ok(());
    };
    if let Some(path) = store.artifact_path(&dependency) {
        remove_artifact_dir(&path)?;
    }
    store.remove(identity);
    tracing::debug!(package = %identity, "dependency_removed");
    Ok(())
}

fn remove_artifact_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

fn run_install_pool(
    store: &ManagedStore,
    provider: &dyn PackageContainerProvider,
    update_strategy: &UpdateStrategy,
    jobs: Vec<(PackageReference, PlannedState)>,
    diagnostics: &DiagnosticsScope,
) -> Vec<ManagedDependency> {
    let worker_count = job_concurrency(jobs.len());
    let (job_tx, job_rx) = mpsc::channel();
    for job in jobs {
        job_tx.send(job).expect("queue install jobs");
    }
    drop(job_tx);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            scope.spawn(move || loop {
                let (package_ref, planned) = {
                    let guard = job_rx.lock().expect("lock job receiver");
                    match guard.recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    }
                };
                let outcome = install_package(store, provider, update_strategy, &package_ref, &planned);
                if result_tx.send((package_ref, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);

        let mut installed = Vec::new();
        for (package_ref, outcome) in result_rx {
            match outcome {
                Ok(dependency) => installed.push(dependency),
                Err(err) => {
                    tracing::warn!(package = %package_ref, error = %err, "install_failed");
                    diagnostics.report_warning(format!("failed to fetch {package_ref}: {err}"));
                }
            }
        }
        installed
    })
}

/// One install or update. Repeating this with an identical target state is a
/// no-op.
fn install_package(
    store: &ManagedStore,
    provider: &dyn PackageContainerProvider,
    update_strategy: &UpdateStrategy,
    package_ref: &PackageReference,
    planned: &PlannedState,
) -> Result<ManagedDependency> {
    match &planned.requirement {
        Requirement::Unversioned => Ok(ManagedDependency::file_system(package_ref.clone())),
        Requirement::Revision { revision, branch } => {
            let container = provider.get_container(package_ref, update_strategy)?;
            let source_control = container.as_source_control().ok_or_else(|| {
                anyhow!(
                    "{package_ref} is bound to a revision but its container is {}",
                    container.kind_name()
                )
            })?;
            let checkout = match branch {
                Some(name) => CheckoutState::Branch {
                    name: name.clone(),
                    revision: revision.clone(),
                },
                None => CheckoutState::Revision {
                    revision: revision.clone(),
                },
            };
            let dependency =
                ManagedDependency::source_control_checkout(package_ref.clone(), checkout.clone());
            if store.get(&package_ref.identity).as_ref() == Some(&dependency) {
                return Ok(dependency);
            }
            let destination = store
                .artifact_path(&dependency)
                .expect("checkout has an artifact path");
            source_control.checkout(&checkout, &destination)?;
            Ok(dependency)
        }
        Requirement::Version(version) => {
            let container = provider.get_container(package_ref, update_strategy)?;
            match &container {
                Container::SourceControl(source_control) => {
                    let tag = source_control.tag_for_version(version)?.ok_or_else(|| {
                        anyhow!("{package_ref} has no tag for version {version}")
                    })?;
                    let revision = source_control.revision_for_tag(&tag)?;
                    source_control.check_integrity(version, &revision)?;
                    let checkout = CheckoutState::Version {
                        version: version.clone(),
                        revision,
                    };
                    let dependency = ManagedDependency::source_control_checkout(
                        package_ref.clone(),
                        checkout.clone(),
                    );
                    if store.get(&package_ref.identity).as_ref() == Some(&dependency) {
                        return Ok(dependency);
                    }
                    let destination = store
                        .artifact_path(&dependency)
                        .expect("checkout has an artifact path");
                    source_control.checkout(&checkout, &destination)?;
                    Ok(dependency)
                }
                Container::Registry(registry) => {
                    let dependency = ManagedDependency::registry_download(
                        package_ref.clone(),
                        version.clone(),
                    );
                    if store.get(&package_ref.identity).as_ref() == Some(&dependency) {
                        return Ok(dependency);
                    }
                    let destination = store
                        .artifact_path(&dependency)
                        .expect("download has an artifact path");
                    registry.download(version, &destination)?;
                    Ok(dependency)
                }
                Container::Custom(custom) => {
                    let path = custom.retrieve(version)?;
                    Ok(ManagedDependency::custom(
                        package_ref.clone(),
                        version.clone(),
                        path,
                    ))
                }
            }
        }
    }
}

/// Acquire a container for every pin in parallel, so later checkouts answer
/// from local state. Failures are logged per package and never abort.
pub fn prewarm_containers(
    provider: &dyn PackageContainerProvider,
    pins: &[ResolvedPackage],
    skip_dependencies_updates: bool,
) {
    if pins.is_empty() {
        return;
    }
    let worker_count = job_concurrency(pins.len());
    let (job_tx, job_rx) = mpsc::channel();
    for pin in pins {
        job_tx.send(pin.clone()).expect("queue prewarm jobs");
    }
    drop(job_tx);
    let job_rx = Arc::new(Mutex::new(job_rx));

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            scope.spawn(move || loop {
                let pin: ResolvedPackage = {
                    let guard = job_rx.lock().expect("lock prewarm receiver");
                    match guard.recv() {
                        Ok(pin) => pin,
                        Err(_) => break,
                    }
                };
                let strategy = pin_update_strategy(&pin, skip_dependencies_updates);
                if let Err(err) = provider.get_container(&pin.package_ref, &strategy) {
                    tracing::debug!(
                        package = %pin.package_ref,
                        error = %err,
                        "container_prewarm_failed"
                    );
                }
            });
        }
    });
}

/// Materialize pins that do not match the disk, in parallel: source-control
/// pins check out at the pinned state, registry pins download the pinned
/// version. Returns the identities that were materialized.
pub fn materialize_pins(
    store: &ManagedStore,
    provider: &dyn PackageContainerProvider,
    pins: &[ResolvedPackage],
    skip_dependencies_updates: bool,
    diagnostics: &DiagnosticsScope,
) -> Vec<PackageIdentity> {
    if pins.is_empty() {
        return Vec::new();
    }
    let worker_count = job_concurrency(pins.len());
    let (job_tx, job_rx) = mpsc::channel();
    for pin in pins {
        job_tx.send(pin.clone()).expect("queue pin jobs");
    }
    drop(job_tx);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            scope.spawn(move || loop {
                let pin: ResolvedPackage = {
                    let guard = job_rx.lock().expect("lock pin receiver");
                    match guard.recv() {
                        Ok(pin) => pin,
                        Err(_) => break,
                    }
                };
                let strategy = pin_update_strategy(&pin, skip_dependencies_updates);
                let outcome = materialize_pin(store, provider, &pin, &strategy);
                if result_tx.send((pin, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);

        let mut materialized = Vec::new();
        for (pin, outcome) in result_rx {
            match outcome {
                Ok(dependency) => {
                    materialized.push(dependency.identity().clone());
                    store.insert(dependency);
                }
                Err(err) => {
                    tracing::warn!(package = %pin.package_ref, error = %err, "pin_materialize_failed");
                    diagnostics
                        .report_warning(format!("failed to fetch {}: {err}", pin.package_ref));
                }
            }
        }
        materialized
    })
}

fn materialize_pin(
    store: &ManagedStore,
    provider: &dyn PackageContainerProvider,
    pin: &ResolvedPackage,
    update_strategy: &UpdateStrategy,
) -> Result<ManagedDependency> {
    let container = provider.get_container(&pin.package_ref, update_strategy)?;
    match (&container, &pin.state) {
        (Container::Registry(registry), PinState::Version { version, .. }) => {
            let dependency =
                ManagedDependency::registry_download(pin.package_ref.clone(), version.clone());
            if store.get(&pin.package_ref.identity).as_ref() == Some(&dependency) {
                return Ok(dependency);
            }
            let destination = store
                .artifact_path(&dependency)
                .expect("download has an artifact path");
            registry.download(version, &destination)?;
            Ok(dependency)
        }
        (Container::SourceControl(source_control), state) => {
            let checkout = match state {
                PinState::Version {
                    version,
                    revision: Some(revision),
                } => CheckoutState::Version {
                    version: version.clone(),
                    revision: revision.clone(),
                },
                PinState::Version {
                    version,
                    revision: None,
                } => {
                    let tag = source_control.tag_for_version(version)?.ok_or_else(|| {
                        anyhow!("{} has no tag for version {version}", pin.package_ref)
                    })?;
                    let revision = source_control.revision_for_tag(&tag)?;
                    source_control.check_integrity(version, &revision)?;
                    CheckoutState::Version {
                        version: version.clone(),
                        revision,
                    }
                }
                PinState::Revision { revision } => CheckoutState::Revision {
                    revision: revision.clone(),
                },
                PinState::Branch { name, revision } => CheckoutState::Branch {
                    name: name.clone(),
                    revision: revision.clone(),
                },
            };
            let dependency = ManagedDependency::source_control_checkout(
                pin.package_ref.clone(),
                checkout.clone(),
            );
            if store.get(&pin.package_ref.identity).as_ref() == Some(&dependency) {
                return Ok(dependency);
            }
            let destination = store
                .artifact_path(&dependency)
                .expect("checkout has an artifact path");
            source_control.checkout(&checkout, &destination)?;
            Ok(dependency)
        }
        (Container::Custom(_), _) | (Container::Registry(_), _) => Err(anyhow!(
            "{} is pinned to {} but its container is {}",
            pin.package_ref,
            pin.state.describe(),
            container.kind_name()
        )),
    }
}

/// Pins whose identity has no managed dependency, whose location moved, or
/// whose state disagrees with the disk. Filesystem, edited, and custom
/// dependencies always reprocess.
pub fn pins_requiring_materialization(
    pin_store: &ResolvedPackagesStore,
    managed: &BTreeMap<PackageIdentity, ManagedDependency>,
) -> Vec<ResolvedPackage> {
    detect_pin_drift(pin_store, managed)
        .into_iter()
        .filter_map(|drift| pin_store.pin(&drift.identity).cloned())
        .collect()
}
