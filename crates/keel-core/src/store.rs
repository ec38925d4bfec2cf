use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use keel_domain::api::{
    ManagedDependency, ManagedDependencyState, PackageContainerConstraint, PackageIdentity,
    PackageRequirement,
};

pub const STATE_VERSION: i64 = 1;
const STATE_FILE_NAME: &str = "dependencies-state.json";

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: i64,
    #[serde(default)]
    dependencies: Vec<ManagedDependency>,
}

/// Durable map of package identity to on-disk state, plus the directory
/// layout the artifacts live in. All mutation goes through one mutex;
/// readers take immutable snapshots.
pub struct ManagedStore {
    working_dir: PathBuf,
    inner: Mutex<BTreeMap<PackageIdentity, ManagedDependency>>,
}

impl ManagedStore {
    /// Open the store rooted at `working_dir` (conventionally `.keel/`),
    /// loading the state file when present.
    pub fn open(working_dir: impl Into<PathBuf>) -> Result<Self> {
        let working_dir = working_dir.into();
        let state_path = working_dir.join(STATE_FILE_NAME);
        let mut dependencies = BTreeMap::new();
        if state_path.exists() {
            let contents = fs::read_to_string(&state_path)
                .with_context(|| format!("failed to read {}", state_path.display()))?;
            let state: StateFile = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", state_path.display()))?;
            if state.version != STATE_VERSION {
                return Err(anyhow!(
                    "unsupported dependency state version {}",
                    state.version
                ));
            }
            for dependency in state.dependencies {
                let identity = dependency.identity().clone();
                if dependencies.insert(identity.clone(), dependency).is_some() {
                    return Err(anyhow!("duplicate managed dependency {identity}"));
                }
            }
        }
        Ok(Self {
            working_dir,
            inner: Mutex::new(dependencies),
        })
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    #[must_use]
    pub fn checkouts_dir(&self) -> PathBuf {
        self.working_dir.join("checkouts")
    }

    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.working_dir.join("downloads")
    }

    /// Where a dependency's artifact lives, for the kinds the store owns.
    /// Filesystem and edited dependencies point at user paths; custom
    /// payloads are owned by their container.
    #[must_use]
    pub fn artifact_path(&self, dependency: &ManagedDependency) -> Option<PathBuf> {
        match &dependency.state {
            ManagedDependencyState::SourceControlCheckout { .. } => {
                Some(self.checkouts_dir().join(&dependency.subpath))
            }
            ManagedDependencyState::RegistryDownload { .. } => {
                Some(self.downloads_dir().join(&dependency.subpath))
            }
            ManagedDependencyState::FileSystem { .. }
            | ManagedDependencyState::Edited { .. }
            | ManagedDependencyState::Custom { .. } => None,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<PackageIdentity, ManagedDependency> {
        self.inner.lock().expect("managed store poisoned").clone()
    }

    pub fn get(&self, identity: &PackageIdentity) -> Option<ManagedDependency> {
        self.inner
            .lock()
            .expect("managed store poisoned")
            .get(identity)
            .cloned()
    }

    pub fn insert(&self, dependency: ManagedDependency) {
        self.inner
            .lock()
            .expect("managed store poisoned")
            .insert(dependency.identity().clone(), dependency);
    }

    pub fn remove(&self, identity: &PackageIdentity) -> Option<ManagedDependency> {
        self.inner
            .lock()
            .expect("managed store poisoned")
            .remove(identity)
    }

    /// Persist the current map atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let dependencies: Vec<ManagedDependency> =
            self.snapshot().into_values().collect();
        let state = StateFile {
            version: STATE_VERSION,
            dependencies,
        };
        let mut contents = serde_json::to_vec_pretty(&state)?;
        contents.push(b'\n');
        fs::create_dir_all(&self.working_dir)
            .with_context(|| format!("failed to create {}", self.working_dir.display()))?;
        let path = self.working_dir.join(STATE_FILE_NAME);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &contents)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        match fs::rename(&tmp_path, &path) {
            Ok(()) => Ok(()),
            Err(_err) if path.exists() => {
                fs::remove_file(&path)?;
                fs::rename(&tmp_path, &path)
                    .with_context(|| format!("writing {}", path.display()))
            }
            Err(err) => Err(err).with_context(|| format!("writing {}", path.display())),
        }
    }
}

/// Constraints pinning every edited dependency to its on-disk override.
pub fn edited_packages_constraints(
    managed: &BTreeMap<PackageIdentity, ManagedDependency>,
) -> Vec<PackageContainerConstraint> {
    managed
        .values()
        .filter(|dependency| dependency.state.is_edited())
        .map(|dependency| {
            PackageContainerConstraint::new(
                dependency.package_ref.clone(),
                PackageRequirement::Unversioned,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_domain::api::{CheckoutState, PackageReference};
    use semver::Version;
    use tempfile::tempdir;

    fn checkout_dep(url: &str, revision: &str) -> ManagedDependency {
        ManagedDependency::source_control_checkout(
            PackageReference::remote_source_control(url),
            CheckoutState::Revision {
                revision: revision.into(),
            },
        )
    }

    #[test]
    fn save_then_open_round_trips_dependencies() -> Result<()> {
        let temp = tempdir()?;
        let store = ManagedStore::open(temp.path().join(".keel"))?;
        store.insert(checkout_dep("https://example.com/org/lib.git", "beef"));
        store.insert(ManagedDependency::registry_download(
            PackageReference::registry("acme.util"),
            Version::new(2, 3, 1),
        ));
        store.save()?;

        let reopened = ManagedStore::open(temp.path().join(".keel"))?;
        assert_eq!(reopened.snapshot(), store.snapshot());
        Ok(())
    }

    #[test]
    fn open_without_state_file_is_empty() -> Result<()> {
        let temp = tempdir()?;
        let store = ManagedStore::open(temp.path().join(".keel"))?;
        assert!(store.snapshot().is_empty());
        Ok(())
    }

    #[test]
    fn artifact_paths_follow_dependency_kind() -> Result<()> {
        let temp = tempdir()?;
        let store = ManagedStore::open(temp.path().join(".keel"))?;
        let checkout = checkout_dep("https://example.com/org/lib.git", "beef");
        let download = ManagedDependency::registry_download(
            PackageReference::registry("acme.util"),
            Version::new(2, 3, 1),
        );
        let local =
            ManagedDependency::file_system(PackageReference::file_system("/srv/local/helper"));
        assert_eq!(
            store.artifact_path(&checkout),
            Some(store.checkouts_dir().join("lib"))
        );
        assert_eq!(
            store.artifact_path(&download),
            Some(store.downloads_dir().join("acme.util-2.3.1"))
        );
        assert_eq!(store.artifact_path(&local), None);
        Ok(())
    }

    #[test]
    fn edited_constraints_cover_only_edited_entries() {
        let mut managed = BTreeMap::new();
        let plain = checkout_dep("https://example.com/org/lib.git", "beef");
        managed.insert(plain.identity().clone(), plain);
        let edited = ManagedDependency {
            package_ref: PackageReference::new(
                keel_domain::api::RefKind::Edited,
                "/overrides/widgets",
            ),
            state: ManagedDependencyState::Edited {
                based_on: None,
                unmanaged_path: Some(PathBuf::from("/overrides/widgets")),
            },
            subpath: PathBuf::from("widgets"),
        };
        managed.insert(edited.identity().clone(), edited);

        let constraints = edited_packages_constraints(&managed);
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].package_ref.identity.as_str(), "widgets");
        assert_eq!(constraints[0].requirement, PackageRequirement::Unversioned);
    }
}
