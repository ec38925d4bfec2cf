use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use semver::Version;

use crate::identity::{PackageIdentity, PackageReference};
use crate::resolution::{PackageContainerConstraint, PackageRequirement, ProductFilter};

/// A dependency as declared in a manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageDependency {
    pub package_ref: PackageReference,
    pub requirement: PackageRequirement,
    pub products: ProductFilter,
}

impl PackageDependency {
    pub fn new(package_ref: PackageReference, requirement: PackageRequirement) -> Self {
        Self {
            package_ref,
            requirement,
            products: ProductFilter::Everything,
        }
    }

    #[must_use]
    pub fn constraint(&self) -> PackageContainerConstraint {
        PackageContainerConstraint {
            package_ref: self.package_ref.clone(),
            requirement: self.requirement.clone(),
            products: self.products.clone(),
        }
    }
}

/// The parsed description of one package. Parsing itself happens outside the
/// core; the core only consumes the loaded form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub package_ref: PackageReference,
    /// Path of the manifest file on disk.
    pub path: PathBuf,
    pub tools_version: Version,
    pub dependencies: Vec<PackageDependency>,
}

impl Manifest {
    pub fn identity(&self) -> &PackageIdentity {
        &self.package_ref.identity
    }
}

/// The root of the dependency graph: every root manifest in declared order.
#[derive(Clone, Debug, Default)]
pub struct GraphRoot {
    pub manifests: Vec<Manifest>,
}

impl GraphRoot {
    pub fn new(manifests: Vec<Manifest>) -> Self {
        Self { manifests }
    }

    pub fn manifest_paths(&self) -> Vec<PathBuf> {
        self.manifests
            .iter()
            .map(|manifest| manifest.path.clone())
            .collect()
    }

    /// Location strings of the declared top-level dependencies, in declared
    /// order. Input to the origin hash.
    pub fn dependency_locations(&self) -> Vec<String> {
        self.manifests
            .iter()
            .flat_map(|manifest| &manifest.dependencies)
            .map(|dep| dep.package_ref.location.clone())
            .collect()
    }

    pub fn constraints(&self) -> Vec<PackageContainerConstraint> {
        self.manifests
            .iter()
            .flat_map(|manifest| &manifest.dependencies)
            .map(PackageDependency::constraint)
            .collect()
    }

    pub fn is_root_identity(&self, identity: &PackageIdentity) -> bool {
        self.manifests
            .iter()
            .any(|manifest| manifest.identity() == identity)
    }

    /// The lowest tools version across roots; recorded in the resolved file.
    pub fn minimum_tools_version(&self) -> Version {
        self.manifests
            .iter()
            .map(|manifest| manifest.tools_version.clone())
            .min()
            .unwrap_or_else(|| Version::new(1, 0, 0))
    }
}

/// Root manifests plus every dependency manifest loaded so far.
#[derive(Clone, Debug, Default)]
pub struct DependencyManifests {
    pub root: GraphRoot,
    pub manifests: BTreeMap<PackageIdentity, Manifest>,
}

impl DependencyManifests {
    pub fn new(root: GraphRoot, manifests: BTreeMap<PackageIdentity, Manifest>) -> Self {
        Self { root, manifests }
    }

    /// Constraints contributed by loaded dependency manifests.
    pub fn dependency_constraints(&self) -> Vec<PackageContainerConstraint> {
        self.manifests
            .values()
            .flat_map(|manifest| &manifest.dependencies)
            .map(PackageDependency::constraint)
            .collect()
    }

    /// Every non-root package referenced by the graph, deduplicated by
    /// identity in first-seen order.
    pub fn required_packages(&self) -> Vec<PackageReference> {
        let mut seen = BTreeSet::new();
        let mut required = Vec::new();
        let root_deps = self.root.manifests.iter().flat_map(|m| &m.dependencies);
        let loaded_deps = self.manifests.values().flat_map(|m| &m.dependencies);
        for dep in root_deps.chain(loaded_deps) {
            let identity = &dep.package_ref.identity;
            if self.root.is_root_identity(identity) {
                continue;
            }
            if seen.insert(identity.clone()) {
                required.push(dep.package_ref.clone());
            }
        }
        required
    }

    /// Required packages whose manifests have not been loaded.
    pub fn missing_packages(&self) -> Vec<PackageReference> {
        self.required_packages()
            .into_iter()
            .filter(|package| !self.manifests.contains_key(&package.identity))
            .collect()
    }
}
