use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical name of a package, shared across every location kind.
///
/// Identities are case-folded and derived from the last path component of a
/// location, with the URL scheme and a trailing `.git` stripped, so
/// `https://example.com/org/Widgets.git` and `/checkouts/widgets` collide on
/// `widgets`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageIdentity(String);

impl PackageIdentity {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(canonicalize_identity(raw.as_ref()))
    }

    /// Identity for a location string (path, URL, or registry id).
    pub fn from_location(location: &str) -> Self {
        let trimmed = strip_scheme(location).trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self::new(last)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonicalize_identity(raw: &str) -> String {
    let stripped = strip_scheme(raw);
    let stripped = stripped.strip_suffix(".git").unwrap_or(stripped);
    stripped.trim().to_lowercase()
}

fn strip_scheme(raw: &str) -> &str {
    match raw.split_once("://") {
        Some((scheme, rest)) if scheme.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '+') => {
            rest
        }
        _ => raw,
    }
}

/// How a package is referenced from the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefKind {
    Root,
    FileSystem,
    LocalSourceControl,
    RemoteSourceControl,
    Registry,
    Edited,
}

impl RefKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RefKind::Root => "root",
            RefKind::FileSystem => "fileSystem",
            RefKind::LocalSourceControl => "localSourceControl",
            RefKind::RemoteSourceControl => "remoteSourceControl",
            RefKind::Registry => "registry",
            RefKind::Edited => "edited",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "root" => Some(RefKind::Root),
            "fileSystem" => Some(RefKind::FileSystem),
            "localSourceControl" => Some(RefKind::LocalSourceControl),
            "remoteSourceControl" => Some(RefKind::RemoteSourceControl),
            "registry" => Some(RefKind::Registry),
            "edited" => Some(RefKind::Edited),
            _ => None,
        }
    }
}

/// A package as named by a manifest: identity plus the location it was
/// declared at.
///
/// Two references with the same identity but different locations are distinct
/// for change detection (the source URL moved) while sharing one pin-store
/// slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub identity: PackageIdentity,
    pub kind: RefKind,
    /// Filesystem path for local kinds, URL for remote source control,
    /// registry identifier for registry packages.
    pub location: String,
}

impl PackageReference {
    pub fn new(kind: RefKind, location: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            identity: PackageIdentity::from_location(&location),
            kind,
            location,
        }
    }

    pub fn root(location: impl Into<String>) -> Self {
        Self::new(RefKind::Root, location)
    }

    pub fn file_system(location: impl Into<String>) -> Self {
        Self::new(RefKind::FileSystem, location)
    }

    pub fn remote_source_control(location: impl Into<String>) -> Self {
        Self::new(RefKind::RemoteSourceControl, location)
    }

    pub fn registry(identity: impl Into<String>) -> Self {
        let location = identity.into();
        Self {
            identity: PackageIdentity::new(&location),
            kind: RefKind::Registry,
            location,
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self.kind, RefKind::Root)
    }

    /// Same package, re-tagged with a new kind.
    #[must_use]
    pub fn with_kind(&self, kind: RefKind) -> Self {
        Self {
            identity: self.identity.clone(),
            kind,
            location: self.location.clone(),
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.identity, self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_case_folds_and_strips_git_suffix() {
        assert_eq!(PackageIdentity::new("Widgets.git").as_str(), "widgets");
        assert_eq!(PackageIdentity::new("  Widgets ").as_str(), "widgets");
    }

    #[test]
    fn identity_from_location_uses_last_component() {
        let url = PackageIdentity::from_location("https://example.com/org/Widgets.git");
        let path = PackageIdentity::from_location("/srv/checkouts/widgets");
        assert_eq!(url, path);
        assert_eq!(url.as_str(), "widgets");
    }

    #[test]
    fn identity_ignores_trailing_slash() {
        let id = PackageIdentity::from_location("https://example.com/org/widgets/");
        assert_eq!(id.as_str(), "widgets");
    }

    #[test]
    fn registry_reference_keeps_identity_string() {
        let reference = PackageReference::registry("acme.Widgets");
        assert_eq!(reference.identity.as_str(), "acme.widgets");
        assert_eq!(reference.location, "acme.Widgets");
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            RefKind::Root,
            RefKind::FileSystem,
            RefKind::LocalSourceControl,
            RefKind::RemoteSourceControl,
            RefKind::Registry,
            RefKind::Edited,
        ] {
            assert_eq!(RefKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RefKind::parse("unknown"), None);
    }
}
