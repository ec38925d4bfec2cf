use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table, Value as TomlValue};

use crate::identity::{PackageIdentity, PackageReference, RefKind};

use super::types::{PinState, ResolvedPackage, ResolvedPackagesStore, RESOLVED_VERSION};

pub fn load_resolved_file(path: &Path) -> Result<ResolvedPackagesStore> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let store = parse_resolved_file(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::debug!(path = %path.display(), pins = store.pins().len(), "resolved_file_loaded");
    Ok(store)
}

pub fn load_resolved_file_optional(path: &Path) -> Result<Option<ResolvedPackagesStore>> {
    if path.exists() {
        Ok(Some(load_resolved_file(path)?))
    } else {
        Ok(None)
    }
}

/// Write the store atomically: render, write a sibling temp file, rename.
/// A reader never observes a half-written resolved file.
pub fn save_resolved_file(path: &Path, store: &ResolvedPackagesStore) -> Result<()> {
    let contents = render_resolved_file(store);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents.as_bytes())
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(_err) if path.exists() => {
            fs::remove_file(path)?;
            fs::rename(&tmp_path, path).with_context(|| format!("writing {}", path.display()))
        }
        Err(err) => Err(err).with_context(|| format!("writing {}", path.display())),
    }
}

pub fn render_resolved_file(store: &ResolvedPackagesStore) -> String {
    let mut doc = DocumentMut::new();
    doc.insert("version", Item::Value(TomlValue::from(RESOLVED_VERSION)));
    if let Some(hash) = &store.origin_hash {
        doc.insert("origin_hash", Item::Value(TomlValue::from(hash.clone())));
    }
    if let Some(tools) = &store.minimum_tools_version {
        doc.insert(
            "minimum_tools_version",
            Item::Value(TomlValue::from(tools.to_string())),
        );
    }

    // BTreeMap ordering keeps the rendering stable across runs.
    let mut pins = ArrayOfTables::new();
    for pin in store.pins().values() {
        pins.push(render_pin(pin));
    }
    doc.insert("pin", Item::ArrayOfTables(pins));
    doc.to_string()
}

fn render_pin(pin: &ResolvedPackage) -> Table {
    let mut table = Table::new();
    table.insert(
        "identity",
        Item::Value(TomlValue::from(pin.package_ref.identity.as_str())),
    );
    table.insert(
        "kind",
        Item::Value(TomlValue::from(pin.package_ref.kind.as_str())),
    );
    table.insert(
        "location",
        Item::Value(TomlValue::from(pin.package_ref.location.clone())),
    );
    match &pin.state {
        PinState::Version { version, revision } => {
            table.insert("state", Item::Value(TomlValue::from("version")));
            table.insert("version", Item::Value(TomlValue::from(version.to_string())));
            if let Some(revision) = revision {
                table.insert("revision", Item::Value(TomlValue::from(revision.clone())));
            }
        }
        PinState::Revision { revision } => {
            table.insert("state", Item::Value(TomlValue::from("revision")));
            table.insert("revision", Item::Value(TomlValue::from(revision.clone())));
        }
        PinState::Branch { name, revision } => {
            table.insert("state", Item::Value(TomlValue::from("branch")));
            table.insert("branch", Item::Value(TomlValue::from(name.clone())));
            table.insert("revision", Item::Value(TomlValue::from(revision.clone())));
        }
    }
    table
}

pub fn parse_resolved_file(contents: &str) -> Result<ResolvedPackagesStore> {
    let doc: DocumentMut = contents.parse().context("resolved file is not valid TOML")?;
    let version = doc.get("version").and_then(Item::as_integer).unwrap_or(0);
    if version != RESOLVED_VERSION {
        return Err(anyhow!("unsupported resolved file version {version}"));
    }
    let origin_hash = doc
        .get("origin_hash")
        .and_then(Item::as_str)
        .map(std::string::ToString::to_string);
    let minimum_tools_version = doc
        .get("minimum_tools_version")
        .and_then(Item::as_str)
        .map(Version::parse)
        .transpose()
        .context("invalid minimum_tools_version")?;

    let mut store = ResolvedPackagesStore::new(origin_hash, minimum_tools_version);
    if let Some(tables) = doc.get("pin").and_then(Item::as_array_of_tables) {
        for table in tables {
            let pin = parse_pin(table)?;
            if store.pin(&pin.package_ref.identity).is_some() {
                return Err(anyhow!(
                    "duplicate pin for {}",
                    pin.package_ref.identity
                ));
            }
            store.insert(pin);
        }
    }
    Ok(store)
}

fn parse_pin(table: &Table) -> Result<ResolvedPackage> {
    let identity = table
        .get("identity")
        .and_then(Item::as_str)
        .ok_or_else(|| anyhow!("pin missing identity"))?;
    let kind = table
        .get("kind")
        .and_then(Item::as_str)
        .and_then(RefKind::parse)
        .ok_or_else(|| anyhow!("pin {identity} has no valid kind"))?;
    let location = table
        .get("location")
        .and_then(Item::as_str)
        .ok_or_else(|| anyhow!("pin {identity} missing location"))?
        .to_string();
    let state_kind = table
        .get("state")
        .and_then(Item::as_str)
        .ok_or_else(|| anyhow!("pin {identity} missing state"))?;
    let revision = table
        .get("revision")
        .and_then(Item::as_str)
        .map(std::string::ToString::to_string);
    let state = match state_kind {
        "version" => {
            let raw = table
                .get("version")
                .and_then(Item::as_str)
                .ok_or_else(|| anyhow!("pin {identity} missing version"))?;
            PinState::Version {
                version: Version::parse(raw)
                    .with_context(|| format!("pin {identity} has invalid version `{raw}`"))?,
                revision,
            }
        }
        "revision" => PinState::Revision {
            revision: revision
                .ok_or_else(|| anyhow!("pin {identity} missing revision"))?,
        },
        "branch" => {
            let name = table
                .get("branch")
                .and_then(Item::as_str)
                .ok_or_else(|| anyhow!("pin {identity} missing branch name"))?
                .to_string();
            PinState::Branch {
                name,
                revision: revision
                    .ok_or_else(|| anyhow!("pin {identity} missing branch revision"))?,
            }
        }
        other => return Err(anyhow!("pin {identity} has unknown state `{other}`")),
    };

    let package_ref = PackageReference {
        identity: PackageIdentity::new(identity),
        kind,
        location,
    };
    Ok(ResolvedPackage { package_ref, state })
}
