use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Fingerprint of the resolution inputs: the raw bytes of every root manifest
/// (in declared order) followed by each top-level dependency's location
/// string. Any manifest byte change or dependency move produces a new hash.
///
/// This is a staleness guard for the resolved file, not a security measure.
pub fn origin_hash(root_manifests: &[PathBuf], dependency_locations: &[String]) -> Result<String> {
    let mut hasher = Sha256::new();
    for path in root_manifests {
        let contents = fs::read(path)
            .with_context(|| format!("failed to read root manifest {}", path.display()))?;
        hasher.update(&contents);
    }
    for location in dependency_locations {
        hasher.update(location.as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}
