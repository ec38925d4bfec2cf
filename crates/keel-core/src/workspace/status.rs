use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;

use keel_domain::api::{
    detect_pin_drift, load_resolved_file_optional, PinDrift, RESOLVED_FILE_NAME,
};

use crate::outcome::ExecutionOutcome;

use super::Workspace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionStateKind {
    /// Resolved file present, fresh, and fully materialized.
    Consistent,
    /// No resolved file yet.
    MissingResolvedFile,
    /// Resolved file is stale or disagrees with the disk.
    NeedsResolution,
}

impl ResolutionStateKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStateKind::Consistent => "consistent",
            ResolutionStateKind::MissingResolvedFile => "missing_resolved_file",
            ResolutionStateKind::NeedsResolution => "needs_resolution",
        }
    }
}

#[derive(Debug)]
pub struct ResolutionStateReport {
    pub resolved_file_exists: bool,
    pub origin_hash_clean: bool,
    pub drift: Vec<PinDrift>,
    pub canonical: ResolutionStateKind,
}

impl ResolutionStateReport {
    #[must_use]
    pub fn outcome(&self) -> ExecutionOutcome {
        let details = json!({
            "state": self.canonical.as_str(),
            "resolved_file_exists": self.resolved_file_exists,
            "origin_hash_clean": self.origin_hash_clean,
            "drift": self
                .drift
                .iter()
                .map(|entry| json!({
                    "package": entry.identity.as_str(),
                    "pinned": entry.pinned,
                }))
                .collect::<Vec<_>>(),
        });
        match self.canonical {
            ResolutionStateKind::Consistent => {
                ExecutionOutcome::success("dependencies are up to date", details)
            }
            ResolutionStateKind::MissingResolvedFile => {
                let mut details = details;
                details["hint"] = json!(format!(
                    "Resolve dependencies to create {RESOLVED_FILE_NAME}."
                ));
                ExecutionOutcome::user_error("no resolved file found", details)
            }
            ResolutionStateKind::NeedsResolution => {
                let mut details = details;
                details["hint"] = json!("Resolve dependencies to refresh the resolved file.");
                ExecutionOutcome::user_error("dependencies are out of date", details)
            }
        }
    }
}

impl Workspace {
    /// Cheap staleness report: origin hash plus pin drift, no network and no
    /// solver involvement.
    pub fn evaluate_resolution_state(
        &self,
        root_manifests: &[PathBuf],
    ) -> Result<ResolutionStateReport> {
        let root = self.load_graph_root(root_manifests)?;
        let current_hash = self.current_origin_hash(&root)?;
        let stored = load_resolved_file_optional(&self.resolved_file_path)?;

        let Some(stored) = stored else {
            return Ok(ResolutionStateReport {
                resolved_file_exists: false,
                origin_hash_clean: false,
                drift: Vec::new(),
                canonical: ResolutionStateKind::MissingResolvedFile,
            });
        };

        let origin_hash_clean = stored
            .origin_hash
            .as_deref()
            .is_some_and(|hash| hash == current_hash);
        let drift = detect_pin_drift(&stored, &self.store.snapshot());
        let canonical = if origin_hash_clean && drift.is_empty() {
            ResolutionStateKind::Consistent
        } else {
            ResolutionStateKind::NeedsResolution
        };
        Ok(ResolutionStateReport {
            resolved_file_exists: true,
            origin_hash_clean,
            drift,
            canonical,
        })
    }
}
