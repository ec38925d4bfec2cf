use serde::{Deserialize, Serialize};
use serde_json::Value;

use keel_domain::api::{PackageIdentity, PackageReference};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

/// Fatal inconsistencies between the solver's answer and reality. These are
/// never trapped; they bubble out of the cycle untouched.
#[derive(thiserror::Error, Debug)]
pub enum DependencyError {
    #[error("unable to materialize required packages: {}", join_identities(.missing))]
    ExhaustedAttempts { missing: Vec<PackageIdentity> },
    #[error("{package} cannot move from {from} to {to}")]
    IllegalStateTransition {
        package: PackageReference,
        from: String,
        to: String,
    },
    #[error("solver produced an excluded binding for {package}")]
    ExcludedBinding { package: PackageReference },
}

fn join_identities(identities: &[PackageIdentity]) -> String {
    identities
        .iter()
        .map(PackageIdentity::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
