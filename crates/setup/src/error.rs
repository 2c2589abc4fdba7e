use kubeboot_pillar::{PillarFailure, PillarKey};
use thiserror::Error;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// How a failed step should be presented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// The administrator has to correct the input and retry.
    Warning,

    /// Something went wrong storing or applying the configuration.
    Error,
}

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Missing, blank or malformed input. Nothing was written and no remote
    /// call was made.
    #[error("invalid input: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The request cannot be honored as made, e.g. no master was selected.
    /// Nothing was written and no remote call was made.
    #[error("{0}")]
    PrecedenceWarning(String),

    /// Some pillars did not take effect. Pillars listed in `committed` did,
    /// and stay in effect.
    #[error("pillars could not be saved: {}", describe(.failures))]
    Persistence {
        /// Keys that failed, with the reason.
        failures: Vec<PillarFailure>,

        /// Keys that were written or deleted before or despite the failures.
        committed: Vec<PillarKey>,
    },

    /// The pillar store could not be read as a whole. No single key is to
    /// blame and nothing was written.
    #[error("pillars could not be read: {0}")]
    Unreadable(String),

    /// A remote call failed or was refused by the agent.
    #[error("remote call failed: {0}")]
    RemoteAssignment(String),
}

impl Error {
    /// Whether this is something the administrator fixes, or a fault.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Validation(_) | Self::PrecedenceWarning(_) => Severity::Warning,
            Self::Persistence { .. } | Self::Unreadable(_) | Self::RemoteAssignment(_) => {
                Severity::Error
            }
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// A store failure on a single key, with nothing committed.
    pub(crate) fn store(key: PillarKey, error: &impl std::error::Error) -> Self {
        Self::Persistence {
            failures: vec![PillarFailure::new(key, error.to_string())],
            committed: Vec::new(),
        }
    }
}

fn describe(failures: &[PillarFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
