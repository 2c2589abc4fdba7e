use kubeboot_pillar::PillarStoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
#[error("Pillar store error")]
pub struct Error;

impl PillarStoreError for Error {}
