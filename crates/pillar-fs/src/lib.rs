//! Implementation of the pillar store as a JSON document on disk, for local
//! development and the setup CLI.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kubeboot_pillar::{PillarKey, PillarStore};
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Pillar store backed by a single JSON file.
///
/// Every write rewrites the document through a temporary file and a rename,
/// so a crash never leaves a half-written store behind. Clones share one
/// lock, which serializes read-modify-write cycles within the process.
#[derive(Clone, Debug)]
pub struct FsPillarStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FsPillarStore {
    /// Creates a new `FsPillarStore` persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The file backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<PillarKey, String>, Error> {
        match fs::read(&self.path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| Error::Deserialize(e.to_string())),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::Io("error reading pillar file", e)),
        }
    }

    async fn save(&self, pillars: &BTreeMap<PillarKey, String>) -> Result<(), Error> {
        let data =
            serde_json::to_vec_pretty(pillars).map_err(|e| Error::Serialize(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Io("error creating directory", e))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::Io("error creating file", e))?;
        file.write_all(&data)
            .await
            .map_err(|e| Error::Io("error writing file", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Io("error syncing file", e))?;

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::Io("error renaming file", e))?;

        debug!("saved {} pillars to {}", pillars.len(), self.path.display());

        Ok(())
    }
}

#[async_trait]
impl PillarStore for FsPillarStore {
    type Error = Error;

    async fn delete(&self, key: PillarKey) -> Result<(), Self::Error> {
        let _guard = self.lock.lock().await;
        let mut pillars = self.load().await?;

        if pillars.remove(&key).is_some() {
            self.save(&pillars).await?;
        }

        Ok(())
    }

    async fn get(&self, key: PillarKey) -> Result<Option<String>, Self::Error> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(&key))
    }

    async fn all(&self) -> Result<BTreeMap<PillarKey, String>, Self::Error> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn set(&self, key: PillarKey, value: String) -> Result<(), Self::Error> {
        let _guard = self.lock.lock().await;
        let mut pillars = self.load().await?;

        pillars.insert(key, value);
        self.save(&pillars).await
    }
}
