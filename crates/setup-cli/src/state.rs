//! Minion registry persistence between invocations.

use std::io;
use std::path::Path;

use kubeboot_setup::Minion;
use tokio::fs;
use tracing::debug;

use crate::Error;

/// Read the registry snapshot, or an empty one if none was saved yet.
pub async fn load_minions(path: &Path) -> Result<Vec<Minion>, Error> {
    match fs::read(path).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::State(format!(
            "error reading {}: {e}",
            path.display()
        ))),
    }
}

/// Replace the registry snapshot with `minions`.
pub async fn save_minions(path: &Path, minions: &[Minion]) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(minions)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::State(format!("error creating {}: {e}", parent.display())))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, data)
        .await
        .map_err(|e| Error::State(format!("error writing {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::State(format!("error renaming {}: {e}", tmp_path.display())))?;

    debug!("saved {} minions to {}", minions.len(), path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use kubeboot_agent::{MinionId, Role};
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();

        let minions = load_minions(&dir.path().join("minions.json")).await.unwrap();

        assert!(minions.is_empty());
    }

    #[tokio::test]
    async fn test_roles_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("minions.json");
        let minions = vec![Minion {
            id: MinionId::from("alpha-id"),
            fqdn: "alpha.cluster.local".to_string(),
            role: Role::Master,
        }];

        save_minions(&path, &minions).await.unwrap();

        assert_eq!(load_minions(&path).await.unwrap(), minions);
    }
}
