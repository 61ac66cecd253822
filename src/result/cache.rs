use crate::image::disc_id::CddbDiscId;
use crate::result::error::ResultResult;
use crate::result::{RESULT_VERSION, RipResult};
use crate::util::cache_dir;
use log::{debug, warn};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Deserialize)]
struct Versioned {
    version: u32,
}

/// Rip results persisted per disc, keyed by CDDB disc id, so an interrupted
/// rip can resume.
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
}

impl ResultCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn default_location() -> Self {
        Self::new(cache_dir().join("result"))
    }

    fn entry_path(&self, disc_id: CddbDiscId) -> PathBuf {
        self.path.join(format!("{disc_id}.json"))
    }

    /// The stored result, or `None` when missing, unreadable or written by
    /// an older layout.
    pub async fn load(&self, disc_id: CddbDiscId) -> ResultResult<Option<RipResult>> {
        let path = self.entry_path(disc_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Versioned>(&data) {
            Ok(versioned) if versioned.version == RESULT_VERSION => {}
            Ok(versioned) => {
                debug!(
                    "Cached result {} has version {}, expected {RESULT_VERSION}",
                    path.display(),
                    versioned.version
                );
                return Ok(None);
            }
            Err(e) => {
                warn!("Ignoring unreadable cached result {}: {e}", path.display());
                return Ok(None);
            }
        }

        match serde_json::from_slice(&data) {
            Ok(result) => {
                debug!("Loaded cached result from {}", path.display());
                Ok(Some(result))
            }
            Err(e) => {
                warn!("Ignoring unreadable cached result {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Writes through a temporary file in the cache directory and renames it
    /// into place.
    pub async fn store(&self, disc_id: CddbDiscId, result: &RipResult) -> ResultResult<()> {
        let data = serde_json::to_vec_pretty(result)?;
        let dir = self.path.clone();
        let path = self.entry_path(disc_id);

        tokio::task::spawn_blocking(move || -> ResultResult<()> {
            std::fs::create_dir_all(&dir)?;
            let mut file = NamedTempFile::new_in(&dir)?;
            file.write_all(&data)?;
            file.as_file().sync_all()?;
            file.persist(&path)?;
            debug!("Saved result to {}", path.display());
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::table::tests::ladyhawke;
    use crate::result::TrackResult;

    #[tokio::test]
    async fn stores_and_loads_result() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("result"));
        let table = ladyhawke();
        let disc_id = table.cddb_disc_id().unwrap();

        let mut result = RipResult::new(table.clone());
        let mut track = TrackResult::new(1);
        track.test_crc = Some(0xdeadbeef);
        result.tracks.push(track);
        cache.store(disc_id, &result).await.unwrap();

        assert!(dir.path().join("result").join("c60af50d.json").exists());
        let loaded = cache.load(disc_id).await.unwrap();
        assert_eq!(loaded, Some(result));
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());

        assert!(cache.load(ladyhawke().cddb_disc_id().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_and_corrupt_entries_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        let disc_id = CddbDiscId(0xc60af50d);
        let path = dir.path().join("c60af50d.json");

        tokio::fs::write(&path, br#"{"version": 0, "tracks": []}"#).await.unwrap();
        assert!(cache.load(disc_id).await.unwrap().is_none());

        tokio::fs::write(&path, b"{ not json").await.unwrap();
        assert!(cache.load(disc_id).await.unwrap().is_none());
    }
}
