//! Gallery model and freshness rules (C3).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::config::{Mode, UpdateInterval};
use crate::error::RippandaResult;
use crate::http_client::HttpClient;

/// Provenance of the metadata currently held by a [`Gallery`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataState {
    /// Loaded from `api-metadata.json` on disk, freshness unverified.
    Disk,
    /// Loaded from disk and confirmed fresh against `update_threshold`.
    DiskUpToDate,
    /// Just fetched from the API.
    Online,
}

/// The central archival record: immutable identity plus lazily populated
/// mutable state (§3).
pub struct Gallery {
    pub id: u64,
    pub token: String,
    pub dir: PathBuf,
    pub update_threshold: SystemTime,
    files: Option<HashSet<String>>,
    metadata: Option<Value>,
    metadata_state: Option<MetadataState>,
    expunged: bool,
}

impl Gallery {
    pub fn new(id: u64, token: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            id,
            token: token.into(),
            dir,
            update_threshold: SystemTime::now(),
            files: None,
            metadata: None,
            metadata_state: None,
            expunged: false,
        }
    }

    /// Regular files currently in `dir`, loaded once and cached (§4.3).
    pub fn files(&mut self) -> RippandaResult<&HashSet<String>> {
        if self.files.is_none() {
            self.files = Some(list_regular_files(&self.dir)?);
        }
        Ok(self.files.as_ref().unwrap())
    }

    pub fn has_file(&mut self, name: &str) -> RippandaResult<bool> {
        Ok(self.files()?.contains(name))
    }

    /// Record that the pipeline itself just created `name`, keeping the
    /// cached snapshot in sync without a re-scan.
    pub fn note_file_written(&mut self, name: impl Into<String>) {
        self.files.get_or_insert_with(HashSet::new).insert(name.into());
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn metadata_state(&self) -> Option<MetadataState> {
        self.metadata_state
    }

    pub fn expunged(&self) -> bool {
        self.expunged
    }

    /// Set metadata together with its provenance; `expunged` is derived
    /// from `metadata.expunged` in the same step (§3 invariant).
    pub fn set_metadata(&mut self, metadata: Value, state: MetadataState) {
        self.expunged = metadata
            .get("expunged")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.metadata = Some(metadata);
        self.metadata_state = Some(state);
    }

    pub fn id_token_pair(&self) -> (u64, String) {
        (self.id, self.token.clone())
    }

    /// `ensureLoaded`: fetch online if nothing is held yet.
    pub fn ensure_loaded(&mut self, client: &HttpClient) -> RippandaResult<()> {
        if self.metadata.is_some() {
            return Ok(());
        }
        self.fetch_online(client)
    }

    /// `ensureLoadedOnline`: fetch unconditionally unless already ONLINE.
    pub fn ensure_loaded_online(&mut self, client: &HttpClient) -> RippandaResult<()> {
        if self.metadata_state == Some(MetadataState::Online) {
            return Ok(());
        }
        self.fetch_online(client)
    }

    /// `ensureLoadedUpToDate`: load from disk if present, refetch only if
    /// the disk copy is stale under the mode's "update required" predicate.
    pub fn ensure_loaded_up_to_date(
        &mut self,
        client: &HttpClient,
        mode: Mode,
        metadata_path: &Path,
    ) -> RippandaResult<()> {
        if self.metadata.is_none() {
            if metadata_path.exists() {
                let bytes = std::fs::read(metadata_path)?;
                let value: Value = serde_json::from_slice(&bytes)?;
                self.set_metadata(value, MetadataState::Disk);
            } else {
                self.fetch_online(client)?;
                return Ok(());
            }
        }

        if self.metadata_state == Some(MetadataState::Disk) {
            let stale = update_required(metadata_path, mode, self.update_threshold)?;
            if stale {
                self.fetch_online(client)?;
            } else {
                self.metadata_state = Some(MetadataState::DiskUpToDate);
            }
        }

        Ok(())
    }

    fn fetch_online(&mut self, client: &HttpClient) -> RippandaResult<()> {
        let metadata = client.load_metadata(&[self.id_token_pair()])?;
        let entry = metadata
            .get("gmetadata")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .cloned()
            .unwrap_or(metadata);
        self.set_metadata(entry, MetadataState::Online);
        Ok(())
    }
}

/// The UPDATE-mode-required predicate (§4.3): `mtime(f) < threshold`. In
/// DOWNLOAD/CLEANUP mode presence alone always suffices.
pub fn update_required(path: &Path, mode: Mode, threshold: SystemTime) -> RippandaResult<bool> {
    if mode != Mode::Update {
        return Ok(false);
    }
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata.modified()?;
    Ok(mtime < threshold)
}

/// Compute the per-gallery update threshold (§4.3): linear interpolation
/// between `(minThreshold, minDuration)` and `(maxThreshold, maxDuration)`
/// over the gallery's posted age, clamped at both ends.
pub fn compute_update_threshold(
    posted: SystemTime,
    now: SystemTime,
    interval: &UpdateInterval,
) -> SystemTime {
    let age = now.duration_since(posted).unwrap_or(Duration::ZERO);

    let ratio = if age < interval.min_threshold {
        0.0
    } else if age > interval.max_threshold {
        1.0
    } else {
        let span = interval
            .max_threshold
            .saturating_sub(interval.min_threshold)
            .as_secs_f64();
        if span <= 0.0 {
            1.0
        } else {
            (age - interval.min_threshold).as_secs_f64() / span
        }
    };

    let min_ms = interval.min_duration.as_millis() as f64;
    let max_ms = interval.max_duration.as_millis() as f64;
    let interval_ms = (min_ms + ratio * (max_ms - min_ms)).round() as u64;

    now.checked_sub(Duration::from_millis(interval_ms))
        .unwrap_or(now)
}

fn list_regular_files(dir: &Path) -> RippandaResult<HashSet<String>> {
    let mut set = HashSet::new();
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    set.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval() -> UpdateInterval {
        UpdateInterval {
            min_threshold: Duration::ZERO,
            min_duration: Duration::from_secs(7 * 86_400),
            max_threshold: Duration::from_secs(365 * 86_400),
            max_duration: Duration::from_secs(90 * 86_400),
        }
    }

    #[test]
    fn threshold_for_just_posted_gallery_uses_min_duration() {
        let now = SystemTime::now();
        let threshold = compute_update_threshold(now, now, &interval());
        let expected = now - Duration::from_secs(7 * 86_400);
        assert!(threshold
            .duration_since(expected)
            .unwrap_or(Duration::ZERO)
            < Duration::from_secs(1));
    }

    #[test]
    fn threshold_for_very_old_gallery_uses_max_duration() {
        let now = SystemTime::now();
        let posted = now - Duration::from_secs(400 * 86_400);
        let threshold = compute_update_threshold(posted, now, &interval());
        let expected = now - Duration::from_secs(90 * 86_400);
        let diff = if threshold > expected {
            threshold.duration_since(expected).unwrap()
        } else {
            expected.duration_since(threshold).unwrap()
        };
        assert!(diff < Duration::from_secs(1));
    }

    #[test]
    fn threshold_interpolates_linearly_at_midpoint() {
        let now = SystemTime::now();
        let posted = now - Duration::from_secs_f64(182.5 * 86_400.0);
        let threshold = compute_update_threshold(posted, now, &interval());
        // interval = 7 + (182.5/365)*83 ~= 48.5 days
        let expected = now - Duration::from_secs_f64(48.5 * 86_400.0);
        let diff = if threshold > expected {
            threshold.duration_since(expected).unwrap()
        } else {
            expected.duration_since(threshold).unwrap()
        };
        assert!(diff < Duration::from_secs(1));
    }
}
