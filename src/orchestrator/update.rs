use std::time::SystemTime;

use tracing::{error, info};

use crate::config::Config;
use crate::element::{Context, ElementArchiver};
use crate::error::{RippandaError, RippandaResult};
use crate::gallery::{compute_update_threshold, Gallery};
use crate::http_client::HttpClient;
use crate::interrupt;
use crate::progress::Progress;
use crate::success::SuccessLedger;

const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Walk the writable archive root refreshing every gallery whose
/// `api-metadata.json` is stale under its interpolated update threshold
/// (§4.6 UPDATE).
pub fn run(
    config: &Config,
    client: &HttpClient,
    archivers: &[Box<dyn ElementArchiver>],
) -> RippandaResult<()> {
    let ctx = Context { client, config };
    let mut ledger = SuccessLedger::init(config.success_dir.clone(), config.member_id.clone())?;

    let ids = list_gallery_dirs(config.writable_archive_dir())?;
    let total_milestones = ledger_size(&ledger, &ids);
    let mut progress = Progress::new();
    let mut consecutive_failures = 0u32;

    for dir in ids {
        interrupt::check()?;

        let mut gallery = match load_gallery(&dir, &config.update_interval) {
            Ok(gallery) => gallery,
            Err(err) => {
                error!(dir = %dir.display(), error = %err, "skipping unreadable gallery directory");
                continue;
            }
        };

        match super::run_gallery(&ctx, archivers, &mut gallery) {
            Ok(()) => {
                consecutive_failures = 0;
                ledger.add_success_id(gallery.id)?;
                ledger.update_success_ids()?;
                progress.save();
                info!(
                    gallery = gallery.id,
                    progress = %progress.to_progress_string(total_milestones),
                    "gallery up to date"
                );
            }
            Err(RippandaError::Interrupted) => {
                return Err(RippandaError::Interrupted);
            }
            Err(err) => {
                consecutive_failures += 1;
                error!(gallery = gallery.id, error = %err, "gallery update failed");
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES {
                    return Err(RippandaError::TooManyConsecutiveFailures(
                        consecutive_failures,
                    ));
                }
            }
        }
    }

    ledger.finish()
}

fn list_gallery_dirs(root: &std::path::Path) -> RippandaResult<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.path().join("api-metadata.json").exists() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn load_gallery(
    dir: &std::path::Path,
    interval: &crate::config::UpdateInterval,
) -> RippandaResult<Gallery> {
    let bytes = std::fs::read(dir.join("api-metadata.json"))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;

    let id = value
        .get("gid")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| RippandaError::Generic(format!("{}: missing gid", dir.display())))?;
    let token = value
        .get("token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| RippandaError::Generic(format!("{}: missing token", dir.display())))?
        .to_string();
    let posted_epoch: u64 = value
        .get("posted")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok())
        .or_else(|| value.get("posted").and_then(serde_json::Value::as_u64))
        .unwrap_or(0);
    let posted = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(posted_epoch);

    let mut gallery = Gallery::new(id, token, dir.to_path_buf());
    gallery.update_threshold = compute_update_threshold(posted, SystemTime::now(), interval);
    gallery.set_metadata(value, crate::gallery::MetadataState::Disk);
    Ok(gallery)
}

fn ledger_size(ledger: &SuccessLedger, fallback: &[std::path::PathBuf]) -> u64 {
    let count = ledger.len();
    if count > 0 {
        count as u64
    } else {
        fallback.len() as u64
    }
}
