//! Mode orchestrators (C6): DOWNLOAD, UPDATE, CLEANUP.

pub mod cleanup;
pub mod download;
pub mod update;

use std::time::Duration;

use tracing::warn;

use crate::element::{Context, ElementArchiver};
use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::interrupt;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Run every registered archiver against `gallery`, retrying the whole
/// sequence up to [`MAX_ATTEMPTS`] times with a 10 s wait on failure
/// (§7). Interruption is never retried.
pub fn run_gallery(
    ctx: &Context,
    archivers: &[Box<dyn ElementArchiver>],
    gallery: &mut Gallery,
) -> RippandaResult<()> {
    let mut last_error = None;

    for attempt in 1..=MAX_ATTEMPTS {
        interrupt::check()?;
        match run_once(ctx, archivers, gallery) {
            Ok(()) => return Ok(()),
            Err(RippandaError::Interrupted) => return Err(RippandaError::Interrupted),
            Err(err) => {
                warn!(gallery = gallery.id, attempt, error = %err, "element archiver failed");
                last_error = Some(err);
                if attempt < MAX_ATTEMPTS {
                    interrupt::sleep_interruptible(RETRY_BACKOFF)?;
                }
            }
        }
    }

    Err(RippandaError::GalleryFailed {
        id: gallery.id,
        attempts: MAX_ATTEMPTS,
        message: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}

fn run_once(
    ctx: &Context,
    archivers: &[Box<dyn ElementArchiver>],
    gallery: &mut Gallery,
) -> RippandaResult<()> {
    for archiver in archivers {
        archiver.process(ctx, gallery)?;
    }
    Ok(())
}
