use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{RippandaError, RippandaResult};

const COPY_CHUNK: usize = 8 * 1024;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the `SIGINT`/`SIGTERM` handler once at process start. Every
/// blocking wait in the pipeline (the request gate, the ZIP preparation
/// backoff, the retry delay, and the byte-by-byte download loop) polls
/// [`is_interrupted`] instead of sleeping or reading in one uninterruptible
/// call, so a signal received mid-wait is observed within one slice.
pub fn install_handler() {
    let _ = ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
    });
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn check() -> RippandaResult<()> {
    if is_interrupted() {
        Err(RippandaError::Interrupted)
    } else {
        Ok(())
    }
}

/// Sleep for `duration`, returning early with `Interrupted` if a signal
/// arrives. Sleeps in slices bounded by `SLICE` so the flag is observed
/// promptly rather than only at the end of one long sleep.
pub fn sleep_interruptible(duration: Duration) -> RippandaResult<()> {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        check()?;
        let step = remaining.min(SLICE);
        thread::sleep(step);
        remaining -= step;
    }
    check()
}

/// Copy `reader` into `writer` in 8KiB chunks, checking [`is_interrupted`]
/// between chunks so a signal aborts a long download promptly instead of
/// only after the whole body has been read.
pub fn copy_interruptible<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> RippandaResult<u64> {
    let mut buf = [0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        check()?;
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buf[..read])?;
        total += read as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn sleeps_full_duration_when_not_interrupted() {
        INTERRUPTED.store(false, Ordering::SeqCst);
        let start = std::time::Instant::now();
        sleep_interruptible(Duration::from_millis(50)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
