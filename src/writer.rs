//! Transactional file writer and filename sanitisation (C2).
//!
//! Mirrors the atomic-rename sequencing of a content-addressed fetch cache:
//! write to a `.tmp` sibling, swap the previous file to `.bak`, promote the
//! `.tmp` into place, then best-effort drop the `.bak`.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{RippandaError, RippandaResult};

const MAX_PATH_LEN: usize = 258;
const MAX_NAME_BYTES: usize = 255;

/// Write `filename` under `dir` through a temp file, with the rename
/// sequence described in §4.2. `writer_fn` receives the open `.tmp` file
/// and is responsible for populating it; any I/O error it returns (or that
/// occurs while flushing) deletes the `.tmp` and is propagated, leaving any
/// prior `.bak` as the last known-good copy.
pub fn save<F>(dir: &Path, filename: &str, writer_fn: F) -> RippandaResult<()>
where
    F: FnOnce(&mut File) -> RippandaResult<()>,
{
    fs::create_dir_all(dir)?;
    let final_path = dir.join(filename);
    let tmp_path = dir.join(format!("{filename}.tmp"));
    let bak_path = dir.join(format!("{filename}.bak"));

    let write_result = (|| -> RippandaResult<()> {
        let mut file = File::create(&tmp_path)?;
        writer_fn(&mut file)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if final_path.exists() {
        fs::rename(&final_path, &bak_path)?;
    }
    fs::rename(&tmp_path, &final_path)?;

    if let Err(err) = fs::remove_file(&bak_path) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %bak_path.display(), error = %err, "failed to remove backup file");
        }
    }

    Ok(())
}

/// Write raw bytes under `dir` through the same transactional sequence.
pub fn save_bytes(dir: &Path, filename: &str, bytes: &[u8]) -> RippandaResult<()> {
    use std::io::Write;
    save(dir, filename, |file| {
        file.write_all(bytes)?;
        Ok(())
    })
}

const UNSAFE_CHARS: [(char, char); 9] = [
    ('\\', '\u{FF3C}'),
    ('/', '\u{FF0F}'),
    ('|', '\u{FF5C}'),
    (':', '\u{FF1A}'),
    ('?', '\u{FF1F}'),
    ('*', '\u{FF0A}'),
    ('"', '\u{FF02}'),
    ('<', '\u{FF1C}'),
    ('>', '\u{FF1E}'),
];

fn replace_unsafe_chars(raw: &str) -> String {
    raw.chars()
        .filter(|c| !is_control_char(*c))
        .map(|c| {
            UNSAFE_CHARS
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect()
}

fn is_control_char(c: char) -> bool {
    (c as u32) < 0x20 || c as u32 == 0x7F
}

/// Split a filename into base and dotted extension, e.g.
/// `"file.tar.gz"` -> `("file.tar", ".gz")`, `"file"` -> `("file", "")`.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Sanitise a server-supplied filename for use under `dir`, applying the
/// three-step algorithm in §4.2: character replacement, length truncation,
/// and collision resolution.
///
/// `unique == true`: a case-insensitive match in `dir` is deleted and
/// replaced. `unique == false`: the first of `name`, `name (2)`, ...,
/// `name (99)` that doesn't collide case-insensitively is used.
pub fn sanitize_filename(raw: &str, dir: &Path, unique: bool) -> RippandaResult<String> {
    let replaced = replace_unsafe_chars(raw);
    let trimmed = replaced.trim_end().to_string();
    let (base, ext) = split_extension(&trimmed);

    let max_suffix = " (99)".len() + ".tmp".len();
    let dir_len = dir.to_string_lossy().len() + 1; // plus path separator
    let path_budget = MAX_PATH_LEN.saturating_sub(max_suffix).saturating_sub(dir_len);
    let name_budget = MAX_NAME_BYTES.saturating_sub(max_suffix);

    let ext_len_chars = ext.chars().count();
    let ext_len_bytes = ext.len();
    let ext_len_utf16 = ext.encode_utf16().count();

    if ext_len_chars >= path_budget || ext_len_bytes >= name_budget || ext_len_utf16 >= name_budget
    {
        return Err(RippandaError::FilenameTooLong(raw.to_string()));
    }

    let max_base_chars = path_budget - ext_len_chars;
    let max_base_bytes = name_budget - ext_len_bytes;
    let max_base_utf16 = name_budget - ext_len_utf16;

    let truncated_base = truncate_base(base, max_base_chars, max_base_bytes, max_base_utf16)?;
    let candidate = format!("{truncated_base}{ext}");

    resolve_collision(&candidate, dir, unique)
}

fn truncate_base(
    base: &str,
    max_chars: usize,
    max_bytes: usize,
    max_utf16: usize,
) -> RippandaResult<String> {
    if max_chars == 0 || max_bytes == 0 || max_utf16 == 0 {
        return Err(RippandaError::FilenameTooLong(base.to_string()));
    }

    let mut result: String = base.to_string();
    loop {
        let chars = result.chars().count();
        let bytes = result.len();
        let utf16 = result.encode_utf16().count();
        if chars <= max_chars && bytes <= max_bytes && utf16 <= max_utf16 {
            break;
        }
        let mut chars_iter = result.chars();
        chars_iter.next_back();
        result = chars_iter.collect();
        if result.is_empty() {
            return Err(RippandaError::FilenameTooLong(base.to_string()));
        }
    }
    Ok(result.trim_end().to_string())
}

fn resolve_collision(candidate: &str, dir: &Path, unique: bool) -> RippandaResult<String> {
    let existing = list_lowercase_names(dir)?;

    if unique {
        let lower = candidate.to_ascii_lowercase();
        if let Some(existing_name) = existing.get(&lower) {
            let _ = fs::remove_file(dir.join(existing_name));
        }
        return Ok(candidate.to_string());
    }

    let (base, ext) = split_extension(candidate);
    if !existing.contains_key(&candidate.to_ascii_lowercase()) {
        return Ok(candidate.to_string());
    }
    for suffix in 2..=99 {
        let attempt = format!("{base} ({suffix}){ext}");
        if !existing.contains_key(&attempt.to_ascii_lowercase()) {
            return Ok(attempt);
        }
    }
    Err(RippandaError::FilenameTooLong(candidate.to_string()))
}

fn list_lowercase_names(dir: &Path) -> RippandaResult<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                map.insert(name.to_ascii_lowercase(), name);
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(map)
}

/// Delete any regular file in `dir` (non-recursive) if it exists.
pub fn remove_if_exists(path: &PathBuf) -> RippandaResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_writes_file_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        save_bytes(dir.path(), "a.txt", b"hello").unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
        assert!(!dir.path().join("a.txt.tmp").exists());
    }

    #[test]
    fn save_preserves_prior_content_on_writer_failure() {
        let dir = tempdir().unwrap();
        save_bytes(dir.path(), "a.txt", b"first").unwrap();

        let result = save(dir.path(), "a.txt", |_file| {
            Err(RippandaError::Generic("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"first");
        assert!(!dir.path().join("a.txt.tmp").exists());
    }

    #[test]
    fn save_swaps_backup_and_removes_it() {
        let dir = tempdir().unwrap();
        save_bytes(dir.path(), "a.txt", b"first").unwrap();
        save_bytes(dir.path(), "a.txt", b"second").unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"second");
        assert!(!dir.path().join("a.txt.bak").exists());
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        let dir = tempdir().unwrap();
        let sanitized = sanitize_filename("a/b:c?.jpg", dir.path(), true).unwrap();
        assert_eq!(sanitized, "a\u{FF0F}b\u{FF1A}c\u{FF1F}.jpg");
    }

    #[test]
    fn sanitize_is_idempotent_given_same_dir_contents() {
        let dir = tempdir().unwrap();
        let once = sanitize_filename("weird<>name|.jpg", dir.path(), false).unwrap();
        let twice = sanitize_filename(&once, dir.path(), false).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_unique_overwrites_existing_case_insensitively() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("FILE.JPG"), b"old").unwrap();
        let sanitized = sanitize_filename("file.jpg", dir.path(), true).unwrap();
        assert_eq!(sanitized, "file.jpg");
        assert!(!dir.path().join("FILE.JPG").exists());
    }

    #[test]
    fn sanitize_non_unique_finds_next_free_suffix() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file.jpg"), b"x").unwrap();
        fs::write(dir.path().join("file (2).jpg"), b"x").unwrap();
        let sanitized = sanitize_filename("file.jpg", dir.path(), false).unwrap();
        assert_eq!(sanitized, "file (3).jpg");
    }
}
