//! Success-file ledger and cross-user reconciliation (C5).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::RippandaResult;
use crate::writer;

/// One user's own ledger plus the read-only view of every peer ledger
/// found in the same directory.
pub struct SuccessLedger {
    success_dir: PathBuf,
    member_id: String,
    own_ids: Vec<u64>,
    peer_ids: HashSet<u64>,
    peer_mtimes: std::collections::HashMap<PathBuf, SystemTime>,
    last_rescan: SystemTime,
}

impl SuccessLedger {
    /// `initSuccessIds`: drop any leftover temp ledger, then load this
    /// user's and every peer's ledger.
    pub fn init(success_dir: PathBuf, member_id: String) -> RippandaResult<Self> {
        writer::remove_if_exists(&temp_ledger_path(&success_dir, &member_id))?;

        let mut ledger = Self {
            success_dir,
            member_id,
            own_ids: Vec::new(),
            peer_ids: HashSet::new(),
            peer_mtimes: std::collections::HashMap::new(),
            last_rescan: SystemTime::UNIX_EPOCH,
        };

        ledger.own_ids = read_ids(&ledger.own_ledger_path())?;
        ledger.rescan_peers()?;
        Ok(ledger)
    }

    fn own_ledger_path(&self) -> PathBuf {
        ledger_path(&self.success_dir, &self.member_id)
    }

    pub fn is_in_success_ids(&self, id: u64) -> bool {
        self.own_ids.contains(&id) || self.peer_ids.contains(&id)
    }

    /// `addTempSuccessId`: append to this user's temp ledger.
    pub fn add_temp_success_id(&self, id: u64) -> RippandaResult<()> {
        append_line(&temp_ledger_path(&self.success_dir, &self.member_id), id)
    }

    /// `addSuccessId`: append to this user's final ledger.
    pub fn add_success_id(&mut self, id: u64) -> RippandaResult<()> {
        append_line(&self.own_ledger_path(), id)?;
        self.own_ids.push(id);
        Ok(())
    }

    /// `updateSuccessIds`: reload peer ledgers whose mtime advanced since
    /// the last scan. The scan boundary timestamp is captured before
    /// listing the directory so a write landing mid-scan is picked up on
    /// the *next* call rather than silently missed.
    pub fn update_success_ids(&mut self) -> RippandaResult<()> {
        self.rescan_peers()
    }

    fn rescan_peers(&mut self) -> RippandaResult<()> {
        let scan_started = SystemTime::now();
        let own_path = self.own_ledger_path();

        let entries = match std::fs::read_dir(&self.success_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("success-") || !name.ends_with(".txt") || name.contains("-temp")
            {
                continue;
            }
            if path == own_path {
                continue;
            }

            let mtime = entry.metadata()?.modified()?;
            let previously_seen = self.peer_mtimes.get(&path).copied();
            let needs_reload = previously_seen.map(|seen| mtime > seen).unwrap_or(true);
            if !needs_reload && mtime <= self.last_rescan {
                continue;
            }

            let ids = read_ids(&path)?;
            self.peer_ids.extend(ids);
            self.peer_mtimes.insert(path, mtime);
        }

        self.last_rescan = scan_started;
        Ok(())
    }

    /// `removeSuccessId`: drop from the in-memory set and rewrite the
    /// final ledger transactionally, preserving insertion order of the
    /// surviving ids.
    pub fn remove_success_id(&mut self, id: u64) -> RippandaResult<()> {
        self.own_ids.retain(|&existing| existing != id);
        let body = render_ledger(&self.own_ids);
        writer::save_bytes(&self.success_dir, &ledger_filename(&self.member_id), body.as_bytes())
    }

    /// Total distinct ids across this user's ledger and every loaded peer,
    /// used as UPDATE's "you vs. the community" progress denominator.
    pub fn len(&self) -> usize {
        let own: HashSet<u64> = self.own_ids.iter().copied().collect();
        own.union(&self.peer_ids).count()
    }

    pub fn finish(&self) -> RippandaResult<()> {
        writer::remove_if_exists(&temp_ledger_path(&self.success_dir, &self.member_id))
    }
}

fn ledger_filename(member_id: &str) -> String {
    format!("success-{member_id}.txt")
}

fn ledger_path(success_dir: &Path, member_id: &str) -> PathBuf {
    success_dir.join(ledger_filename(member_id))
}

fn temp_ledger_path(success_dir: &Path, member_id: &str) -> PathBuf {
    success_dir.join(format!("success-{member_id}-temp.txt"))
}

fn read_ids(path: &Path) -> RippandaResult<Vec<u64>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .filter_map(|line| line.trim().parse::<u64>().ok())
            .collect()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

fn render_ledger(ids: &[u64]) -> String {
    ids.iter().map(|id| format!("{id}\r\n")).collect()
}

fn append_line(path: &Path, id: u64) -> RippandaResult<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    write!(file, "{id}\r\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_and_check_success_id() {
        let dir = tempdir().unwrap();
        let mut ledger = SuccessLedger::init(dir.path().to_path_buf(), "1".to_string()).unwrap();
        assert!(!ledger.is_in_success_ids(42));
        ledger.add_success_id(42).unwrap();
        assert!(ledger.is_in_success_ids(42));
    }

    #[test]
    fn peer_ledger_is_visible_after_update() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("success-2.txt"), "7\r\n9\r\n").unwrap();
        let mut ledger = SuccessLedger::init(dir.path().to_path_buf(), "1".to_string()).unwrap();
        assert!(ledger.is_in_success_ids(7));
        assert!(ledger.is_in_success_ids(9));

        std::fs::write(dir.path().join("success-2.txt"), "7\r\n9\r\n11\r\n").unwrap();
        ledger.update_success_ids().unwrap();
        assert!(ledger.is_in_success_ids(11));
    }

    #[test]
    fn remove_success_id_preserves_remaining_order() {
        let dir = tempdir().unwrap();
        let mut ledger = SuccessLedger::init(dir.path().to_path_buf(), "1".to_string()).unwrap();
        ledger.add_success_id(10).unwrap();
        ledger.add_success_id(20).unwrap();
        ledger.add_success_id(30).unwrap();
        ledger.remove_success_id(20).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("success-1.txt")).unwrap();
        assert_eq!(contents, "10\r\n30\r\n");
    }

    #[test]
    fn init_deletes_leftover_temp_ledger() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("success-1-temp.txt"), "5\r\n").unwrap();
        SuccessLedger::init(dir.path().to_path_buf(), "1".to_string()).unwrap();
        assert!(!dir.path().join("success-1-temp.txt").exists());
    }
}
