//! Graph-based pruning (§4.6 CLEANUP): scan every archive root, then evict
//! galleries made redundant by parent/child/conflict relationships.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::info;

use crate::config::Config;
use crate::error::RippandaResult;
use crate::success::SuccessLedger;

static REPORT_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/g/(\d+)/(\S{10})/?").unwrap());

struct KnownGallery {
    removable_dirs: Vec<PathBuf>,
    retained_dirs: Vec<PathBuf>,
    parent: Option<u64>,
    conflicts: HashSet<u64>,
}

impl KnownGallery {
    fn new() -> Self {
        Self {
            removable_dirs: Vec::new(),
            retained_dirs: Vec::new(),
            parent: None,
            conflicts: HashSet::new(),
        }
    }
}

pub fn run(config: &Config) -> RippandaResult<()> {
    let mut known: HashMap<u64, KnownGallery> = HashMap::new();
    let mut parent_ids: HashSet<u64> = HashSet::new();

    for (root_index, root) in config.archive_dirs.iter().enumerate() {
        let writable = root_index == 0;
        scan_root(root, writable, &mut known, &mut parent_ids)?;
    }

    let outdated = compute_outdated(&known, &parent_ids);

    let mut ledger = SuccessLedger::init(config.success_dir.clone(), config.member_id.clone())?;
    let mut bytes_freed: u64 = 0;

    for id in &outdated {
        let Some(entry) = known.get(id) else { continue };
        for dir in &entry.removable_dirs {
            bytes_freed += directory_size(dir)?;
            std::fs::remove_dir_all(dir)?;
            info!(gallery = id, dir = %dir.display(), "removed outdated gallery");
        }
        ledger.remove_success_id(*id)?;
    }

    info!(outdated = outdated.len(), bytes_freed, "cleanup pass complete");
    Ok(())
}

/// Pass 2 (§4.6/§8 property 6): a superseded parent (rule a) or a conflict
/// loser (rule c) is outdated on its own. Rule b ("my recorded parent is
/// known") only applies on top of that: a gallery whose parent survives
/// pass one is a genuine redundant duplicate, but a gallery whose parent
/// is itself about to be evicted is the sole surviving copy and must not
/// also be evicted.
fn compute_outdated(
    known: &HashMap<u64, KnownGallery>,
    parent_ids: &HashSet<u64>,
) -> HashSet<u64> {
    let known_ids: HashSet<u64> = known.keys().copied().collect();

    let mut outdated: HashSet<u64> = known
        .iter()
        .filter(|&(&id, ref entry)| {
            parent_ids.contains(&id) || entry.conflicts.iter().any(|c| known_ids.contains(c))
        })
        .map(|(&id, _)| id)
        .collect();

    for (&id, entry) in known {
        if outdated.contains(&id) {
            continue;
        }
        if let Some(parent) = entry.parent {
            if known_ids.contains(&parent) && !outdated.contains(&parent) {
                outdated.insert(id);
            }
        }
    }

    outdated
}

fn scan_root(
    root: &Path,
    writable: bool,
    known: &mut HashMap<u64, KnownGallery>,
    parent_ids: &mut HashSet<u64>,
) -> RippandaResult<()> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let page_path = dir.join("page.html");
        if !page_path.exists() {
            continue;
        }

        let html = Html::parse_document(&std::fs::read_to_string(&page_path)?);

        let Some(id) = find_reported_gallery_id(&html) else {
            continue;
        };

        let gallery_entry = known.entry(id).or_insert_with(KnownGallery::new);
        if writable {
            gallery_entry.removable_dirs.push(dir.clone());
        } else {
            gallery_entry.retained_dirs.push(dir.clone());
        }

        if let Some(parent_id) = find_parent_id(&html) {
            parent_ids.insert(parent_id);
            gallery_entry.parent = Some(parent_id);
        }

        let expunge_path = dir.join("expungelog.html");
        if expunge_path.exists() {
            let expunge_html = Html::parse_document(&std::fs::read_to_string(&expunge_path)?);
            if !is_administrative_expunge(&expunge_html) {
                let conflicts = find_conflicts(&expunge_html);
                known.get_mut(&id).unwrap().conflicts.extend(conflicts);
            }
        }
    }

    Ok(())
}

fn find_reported_gallery_id(html: &Html) -> Option<u64> {
    let selector = Selector::parse("#gd5 > .g3 > a").ok()?;
    let href = html.select(&selector).next()?.value().attr("href")?;
    let caps = REPORT_LINK_RE.captures(href)?;
    caps[1].parse().ok()
}

fn find_parent_id(html: &Html) -> Option<u64> {
    let label_selector = Selector::parse(".gdt1").ok()?;
    let anchor_selector = Selector::parse(".gdt2 > a").ok()?;

    for label in html.select(&label_selector) {
        let text = element_text(&label);
        if !text.contains("Parent:") {
            continue;
        }
        if let Some(sibling) = next_element_sibling(&label) {
            if let Some(anchor) = sibling.select(&anchor_selector).next().or_else(|| {
                if sibling.value().name() == "a" {
                    Some(sibling)
                } else {
                    None
                }
            }) {
                let text = element_text(&anchor);
                if let Some(caps) = REPORT_LINK_RE.captures(anchor.value().attr("href").unwrap_or("")) {
                    return caps[1].parse().ok();
                }
                return text.trim().parse().ok();
            }
        }
    }
    None
}

fn is_administrative_expunge(html: &Html) -> bool {
    let selector = match Selector::parse(".exp_outer") {
        Ok(s) => s,
        Err(_) => return false,
    };
    html.select(&selector)
        .any(|el| element_text(&el).contains("administratively expunged"))
}

fn find_conflicts(html: &Html) -> HashSet<u64> {
    let table_selector = match Selector::parse(".exp_table a") {
        Ok(s) => s,
        Err(_) => return HashSet::new(),
    };
    html.select(&table_selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| REPORT_LINK_RE.captures(href))
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

fn next_element_sibling<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn directory_size(dir: &Path) -> RippandaResult<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += directory_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(parent: Option<u64>, conflicts: &[u64]) -> KnownGallery {
        let mut entry = KnownGallery::new();
        entry.parent = parent;
        entry.conflicts = conflicts.iter().copied().collect();
        entry
    }

    #[test]
    fn parent_superseded_by_known_child_is_outdated_but_child_survives() {
        // A names B as a child (B's own page records parent A); A should be
        // evicted as the superseded original, B must survive as the sole
        // remaining copy even though its recorded parent (A) is known.
        let mut map = HashMap::new();
        map.insert(1, known(None, &[])); // A
        map.insert(2, known(Some(1), &[])); // B, parent A
        let mut parent_ids = HashSet::new();
        parent_ids.insert(1);

        let outdated = compute_outdated(&map, &parent_ids);
        assert_eq!(outdated, HashSet::from([1]));
    }

    #[test]
    fn gallery_with_known_conflict_is_outdated() {
        let mut map = HashMap::new();
        map.insert(200, known(None, &[201])); // 200 records 201 as conflict
        map.insert(201, known(None, &[]));

        let outdated = compute_outdated(&map, &HashSet::new());
        assert_eq!(outdated, HashSet::from([200]));
    }

    #[test]
    fn child_of_a_retained_parent_is_a_redundant_duplicate() {
        // Parent has no known child naming it (so rule a doesn't fire on
        // it) and no conflicts, so it's retained; the child's recorded
        // parent survives, so the child is a genuine duplicate.
        let mut map = HashMap::new();
        map.insert(1, known(None, &[])); // parent, retained
        map.insert(2, known(Some(1), &[])); // child of a surviving parent

        let outdated = compute_outdated(&map, &HashSet::new());
        assert_eq!(outdated, HashSet::from([2]));
    }

    #[test]
    fn unrelated_galleries_are_never_outdated() {
        let mut map = HashMap::new();
        map.insert(1, known(None, &[]));
        map.insert(2, known(None, &[]));

        let outdated = compute_outdated(&map, &HashSet::new());
        assert!(outdated.is_empty());
    }
}
