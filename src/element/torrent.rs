use chrono::{DateTime, Utc};

use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::writer;

use super::{is_unavailable, select_one, Context, ElementArchiver};
use crate::config::Element;

pub struct TorrentArchiver;

/// `(hash, tsize, added)` parsed out of `metadata.torrents[]`. `added` is
/// the epoch-seconds the API reports, kept as a calendar timestamp since
/// it is compared against file mtimes rather than measured as a duration.
struct ApiTorrent {
    hash: String,
    tsize: u64,
    added: DateTime<Utc>,
}

impl ElementArchiver for TorrentArchiver {
    fn element(&self) -> Element {
        Element::Torrent
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Torrent) || is_unavailable(gallery)? {
            return Ok(());
        }

        let metadata_path = gallery.dir.join("api-metadata.json");
        gallery.ensure_loaded_up_to_date(ctx.client, ctx.config.mode, &metadata_path)?;

        let api_torrents = parse_api_torrents(gallery)?;

        let torrent_names: Vec<String> = gallery
            .files()?
            .iter()
            .filter(|name| name.ends_with(".torrent"))
            .cloned()
            .collect();

        let mut existing_info = Vec::new();
        for name in torrent_names {
            let file_meta = std::fs::metadata(gallery.dir.join(&name))?;
            existing_info.push((name.clone(), file_meta.len(), file_meta.modified()?.into()));
        }

        let (stale, api_torrents) = reconcile_torrents(existing_info, api_torrents);
        for name in stale {
            writer::remove_if_exists(&gallery.dir.join(name))?;
        }

        if api_torrents.is_empty() {
            return Ok(());
        }

        let list_page = ctx
            .client
            .load_torrent_page(gallery.id, &gallery.token)?;
        if select_one(&list_page.html, "#torrentinfo").is_none() {
            return Err(RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "#torrentinfo".to_string(),
            });
        }

        let anchor_selector = scraper::Selector::parse("a").unwrap();
        let candidates: Vec<(String, String)> = list_page
            .html
            .select(&anchor_selector)
            .filter_map(|el| {
                let href = el.value().attr("href")?.to_string();
                if !href.contains(".torrent") {
                    return None;
                }
                let hash = api_torrents
                    .iter()
                    .find(|t| href.contains(&t.hash))
                    .map(|t| t.hash.clone())?;
                Some((href, hash))
            })
            .collect();

        let mut failed: Vec<&(String, String)> = Vec::new();
        for candidate @ (href, _hash) in &candidates {
            let url = resolve_url(ctx, href)?;
            let downloaded = download_torrent(ctx, gallery, &url)?;
            if !downloaded {
                failed.push(candidate);
            }
        }

        if !failed.is_empty() && failed.len() == candidates.len() {
            refresh_tracker_cookies(ctx, &list_page.html)?;
            for (href, _hash) in failed {
                let bypass_url = {
                    let mut url = resolve_url(ctx, href)?;
                    url.query_pairs_mut().append_pair("cache", "bypass");
                    url
                };
                let ok = download_torrent(ctx, gallery, &bypass_url)?;
                if !ok {
                    return Err(RippandaError::Generic(format!(
                        "gallery {}: torrent at {bypass_url} was not application/x-bittorrent after cookie refresh",
                        gallery.id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn parse_api_torrents(gallery: &mut Gallery) -> RippandaResult<Vec<ApiTorrent>> {
    let torrents = gallery
        .metadata()
        .and_then(|m| m.get("torrents"))
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut parsed = Vec::with_capacity(torrents.len());
    for entry in torrents {
        let hash = entry
            .get("hash")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tsize = entry
            .get("tsize")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let added_epoch = entry
            .get("added")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        parsed.push(ApiTorrent {
            hash,
            tsize,
            added: DateTime::from_timestamp(added_epoch as i64, 0)
                .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap()),
        });
    }
    Ok(parsed)
}

/// Match each on-disk `.torrent` file against `metadata.torrents[]` by
/// `(tsize == size, mtime > added)` (§4.4.6 step 2). A file with no match
/// is stale and returned for removal; an api entry with no matching file
/// is returned for (re)download.
fn reconcile_torrents(
    existing: Vec<(String, u64, DateTime<Utc>)>,
    mut api_torrents: Vec<ApiTorrent>,
) -> (Vec<String>, Vec<ApiTorrent>) {
    let mut stale = Vec::new();
    for (name, size, mtime) in existing {
        let matched_index = api_torrents
            .iter()
            .position(|t| t.tsize == size && mtime > t.added);
        match matched_index {
            Some(idx) => {
                api_torrents.remove(idx);
            }
            None => stale.push(name),
        }
    }
    (stale, api_torrents)
}

fn resolve_url(ctx: &Context, href: &str) -> RippandaResult<reqwest::Url> {
    Ok(ctx.config.base_url.join(href)?)
}

/// `downloadFile` for one candidate torrent URL: the writer only
/// accepts the stream when the MIME type is `application/x-bittorrent`,
/// giving `failAcceptable=true`/`false` callers a plain boolean.
fn download_torrent(
    ctx: &Context,
    gallery: &mut Gallery,
    url: &reqwest::Url,
) -> RippandaResult<bool> {
    let mut buffer = Vec::new();
    let mut filename_seen = String::new();
    let ok = ctx.client.download_file(url, |reader, filename, mime| {
        filename_seen = filename.to_string();
        if mime != "application/x-bittorrent" {
            return Ok(false);
        }
        crate::interrupt::copy_interruptible(reader, &mut buffer)?;
        Ok(true)
    })?;

    if ok {
        let saved_name = writer::sanitize_filename(&filename_seen, &gallery.dir, false)?;
        writer::save_bytes(&gallery.dir, &saved_name, &buffer)?;
        gallery.note_file_written(saved_name);
    }
    Ok(ok)
}

/// Extract `document.location='<personalized>'` from the first anchor's
/// `onclick` and GET it, populating the cookie jar without writing
/// anything to disk.
fn refresh_tracker_cookies(ctx: &Context, html: &scraper::Html) -> RippandaResult<()> {
    let anchor_selector = scraper::Selector::parse("a").unwrap();
    let onclick = html
        .select(&anchor_selector)
        .find_map(|el| el.value().attr("onclick").map(str::to_string));

    let Some(onclick) = onclick else {
        return Ok(());
    };

    let marker = "document.location='";
    let Some(start) = onclick.find(marker) else {
        return Ok(());
    };
    let rest = &onclick[start + marker.len()..];
    let Some(end) = rest.find('\'') else {
        return Ok(());
    };
    let personalized = &rest[..end];

    let url = resolve_url(ctx, personalized)?;
    let _ = ctx.client.load_document(&url)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(epoch: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(epoch, 0).unwrap()
    }

    fn torrent(hash: &str, tsize: u64, added: i64) -> ApiTorrent {
        ApiTorrent {
            hash: hash.to_string(),
            tsize,
            added: at(added),
        }
    }

    #[test]
    fn matching_file_is_neither_stale_nor_redownloaded() {
        let existing = vec![("a.torrent".to_string(), 100, at(200))];
        let api = vec![torrent("h1", 100, 50)];
        let (stale, remaining) = reconcile_torrents(existing, api);
        assert!(stale.is_empty());
        assert!(remaining.is_empty());
    }

    #[test]
    fn size_mismatch_is_stale_and_torrent_is_redownloaded() {
        let existing = vec![("a.torrent".to_string(), 999, at(200))];
        let api = vec![torrent("h1", 100, 50)];
        let (stale, remaining) = reconcile_torrents(existing, api);
        assert_eq!(stale, vec!["a.torrent".to_string()]);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].hash, "h1");
    }

    #[test]
    fn file_older_than_added_timestamp_is_stale() {
        // mtime must be strictly after `added`; a file written before the
        // api-reported add time can't be the torrent it claims to be.
        let existing = vec![("a.torrent".to_string(), 100, at(10))];
        let api = vec![torrent("h1", 100, 50)];
        let (stale, remaining) = reconcile_torrents(existing, api);
        assert_eq!(stale, vec!["a.torrent".to_string()]);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn extra_api_torrent_with_no_file_is_returned_for_download() {
        let existing: Vec<(String, u64, DateTime<Utc>)> = Vec::new();
        let api = vec![torrent("h1", 100, 50), torrent("h2", 200, 60)];
        let (stale, remaining) = reconcile_torrents(existing, api);
        assert!(stale.is_empty());
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn each_file_consumes_at_most_one_matching_api_entry() {
        // two files of the same size shouldn't both match the same api
        // entry and leave the genuinely-missing second torrent unlisted.
        let existing = vec![
            ("a.torrent".to_string(), 100, at(200)),
            ("b.torrent".to_string(), 100, at(200)),
        ];
        let api = vec![torrent("h1", 100, 50)];
        let (stale, remaining) = reconcile_torrents(existing, api);
        assert_eq!(stale.len(), 1);
        assert!(remaining.is_empty());
    }
}
