use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;
use tracing::info;

use crate::config::Config;
use crate::element::{Context, ElementArchiver};
use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::http_client::HttpClient;
use crate::interrupt;
use crate::success::SuccessLedger;

static GALLERY_HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/g/(\d+)/([0-9a-f]+)/?").unwrap());

/// Paginated search crawl (§4.6 DOWNLOAD): follow "next page" links from
/// the configured search URL, archiving every gallery not already in the
/// success set.
pub fn run(
    config: &Config,
    client: &HttpClient,
    archivers: &[Box<dyn ElementArchiver>],
) -> RippandaResult<()> {
    let ctx = Context { client, config };
    let mut ledger = SuccessLedger::init(config.success_dir.clone(), config.member_id.clone())?;

    let mut current_url = config.search_url.clone();

    let result = (|| -> RippandaResult<()> {
        loop {
            interrupt::check()?;
            let document = client.load_document(&current_url)?;

            if crate::element::select_one(&document.html, "#searchbox").is_none() {
                return Err(RippandaError::VerificationFailed {
                    context: "search page".to_string(),
                    selector: "#searchbox".to_string(),
                });
            }

            let rows = parse_gallery_rows(&document.html)?;
            if rows.is_empty() {
                break;
            }

            let mut any_processed = false;
            for (id, token) in rows {
                interrupt::check()?;
                if ledger.is_in_success_ids(id) {
                    info!(gallery = id, "already in success set, skipping");
                    continue;
                }

                ledger.add_temp_success_id(id)?;
                let dir = config.writable_archive_dir().join(id.to_string());
                let mut gallery = Gallery::new(id, token, dir);

                super::run_gallery(&ctx, archivers, &mut gallery)?;

                ledger.add_success_id(id)?;
                ledger.update_success_ids()?;
                any_processed = true;
            }

            if config.catchup && !any_processed {
                break;
            }

            match next_page_url(config, &document.html)? {
                Some(url) => current_url = url,
                None => break,
            }
        }
        Ok(())
    })();

    if result.is_ok() {
        ledger.finish()?;
    }
    result
}

fn parse_gallery_rows(html: &scraper::Html) -> RippandaResult<Vec<(u64, String)>> {
    let row_selector = Selector::parse("table.gltc tr > td.gl1c").unwrap();
    let anchor_selector = Selector::parse(".glname > a").unwrap();

    let mut rows = Vec::new();
    for cell in html.select(&row_selector) {
        let Some(parent) = cell.parent().and_then(scraper::ElementRef::wrap) else {
            continue;
        };
        let Some(anchor) = parent.select(&anchor_selector).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(caps) = GALLERY_HREF_RE.captures(href) else {
            continue;
        };
        let id: u64 = caps[1].parse().unwrap_or(0);
        let token = caps[2].to_string();
        rows.push((id, token));
    }
    Ok(rows)
}

fn next_page_url(config: &Config, html: &scraper::Html) -> RippandaResult<Option<reqwest::Url>> {
    let primary = Selector::parse(".ptds + td:not(.ptdd) > a").unwrap();
    let fallback = Selector::parse("a#unext").unwrap();

    let href = html
        .select(&primary)
        .next()
        .or_else(|| html.select(&fallback).next())
        .and_then(|el| el.value().attr("href"));

    match href {
        Some(href) => Ok(Some(config.base_url.join(href)?)),
        None => Ok(None),
    }
}
