use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::interrupt;
use crate::writer;

use super::{is_unavailable, select_one, Context, ElementArchiver};
use crate::config::Element;

pub struct ZipArchiver;

const MAX_PREPARATION_ATTEMPTS: u32 = 30;

static SET_TIMEOUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"setTimeout\([^,]+,\s*(\d+)\s*\)").unwrap());

impl ElementArchiver for ZipArchiver {
    fn element(&self) -> Element {
        Element::Zip
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Zip) || is_unavailable(gallery)? {
            return Ok(());
        }
        let has_zip = gallery.files()?.iter().any(|name| name.ends_with(".zip"));
        if has_zip {
            return Ok(());
        }

        gallery.ensure_loaded_online(ctx.client)?;
        let archiver_key = gallery
            .metadata()
            .and_then(|m| m.get("archiver_key"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "metadata.archiver_key".to_string(),
            })?
            .to_string();

        let prep_url = ctx.config.base_url.join(&format!(
            "archiver.php?gid={}&token={}&or={}",
            gallery.id, gallery.token, archiver_key
        ))?;

        let mut document = ctx.client.load_archive_preparation_page(&prep_url)?;

        let download_url = resolve_preparation(ctx, gallery, &mut document)?;

        let mut buffer = Vec::new();
        let mut mime_seen = String::new();
        let mut filename_seen = String::new();
        let ok = ctx
            .client
            .download_file(&download_url, |reader, filename, mime| {
                mime_seen = mime.to_string();
                filename_seen = filename.to_string();
                if mime != "application/zip" {
                    return Ok(false);
                }
                crate::interrupt::copy_interruptible(reader, &mut buffer)?;
                Ok(true)
            })?;

        if !ok {
            return Err(RippandaError::Generic(format!(
                "gallery {}: zip mime {mime_seen:?} was not application/zip",
                gallery.id
            )));
        }

        let saved_name = writer::sanitize_filename(&filename_seen, &gallery.dir, true)?;
        writer::save_bytes(&gallery.dir, &saved_name, &buffer)?;
        gallery.note_file_written(saved_name);
        Ok(())
    }
}

/// Walk the `#db a` / `#continue a` state machine (§4.4.7 step 3) until a
/// direct download URL is produced or the retry budget is exhausted.
fn resolve_preparation(
    ctx: &Context,
    gallery: &Gallery,
    document: &mut crate::http_client::FetchedDocument,
) -> RippandaResult<reqwest::Url> {
    for attempt in 0..MAX_PREPARATION_ATTEMPTS {
        if let Some(el) = select_one(&document.html, "#db a") {
            let href = el
                .value()
                .attr("href")
                .ok_or_else(|| RippandaError::VerificationFailed {
                    context: format!("gallery {}", gallery.id),
                    selector: "#db a[href]".to_string(),
                })?;
            return Ok(ctx.config.base_url.join(href)?);
        }

        let continue_href = select_one(&document.html, "#continue a")
            .and_then(|el| el.value().attr("href").map(str::to_string));

        let Some(continue_href) = continue_href else {
            return Err(RippandaError::ZipPreparationExhausted(attempt + 1));
        };

        let script_selector = scraper::Selector::parse("script").unwrap();
        let delay_ms = document
            .html
            .select(&script_selector)
            .filter_map(|el| {
                let text = el.text().collect::<String>();
                SET_TIMEOUT_RE
                    .captures(&text)
                    .and_then(|caps| caps[1].parse::<u64>().ok())
            })
            .next()
            .unwrap_or(5000);

        interrupt::sleep_interruptible(std::time::Duration::from_millis(delay_ms))?;

        let url = ctx.config.base_url.join(&continue_href)?;
        *document = ctx.client.load_document(&url)?;
    }

    Err(RippandaError::ZipPreparationExhausted(
        MAX_PREPARATION_ATTEMPTS,
    ))
}
