//! Element archivers (C4): one sub-pipeline per artifact kind, run in a
//! fixed registered order against a single [`Gallery`].

mod expungelog;
mod imagelist;
mod metadata;
mod page;
mod thumbnail;
mod torrent;
mod zip;

use scraper::{ElementRef, Html, Selector};

use crate::config::{Config, Element};
use crate::error::RippandaResult;
use crate::gallery::Gallery;
use crate::http_client::HttpClient;
use crate::writer;

/// Shared state threaded through every archiver's `process` call.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub client: &'a HttpClient,
    pub config: &'a Config,
}

/// Uniform shape every element archiver follows (§4.4): decide whether
/// work is needed, fetch, verify, and persist.
pub trait ElementArchiver {
    fn element(&self) -> Element;
    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()>;
}

/// Registry in spec order; `main` filters out configured skips before
/// running each gallery through this list (§9).
pub fn registry() -> Vec<Box<dyn ElementArchiver>> {
    vec![
        Box::new(metadata::MetadataArchiver),
        Box::new(page::PageArchiver),
        Box::new(imagelist::ImageListArchiver),
        Box::new(expungelog::ExpungeLogArchiver),
        Box::new(thumbnail::ThumbnailArchiver),
        Box::new(torrent::TorrentArchiver),
        Box::new(zip::ZipArchiver),
    ]
}

pub fn unavailable_marker_name() -> &'static str {
    "unavailable.txt"
}

pub fn is_unavailable(gallery: &mut Gallery) -> RippandaResult<bool> {
    gallery.has_file(unavailable_marker_name())
}

/// If `html` is a "Gallery Not Available" page, write the sentinel and
/// record it against the gallery's cached file set (§4.4 step 3).
pub fn mark_if_unavailable(gallery: &mut Gallery, html: &Html) -> RippandaResult<bool> {
    let title_selector = Selector::parse("title").unwrap();
    let is_unavailable_title = html
        .select(&title_selector)
        .next()
        .map(|el| element_text(&el).contains("Gallery Not Available"))
        .unwrap_or(false);

    if !is_unavailable_title {
        return Ok(false);
    }

    let reason_selector = Selector::parse(".d > p").unwrap();
    let reason = html
        .select(&reason_selector)
        .next()
        .map(|el| element_text(&el))
        .unwrap_or_else(|| "Gallery Not Available".to_string());

    writer::save_bytes(&gallery.dir, unavailable_marker_name(), reason.as_bytes())?;
    gallery.note_file_written(unavailable_marker_name());
    Ok(true)
}

pub fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

pub fn select_one<'h>(html: &'h Html, selector: &str) -> Option<ElementRef<'h>> {
    Selector::parse(selector).ok().and_then(|sel| html.select(&sel).next())
}
