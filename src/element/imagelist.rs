use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::writer;

use super::{is_unavailable, mark_if_unavailable, select_one, Context, ElementArchiver};
use crate::config::Element;

pub struct ImageListArchiver;

const FILENAME: &str = "imagelist.json";

static IMAGELIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"var\s+imagelist\s*=\s*(\[[\s\S]*?\])\s*;").unwrap());

impl ElementArchiver for ImageListArchiver {
    fn element(&self) -> Element {
        Element::Imagelist
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Imagelist) || is_unavailable(gallery)? {
            return Ok(());
        }
        if gallery.has_file(FILENAME)? {
            return Ok(());
        }

        let document = ctx.client.load_mpv_page(gallery.id, &gallery.token)?;

        if select_one(&document.html, "#pane_outer").is_none() {
            if mark_if_unavailable(gallery, &document.html)? {
                return Ok(());
            }
            return Err(RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "#pane_outer".to_string(),
            });
        }

        let script_selector = scraper::Selector::parse("script").unwrap();
        let raw_array = document
            .html
            .select(&script_selector)
            .filter_map(|el| {
                let text = el.text().collect::<String>();
                IMAGELIST_RE
                    .captures(&text)
                    .map(|caps| caps[1].to_string())
            })
            .next()
            .ok_or_else(|| RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "script:var imagelist".to_string(),
            })?;

        let parsed: serde_json::Value = serde_json::from_str(&raw_array)?;
        let pretty = serde_json::to_vec_pretty(&parsed)?;
        writer::save_bytes(&gallery.dir, FILENAME, &pretty)?;
        gallery.note_file_written(FILENAME);
        Ok(())
    }
}
