use crate::error::{RippandaError, RippandaResult};
use crate::gallery::{update_required, Gallery};
use crate::writer;

use super::{is_unavailable, mark_if_unavailable, select_one, Context, ElementArchiver};
use crate::config::Element;

pub struct PageArchiver;

const FILENAME: &str = "page.html";

impl ElementArchiver for PageArchiver {
    fn element(&self) -> Element {
        Element::Page
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Page) || is_unavailable(gallery)? {
            return Ok(());
        }

        let path = gallery.dir.join(FILENAME);
        let stale =
            path.exists() && update_required(&path, ctx.config.mode, gallery.update_threshold)?;
        if path.exists() && !stale {
            return Ok(());
        }

        let document = ctx.client.load_page(gallery.id, &gallery.token)?;

        if select_one(&document.html, "#rating_label").is_none() {
            if mark_if_unavailable(gallery, &document.html)? {
                return Ok(());
            }
            return Err(RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "#rating_label".to_string(),
            });
        }

        writer::save_bytes(&gallery.dir, FILENAME, document.html.html().as_bytes())?;
        gallery.note_file_written(FILENAME);
        Ok(())
    }
}
