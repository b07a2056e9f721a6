use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::writer;

use super::{is_unavailable, Context, ElementArchiver};
use crate::config::Element;

pub struct ExpungeLogArchiver;

const FILENAME: &str = "expungelog.html";

impl ElementArchiver for ExpungeLogArchiver {
    fn element(&self) -> Element {
        Element::Expungelog
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Page) || is_unavailable(gallery)? {
            return Ok(());
        }
        if gallery.has_file(FILENAME)? {
            return Ok(());
        }

        let metadata_path = gallery.dir.join("api-metadata.json");
        gallery.ensure_loaded_up_to_date(ctx.client, ctx.config.mode, &metadata_path)?;
        let expunged = gallery.expunged();
        if !expunged {
            return Ok(());
        }

        let document = ctx
            .client
            .load_expunge_log_page(gallery.id, &gallery.token)?;

        if super::select_one(&document.html, "#form_expunge_vote").is_none() {
            return Err(RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "#form_expunge_vote".to_string(),
            });
        }

        writer::save_bytes(&gallery.dir, FILENAME, document.html.html().as_bytes())?;
        gallery.note_file_written(FILENAME);
        Ok(())
    }
}
