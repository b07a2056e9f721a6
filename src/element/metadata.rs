use crate::error::{RippandaError, RippandaResult};
use crate::gallery::{update_required, Gallery};
use crate::writer;

use super::{Context, ElementArchiver};
use crate::config::Element;

pub struct MetadataArchiver;

const FILENAME: &str = "api-metadata.json";

impl ElementArchiver for MetadataArchiver {
    fn element(&self) -> Element {
        Element::Metadata
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Metadata) {
            return Ok(());
        }

        let path = gallery.dir.join(FILENAME);
        let stale = path.exists()
            && update_required(&path, ctx.config.mode, gallery.update_threshold)?;
        if path.exists() && !stale {
            return Ok(());
        }

        gallery.ensure_loaded_online(ctx.client)?;
        let metadata = gallery
            .metadata()
            .cloned()
            .expect("ensure_loaded_online populates metadata");

        let title = metadata.get("title").and_then(serde_json::Value::as_str);
        if title.map(str::is_empty).unwrap_or(true) {
            return Err(RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "metadata.title".to_string(),
            });
        }

        let pretty = serde_json::to_vec_pretty(&metadata)?;
        writer::save_bytes(&gallery.dir, FILENAME, &pretty)?;
        gallery.note_file_written(FILENAME);
        Ok(())
    }
}
