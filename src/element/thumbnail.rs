use crate::error::{RippandaError, RippandaResult};
use crate::gallery::Gallery;
use crate::writer;

use super::{Context, ElementArchiver};
use crate::config::Element;

pub struct ThumbnailArchiver;

const FILENAME: &str = "thumbnail.jpg";

impl ElementArchiver for ThumbnailArchiver {
    fn element(&self) -> Element {
        Element::Thumbnail
    }

    fn process(&self, ctx: &Context, gallery: &mut Gallery) -> RippandaResult<()> {
        if !ctx.config.is_active(Element::Thumbnail) {
            return Ok(());
        }
        if gallery.has_file(FILENAME)? {
            return Ok(());
        }

        gallery.ensure_loaded(ctx.client)?;
        let thumb = gallery
            .metadata()
            .and_then(|m| m.get("thumb"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| RippandaError::VerificationFailed {
                context: format!("gallery {}", gallery.id),
                selector: "metadata.thumb".to_string(),
            })?
            .to_string();

        if !thumb.ends_with("_l.jpg") {
            return Err(RippandaError::Generic(format!(
                "gallery {}: thumb url {thumb:?} does not end in _l.jpg",
                gallery.id
            )));
        }
        let high_res = format!("{}_300.jpg", &thumb[..thumb.len() - "_l.jpg".len()]);
        if high_res == thumb {
            return Err(RippandaError::Generic(format!(
                "gallery {}: thumb url rewrite was a no-op",
                gallery.id
            )));
        }

        let url = reqwest::Url::parse(&high_res)?;
        let mut buffer = Vec::new();
        let mut mime_seen = String::new();
        let ok = ctx.client.download_file(&url, |reader, _filename, mime| {
            mime_seen = mime.to_string();
            if mime != "image/jpeg" {
                return Ok(false);
            }
            crate::interrupt::copy_interruptible(reader, &mut buffer)?;
            Ok(true)
        })?;

        if !ok {
            return Err(RippandaError::Generic(format!(
                "gallery {}: thumbnail mime {mime_seen:?} was not image/jpeg",
                gallery.id
            )));
        }

        writer::save_bytes(&gallery.dir, FILENAME, &buffer)?;
        gallery.note_file_written(FILENAME);
        Ok(())
    }
}
