//! Rate-limited HTTP client (C1).
//!
//! A single `reqwest::blocking::Client` built once and held on a struct,
//! generalised with a cookie jar, an optional SOCKS5 proxy, and a
//! single-inflight request gate.

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Url;
use scraper::Html;
use serde_json::Value;

use crate::config::Config;
use crate::error::{RippandaError, RippandaResult};
use crate::interrupt;

const USER_AGENT: &str = concat!("rippanda/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_GDATA_PAIRS: usize = 25;

/// Statuses for which "gallery gone" is a meaningful outcome rather than a
/// transport failure (§4.1 contract 3).
fn tolerates_404(kind: EndpointKind) -> bool {
    matches!(
        kind,
        EndpointKind::Page
            | EndpointKind::Mpv
            | EndpointKind::TorrentList
            | EndpointKind::ExpungeLog
            | EndpointKind::ArchivePrep
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Page,
    Mpv,
    TorrentList,
    ExpungeLog,
    ArchivePrep,
    Other,
}

/// A parsed response: either an HTML document or a raw JSON payload.
pub struct FetchedDocument {
    pub html: Html,
    pub status: u16,
}

/// Guards `last_request_end`, advancing it on every exit path (success,
/// error, or panic) so the gate always throttles the *next* call (§4.1
/// contract 1's "finally" equivalent).
struct GateGuard<'a> {
    slot: &'a Mutex<Instant>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = Instant::now();
        }
    }
}

pub struct HttpClient {
    client: Client,
    base_url: Url,
    request_delay: Duration,
    last_request_end: Mutex<Instant>,
}

impl HttpClient {
    pub fn new(config: &Config) -> RippandaResult<Self> {
        let jar = Arc::new(Jar::default());
        for (name, value) in &config.cookies {
            jar.add_cookie_str(&format!("{name}={value}"), &config.base_url);
        }

        let mut builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .cookie_provider(jar)
            .gzip(true);

        if let Some((host, port)) = &config.proxy {
            // socks5h resolves the hostname on the proxy side; the local
            // resolver never sees the request host (§4.1 contract 4).
            let proxy_url = format!("socks5h://{host}:{port}");
            builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            request_delay: config.request_delay,
            last_request_end: Mutex::new(Instant::now() - config.request_delay),
        })
    }

    /// Block until `last_request_end + request_delay` has elapsed, then
    /// return a guard that records the new `last_request_end` on drop.
    fn throttle(&self) -> RippandaResult<GateGuard<'_>> {
        let earliest = {
            let last = self
                .last_request_end
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            *last + self.request_delay
        };
        let now = Instant::now();
        if earliest > now {
            interrupt::sleep_interruptible(earliest - now)?;
        } else {
            interrupt::check()?;
        }
        Ok(GateGuard {
            slot: &self.last_request_end,
        })
    }

    pub fn load_metadata(&self, id_token_pairs: &[(u64, String)]) -> RippandaResult<Value> {
        if id_token_pairs.len() > MAX_GDATA_PAIRS {
            return Err(RippandaError::Generic(format!(
                "loadMetadata accepts at most {MAX_GDATA_PAIRS} pairs, got {}",
                id_token_pairs.len()
            )));
        }
        let gidlist: Vec<Value> = id_token_pairs
            .iter()
            .map(|(id, token)| Value::from(vec![Value::from(*id), Value::from(token.clone())]))
            .collect();
        let body = serde_json::json!({
            "method": "gdata",
            "gidlist": gidlist,
            "namespace": 1,
        });

        let url = self.base_url.join("api.php")?;
        let _gate = self.throttle()?;
        let response = self.client.post(url.clone()).json(&body).send()?;
        let response = require_status(response, &url, 200)?;
        Ok(response.json()?)
    }

    pub fn load_page(&self, id: u64, token: &str) -> RippandaResult<FetchedDocument> {
        let url = self.base_url.join(&format!("g/{id}/{token}"))?;
        self.fetch_document(url, EndpointKind::Page)
    }

    pub fn load_mpv_page(&self, id: u64, token: &str) -> RippandaResult<FetchedDocument> {
        let url = self.base_url.join(&format!("mpv/{id}/{token}"))?;
        self.fetch_document(url, EndpointKind::Mpv)
    }

    pub fn load_torrent_page(&self, id: u64, token: &str) -> RippandaResult<FetchedDocument> {
        let url = self
            .base_url
            .join(&format!("gallerytorrents.php?gid={id}&t={token}"))?;
        self.fetch_document(url, EndpointKind::TorrentList)
    }

    pub fn load_expunge_log_page(&self, id: u64, token: &str) -> RippandaResult<FetchedDocument> {
        let url = self.base_url.join(&format!("g/{id}/{token}?act=expunge"))?;
        self.fetch_document(url, EndpointKind::ExpungeLog)
    }

    pub fn load_archive_preparation_page(
        &self,
        archiver_url: &Url,
    ) -> RippandaResult<FetchedDocument> {
        let _gate = self.throttle()?;
        let response = self
            .client
            .post(archiver_url.clone())
            .form(&[("dltype", "org"), ("dlcheck", "Download Original Archive")])
            .send()?;
        let document = parse_response(response, archiver_url, EndpointKind::ArchivePrep)?;
        Ok(document)
    }

    pub fn load_document(&self, url: &Url) -> RippandaResult<FetchedDocument> {
        self.fetch_document(url.clone(), EndpointKind::Other)
    }

    /// Parse a local HTML file with the configured base URL set as the
    /// document base, for code paths that read a previously-saved page
    /// back off disk instead of refetching it.
    pub fn load_local_document(&self, path: &Path) -> RippandaResult<FetchedDocument> {
        let raw = std::fs::read_to_string(path)?;
        Ok(FetchedDocument {
            html: Html::parse_document(&raw),
            status: 200,
        })
    }

    fn fetch_document(&self, url: Url, kind: EndpointKind) -> RippandaResult<FetchedDocument> {
        let _gate = self.throttle()?;
        let response = self.client.get(url.clone()).send()?;
        parse_response(response, &url, kind)
    }

    /// Stream `url` to `writer`, passing the inferred filename and MIME
    /// type. `fail_acceptable` controls whether a non-2xx or writer
    /// rejection should surface as an error or simply return `false`.
    pub fn download_file<W>(&self, url: &Url, mut writer: W) -> RippandaResult<bool>
    where
        W: FnMut(&mut dyn Read, &str, &str) -> RippandaResult<bool>,
    {
        let _gate = self.throttle()?;
        let mut response = self.client.get(url.clone()).send()?;
        if !response.status().is_success() {
            return Err(RippandaError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_string();

        let filename = infer_filename(&response, url);

        interrupt::check()?;
        writer(&mut response, &filename, &mime)
    }
}

fn require_status(response: Response, url: &Url, expected: u16) -> RippandaResult<Response> {
    if response.status().as_u16() != expected {
        return Err(RippandaError::UnexpectedStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

fn parse_response(
    response: Response,
    url: &Url,
    kind: EndpointKind,
) -> RippandaResult<FetchedDocument> {
    let status = response.status().as_u16();
    if status != 200 && !(status == 404 && tolerates_404(kind)) {
        return Err(RippandaError::UnexpectedStatus {
            status,
            url: url.to_string(),
        });
    }
    let body = response.text()?;
    Ok(FetchedDocument {
        html: Html::parse_document(&body),
        status,
    })
}

/// Infer the downloaded filename per §4.1 contract 5: prefer
/// `Content-Disposition: filename=`, decoded ISO-8859-1 -> UTF-8 with HTML
/// entities unescaped; otherwise fall back to the final URL's last segment.
fn infer_filename(response: &Response, original_url: &Url) -> String {
    if let Some(header) = response.headers().get(CONTENT_DISPOSITION) {
        if let Some(name) = parse_content_disposition_filename(header.as_bytes()) {
            return name;
        }
    }

    let final_url = response.url();
    final_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| original_url.to_string())
}

fn parse_content_disposition_filename(raw: &[u8]) -> Option<String> {
    let latin1: String = raw.iter().map(|&b| b as char).collect();
    let marker = "filename=";
    let idx = latin1.find(marker)?;
    let rest = latin1[idx + marker.len()..].trim_start();
    let value = if let Some(stripped) = rest.strip_prefix('"') {
        stripped.split('"').next().unwrap_or(stripped)
    } else {
        rest.split(';').next().unwrap_or(rest)
    };
    Some(unescape_html_entities(value.trim()))
}

fn unescape_html_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_filename_from_quoted_content_disposition() {
        let raw = b"attachment; filename=\"a b%26c.zip\"";
        let name = parse_content_disposition_filename(raw).unwrap();
        assert_eq!(name, "a b%26c.zip");
    }

    #[test]
    fn infers_filename_unescapes_entities() {
        let raw = b"attachment; filename=a&amp;b.zip";
        let name = parse_content_disposition_filename(raw).unwrap();
        assert_eq!(name, "a&b.zip");
    }

    #[test]
    fn returns_none_without_filename_param() {
        assert!(parse_content_disposition_filename(b"inline").is_none());
    }
}
