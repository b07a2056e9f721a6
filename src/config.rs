use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::error::{RippandaError, RippandaResult};

/// One of the seven artifact kinds an element archiver produces.
///
/// Order here has no semantic meaning by itself; the *registration* order
/// built from this set in `main` is what determines processing order (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[value(rename_all = "lower")]
pub enum Element {
    Metadata,
    Page,
    Imagelist,
    Expungelog,
    Thumbnail,
    Torrent,
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum Mode {
    Download,
    Update,
    Cleanup,
}

/// The four-duration interpolation table used to compute a gallery's
/// per-run update threshold (§3, §4.3).
#[derive(Debug, Clone, Copy)]
pub struct UpdateInterval {
    pub min_threshold: Duration,
    pub min_duration: Duration,
    pub max_threshold: Duration,
    pub max_duration: Duration,
}

impl Default for UpdateInterval {
    fn default() -> Self {
        Self {
            min_threshold: Duration::ZERO,
            min_duration: days(7),
            max_threshold: days(365),
            max_duration: days(90),
        }
    }
}

impl UpdateInterval {
    /// Parse the `minT=minD-maxT=maxD` flag value, each side built from
    /// ISO-8601 period parts (`D`, `H`, `M`, `S` suffixes on an integer).
    pub fn parse(raw: &str) -> RippandaResult<Self> {
        let (left, right) = raw
            .split_once('-')
            .ok_or_else(|| RippandaError::InvalidInterval(raw.to_string()))?;
        let (min_threshold_raw, min_duration_raw) = left
            .split_once('=')
            .ok_or_else(|| RippandaError::InvalidInterval(raw.to_string()))?;
        let (max_threshold_raw, max_duration_raw) = right
            .split_once('=')
            .ok_or_else(|| RippandaError::InvalidInterval(raw.to_string()))?;

        let min_threshold = parse_duration_token(min_threshold_raw)?;
        let min_duration = parse_duration_token(min_duration_raw)?;
        let max_threshold = parse_duration_token(max_threshold_raw)?;
        let max_duration = parse_duration_token(max_duration_raw)?;

        if min_threshold > max_threshold {
            return Err(RippandaError::InvalidInterval(format!(
                "minThreshold must be <= maxThreshold in {raw:?}"
            )));
        }
        if min_duration > max_duration {
            return Err(RippandaError::InvalidInterval(format!(
                "minDuration must be <= maxDuration in {raw:?}"
            )));
        }

        Ok(Self {
            min_threshold,
            min_duration,
            max_threshold,
            max_duration,
        })
    }
}

const fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

/// Parse a single ISO-8601-style period/time token such as `7D`, `90D`,
/// `15S`, `0D`. Only the small alphabet the update-interval flags actually
/// use (days, hours, minutes, seconds) is supported; this is not a general
/// ISO-8601 duration parser.
fn parse_duration_token(token: &str) -> RippandaResult<Duration> {
    let token = token.trim();
    if token.is_empty() {
        return Err(RippandaError::InvalidDuration(token.to_string()));
    }
    let (digits, unit) = token.split_at(token.len() - 1);
    let value: u64 = digits
        .parse()
        .map_err(|_| RippandaError::InvalidDuration(token.to_string()))?;
    let seconds = match unit.to_ascii_uppercase().as_str() {
        "D" => value.saturating_mul(24 * 60 * 60),
        "H" => value.saturating_mul(60 * 60),
        "M" => value.saturating_mul(60),
        "S" => value,
        other => {
            return Err(RippandaError::InvalidDuration(format!(
                "unknown duration unit {other:?} in {token:?}"
            )));
        }
    };
    Ok(Duration::from_secs(seconds))
}

/// Parse the `-d|--delay` flag: an ISO-8601 *time* part only, e.g. `15S`.
pub fn parse_delay(raw: &str) -> RippandaResult<Duration> {
    parse_duration_token(raw)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub cookies: HashMap<String, String>,
    pub member_id: String,
    pub proxy: Option<(String, u16)>,
    pub base_url: reqwest::Url,
    pub search_url: reqwest::Url,
    pub request_delay: Duration,
    pub update_interval: UpdateInterval,
    pub archive_dirs: Vec<PathBuf>,
    pub success_dir: PathBuf,
    pub skip: HashSet<Element>,
    pub catchup: bool,
    pub verbose: u8,
}

impl Config {
    pub fn writable_archive_dir(&self) -> &PathBuf {
        &self.archive_dirs[0]
    }

    pub fn is_active(&self, element: Element) -> bool {
        !self.skip.contains(&element)
    }
}

/// Derive the site origin (`scheme://host/`) from the `-u|--url` value so
/// relative API/page paths can be joined against it regardless of whether
/// the flag was given a bare search URL or the origin itself.
pub fn derive_base_url(url: &reqwest::Url) -> RippandaResult<reqwest::Url> {
    let mut base = url.clone();
    base.set_path("/");
    base.set_query(None);
    base.set_fragment(None);
    Ok(base)
}

/// Parse the `-c|--cookies` flag value (`k=v; k=v`) into a map, applying
/// the start-of-run cookie normalisation from §6: add `nw=1`, drop
/// `event` and `__cfduid`.
pub fn parse_cookies(raw: &str) -> RippandaResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| RippandaError::InvalidCookies(raw.to_string()))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    map.insert("nw".to_string(), "1".to_string());
    map.remove("event");
    map.remove("__cfduid");
    Ok(map)
}

/// Parse the `-p|--proxy` flag value (`host:port`).
pub fn parse_proxy(raw: &str) -> RippandaResult<(String, u16)> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| RippandaError::Generic(format!("invalid proxy address: {raw:?}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RippandaError::Generic(format!("invalid proxy port: {raw:?}")))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cookie_string_and_normalises() {
        let cookies = parse_cookies("ipb_member_id=42; ipb_pass_hash=abc; event=1").unwrap();
        assert_eq!(cookies.get("ipb_member_id").unwrap(), "42");
        assert_eq!(cookies.get("nw").unwrap(), "1");
        assert!(!cookies.contains_key("event"));
    }

    #[test]
    fn parses_default_update_interval() {
        let interval = UpdateInterval::parse("0D=7D-365D=90D").unwrap();
        assert_eq!(interval.min_threshold, Duration::ZERO);
        assert_eq!(interval.min_duration, days(7));
        assert_eq!(interval.max_threshold, days(365));
        assert_eq!(interval.max_duration, days(90));
    }

    #[test]
    fn rejects_inverted_interval() {
        assert!(UpdateInterval::parse("365D=90D-0D=7D").is_err());
    }

    #[test]
    fn parses_delay() {
        assert_eq!(parse_delay("15S").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn parses_proxy_address() {
        assert_eq!(
            parse_proxy("127.0.0.1:1080").unwrap(),
            ("127.0.0.1".to_string(), 1080)
        );
    }
}
