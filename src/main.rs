use std::path::PathBuf;

use clap::Parser;

mod config;
mod element;
mod error;
mod gallery;
mod http_client;
mod interrupt;
mod logging;
mod orchestrator;
mod progress;
mod success;
mod writer;

use crate::config::{derive_base_url, parse_cookies, parse_delay, parse_proxy, Config, Element, Mode, UpdateInterval};
use crate::error::{RippandaError, RippandaResult};
use crate::http_client::HttpClient;

/// Archival agent for panda-family image-gallery sites.
#[derive(Debug, Parser)]
#[command(name = "rippanda", version, about)]
struct Cli {
    /// Gallery site cookies, `k=v; k=v`. Must include `ipb_member_id`.
    #[arg(short = 'c', long = "cookies")]
    cookies: String,

    /// SOCKS5 proxy address, `host:port`.
    #[arg(short = 'p', long = "proxy")]
    proxy: Option<String>,

    /// Base or search URL.
    #[arg(short = 'u', long = "url")]
    url: String,

    /// Delay between requests, ISO-8601 time part (e.g. `15S`).
    #[arg(short = 'd', long = "delay", default_value = "15S")]
    delay: String,

    /// Update threshold interpolation table, `minT=minD-maxT=maxD`.
    #[arg(short = 'i', long = "update-interval", default_value = "0D=7D-365D=90D")]
    update_interval: String,

    /// Archive directory; repeatable, first is the writable primary.
    #[arg(short = 'a', long = "archive-dir", required = true)]
    archive_dir: Vec<PathBuf>,

    /// Directory holding success ledgers.
    #[arg(short = 's', long = "success-dir")]
    success_dir: PathBuf,

    /// Element to skip; repeatable.
    #[arg(short = 'e', long = "skip", value_enum)]
    skip: Vec<Element>,

    /// In DOWNLOAD mode, stop a page early once every gallery on it is
    /// already archived.
    #[arg(short = 't', long = "catchup")]
    catchup: bool,

    /// Verbosity, 1-7.
    #[arg(short = 'v', long = "verbose", default_value_t = 1)]
    verbose: u8,

    /// download | update | cleanup (case-insensitive).
    #[arg(value_enum, ignore_case = true, default_value_t = Mode::Download)]
    mode: Mode,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    interrupt::install_handler();

    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(RippandaError::Interrupted) => {
            tracing::warn!("interrupted");
            std::process::exit(130);
        }
        Err(err) => {
            tracing::error!(error = %err, "rippanda failed");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> RippandaResult<()> {
    let config = build_config(cli)?;
    let client = HttpClient::new(&config)?;
    let archivers: Vec<Box<dyn element::ElementArchiver>> = element::registry()
        .into_iter()
        .filter(|archiver| config.is_active(archiver.element()))
        .collect();

    match config.mode {
        Mode::Download => orchestrator::download::run(&config, &client, &archivers),
        Mode::Update => orchestrator::update::run(&config, &client, &archivers),
        Mode::Cleanup => orchestrator::cleanup::run(&config),
    }
}

fn build_config(cli: Cli) -> RippandaResult<Config> {
    let cookies = parse_cookies(&cli.cookies)?;
    let member_id = cookies
        .get("ipb_member_id")
        .cloned()
        .ok_or(RippandaError::MissingMemberId)?;

    let proxy = cli.proxy.as_deref().map(parse_proxy).transpose()?;
    let search_url = reqwest::Url::parse(&cli.url)
        .map_err(|err| RippandaError::Generic(format!("invalid --url {:?}: {err}", cli.url)))?;
    let base_url = derive_base_url(&search_url)?;

    let request_delay = parse_delay(&cli.delay)?;
    let update_interval = UpdateInterval::parse(&cli.update_interval)?;

    if cli.archive_dir.is_empty() {
        return Err(RippandaError::Generic(
            "at least one --archive-dir is required".to_string(),
        ));
    }
    std::fs::create_dir_all(&cli.archive_dir[0])?;
    std::fs::create_dir_all(&cli.success_dir)?;

    Ok(Config {
        mode: cli.mode,
        cookies,
        member_id,
        proxy,
        base_url,
        search_url,
        request_delay,
        update_interval,
        archive_dirs: cli.archive_dir,
        success_dir: cli.success_dir,
        skip: cli.skip.into_iter().collect(),
        catchup: cli.catchup,
        verbose: cli.verbose,
    })
}
