use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber from the `-v|--verbose` count
/// (1-7, §6). `RUST_LOG` always wins when set, matching the rest of the
/// ecosystem's convention.
pub fn init_logging(verbosity: u8) {
    let directive = match verbosity {
        0 | 1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        5 => "rippanda=trace,info",
        6 => "rippanda=trace,debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .try_init();
}
