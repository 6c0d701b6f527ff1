use std::io::stderr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use eigerstream::config::Settings;
use eigerstream::stream::{CbfConverter, StreamReceiver, ZmqSource};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Archive an X-ray detector's image stream as miniCBF files.
///
/// Connects to the detector control unit's push socket and writes one
/// `<series>-<frame>.cbf` file per diffraction frame. SIGINT or SIGTERM
/// requests a shutdown that completes after the current image series; a
/// second signal terminates immediately.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(
        short = 'c',
        long = "config",
        default_value = "/etc/bigpicture/config.json",
        value_name = "config_file"
    )]
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        // Usage output always exits nonzero so wrapper scripts cannot
        // mistake it for a clean daemon run.
        std::process::exit(if err.use_stderr() { 2 } else { 1 });
    });

    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_env("EIGERSTREAM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_file(&cli.config)
        .with_context(|| format!("loading {:?}", cli.config))?;
    info!(
        endpoint = %settings.endpoint,
        recv_buffer = settings.recv_buffer_len,
        poll_interval_secs = settings.poll_interval.as_secs(),
        workers = settings.io_threads,
        "initialized archiver"
    );

    let converter = CbfConverter::new(
        settings.using_header_appendix,
        settings.using_image_appendix,
    )
    .with_output_dir(&settings.output_dir);
    let mut receiver = StreamReceiver::new(converter)
        .with_poll_interval(settings.poll_interval)
        .with_recv_buffer_len(settings.recv_buffer_len);

    // First signal requests cooperative shutdown; the conditional handler is
    // registered first so a second signal, seeing the flag already set,
    // terminates the process.
    let shutdown = receiver.shutdown_flag();
    for sig in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&shutdown))
            .context("registering forced-shutdown handler")?;
        flag::register(sig, Arc::clone(&shutdown)).context("registering shutdown handler")?;
    }

    let mut source = ZmqSource::connect(&settings.endpoint, settings.io_threads)
        .with_context(|| format!("connecting to {}", settings.endpoint))?;
    receiver.run(&mut source)?;

    info!("done");
    Ok(())
}
