use std::{
    backtrace::{Backtrace, BacktraceStatus},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Result;
use clap::Parser;
use relayer::{
    cfg::Config,
    client::{connect_destination, connect_source},
    metrics::{RelayMetrics, install_otlp_exporter},
    relay::Relayer,
    source::SourceWatcher,
    store::ProcessedStore,
};
use tokio::{select, sync::mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// TOML configuration file. Skipped if it doesn't exist; every setting can also come from the
    /// environment.
    #[clap(long, short, default_value = "relayer.toml")]
    config_file: PathBuf,
    #[clap(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Loaded first so that `RUST_LOG` can be set from the file.
    let dotenv = dotenvy::dotenv();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_ansi(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Set a panic hook that records the panic as a `tracing` event at the `ERROR` verbosity level.
    std::panic::set_hook(Box::new(|panic| {
        let message = match panic.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");

        let backtrace = Backtrace::capture();
        let backtrace =
            (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string());

        match (panic.location(), backtrace) {
            (None, None) => {
                tracing::error!(thread_name, message);
            }
            (None, Some(backtrace)) => {
                tracing::error!(thread_name, message, %backtrace);
            }
            (Some(location), None) => {
                tracing::error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                );
            }
            (Some(location), Some(backtrace)) => {
                tracing::error!(
                    thread_name,
                    message,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                    %backtrace,
                );
            }
        }
    }));

    match dotenv {
        Ok(path) => info!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("failed to load .env file: {e}"),
    }
    let config = Config::load(Some(&args.config_file), |var| std::env::var(var).ok())?;
    info!(?config, "starting relayer");

    let meter_provider = match &config.otlp_collector_endpoint {
        Some(endpoint) => Some(install_otlp_exporter(endpoint)?),
        None => None,
    };
    let metrics = RelayMetrics::new();

    let source = Arc::new(connect_source(&config).await?);
    let destination = Arc::new(connect_destination(&config).await?);
    let store = ProcessedStore::open(&config.db_path, config.dead_letter_path.clone())?;

    let (sender, receiver) = mpsc::unbounded_channel();
    let mut watcher = SourceWatcher::new(
        source.clone(),
        config.source_bridge,
        sender,
        metrics.clone(),
    );
    let relayer = Arc::new(Relayer::new(&config, source, destination, store.clone(), metrics));
    let mut dispatcher = tokio::spawn(relayer.dispatch(receiver));

    let result = select! {
        result = watcher.start() => result,
        result = &mut dispatcher => result.map_err(Into::into),
        result = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            result.map_err(Into::into)
        }
    };
    dispatcher.abort();

    if let Err(e) = store.flush().await {
        error!("failed to flush processed message store: {e:#}");
    }
    if let Some(provider) = meter_provider {
        if let Err(e) = provider.shutdown() {
            warn!("failed to shut down metrics exporter: {e}");
        }
    }

    result
}
