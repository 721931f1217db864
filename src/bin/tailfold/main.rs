// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use tailfold::init::args::TailArgs;
use tailfold::init::wait;
use tailfold::sink::WriterSink;
use tailfold::{TailConfig, TailSource};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "tailfold")]
#[command(bin_name = "tailfold")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "TAILFOLD_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    tail: TailArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(opt.tail) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Tail source failed.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(args: TailArgs) -> Result<(), BoxError> {
    let config = TailConfig::from(args);
    // The source bounds its own shutdown steps, this only guards against a hang
    let shutdown_timeout = config.shutdown_timeout * 2;

    let source = TailSource::new(config, Arc::new(WriterSink::stdout()))?;
    let _watcher = source.native_watcher()?;
    let stats = source.stats();

    let mut tasks = JoinSet::new();
    let cancel_token = CancellationToken::new();
    source.start(&mut tasks, &cancel_token);

    select! {
        res = signal_wait() => {
            res?;
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut tasks) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of tail source."),
                Err(e) => return Err(e.into()),
            }
        },
    }

    wait::wait_for_tasks_with_timeout(&mut tasks, shutdown_timeout).await?;

    let counters = stats.snapshot();
    info!(
        lines_read = counters.lines_read,
        lines_discarded = counters.lines_discarded,
        events_delivered = counters.events_delivered,
        batches_delivered = counters.batches_delivered,
        entries_reaped = counters.entries_reaped,
        "Tail source stopped."
    );
    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    // Events go to stdout, so logs go to stderr
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("notify=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

async fn signal_wait() -> std::io::Result<()> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
