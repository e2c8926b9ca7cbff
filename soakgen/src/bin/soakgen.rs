use std::{
    env,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::PrometheusBuilder;
use soakgen::{
    config::{Config, DEFAULT_RATE, DEFAULT_RECORD_SIZE_BYTES, Telemetry},
    scheduler::Scheduler,
    sink::{self, Output, file, socket},
};
use soakgen_payload::RecordDistribution;
use soakgen_throttle::{Clock, RealClock};
use tokio::{runtime::Builder, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load soakgen config: {0}")]
    Config(#[from] soakgen::config::Error),
    #[error("Record distribution error: {0}")]
    Payload(#[from] soakgen_payload::Error),
    #[error("Sink error: {0}")]
    Sink(#[from] sink::Error),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] soakgen::scheduler::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate records until the count is reached or forever
    Run(Box<RunArgs>),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WriteType {
    /// Write to the forward socket of the logging agent
    Socket,
    /// Write to a file the logging agent tails
    File,
}

#[derive(Args)]
struct RunArgs {
    /// path on disk to a YAML configuration file, overrides every other flag
    /// except `--prometheus-addr`
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// the size of each log entry in bytes
    #[clap(long, default_value_t = DEFAULT_RECORD_SIZE_BYTES)]
    log_size_in_bytes: NonZeroUsize,
    /// the number of log entries per second
    #[clap(long, default_value_t = DEFAULT_RATE)]
    log_rate: NonZeroU32,
    /// the number of seconds to sleep between each retry when the forward
    /// socket cannot be reached
    #[clap(long, default_value_t = 1)]
    retry_sleep_seconds: u64,
    /// the method by which logs are picked up by the logging agent, "socket"
    /// for forward and "file" for tail
    #[clap(long, value_enum, default_value_t = WriteType::Socket)]
    log_write_type: WriteType,
    /// the address of the forward listener
    #[clap(long, default_value_t = socket::DEFAULT_FORWARD_ADDR)]
    forward_addr: SocketAddr,
    /// the file logs are written to
    #[clap(long, default_value = "tail_log")]
    file_path: PathBuf,
    /// the maximum number of log lines written to the file before rotating it
    #[clap(long, default_value_t = 50_000_000)]
    file_log_limit: u64,
    /// how many logs to send, if not positive send indefinitely
    #[clap(long, default_value_t = -1, allow_negative_numbers = true)]
    count: i64,
    /// address to bind prometheus exporter to
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
}

#[derive(Args)]
struct ConfigCheckArgs {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: PathBuf,
}

fn get_config(args: &RunArgs) -> Result<Config, Error> {
    let mut config = if let Ok(env_var_value) = env::var("SOAKGEN_CONFIG") {
        debug!("Using config from env var 'SOAKGEN_CONFIG'");
        Config::try_from_yaml(&env_var_value)?
    } else if let Some(path) = &args.config_path {
        debug!("Attempting to open configuration file at: {}", path.display());
        Config::load(path)?
    } else {
        config_from_flags(args)
    };

    if let Some(addr) = args.prometheus_addr {
        config.telemetry = Some(Telemetry::Prometheus { addr });
    }
    Ok(config)
}

fn config_from_flags(args: &RunArgs) -> Config {
    let sink = match args.log_write_type {
        WriteType::File => sink::Config::File(file::Config {
            path: args.file_path.clone(),
            rotation_line_limit: args.file_log_limit,
        }),
        WriteType::Socket => sink::Config::Socket(socket::Config {
            addr: args.forward_addr,
            retry_delay_seconds: args.retry_sleep_seconds,
        }),
    };
    Config {
        record_size_bytes: args.log_size_in_bytes,
        rate: args.log_rate,
        count: args.count,
        sink,
        telemetry: None,
    }
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let (shutdown_watcher, shutdown_broadcast) = soakgen_signal::signal();

    if let Some(Telemetry::Prometheus { addr }) = config.telemetry {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Serving prometheus metrics at {addr}.");
    }

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c");
                shutdown_broadcast.signal();
            }
            Err(err) => error!("Unable to listen for ctrl-c: {err}"),
        }
    });

    let clock = RealClock;
    let distribution =
        RecordDistribution::new(config.record_size_bytes, config.rate, clock.now())?;
    info!(
        tag = distribution.tag(),
        start = distribution.start().as_secs(),
        "Record distribution anchored."
    );
    let output = Output::new(&config.sink, clock, shutdown_watcher.clone()).await?;

    let mut scheduler = Scheduler::new(distribution, output, clock, shutdown_watcher);
    let emitted = scheduler.run(config.count_limit()).await?;
    info!("Emitted {emitted} records.");
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting soakgen {version} run.");

    let args = match Cli::parse().command {
        Commands::Run(args) => args,
        Commands::ConfigCheck(args) => match Config::load(&args.config_path) {
            Ok(_) => {
                info!("Configuration file is valid");
                std::process::exit(0)
            }
            Err(err) => {
                error!("Configuration validation failed: {err}");
                std::process::exit(1)
            }
        },
    };
    let config = get_config(&args)?;
    info!("Parsed config: {config:?}");

    // One thread drives every record, sleeping and retrying in place.
    let runtime = Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    if let Err(ref err) = res {
        error!("soakgen failed: {err}");
    }
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use soakgen::{
        config::{DEFAULT_RATE, DEFAULT_RECORD_SIZE_BYTES},
        sink::{self, file, socket},
    };

    use super::{Cli, Commands, config_from_flags};

    fn run_args(args: &[&str]) -> Box<super::RunArgs> {
        match Cli::parse_from(args.iter().copied()).command {
            Commands::Run(args) => args,
            Commands::ConfigCheck(_) => panic!("expected run"),
        }
    }

    #[test]
    fn flags_default_to_unbounded_socket() {
        let config = config_from_flags(&run_args(&["soakgen", "run"]));
        assert_eq!(config.record_size_bytes, DEFAULT_RECORD_SIZE_BYTES);
        assert_eq!(config.rate, DEFAULT_RATE);
        assert_eq!(config.count_limit(), None);
        assert_eq!(config.sink, sink::Config::Socket(socket::Config::default()));
    }

    #[test]
    fn flags_select_file_sink() {
        let args = run_args(&[
            "soakgen",
            "run",
            "--log-write-type",
            "file",
            "--file-path",
            "/tmp/soak",
            "--file-log-limit",
            "5",
            "--log-size-in-bytes",
            "200",
            "--log-rate",
            "50",
            "--count",
            "20",
        ]);
        let config = config_from_flags(&args);
        assert_eq!(config.record_size_bytes.get(), 200);
        assert_eq!(config.rate.get(), 50);
        assert_eq!(config.count_limit().map(std::num::NonZeroU64::get), Some(20));
        assert_eq!(
            config.sink,
            sink::Config::File(file::Config {
                path: "/tmp/soak".into(),
                rotation_line_limit: 5,
            })
        );
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(Cli::try_parse_from(["soakgen", "run", "--log-rate", "0"]).is_err());
    }

    #[test]
    fn negative_count_is_accepted() {
        let config = config_from_flags(&run_args(&["soakgen", "run", "--count", "-5"]));
        assert_eq!(config.count, -5);
        assert_eq!(config.count_limit(), None);
    }
}
