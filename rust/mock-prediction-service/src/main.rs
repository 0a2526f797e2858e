use std::time::Duration;

use clap::Parser;

use tracing::info;

use mock_prediction_service::callback::TcpConnector;
use mock_prediction_service::config::{self, Config, FramingConfig, FramingMode};
use mock_prediction_service::predictor::Predictor;
use mock_prediction_service::{bind, init_tracing_subscriber, run};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = config::DEFAULT_ADDRESS)]
    address: String,

    #[arg(long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of pending connections.
    #[arg(
        long,
        default_value_t = config::DEFAULT_BACKLOG,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    backlog: u32,

    /// Bytes requested per read.
    #[arg(
        long,
        default_value_t = config::DEFAULT_BUFFER_SIZE as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    buffer_size: u64,

    /// 0 warn, 1 info, 2 debug, 3 trace.
    #[arg(long, default_value_t = config::DEFAULT_VERBOSITY)]
    verbosity: u8,

    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = FramingMode::Line)]
    framing: FramingMode,

    /// Quiet period before trying to parse, quiescence framing only.
    #[arg(
        long,
        default_value_t = config::DEFAULT_WAIT_INTERVAL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    wait_interval_ms: u64,

    /// Quiet periods tolerated before giving up, quiescence framing only.
    #[arg(long, default_value_t = config::DEFAULT_MAX_RETRIES)]
    max_retries: usize,

    #[arg(
        long,
        default_value_t = config::DEFAULT_MAX_REQUEST_BYTES as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    max_request_bytes: u64,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let config = Config {
            address: args.address,
            port: args.port,
            backlog: args.backlog,
            verbosity: args.verbosity,
            seed: args.seed,
            framing: FramingConfig {
                mode: args.framing,
                buffer_size: usize::try_from(args.buffer_size)?,
                max_request_bytes: usize::try_from(args.max_request_bytes)?,
                wait_interval: Duration::from_millis(args.wait_interval_ms),
                max_retries: args.max_retries,
            },
        };
        config.validate()?;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::try_from(Args::parse())?;

    init_tracing_subscriber(config.level_filter());

    info!("start: {config:?}");

    let listener = bind(&config.address, config.port, config.backlog).await?;

    run(
        listener,
        config.framing,
        Predictor::from_seed(config.seed),
        TcpConnector,
    )
    .await;

    Ok(())
}
