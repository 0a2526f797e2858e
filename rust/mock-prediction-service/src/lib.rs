#![doc = include_str!("../README.md")]

use std::io;

use parking_lot::Once;

use rand::Rng;

use thiserror::Error;

use tokio::io::AsyncRead;
use tokio::net::{lookup_host, TcpListener, TcpSocket};

use tracing::level_filters::LevelFilter;
use tracing::{debug, info, instrument, trace, warn};

pub mod callback;
pub mod config;
pub mod framing;
pub mod predictor;
pub mod protocol;

use callback::{CallbackError, Connector};
use config::FramingConfig;
use framing::FramingError;
use predictor::Predictor;
use protocol::{PredictionResult, Rejected};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot listen on {address}: {source}")]
    Startup {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error(transparent)]
    MalformedRequest(#[from] Rejected),

    #[error("callback error: {0}")]
    Callback(#[from] CallbackError),
}

pub fn init_tracing_subscriber(max_level: LevelFilter) {
    static TRACING_SUBSCRIBER_INIT: Once = Once::new();
    TRACING_SUBSCRIBER_INIT.call_once(|| {
        tracing_subscriber::fmt().with_max_level(max_level).init();
    });
}

/// Bind the listening socket with an explicit backlog.
///
/// # Errors
/// * Address resolution or bind failure.
pub async fn bind(address: &str, port: u16, backlog: u32) -> Result<TcpListener, Error> {
    let startup_error = |source: io::Error| Error::Startup {
        address: format!("{address}:{port}"),
        source,
    };

    let addr = lookup_host((address, port))
        .await
        .map_err(startup_error)?
        .next()
        .ok_or_else(|| {
            startup_error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no address resolved",
            ))
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(startup_error)?;

    socket.set_reuseaddr(true).map_err(startup_error)?;
    socket.bind(addr).map_err(startup_error)?;

    socket.listen(backlog).map_err(startup_error)
}

/// Run the accept loop.
///
/// Connections are handled one at a time, in arrival order: the next
/// one is accepted only after the current result has been delivered.
/// Failures are logged and never stop the loop.
#[instrument(skip(listener, framing, predictor, connector))]
pub async fn run<R, C>(
    listener: TcpListener,
    framing: FramingConfig,
    mut predictor: Predictor<R>,
    mut connector: C,
) where
    R: Rng + Send,
    C: Connector + Send,
{
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(r) => r,
            Err(err) => {
                warn!("accept error: {err}");
                continue;
            }
        };

        info!("remote: {remote_addr:?}");

        if let Err(err) = handle_connection(stream, &framing, &mut predictor, &mut connector).await
        {
            warn!("{remote_addr}: {err}");
        }
    }
}

/// Read one request, predict, and deliver the result to the callback
/// address. Nothing is written on the inbound stream.
///
/// # Errors
/// * Read failures, requests without a usable callback address,
///   delivery failures.
#[instrument(skip_all)]
pub async fn handle_connection<S, R, C>(
    stream: S,
    framing: &FramingConfig,
    predictor: &mut Predictor<R>,
    connector: &mut C,
) -> Result<(), Error>
where
    S: AsyncRead + Unpin,
    R: Rng,
    C: Connector,
{
    debug!("start");

    let frame = framing::read_request(stream, framing).await?;

    trace!("raw request: {}", String::from_utf8_lossy(&frame));

    let (callback, result) = match protocol::decode_request(&frame) {
        Ok(request) => {
            debug!("request: {request:?}");
            let result = predictor.predict(&request);
            (request.callback, result)
        }

        Err(Rejected {
            callback: Some(callback),
            error,
        }) => {
            warn!("malformed request: {error}");
            (callback, PredictionResult::error(error))
        }

        Err(rejected) => return Err(rejected.into()),
    };

    debug!("callback: {callback} result: {result:?}");

    callback::deliver(connector, &callback, result).await?;

    debug!("end");

    Ok(())
}
