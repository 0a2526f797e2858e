use std::future::Future;
use std::io;

use futures::SinkExt;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use tokio_util::codec::FramedWrite;

use thiserror::Error;

use tracing::{debug, instrument};

use crate::protocol::{CallbackAddress, PredictionResult, ResultCodec};

#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("cannot connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot write to {address}: {source}")]
    Write {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Opens the outbound connection a result is written to.
pub trait Connector {
    type Stream: AsyncWrite + Unpin + Send;

    /// # Errors
    fn connect(
        &mut self,
        address: &CallbackAddress,
    ) -> impl Future<Output = Result<Self::Stream, io::Error>> + Send;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self, address: &CallbackAddress) -> Result<Self::Stream, io::Error> {
        TcpStream::connect((address.host(), address.port())).await
    }
}

/// Deliver `result` on a fresh connection to `address`, then close it.
///
/// There is no acknowledgement and no retry.
///
/// # Errors
/// * Connection or write failures.
#[instrument(skip(connector, address), fields(address = %address))]
pub async fn deliver<C: Connector>(
    connector: &mut C,
    address: &CallbackAddress,
    result: PredictionResult,
) -> Result<(), CallbackError> {
    let write_error = |source: io::Error| CallbackError::Write {
        address: address.to_string(),
        source,
    };

    let stream = connector
        .connect(address)
        .await
        .map_err(|source| CallbackError::Connect {
            address: address.to_string(),
            source,
        })?;

    debug!("connected");

    let mut write = FramedWrite::new(stream, ResultCodec::new());
    write.send(result).await.map_err(write_error)?;

    let mut stream = write.into_inner();
    stream.shutdown().await.map_err(write_error)?;

    debug!("delivered");

    Ok(())
}
