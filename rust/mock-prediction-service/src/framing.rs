use std::cmp;
use std::io;

use bytes::{Buf, BytesMut};

use futures::StreamExt;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use tokio_util::codec::{Decoder, FramedRead};

use thiserror::Error;

use tracing::{debug, trace};

use crate::config::{FramingConfig, FramingMode};

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("request exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("connection closed without a request")]
    Empty,

    #[error("no data received after {0} retries")]
    Quiet(usize),
}

/// A [`Decoder`] that splits newline terminated requests.
///
/// At end of stream any pending bytes are returned as the last frame,
/// so a sender may also terminate a request by closing its side.
pub struct LineFrameCodec {
    /// The maximum length of a frame, excluding the newline.
    max_length: usize,

    /// Index of the next byte to examine for a `\n`.
    next_index: usize,
}

impl LineFrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_length: usize::MAX,
            next_index: 0,
        }
    }

    #[must_use]
    pub fn new_with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineFrameCodec {
    type Item = BytesMut;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = cmp::min(self.max_length.saturating_add(1), src.len());

        let newline_offset = src[self.next_index..read_to]
            .iter()
            .position(|b| *b == b'\n');

        match newline_offset {
            Some(offset) => {
                let newline_index = offset + self.next_index;
                self.next_index = 0;

                let mut frame = src.split_to(newline_index + 1);
                frame.truncate(newline_index);
                if frame.last() == Some(&b'\r') {
                    frame.truncate(newline_index - 1);
                }

                Ok(Some(frame))
            }

            None if src.len() > self.max_length => {
                self.next_index = 0;
                src.advance(src.len());
                Err(FramingError::FrameTooLarge(self.max_length))
            }

            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                self.next_index = 0;
                Ok(Some(src.split()))
            }
        }
    }
}

/// Read one request from `reader` using the configured framing.
///
/// # Errors
/// * Socket errors, oversized requests, connections closed before
///   sending anything.
pub async fn read_request<R>(reader: R, config: &FramingConfig) -> Result<BytesMut, FramingError>
where
    R: AsyncRead + Unpin,
{
    match config.mode {
        FramingMode::Line => read_line(reader, config).await,
        FramingMode::Quiescence => read_until_quiet(reader, config).await,
    }
}

async fn read_line<R>(reader: R, config: &FramingConfig) -> Result<BytesMut, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::with_capacity(
        reader,
        LineFrameCodec::new_with_max_length(config.max_request_bytes),
        config.buffer_size,
    );

    frames.next().await.ok_or(FramingError::Empty)?
}

/// Keep reading until nothing arrives for a wait interval and what was
/// received parses as JSON. After `max_retries` quiet intervals the
/// buffer is returned as it is.
async fn read_until_quiet<R>(
    mut reader: R,
    config: &FramingConfig,
) -> Result<BytesMut, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(config.buffer_size);
    let mut chunk = vec![0; config.buffer_size];
    let mut retries = 0;

    loop {
        match timeout(config.wait_interval, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                debug!("end of stream after {} bytes", buffer.len());
                return if buffer.is_empty() {
                    Err(FramingError::Empty)
                } else {
                    Ok(buffer)
                };
            }

            Ok(Ok(n)) => {
                trace!("read {n} bytes");
                if buffer.len() + n > config.max_request_bytes {
                    return Err(FramingError::FrameTooLarge(config.max_request_bytes));
                }
                buffer.extend_from_slice(&chunk[..n]);
                retries = 0;
            }

            Ok(Err(err)) => return Err(err.into()),

            Err(_) => {
                if !buffer.is_empty() && is_complete(&buffer) {
                    return Ok(buffer);
                }

                retries += 1;
                debug!("quiet, retry {retries}/{}", config.max_retries);
                if retries > config.max_retries {
                    return if buffer.is_empty() {
                        Err(FramingError::Quiet(config.max_retries))
                    } else {
                        Ok(buffer)
                    };
                }
            }
        }
    }
}

fn is_complete(buffer: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(buffer).is_ok()
}
