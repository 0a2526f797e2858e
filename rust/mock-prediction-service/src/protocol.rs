use std::fmt;
use std::io;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use tokio_util::codec::Encoder;

use thiserror::Error;

use serde_json::Value;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("field not found: {0}")]
    FieldNotFound(&'static str),

    #[error("invalid field type: {0}")]
    InvalidFieldType(&'static str),

    #[error("unknown request type: {0}")]
    UnknownKind(String),

    #[error("unknown class type: {0}")]
    UnknownValueKind(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// A request that could not be accepted.
///
/// `callback` is set when the address field was valid, so the error
/// can still be reported there.
#[derive(Error, Debug)]
#[error("malformed request: {error}")]
pub struct Rejected {
    pub callback: Option<CallbackAddress>,
    #[source]
    pub error: RequestError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Train,
    Classify,
    Distribution,
}

impl FromStr for RequestKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "classify" => Ok(Self::Classify),
            "distribution" => Ok(Self::Distribution),
            _ => Err(RequestError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Numeric,
    Nominal,
}

impl FromStr for ValueKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "numeric" => Ok(Self::Numeric),
            "nominal" => Ok(Self::Nominal),
            _ => Err(RequestError::UnknownValueKind(s.to_string())),
        }
    }
}

/// The `host:port` endpoint a result is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAddress {
    host: String,
    port: u16,
}

impl CallbackAddress {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for CallbackAddress {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) if !host.is_empty() => Ok(Self {
                host: host.to_string(),
                port: port
                    .parse()
                    .map_err(|_| RequestError::InvalidAddress(s.to_string()))?,
            }),
            _ => Err(RequestError::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for CallbackAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(fmt, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub kind: RequestKind,
    pub value_kind: ValueKind,
    pub class_labels: Option<Vec<String>>,
    pub callback: CallbackAddress,
}

impl InferenceRequest {
    /// Number of classes, 1 when no labels are given.
    #[must_use]
    pub fn class_cardinality(&self) -> usize {
        self.class_labels.as_ref().map_or(1, Vec::len)
    }
}

/// Decode one request frame.
///
/// The address is checked before anything else so that a rejected
/// request can still be answered when it carries a usable address.
///
/// # Errors
/// * Invalid JSON, missing or invalid fields.
pub fn decode_request(data: &[u8]) -> Result<InferenceRequest, Rejected> {
    let value: Value = serde_json::from_slice(data).map_err(|err| Rejected {
        callback: None,
        error: err.into(),
    })?;

    let callback = decode_address(&value).map_err(|error| Rejected {
        callback: None,
        error,
    })?;

    decode_body(&value, callback.clone()).map_err(|error| Rejected {
        callback: Some(callback),
        error,
    })
}

fn decode_address(value: &Value) -> Result<CallbackAddress, RequestError> {
    match value.get("address") {
        Some(Value::String(address)) => address.parse(),
        Some(_) => Err(RequestError::InvalidFieldType("address")),
        None => Err(RequestError::FieldNotFound("address")),
    }
}

fn decode_body(value: &Value, callback: CallbackAddress) -> Result<InferenceRequest, RequestError> {
    let kind = match value.get("type") {
        Some(Value::String(v)) => v.parse()?,
        Some(_) => return Err(RequestError::InvalidFieldType("type")),
        None => return Err(RequestError::FieldNotFound("type")),
    };

    let value_kind = match value.get("class_type") {
        Some(Value::String(v)) => v.parse()?,
        Some(_) => return Err(RequestError::InvalidFieldType("class_type")),
        None => return Err(RequestError::FieldNotFound("class_type")),
    };

    let class_labels = match value.get("class_labels") {
        None | Some(Value::Null) => None,
        Some(labels) => Some(
            serde_json::from_value(labels.clone())
                .map_err(|_| RequestError::InvalidFieldType("class_labels"))?,
        ),
    };

    Ok(InferenceRequest {
        kind,
        value_kind,
        class_labels,
        callback,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification {
    Value(f64),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictionResult {
    Trained,
    Classification(Classification),
    Distribution(Vec<f64>),
    Error(String),
}

impl PredictionResult {
    pub fn error(description: impl fmt::Display) -> Self {
        Self::Error(description.to_string())
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// An [`Encoder`] writing a [`PredictionResult`] as one line.
///
/// The error result carries bare `NaN` tokens, which strict JSON does
/// not allow, so it is written by hand.
#[derive(Debug, Default)]
pub struct ResultCodec;

impl ResultCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<PredictionResult> for ResultCodec {
    type Error = io::Error;

    fn encode(&mut self, result: PredictionResult, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = match result {
            PredictionResult::Trained => serde_json::to_vec(&serde_json::json!({
                "message": null,
            })),

            PredictionResult::Classification(Classification::Value(v)) => {
                serde_json::to_vec(&serde_json::json!({
                    "classification": v,
                }))
            }

            PredictionResult::Classification(Classification::Index(i)) => {
                serde_json::to_vec(&serde_json::json!({
                    "classification": i,
                }))
            }

            PredictionResult::Distribution(distribution) => {
                serde_json::to_vec(&serde_json::json!({
                    "distribution": distribution,
                }))
            }

            PredictionResult::Error(description) => {
                serde_json::to_string(&description).map(|description| {
                    format!(
                        r#"{{"classification":NaN,"distribution":[NaN],"error":{description}}}"#
                    )
                    .into_bytes()
                })
            }
        };

        let data = data.map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        dst.reserve(data.len() + 1);
        dst.put(&*data);
        dst.put_u8(b'\n');

        Ok(())
    }
}
