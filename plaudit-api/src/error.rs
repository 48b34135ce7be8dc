use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("content is empty")]
    Empty,

    #[error("null byte in string is not allowed")]
    NullByte,

    #[error("content is {len} characters long, max is {max}")]
    TooLong { len: usize, max: usize },
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationError),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Malformed server payload: {0}")]
    Malformed(String),
}

impl Error {
    /// Whether re-issuing the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::Network(msg) => json!({
                "message": msg,
                "type": "network",
            }),
            Error::Conflict(msg) => json!({
                "message": msg,
                "type": "conflict",
            }),
            Error::Validation(ValidationError::Empty) => json!({
                "message": "content is empty",
                "type": "validation-empty",
            }),
            Error::Validation(ValidationError::NullByte) => json!({
                "message": "there was a null byte in argument string",
                "type": "validation-null-byte",
            }),
            Error::Validation(ValidationError::TooLong { len, max }) => json!({
                "message": "content is too long",
                "type": "validation-too-long",
                "len": len,
                "max": max,
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::Malformed(msg) => json!({
                "message": msg,
                "type": "malformed",
            }),
        })
        .expect("serializing error")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let message = || {
            String::from(
                data.get("message")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or(""),
            )
        };
        let usize_field = |name: &str| {
            data.get(name)
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .ok_or_else(|| anyhow!("validation-too-long error without a proper {name}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(message()),
                "network" => Error::Network(message()),
                "conflict" => Error::Conflict(message()),
                "validation-empty" => Error::Validation(ValidationError::Empty),
                "validation-null-byte" => Error::Validation(ValidationError::NullByte),
                "validation-too-long" => Error::Validation(ValidationError::TooLong {
                    len: usize_field("len")?,
                    max: usize_field("max")?,
                }),
                "permission-denied" => Error::PermissionDenied,
                "malformed" => Error::Malformed(message()),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }

    /// Like `parse`, but never fails: an unreadable error body is itself a
    /// malformed payload
    pub fn from_body(body: &[u8]) -> Error {
        Error::parse(body).unwrap_or_else(|err| Error::Malformed(format!("{err:#}")))
    }
}
