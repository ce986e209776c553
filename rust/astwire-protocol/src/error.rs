use std::io;

use thiserror::Error;

/// Failure to decode one record from a byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("short read on {field}: expect {expected} bytes but got {actual}")]
    ShortRead {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("unknown {field} tag {value}")]
    UnknownTag { field: &'static str, value: u8 },

    #[error("I/O error reading {field}: {message}")]
    Io {
        field: &'static str,
        kind: io::ErrorKind,
        message: String,
    },
}

impl CodecError {
    pub(crate) fn io(field: &'static str, err: io::Error) -> Self {
        CodecError::Io {
            field,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Why a stream channel closed. Every waiter on the channel receives a clone
/// of the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peer finished cleanly. Not a failure.
    #[error("Connection closed")]
    Eof,

    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("stream {0} not found")]
    StreamNotFound(u64),

    #[error("Generator decoder error: {0}")]
    Decoder(String),

    #[error("Unsupported protocol version {actual} (expected {expected})")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Generator exited with {0}")]
    ProcessExited(String),

    #[error("Failed to start generator: {0}")]
    Spawn(String),
}

impl ProtocolError {
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Eof)
    }
}

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Failed to run generator: {0}")]
    Io(#[from] io::Error),

    #[error("Generator spec query exited with {status}: {stderr}")]
    QueryFailed { status: String, stderr: String },

    #[error("Invalid generator spec JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(&'static str),

    #[error("too many outputs: expect {expected} but got {actual}")]
    TooManyOutputs { expected: usize, actual: usize },
}
