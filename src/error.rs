//! Error handling utils.
//!
//! Most of the failure modes this crate can produce are either transient I/O
//! errors (logged and recovered from locally) or connection errors that
//! unwind a single per-connection fiber without affecting the server.
//! Programmer errors — destroying a live fiber, resetting a fiber that
//! hasn't terminated, re-arming an already armed fd/event pair — are
//! deliberately *not* representable as [`Error`] variants: they are bugs
//! that should abort the process (`assert!`/`panic!`), not conditions a
//! caller can recover from.

use std::io;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents all recoverable error cases produced by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode rpc frame: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("failed to encode rpc frame: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("frame too large: {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: u32, limit: u32 },

    #[error("connection closed while reading a frame")]
    ConnectionClosed,

    #[error("no such service {0:?}")]
    NoSuchService(String),

    #[error("no such method {service:?}/{method:?}")]
    NoSuchMethod { service: String, method: String },

    #[error("{path} is not exist")]
    CoordinationPathMissing { path: String },

    #[error("invalid config line {line_no}: {line:?}")]
    InvalidConfigLine { line_no: usize, line: String },

    #[error("missing required config key {0:?}")]
    MissingConfigKey(&'static str),

    #[error("operation timed out")]
    Timeout,

    #[error("channel is disconnected")]
    Disconnected,

    /// This should only be used if the error doesn't fall into one of the
    /// above categories.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

const _: () = {
    /// Assert Error implements Send + Sync
    const fn if_this_compiles_the_type_implements_send_and_sync<T: Send + Sync>() {}
    if_this_compiles_the_type_implements_send_and_sync::<Error>();
};

impl Error {
    #[inline(always)]
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Returns the name of the variant as it is spelled in the source code.
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::Io(_) => "Io",
            Self::Decode(_) => "Decode",
            Self::Encode(_) => "Encode",
            Self::FrameTooLarge { .. } => "FrameTooLarge",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::NoSuchService(_) => "NoSuchService",
            Self::NoSuchMethod { .. } => "NoSuchMethod",
            Self::CoordinationPathMissing { .. } => "CoordinationPathMissing",
            Self::InvalidConfigLine { .. } => "InvalidConfigLine",
            Self::MissingConfigKey(_) => "MissingConfigKey",
            Self::Timeout => "Timeout",
            Self::Disconnected => "Disconnected",
            Self::Other(_) => "Other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_doesnt_depend_on_io() {
        let err = Error::Timeout;
        assert!(!err.to_string().is_empty());
    }
}
