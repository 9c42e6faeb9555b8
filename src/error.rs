use std::{io, path::PathBuf};

use thiserror::Error;

use crate::models::RangeSpec;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme `{0}` (only http and https are supported)")]
    UnsupportedScheme(String),

    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("could not send request: {0}")]
    Send(#[source] io::Error),

    #[error("could not receive response: {0}")]
    Receive(#[source] io::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("server answered with HTTP {0}")]
    Http(u16),

    #[error("server ignored range request for bytes {0} (status {1})")]
    RangeIgnored(RangeSpec, u16),

    #[error("too many redirects (more than {0})")]
    TooManyRedirects(usize),

    #[error("range {range} incomplete: received {received} of {expected} bytes")]
    IncompleteRange {
        range: RangeSpec,
        received: u64,
        expected: u64,
    },

    #[error("could not write `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Write {
            path: path.into(),
            source,
        }
    }
}
