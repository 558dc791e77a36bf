use std::io;

use thiserror::Error;

/// Failure of a single request issued by the executor.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("cannot send to `{0}`: expected an absolute http(s) URI")]
    InvalidUri(String),

    #[error("request to {uri} failed: {source}")]
    Transport {
        uri: String,
        #[source]
        source: io::Error,
    },
}
