use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for perimeter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on either endpoint of the perimeter link
#[derive(Error, Debug)]
pub enum Error {
    #[error("service `{service}` is not available")]
    AppUnavailable { service: String },

    #[error("{count} providers expose service `{service}`")]
    AmbiguousProvider { service: String, count: usize },

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection already opened")]
    AlreadyOpen,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("a receive handler is already registered")]
    HandlerAlreadyRegistered,

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("configuration error: {0}")]
    Config(String),
}
