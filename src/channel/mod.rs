//! Duplex message channel shared by both endpoints
//!
//! A [`Connection`] carries [`Message`](crate::Message)s both ways: either side
//! can [`send`](Connection::send) a request and await its response, and either
//! side registers one handler with [`on_receive`](Connection::on_receive) for
//! the requests its peer sends. Communication happens over Unix domain sockets
//! using MessagePack serialization.
//!
//! # Example
//!
//! ```rust,ignore
//! use perimeter::channel::{ChannelTransport, SocketConnector};
//! use perimeter::{Message, Command};
//!
//! let connection = SocketConnector::new("PerimeterBreachService", path, executor, None)
//!     .open()
//!     .await?;
//! let reply = connection.send(Message::request(Command::TurnOn)).await?;
//! ```

mod connection;
mod frame;
mod socket;

use std::future::Future;
use std::sync::{Mutex, PoisonError};

pub use connection::Connection;
pub use frame::{FrameKind, MAX_FRAME_LEN};
pub use socket::{SocketAcceptor, SocketConnector};

use crate::error::{Error, Result};

/// Something that can open the channel to the peer endpoint
pub trait ChannelTransport: Send + Sync {
    fn open(&self) -> impl Future<Output = Result<Connection>> + Send;
}

/// A connection the host established before handing it to the endpoint
///
/// Opens once; later opens fail with [`Error::AlreadyOpen`].
#[derive(Debug)]
pub struct ProvidedConnection {
    connection: Mutex<Option<Connection>>,
}

impl ProvidedConnection {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }
}

impl ChannelTransport for ProvidedConnection {
    async fn open(&self) -> Result<Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadyOpen)
    }
}
