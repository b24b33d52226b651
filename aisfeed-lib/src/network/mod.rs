//! Outbound network connections to remote NMEA feeds.
//!
//! [PersistentClient] owns a single connection and exposes explicit connect, read, send and
//! reconnect operations; it never retries on its own. [spawn_feed] runs a client on a
//! dedicated thread, retrying with bounded exponential backoff and pushing received bytes
//! through a [Pipeline](crate::nmea::Pipeline).
mod client;
mod feed;

pub use client::*;
pub use feed::*;

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use derive_more::Display;
use tracing::{debug, trace};

use crate::{Error, Result};

/// A bidirectional byte stream that can be shut down from another thread.
pub trait Connection: Read + Write + Send + 'static {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
    /// Shut down both directions, unblocking any pending read on any handle to the same
    /// underlying connection.
    fn shutdown(&self) -> io::Result<()>;
    /// Another handle to the same underlying connection.
    fn try_clone(&self) -> io::Result<Self>
    where
        Self: Sized;
}

impl Connection for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }
}

/// Opens [Connection]s to a host and port.
pub trait Connector: Send {
    type Conn: Connection;

    /// Open a connection, taking no longer than `timeout` in total.
    ///
    /// # Errors
    /// If the address cannot be resolved or no resolved address accepts the connection.
    fn connect(&self, host: &str, port: &str, timeout: Duration) -> Result<Self::Conn>;
}

/// Plain TCP [Connector].
///
/// Addresses are resolved with the system resolver, which is not bounded by the connect
/// timeout. Resolved addresses are tried in turn, sharing one `timeout` between them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn connect(&self, host: &str, port: &str, timeout: Duration) -> Result<TcpStream> {
        let port_num: u16 = port.parse().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port {port}"))
        })?;
        let addrs: Vec<SocketAddr> = (host, port_num).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(Error::NoAddress(format!("{host}:{port}")));
        }

        let stream = connect_any(&addrs, timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Try each of `addrs` in order until one connects or `timeout` has passed in total.
fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => {
                debug!(%addr, "tcp connected");
                return Ok(stream);
            }
            Err(err) => {
                debug!(%addr, "tcp connect failed: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::ErrorKind::TimedOut.into()))
}

/// Connection state of a [PersistentClient].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum State {
    #[display("disconnected")]
    Disconnected,
    #[display("connecting")]
    Connecting,
    #[display("ready")]
    Ready,
}

/// Handle for closing a client's connection from another thread.
///
/// Closing shuts the connection down, which makes a read blocked on the owning thread
/// return. The owning client then moves to [State::Disconnected] on its own thread.
#[derive(Clone, Default)]
pub struct Closer {
    handle: Arc<Mutex<Option<Box<dyn Connection>>>>,
}

impl Closer {
    pub(crate) fn arm(&self, conn: Box<dyn Connection>) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(conn);
    }

    pub(crate) fn disarm(&self) {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Shut down the current connection, if any. Returns true if there was one.
    pub fn close(&self) -> bool {
        let conn = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match conn {
            Some(conn) => {
                if let Err(err) = conn.shutdown() {
                    trace!("shutdown failed: {err}");
                }
                debug!("connection closed by closer");
                true
            }
            None => false,
        }
    }
}
