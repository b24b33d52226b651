use std::io::{self, ErrorKind, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{Closer, Connection, Connector, State, TcpConnector};
use crate::{Error, Result};

/// A single outbound connection that can be dropped and re-established.
///
/// The client never retries on its own; callers decide when to [reconnect](Self::reconnect).
/// Any read or send failure moves the client to [State::Disconnected]. Dropping the client
/// releases the connection.
///
/// Blocking calls (`connect`, `read` with `wait`) are bounded by the configured timeout and
/// should be made from a dedicated thread. Use a [Closer] from [closer](Self::closer) to
/// abort a blocked read from elsewhere.
///
/// # Example
/// ```no_run
/// use aisfeed::network::PersistentClient;
///
/// let mut client = PersistentClient::new();
/// if client.connect("localhost", "10110").is_err() {
///     // try again later
///     let _ = client.reconnect();
/// }
/// let mut buf = [0u8; 1024];
/// let n = client.read(&mut buf, true).unwrap_or(0);
/// ```
pub struct PersistentClient<C: Connector = TcpConnector> {
    connector: C,
    timeout: Duration,
    target: Option<(String, String)>,
    state: State,
    last_activity: Option<DateTime<Utc>>,
    conn: Option<C::Conn>,
    closer: Closer,
}

impl Default for PersistentClient<TcpConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentClient<TcpConnector> {
    /// Creates a TCP client with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(TcpConnector)
    }
}

impl<C: Connector> PersistentClient<C> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn with_connector(connector: C) -> Self {
        PersistentClient {
            connector,
            timeout: Self::DEFAULT_TIMEOUT,
            target: None,
            state: State::Disconnected,
            last_activity: None,
            conn: None,
            closer: Closer::default(),
        }
    }

    /// Bound for connecting and for waiting reads. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Host and port of the most recent connect attempt.
    #[must_use]
    pub fn target(&self) -> Option<(&str, &str)> {
        self.target
            .as_ref()
            .map(|(host, port)| (host.as_str(), port.as_str()))
    }

    /// Time of the last successful connect, read or send.
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// Handle that can shut down this client's connection from another thread.
    #[must_use]
    pub fn closer(&self) -> Closer {
        self.closer.clone()
    }

    /// Connect to `host`:`port`, releasing any current connection first.
    ///
    /// The target is remembered for [reconnect](Self::reconnect) even if the attempt fails.
    ///
    /// # Errors
    /// If the connection cannot be established within the timeout. The client is left
    /// [State::Disconnected].
    pub fn connect(&mut self, host: &str, port: &str) -> Result<()> {
        if self.conn.is_some() {
            self.disconnect();
        }
        self.target = Some((host.to_owned(), port.to_owned()));
        self.state = State::Connecting;
        debug!(host, port, "connecting");

        let conn = match self.connector.connect(host, port, self.timeout) {
            Ok(conn) => conn,
            Err(err) => {
                self.state = State::Disconnected;
                debug!(host, port, "connect failed: {err}");
                return Err(err);
            }
        };
        match conn.try_clone() {
            Ok(handle) => self.closer.arm(Box::new(handle)),
            Err(err) => {
                self.state = State::Disconnected;
                warn!(host, port, "cannot clone connection handle: {err}");
                return Err(err.into());
            }
        }

        self.conn = Some(conn);
        self.state = State::Ready;
        self.last_activity = Some(Utc::now());
        info!(host, port, "connected");
        Ok(())
    }

    /// Release the connection, if any. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        self.closer.disarm();
        if let Some(conn) = self.conn.take() {
            if let Err(err) = conn.shutdown() {
                debug!("shutdown on disconnect failed: {err}");
            }
            debug!(peer = ?self.target, "disconnected");
        }
        self.state = State::Disconnected;
    }

    /// Disconnect, then connect to the last target. Makes a single attempt.
    ///
    /// # Errors
    /// [Error::NoTarget] if `connect` was never called, otherwise as for `connect`.
    pub fn reconnect(&mut self) -> Result<()> {
        let Some((host, port)) = self.target.clone() else {
            return Err(Error::NoTarget);
        };
        self.disconnect();
        self.connect(&host, &port)
    }

    /// Write all of `data`, returning the number of bytes written.
    ///
    /// # Errors
    /// [Error::NotConnected] if not ready. Any write failure disconnects the client.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::NotConnected);
        };
        match conn.write_all(data) {
            Ok(()) => {
                self.last_activity = Some(Utc::now());
                Ok(data.len())
            }
            Err(err) => {
                warn!(peer = ?self.target, "send failed: {err}");
                self.disconnect();
                Err(err.into())
            }
        }
    }

    /// Read available bytes into `buf`.
    ///
    /// Without `wait` this returns immediately, possibly with zero bytes. With `wait` it
    /// blocks until data arrives or the timeout passes, returning zero on timeout.
    ///
    /// # Errors
    /// [Error::NotConnected] if not ready, [Error::ConnectionClosed] if the peer closed the
    /// connection or it was shut down by a [Closer]. Any failure disconnects the client.
    pub fn read(&mut self, buf: &mut [u8], wait: bool) -> Result<usize> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::NotConnected);
        };
        match read_once(conn, buf, wait, self.timeout) {
            Ok(0) if !buf.is_empty() => {
                info!(peer = ?self.target, "connection closed");
                self.disconnect();
                Err(Error::ConnectionClosed)
            }
            Ok(n) => {
                self.last_activity = Some(Utc::now());
                Ok(n)
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => {
                warn!(peer = ?self.target, "read failed: {err}");
                self.disconnect();
                Err(err.into())
            }
        }
    }
}

impl<C: Connector> Drop for PersistentClient<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_once<T: Connection>(
    conn: &mut T,
    buf: &mut [u8],
    wait: bool,
    timeout: Duration,
) -> io::Result<usize> {
    if wait {
        conn.set_read_timeout(Some(timeout))?;
        return conn.read(buf);
    }
    conn.set_nonblocking(true)?;
    let zult = conn.read(buf);
    conn.set_nonblocking(false)?;
    zult
}
