#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Operation requires a ready connection.
    #[error("not connected")]
    NotConnected,

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Reconnect requested before any target was given.
    #[error("no connection target")]
    NoTarget,

    #[error("no addresses resolved for {0}")]
    NoAddress(String),

    /// A statistics snapshot could not be decoded.
    #[error("invalid statistics snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// A statistics snapshot decoded, but does not fit the window it was loaded into.
    #[error("snapshot shape mismatch: expected {expected_buckets}x{expected_duration}s, got {buckets}x{duration}s")]
    SnapshotShape {
        expected_buckets: usize,
        expected_duration: i64,
        buckets: usize,
        duration: i64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
