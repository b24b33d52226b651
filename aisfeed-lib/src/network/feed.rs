use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use super::{Closer, Connector, PersistentClient};
use crate::nmea::{Message, Pipeline};
use crate::stats::TrafficStats;
use crate::Result;

/// Options for [spawn_feed].
#[derive(Debug, Clone, TypedBuilder)]
pub struct FeedOpts {
    #[builder(setter(into))]
    pub host: String,
    #[builder(setter(into))]
    pub port: String,
    /// Delay after the first failed connect; doubled after each further failure.
    #[builder(default = Duration::from_secs(1))]
    pub retry_min: Duration,
    /// Cap for the reconnect delay.
    #[builder(default = Duration::from_secs(60))]
    pub retry_max: Duration,
    /// Allowable number of messages waiting to be received.
    #[builder(default = 1024)]
    pub buffer_size: usize,
    /// Size of each read from the connection.
    #[builder(default = 4096)]
    pub chunk_size: usize,
}

/// Handle to a running feed thread. Dropping the handle stops the feed.
pub struct FeedHandle {
    messages: Receiver<Message>,
    stop: Option<Sender<()>>,
    closer: Closer,
    handle: Option<JoinHandle<Pipeline>>,
}

impl FeedHandle {
    /// Messages decoded from the feed, in arrival order.
    #[must_use]
    pub fn messages(&self) -> &Receiver<Message> {
        &self.messages
    }

    /// Stop the feed, aborting any blocked read, and wait for the thread to exit.
    ///
    /// Returns the feed's pipeline with any partial fragments already discarded, or `None`
    /// if the feed thread panicked.
    pub fn stop(mut self) -> Option<Pipeline> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Pipeline> {
        let handle = self.handle.take()?;
        drop(self.stop.take());
        self.closer.close();
        handle.join().ok()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read from a remote feed on a dedicated thread.
///
/// The thread connects `client` to the configured target and pushes everything received
/// through `pipeline`. On any connect or read failure it reconnects, waiting `retry_min`
/// and doubling the wait after each failed attempt up to `retry_max`. Bytes and messages
/// are recorded in `stats` when provided.
///
/// Buffered fragments are discarded on every reconnect and when the feed stops; partial
/// messages are never emitted.
///
/// # Errors
/// If the thread cannot be started.
pub fn spawn_feed<C>(
    client: PersistentClient<C>,
    opts: FeedOpts,
    pipeline: Pipeline,
    stats: Option<Arc<TrafficStats>>,
) -> Result<FeedHandle>
where
    C: Connector + 'static,
{
    let (msg_tx, msg_rx) = bounded(opts.buffer_size);
    let (stop_tx, stop_rx) = bounded(1);
    let closer = client.closer();

    let handle = thread::Builder::new()
        .name(format!("feed::{}:{}", opts.host, opts.port))
        .spawn(move || {
            let pipeline = run_feed(client, &opts, pipeline, stats.as_deref(), &msg_tx, &stop_rx);
            debug!("feed thread exit");
            pipeline
        })?;

    Ok(FeedHandle {
        messages: msg_rx,
        stop: Some(stop_tx),
        closer,
        handle: Some(handle),
    })
}

/// Floor for the reconnect delay, so a zero `retry_min` cannot spin.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

fn stopped(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

fn run_feed<C: Connector>(
    mut client: PersistentClient<C>,
    opts: &FeedOpts,
    mut pipeline: Pipeline,
    stats: Option<&TrafficStats>,
    messages: &Sender<Message>,
    stop: &Receiver<()>,
) -> Pipeline {
    let mut buf = vec![0u8; opts.chunk_size.max(1)];
    let retry_min = opts.retry_min.max(MIN_RETRY_DELAY);
    let mut delay = retry_min;

    'feed: while !stopped(stop) {
        if !client.is_ready() {
            let zult = if client.target().is_some() {
                client.reconnect()
            } else {
                client.connect(&opts.host, &opts.port)
            };
            if let Err(err) = zult {
                warn!(host = %opts.host, port = %opts.port, "connect failed: {err}; retrying in {delay:?}");
                match stop.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                delay = (delay * 2).min(opts.retry_max.max(retry_min));
                continue;
            }
            info!(host = %opts.host, port = %opts.port, "feed connected");
            delay = retry_min;
            pipeline.reset();
        }

        let n = match client.read(&mut buf, true) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(err) => {
                debug!("feed read ended: {err}");
                match stop.recv_timeout(retry_min) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
        };

        let now = Utc::now();
        if let Some(stats) = stats {
            stats.record_bytes(n as u64, now);
        }
        for message in pipeline.push(&buf[..n]) {
            if let Some(stats) = stats {
                stats.record_messages(1, now);
            }
            select! {
                send(messages, message) -> zult => {
                    if zult.is_err() {
                        debug!("message receiver dropped");
                        break 'feed;
                    }
                }
                recv(stop) -> _ => break 'feed,
            }
        }
    }

    client.disconnect();
    pipeline.reset();
    pipeline
}

#[cfg(test)]
mod tests {
    use super::super::client::mock::{MockConn, MockConnector};
    use super::*;
    use std::time::Instant;

    const TWO_PART: &[u8] = b"!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n\
        !AIVDM,2,2,3,B,1@0000000000000,2*55\r\n";

    fn opts() -> FeedOpts {
        FeedOpts::builder()
            .host("feed.example")
            .port("4001")
            .retry_min(Duration::from_millis(5))
            .retry_max(Duration::from_millis(20))
            .build()
    }

    #[test]
    fn feed_retries_then_delivers_messages() {
        let conn = MockConn::with_incoming(TWO_PART);
        let connector = MockConnector::new(vec![None, None, Some(conn)]);
        let client = PersistentClient::with_connector(connector.clone());
        let stats = Arc::new(TrafficStats::new());

        let feed = spawn_feed(client, opts(), Pipeline::new("tcp"), Some(stats.clone())).unwrap();
        let msg = feed
            .messages()
            .recv_timeout(Duration::from_secs(5))
            .expect("message from feed");

        assert_eq!(msg.source.as_deref(), Some("tcp"));
        assert_eq!(connector.attempts.lock().unwrap().len(), 3);

        let pipeline = feed.stop().expect("feed thread should exit cleanly");
        assert_eq!(pipeline.sentences_received(), 2);

        let snapshot = stats.snapshot(Utc::now());
        let total: u64 = snapshot.windows[0].messages.iter().sum();
        assert_eq!(total, 1);
        let bytes: u64 = snapshot.windows[0].bytes.iter().sum();
        assert_eq!(bytes, TWO_PART.len() as u64);
    }

    #[test]
    fn stop_while_retrying() {
        let client = PersistentClient::with_connector(MockConnector::default());
        let opts = FeedOpts::builder()
            .host("feed.example")
            .port("4001")
            .retry_min(Duration::from_secs(30))
            .build();

        let feed = spawn_feed(client, opts, Pipeline::default(), None).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(feed.stop().is_some());
    }

    #[test]
    fn stop_discards_partial_fragments() {
        let (first, _) = TWO_PART.split_at(TWO_PART.iter().position(|b| *b == b'\n').unwrap() + 1);
        let conn = MockConn::with_incoming(first);
        let client = PersistentClient::with_connector(MockConnector::new(vec![Some(conn)]));

        let feed = spawn_feed(client, opts(), Pipeline::default(), None).unwrap();
        thread::sleep(Duration::from_millis(50));
        let pipeline = feed.stop().unwrap();

        assert!(no_pending_fragments(&pipeline));
    }

    #[test]
    fn reconnect_delay_doubles_up_to_max() {
        let connector = MockConnector::default();
        let client = PersistentClient::with_connector(connector.clone());
        let opts = FeedOpts::builder()
            .host("feed.example")
            .port("4001")
            .retry_min(Duration::from_millis(25))
            .retry_max(Duration::from_millis(100))
            .build();

        let feed = spawn_feed(client, opts, Pipeline::default(), None).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while connector.attempted_at.lock().unwrap().len() < 6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        feed.stop();

        let times = connector.attempted_at.lock().unwrap().clone();
        assert!(times.len() >= 6, "only {} attempts", times.len());
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        let expected = [25, 50, 100, 100, 100].map(Duration::from_millis);
        for (gap, min) in gaps.iter().zip(expected) {
            assert!(*gap >= min, "gaps {gaps:?}");
        }
        // capped at retry_max rather than continuing to double to 200ms, 400ms
        assert!(gaps[4] < Duration::from_millis(190), "gaps {gaps:?}");
    }

    #[test]
    fn zero_retry_min_does_not_spin() {
        let connector = MockConnector::default();
        let client = PersistentClient::with_connector(connector.clone());
        let opts = FeedOpts::builder()
            .host("feed.example")
            .port("4001")
            .retry_min(Duration::ZERO)
            .retry_max(Duration::from_millis(40))
            .build();

        let feed = spawn_feed(client, opts, Pipeline::default(), None).unwrap();
        thread::sleep(Duration::from_millis(200));
        feed.stop();

        // 1ms, 2ms, 4ms ... 40ms gives well under 20 attempts in 200ms
        let attempts = connector.attempts.lock().unwrap().len();
        assert!((2..20).contains(&attempts), "{attempts} attempts");
    }

    fn no_pending_fragments(pipeline: &Pipeline) -> bool {
        pipeline.reassembler().pending(crate::nmea::Channel('B')) == 0
    }
}
