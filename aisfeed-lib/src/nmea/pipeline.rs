use std::io::Read;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, warn};

use super::{Extractor, Message, Reassembler, ReassemblerOpts, SentenceIter};
use crate::Result;

/// Sentence framing and reassembly state for a single ingestion source.
///
/// Each source must have its own pipeline; nothing is shared between pipelines. Messages are
/// produced synchronously with the byte that completes them, in arrival order.
pub struct Pipeline {
    source: Option<String>,
    extractor: Extractor,
    reassembler: Reassembler,
    bytes: u64,
    sentences: u64,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline {
            source: None,
            extractor: Extractor::new(),
            reassembler: Reassembler::default(),
            bytes: 0,
            sentences: 0,
        }
    }
}

impl Pipeline {
    /// Create a pipeline that labels its messages with `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Pipeline {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn with_opts(mut self, opts: ReassemblerOpts) -> Self {
        self.reassembler = Reassembler::new(opts);
        self
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Total raw bytes pushed into this pipeline.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes
    }

    /// Total sentences completed, including those later discarded.
    #[must_use]
    pub fn sentences_received(&self) -> u64 {
        self.sentences
    }

    #[must_use]
    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Process one byte.
    pub fn feed(&mut self, byte: u8) -> Option<Message> {
        self.bytes += 1;
        let sentence = self.extractor.feed(byte)?;
        self.sentences += 1;
        let mut message = self.reassembler.process(sentence)?;
        message.source.clone_from(&self.source);
        Some(message)
    }

    /// Process a chunk of bytes, returning all messages completed by it in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Message> {
        chunk.iter().filter_map(|b| self.feed(*b)).collect()
    }

    /// Drop any partial sentence and all buffered fragments without emitting anything.
    pub fn reset(&mut self) {
        self.extractor.reset();
        self.reassembler.clear();
    }

    /// Decode all messages from `reader` using this pipeline's configuration.
    ///
    /// Raw byte counts are not tracked when decoding through this iterator.
    pub fn decode<R>(self, reader: R) -> impl Iterator<Item = Result<Message>>
    where
        R: Read + Send,
    {
        let Pipeline {
            source,
            extractor,
            mut reassembler,
            ..
        } = self;
        SentenceIter::new(reader, extractor).filter_map(move |zult| match zult {
            Ok(sentence) => reassembler.process(sentence).map(|mut message| {
                message.source.clone_from(&source);
                Ok(message)
            }),
            Err(err) => Some(Err(err)),
        })
    }
}

/// Creates an iterator of messages decoded from `reader` with a default [Pipeline].
///
/// # Example
/// ```
/// use aisfeed::nmea::decode_messages;
///
/// let dat: &[u8] = b"!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n\
///     !AIVDM,2,2,3,B,1@0000000000000,2*55\r\n";
/// let messages: Vec<_> = decode_messages(dat).filter_map(Result::ok).collect();
/// assert_eq!(messages.len(), 1);
/// ```
pub fn decode_messages<R>(reader: R) -> impl Iterator<Item = Result<Message>>
where
    R: Read + Send,
{
    Pipeline::default().decode(reader)
}

/// Run `pipeline` over `reader` in a background thread.
///
/// Messages are delivered over a bounded channel of `buffer_size`; the thread exits at EOF,
/// on a read error, or when the receiver is dropped.
///
/// # Panics
/// If the background thread could not be started.
pub fn spawn_pipeline<R>(
    reader: R,
    mut pipeline: Pipeline,
    buffer_size: usize,
) -> (Receiver<Message>, JoinHandle<Pipeline>)
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(buffer_size);
    let name = format!("pipeline::{}", pipeline.source().unwrap_or("unnamed"));

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let mut reader = reader;
            let mut buf = vec![0u8; 4096];
            'read: loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(source = ?pipeline.source(), "read failed: {err}");
                        break;
                    }
                };
                for message in pipeline.push(&buf[..n]) {
                    if tx.send(message).is_err() {
                        debug!("message receiver dropped");
                        break 'read;
                    }
                }
            }
            pipeline.reset();
            pipeline
        })
        .expect("failed to spawn pipeline thread");

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::Channel;

    const TWO_PART: &[u8] = b"!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n\
        !AIVDM,2,2,3,B,1@0000000000000,2*55\r\n";

    #[test]
    fn pipeline_labels_messages_with_source() {
        let mut pipeline = Pipeline::new("rtlsdr");
        let messages = pipeline.push(TWO_PART);

        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg.source.as_deref(), Some("rtlsdr"));
        assert_eq!(msg.channel, Channel('B'));
        assert_eq!(
            msg.payload,
            "55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E531@0000000000000"
        );
        assert_eq!(pipeline.bytes_received(), TWO_PART.len() as u64);
        assert_eq!(pipeline.sentences_received(), 2);
    }

    #[test]
    fn reset_discards_partial_fragments() {
        let mut pipeline = Pipeline::default();
        let eol = TWO_PART.iter().position(|b| *b == b'\n').unwrap();
        let (first, second) = TWO_PART.split_at(eol + 1);
        assert!(pipeline.push(first).is_empty());
        assert_eq!(pipeline.reassembler().pending(Channel('B')), 1);
        pipeline.reset();
        assert_eq!(pipeline.reassembler().pending(Channel('B')), 0);
        assert!(pipeline.push(second).is_empty());
    }

    #[test]
    fn decode_from_reader() {
        let mut input = b"garbage\n".to_vec();
        input.extend_from_slice(TWO_PART);
        input.extend_from_slice(TWO_PART);

        let messages: Vec<Message> = Pipeline::new("file")
            .decode(&input[..])
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.source.as_deref() == Some("file")));
    }

    #[test]
    fn spawned_pipeline_delivers_messages() {
        let input = [TWO_PART, TWO_PART, TWO_PART].concat();
        let (rx, handle) = spawn_pipeline(std::io::Cursor::new(input), Pipeline::new("bg"), 1);

        let messages: Vec<Message> = rx.iter().collect();
        let pipeline = handle.join().unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(pipeline.sentences_received(), 6);
    }
}
