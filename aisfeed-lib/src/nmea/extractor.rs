use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use tracing::{trace, warn};

use super::{match_header, HeaderMatch, Sentence, AIVDM};
use crate::Result;

/// Extractor scans a byte stream for sentences starting with a header template.
///
/// The extractor is a resumable automaton: bytes may be provided in chunks of any size and
/// chunk boundaries need not align with sentence boundaries. A sentence is only produced
/// once terminated by `\r` or `\n`; bytes of an unterminated sentence stay buffered until
/// the next call.
///
/// While matching the header any mismatched byte abandons the candidate and matching
/// starts over with the following byte.
#[derive(Debug, Clone)]
pub struct Extractor {
    header: Vec<u8>,
    // Number of header bytes matched, or the header length once past the header
    index: usize,
    raw: Vec<u8>,
    separators: Vec<usize>,
    max_len: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    /// Sentences longer than this are dropped. The NMEA limit is 82 characters, but some
    /// receivers emit longer lines.
    pub const DEFAULT_MAX_LEN: usize = 1024;

    /// Creates a new ``Extractor`` matching the [AIVDM] header.
    #[must_use]
    pub fn new() -> Self {
        Extractor {
            header: AIVDM.to_vec(),
            index: 0,
            raw: Vec::with_capacity(128),
            separators: Vec::with_capacity(8),
            max_len: Self::DEFAULT_MAX_LEN,
        }
    }

    /// Use `header` instead of [AIVDM] as the sentence start marker.
    #[must_use]
    pub fn with_header(mut self, header: &[u8]) -> Self {
        self.header = header.to_vec();
        self.reset();
        self
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Abandon any partially collected sentence.
    pub fn reset(&mut self) {
        self.index = 0;
        self.raw.clear();
        self.separators.clear();
    }

    /// Number of bytes collected for the current candidate sentence.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.raw.len()
    }

    /// Process a single byte, returning a [Sentence] if `byte` terminated one.
    pub fn feed(&mut self, byte: u8) -> Option<Sentence> {
        if self.index < self.header.len() {
            match match_header(&self.header, self.index, byte) {
                HeaderMatch::Advance | HeaderMatch::Complete => {
                    self.raw.push(byte);
                    self.index += 1;
                }
                HeaderMatch::Reset => self.reset(),
            }
            return None;
        }

        if byte == b'\r' || byte == b'\n' {
            let sentence = Sentence::new(
                std::mem::take(&mut self.raw),
                std::mem::take(&mut self.separators),
            );
            self.reset();
            trace!(sentence = %sentence, "sentence complete");
            return Some(sentence);
        }

        if self.raw.len() >= self.max_len {
            warn!(
                max_len = self.max_len,
                "sentence exceeds maximum length, dropping"
            );
            self.reset();
            return None;
        }

        if byte == b',' {
            self.separators.push(self.raw.len());
        }
        self.raw.push(byte);
        None
    }

    /// Process a chunk of bytes, returning all sentences completed by it in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Sentence> {
        chunk.iter().filter_map(|b| self.feed(*b)).collect()
    }
}

/// Iterates over sentences read from a reader. Created using [read_sentences].
///
/// ## Errors
/// The iterator ends at EOF; a partial sentence at the end of the stream is dropped. Any
/// other read error is passed on and ends the iteration.
pub struct SentenceIter<R>
where
    R: Read + Send,
{
    reader: R,
    extractor: Extractor,
    buf: Vec<u8>,
    ready: VecDeque<Sentence>,
    done: bool,
}

impl<R> SentenceIter<R>
where
    R: Read + Send,
{
    const CHUNK_SIZE: usize = 4096;

    #[must_use]
    pub fn new(reader: R, extractor: Extractor) -> Self {
        SentenceIter {
            reader,
            extractor,
            buf: vec![0u8; Self::CHUNK_SIZE],
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<R> Iterator for SentenceIter<R>
where
    R: Read + Send,
{
    type Item = Result<Sentence>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sentence) = self.ready.pop_front() {
                return Some(Ok(sentence));
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    trace!(pending = self.extractor.pending(), "end of stream");
                    self.done = true;
                }
                Ok(n) => {
                    let sentences = self.extractor.push(&self.buf[..n]);
                    self.ready.extend(sentences);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            }
        }
    }
}

/// Creates an iterator producing [AIVDM] sentences found in `reader`.
///
/// Bytes not part of a sentence are skipped. For another header, or more control, use
/// [SentenceIter] with a configured [Extractor].
pub fn read_sentences<R>(reader: R) -> SentenceIter<R>
where
    R: Read + Send,
{
    SentenceIter::new(reader, Extractor::new())
}
