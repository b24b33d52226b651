//! AIS NMEA sentence framing and multiline message reassembly.
//!
//! Raw bytes are scanned by an [Extractor] for sentences starting with the `!AIVDM` header.
//! Completed [Sentence]s are handed to a [Reassembler] which joins multi-fragment messages
//! per radio [Channel] and produces [Message]s. [Pipeline] ties the two together for a
//! single ingestion source.
//!
//! Wire format:
//! ```text
//! !AIVDM,<total>,<number>,<group>,<channel>,<payload>,<fill_bits>*<checksum>
//! ```
mod extractor;
mod header;
mod pipeline;
mod reassembler;

pub use extractor::*;
pub use header::*;
pub use pipeline::*;
pub use reassembler::*;

use std::fmt;

use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Radio sub-channel identifier, typically `A` or `B`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Display,
)]
pub struct Channel(pub char);

impl Channel {
    /// Channel used for sentences with an empty channel field.
    pub const UNSPECIFIED: Channel = Channel(' ');
}

/// Number of separators in a well formed AIS wrapper sentence.
pub const SEPARATOR_COUNT: usize = 6;

/// One line of wire-format text, from the header up to but not including the line ending.
///
/// `separators` holds the byte offset of each `,` in `raw`. All field accessors return
/// `None` unless the sentence has exactly [SEPARATOR_COUNT] separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    raw: Vec<u8>,
    separators: Vec<usize>,
}

impl Sentence {
    #[must_use]
    pub fn new(raw: Vec<u8>, separators: Vec<usize>) -> Self {
        Sentence { raw, separators }
    }

    /// Construct from text, locating separators.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let raw = text.as_bytes().to_vec();
        let separators = raw
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b',')
            .map(|(i, _)| i)
            .collect();
        Sentence { raw, separators }
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn separators(&self) -> &[usize] {
        &self.separators
    }

    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.separators.len() == SEPARATOR_COUNT
    }

    /// Bytes of the zero-based field `idx`, where field 0 is the header.
    fn field(&self, idx: usize) -> Option<&[u8]> {
        if !self.is_well_formed() || idx > SEPARATOR_COUNT {
            return None;
        }
        let start = if idx == 0 { 0 } else { self.separators[idx - 1] + 1 };
        let end = if idx == SEPARATOR_COUNT {
            self.raw[start..]
                .iter()
                .position(|b| *b == b'*')
                .map_or(self.raw.len(), |p| start + p)
        } else {
            self.separators[idx]
        };
        Some(&self.raw[start..end])
    }

    fn numeric_field(&self, idx: usize) -> Option<u32> {
        std::str::from_utf8(self.field(idx)?).ok()?.parse().ok()
    }

    /// Total number of fragments in the message this sentence belongs to.
    #[must_use]
    pub fn total(&self) -> Option<u32> {
        self.numeric_field(1)
    }

    /// 1-based fragment number of this sentence.
    #[must_use]
    pub fn number(&self) -> Option<u32> {
        self.numeric_field(2)
    }

    /// Sequential message id correlating fragments, possibly empty.
    #[must_use]
    pub fn group(&self) -> Option<&[u8]> {
        self.field(3)
    }

    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        let field = self.field(4)?;
        Some(field.first().map_or(Channel::UNSPECIFIED, |b| Channel(char::from(*b))))
    }

    /// Payload start and end offsets in `raw`, derived from separators 4 and 5.
    #[must_use]
    pub fn payload_span(&self) -> Option<(usize, usize)> {
        if !self.is_well_formed() {
            return None;
        }
        Some((self.separators[4] + 1, self.separators[5]))
    }

    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        let (start, end) = self.payload_span()?;
        Some(&self.raw[start..end])
    }

    /// Number of fill bits appended to the payload.
    #[must_use]
    pub fn fill_bits(&self) -> Option<u32> {
        self.numeric_field(6)
    }

    /// Checksum from the two hex digits following `*`.
    #[must_use]
    pub fn checksum(&self) -> Option<u8> {
        let star = self.raw.iter().rposition(|b| *b == b'*')?;
        let digits = self.raw.get(star + 1..star + 3)?;
        u8::from_str_radix(std::str::from_utf8(digits).ok()?, 16).ok()
    }

    /// True if the checksum is present and equals the XOR of all bytes between the leading
    /// `!` and the `*`.
    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        let Some(expected) = self.checksum() else {
            return false;
        };
        let Some(star) = self.raw.iter().rposition(|b| *b == b'*') else {
            return false;
        };
        let start = usize::from(self.raw.first() == Some(&b'!'));
        let computed = self.raw[start..star].iter().fold(0u8, |acc, b| acc ^ b);
        computed == expected
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.raw))
    }
}

/// A complete AIS message assembled from one or more sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub channel: Channel,
    /// Six-bit encoded payload characters, all fragments concatenated in order.
    pub payload: String,
    /// Raw sentences the message was built from, in fragment order.
    pub sentences: Vec<String>,
    /// Time the message was completed.
    pub timestamp: DateTime<Utc>,
    /// Label of the ingestion source, if any.
    pub source: Option<String>,
}
