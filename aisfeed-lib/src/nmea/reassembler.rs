use std::collections::HashMap;
use std::fmt::Display;

use chrono::Utc;
use derive_more::Display as DeriveDisplay;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

use super::{Channel, Message, Sentence, SEPARATOR_COUNT};

/// Reason a sentence was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveDisplay)]
pub enum Rejection {
    /// Wrong number of separators.
    #[display("invalid structure")]
    Structure,
    /// Fragment count, number or payload is missing, malformed, or out of range.
    #[display("invalid fragment fields")]
    Fields,
    #[display("checksum mismatch")]
    Checksum,
    /// Fragment count or group code differs from the fragments already buffered.
    #[display("fragment count or group mismatch")]
    Mismatch,
    /// Fragment number does not follow the previous fragment.
    #[display("missing or out of order fragment")]
    Sequence,
}

/// Options for a [Reassembler].
#[derive(Debug, Clone, TypedBuilder)]
pub struct ReassemblerOpts {
    /// Discard sentences whose checksum does not match.
    #[builder(default = false)]
    pub verify_checksum: bool,
    /// Largest fragment count accepted. Sentences claiming more fragments are discarded.
    #[builder(default = ReassemblerOpts::DEFAULT_MAX_FRAGMENTS)]
    pub max_fragments: u32,
}

impl ReassemblerOpts {
    /// The fragment count field is a single digit on the wire.
    pub const DEFAULT_MAX_FRAGMENTS: u32 = 9;
}

impl Default for ReassemblerOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// In progress multiline message for one channel.
struct ChannelTracker {
    channel: Channel,
    // Fragments received so far, in order
    fragments: Vec<Sentence>,
}

impl ChannelTracker {
    fn new(channel: Channel) -> Self {
        ChannelTracker {
            channel,
            fragments: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.fragments.clear();
    }
}

impl Display for ChannelTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ChannelTracker{{channel={}, fragments={}}}",
            self.channel,
            self.fragments.len()
        )
    }
}

/// Reassembles multi-fragment AIS messages from complete sentences.
///
/// Each channel has its own in-progress fragment list so that fragments from two channels
/// may interleave without affecting each other. Within a channel fragment numbers must
/// start at 1 and increase by exactly 1, and all fragments must share the same fragment
/// count and group code. Any violation drops the channel's buffered fragments along with
/// the offending sentence.
///
/// Discarded sentences are logged and counted; they never affect other channels.
pub struct Reassembler {
    opts: ReassemblerOpts,
    trackers: HashMap<Channel, ChannelTracker>,
    rejected: HashMap<Rejection, usize>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(ReassemblerOpts::default())
    }
}

impl Reassembler {
    #[must_use]
    pub fn new(opts: ReassemblerOpts) -> Self {
        Reassembler {
            opts,
            trackers: HashMap::new(),
            rejected: HashMap::new(),
        }
    }

    /// Number of fragments buffered for `channel`.
    #[must_use]
    pub fn pending(&self, channel: Channel) -> usize {
        self.trackers
            .get(&channel)
            .map_or(0, |tracker| tracker.fragments.len())
    }

    /// Counts of discarded sentences by reason.
    #[must_use]
    pub fn rejected(&self) -> &HashMap<Rejection, usize> {
        &self.rejected
    }

    /// Drop all buffered fragments for all channels without producing messages.
    pub fn clear(&mut self) {
        for tracker in self.trackers.values_mut() {
            tracker.reset();
        }
    }

    fn reject(&mut self, reason: Rejection, sentence: &Sentence) {
        warn!(%reason, %sentence, "dropping sentence");
        *self.rejected.entry(reason).or_default() += 1;
    }

    /// Process one complete sentence, returning a [Message] if it completed one.
    pub fn process(&mut self, sentence: Sentence) -> Option<Message> {
        if sentence.separators().len() != SEPARATOR_COUNT {
            self.reject(Rejection::Structure, &sentence);
            return None;
        }
        if self.opts.verify_checksum && !sentence.checksum_valid() {
            self.reject(Rejection::Checksum, &sentence);
            return None;
        }
        let (Some(total), Some(number), Some(channel)) =
            (sentence.total(), sentence.number(), sentence.channel())
        else {
            self.reject(Rejection::Fields, &sentence);
            return None;
        };
        if total == 0 || total > self.opts.max_fragments {
            self.reject(Rejection::Fields, &sentence);
            return None;
        }
        if !sentence.payload().is_some_and(<[u8]>::is_ascii) {
            self.reject(Rejection::Fields, &sentence);
            return None;
        }

        if total == 1 && number == 1 {
            return Some(assemble(channel, std::slice::from_ref(&sentence)));
        }

        let tracker = self
            .trackers
            .entry(channel)
            .or_insert_with(|| ChannelTracker::new(channel));

        let prev = match tracker.fragments.last() {
            Some(last) => {
                if last.total() != Some(total) || last.group() != sentence.group() {
                    debug!(tracker = %tracker, "fragment mismatch, dropping tracker");
                    tracker.reset();
                    self.reject(Rejection::Mismatch, &sentence);
                    return None;
                }
                last.number().unwrap_or_default()
            }
            None => 0,
        };

        if number != prev + 1 {
            debug!(tracker = %tracker, prev, number, "fragment out of sequence, dropping tracker");
            tracker.reset();
            self.reject(Rejection::Sequence, &sentence);
            return None;
        }

        tracker.fragments.push(sentence);
        if number < total {
            trace!(tracker = %tracker, "waiting for more fragments");
            return None;
        }

        let message = assemble(channel, &tracker.fragments);
        tracker.reset();
        Some(message)
    }
}

/// Build a message from fragments in order, stamped with the current time.
///
/// Payloads are checked to be ASCII before fragments are accepted, so the conversion is
/// lossless.
fn assemble(channel: Channel, fragments: &[Sentence]) -> Message {
    let mut payload = String::new();
    let mut sentences = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        if let Some(data) = fragment.payload() {
            payload.push_str(&String::from_utf8_lossy(data));
        }
        sentences.push(fragment.text());
    }
    Message {
        channel,
        payload,
        sentences,
        timestamp: Utc::now(),
        source: None,
    }
}
