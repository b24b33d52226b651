use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::nmea::{Message, Rejection};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub count: usize,
    pub fragments: usize,
    pub chars: usize,
}

/// Tracks stats on message iteration.
///
/// # Example
/// ```
/// use aisfeed::nmea::decode_messages;
/// use aisfeed::stats::Summary;
/// let dat: &[u8] = b"!AIVDM,1,1,,A,15M67FC000G?ufbE`FepT@3n00Sa,0*5F\r\n";
///
/// let mut summary = Summary::default();
/// let messages: Vec<_> = decode_messages(dat)
///     .filter_map(Result::ok)
///     .inspect(|m| summary.add(m))
///     .collect();
/// assert_eq!(summary.count, messages.len());
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub fragments: usize,
    pub chars: usize,
    pub channels: BTreeMap<String, ChannelSummary>,
    pub rejected: BTreeMap<String, usize>,
}

impl Summary {
    pub fn add(&mut self, message: &Message) {
        let fragments = message.sentences.len();
        let chars = message.payload.len();
        self.count += 1;
        self.fragments += fragments;
        self.chars += chars;

        let channel = self.channels.entry(message.channel.to_string()).or_default();
        channel.count += 1;
        channel.fragments += fragments;
        channel.chars += chars;
    }

    /// Set rejection counts, e.g., from [crate::nmea::Reassembler::rejected].
    pub fn set_rejected<'a, I>(&mut self, rejected: I)
    where
        I: IntoIterator<Item = (&'a Rejection, &'a usize)>,
    {
        self.rejected = rejected
            .into_iter()
            .map(|(reason, count)| (reason.to_string(), *count))
            .collect();
    }

    #[must_use]
    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }
}
