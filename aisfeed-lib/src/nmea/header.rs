/// Header of AIS sentences received from other vessels.
pub const AIVDM: &[u8] = b"!AIVDM";
/// Header of AIS sentences describing the receiving vessel.
pub const AIVDO: &[u8] = b"!AIVDO";

/// Result of matching one byte against a header template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    /// Byte matched; the header is not yet complete.
    Advance,
    /// Byte matched and completed the header.
    Complete,
    /// Byte did not match; the candidate sentence must be abandoned.
    Reset,
}

/// Match `byte` against position `index` of `template`.
///
/// An `index` at or beyond the template length never matches.
#[must_use]
pub fn match_header(template: &[u8], index: usize, byte: u8) -> HeaderMatch {
    match template.get(index) {
        Some(b) if *b == byte => {
            if index + 1 == template.len() {
                HeaderMatch::Complete
            } else {
                HeaderMatch::Advance
            }
        }
        _ => HeaderMatch::Reset,
    }
}
