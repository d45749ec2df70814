//! In-band end-of-session marker for reusable tunnel legs
//!
//! A tunnel leg outlives the public connection it carries. When one side's
//! logical session ends it writes [`TERMINATOR`] onto the leg instead of
//! closing it; the reading side strips the marker and stops forwarding.

use bytes::{Bytes, BytesMut};

/// Marker written onto a tunnel leg at the end of a logical session
pub const TERMINATOR: &[u8] = b"~|~|~|~|~|~5818df499987fab124fac0cfc9edb83fa5578c36";

/// Length of [`TERMINATOR`]
pub const TERMINATOR_LEN: usize = TERMINATOR.len();

/// Result of feeding one chunk into a [`TerminatorScanner`]
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// Payload that is safe to forward; may be empty while a possible
    /// marker prefix is held back
    Forward(Bytes),
    /// The marker was found; `forward` precedes it and `discarded` bytes
    /// after it were dropped
    Terminated {
        /// Payload before the marker
        forward: Bytes,
        /// Bytes that followed the marker in the buffer
        discarded: usize,
    },
}

/// Incremental marker search over a byte stream
///
/// Only a tail that could still grow into the marker is ever held back, so a
/// marker split across reads at any point is found exactly once and payload
/// that merely contains the lead byte is never stalled.
#[derive(Debug, Default)]
pub struct TerminatorScanner {
    pending: BytesMut,
}

impl TerminatorScanner {
    /// Create an empty scanner
    pub fn new() -> Self {
        TerminatorScanner {
            pending: BytesMut::with_capacity(TERMINATOR_LEN * 2),
        }
    }

    /// Number of bytes currently held back
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed the next chunk read from the leg
    pub fn feed(&mut self, chunk: &[u8]) -> Scan {
        self.pending.extend_from_slice(chunk);

        if let Some(pos) = find(&self.pending, TERMINATOR) {
            let discarded = self.pending.len() - pos - TERMINATOR_LEN;
            let forward = self.pending.split_to(pos).freeze();
            self.pending.clear();
            return Scan::Terminated { forward, discarded };
        }

        let keep = partial_suffix(&self.pending);
        let ready = self.pending.len() - keep;
        Scan::Forward(self.pending.split_to(ready).freeze())
    }
}

/// Position of the first occurrence of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest suffix of `buf` that is a proper prefix of the marker
fn partial_suffix(buf: &[u8]) -> usize {
    let longest = buf.len().min(TERMINATOR_LEN - 1);
    (1..=longest)
        .rev()
        .find(|&k| buf[buf.len() - k..] == TERMINATOR[..k])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(scanner: &mut TerminatorScanner, chunks: &[&[u8]]) -> (Vec<u8>, usize) {
        let mut out = Vec::new();
        let mut found = 0;
        for chunk in chunks {
            match scanner.feed(chunk) {
                Scan::Forward(data) => out.extend_from_slice(&data),
                Scan::Terminated { forward, .. } => {
                    out.extend_from_slice(&forward);
                    found += 1;
                }
            }
        }
        (out, found)
    }

    #[test]
    fn test_terminator_shape() {
        assert_eq!(TERMINATOR[0], b'~');
        assert_eq!(TERMINATOR_LEN, 51);
    }

    #[test]
    fn test_plain_payload_passes_through() {
        let mut scanner = TerminatorScanner::new();
        let (out, found) = collect(&mut scanner, &[b"hello ", b"world"]);
        assert_eq!(out, b"hello world");
        assert_eq!(found, 0);
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn test_lead_byte_alone_does_not_stall() {
        let mut scanner = TerminatorScanner::new();
        let (out, _) = collect(&mut scanner, &[b"a~b", b"~~ x"]);
        assert_eq!(out, b"a~b~~ x");
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn test_marker_prefix_is_held_back() {
        let mut scanner = TerminatorScanner::new();
        assert_eq!(
            scanner.feed(b"data~|~|"),
            Scan::Forward(Bytes::from_static(b"data"))
        );
        assert_eq!(scanner.pending(), 4);

        // Not a marker after all: held bytes are released in order.
        assert_eq!(
            scanner.feed(b"x"),
            Scan::Forward(Bytes::from_static(b"~|~|x"))
        );
    }

    #[test]
    fn test_marker_in_single_chunk() {
        let mut scanner = TerminatorScanner::new();
        let mut chunk = b"payload".to_vec();
        chunk.extend_from_slice(TERMINATOR);
        chunk.extend_from_slice(b"junk");

        assert_eq!(
            scanner.feed(&chunk),
            Scan::Terminated {
                forward: Bytes::from_static(b"payload"),
                discarded: 4,
            }
        );
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn test_marker_split_at_every_point() {
        let mut stream = b"0123456789~abc".to_vec();
        stream.extend_from_slice(TERMINATOR);

        for split in 1..stream.len() {
            let mut scanner = TerminatorScanner::new();
            let (out, found) = collect(&mut scanner, &[&stream[..split], &stream[split..]]);
            assert_eq!(found, 1, "split at {}", split);
            assert_eq!(out, b"0123456789~abc", "split at {}", split);
        }
    }

    #[test]
    fn test_marker_fed_byte_by_byte() {
        let mut stream = b"abc".to_vec();
        stream.extend_from_slice(TERMINATOR);

        let chunks: Vec<&[u8]> = stream.chunks(1).collect();
        let mut scanner = TerminatorScanner::new();
        let (out, found) = collect(&mut scanner, &chunks);
        assert_eq!(out, b"abc");
        assert_eq!(found, 1);
    }

    #[test]
    fn test_partial_suffix() {
        assert_eq!(partial_suffix(b""), 0);
        assert_eq!(partial_suffix(b"abc"), 0);
        assert_eq!(partial_suffix(b"abc~"), 1);
        assert_eq!(partial_suffix(b"abc~|~"), 3);
        assert_eq!(partial_suffix(&TERMINATOR[..TERMINATOR_LEN - 1]), TERMINATOR_LEN - 1);
    }
}
