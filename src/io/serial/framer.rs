// src/io/serial/framer.rs
//
// Marker-based packet framing for one port.
//
// Three modes, chosen from the port configuration:
// - pass-through: every read chunk is one packet
// - end-marker only: a packet runs up to and including each end marker
// - start/end: a packet runs from a start marker through the next end marker;
//   bytes outside a start..end pair are dropped

use chrono::{DateTime, Local};

use super::marker;
use crate::io::Packet;

/// Maximum bytes held while waiting for a terminator (1 MiB)
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Resolved framing configuration for one port
#[derive(Debug, Clone, PartialEq)]
pub struct FramingConfig {
    pub buffering: bool,
    pub start_marker: Vec<u8>,
    pub end_marker: Vec<u8>,
    pub max_buffer: usize,
}

impl FramingConfig {
    /// Every chunk becomes a packet
    pub fn pass_through() -> Self {
        Self {
            buffering: false,
            start_marker: Vec::new(),
            end_marker: Vec::new(),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    /// Build from operator marker text
    pub fn from_specs(buffering: bool, start_spec: &str, end_spec: &str) -> Self {
        Self {
            buffering,
            start_marker: marker::resolve(start_spec),
            end_marker: marker::resolve(end_spec),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    /// Markers are ignored without buffering, and buffering without an
    /// end marker has nothing to split on.
    pub fn mode(&self) -> FramingMode {
        if !self.buffering || self.end_marker.is_empty() {
            FramingMode::PassThrough
        } else if self.start_marker.is_empty() {
            FramingMode::EndOnly
        } else {
            FramingMode::StartEnd
        }
    }
}

/// Effective framing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    PassThrough,
    EndOnly,
    StartEnd,
}

// =============================================================================
// Frame Extractor
// =============================================================================

/// Stateful framer for one port's byte stream.
///
/// Feed chunks with [`extend`](Self::extend) and pull frames with
/// [`next_frame`](Self::next_frame), or do both with [`ingest`](Self::ingest).
/// `next_frame` can be called again at any point and resumes where it left off.
pub struct FrameExtractor {
    config: FramingConfig,
    mode: FramingMode,
    buffer: Vec<u8>,
    /// Chunk held for pass-through mode until pulled
    passthrough: Option<Vec<u8>>,
    /// Bytes dropped by the size cap since creation
    truncated: u64,
}

impl FrameExtractor {
    pub fn new(config: FramingConfig) -> Self {
        let mode = config.mode();
        Self {
            config,
            mode,
            buffer: Vec::new(),
            passthrough: None,
            truncated: 0,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Bytes currently waiting for a terminator
    pub fn residual(&self) -> &[u8] {
        &self.buffer
    }

    /// Total bytes discarded by the size cap
    pub fn truncated_bytes(&self) -> u64 {
        self.truncated
    }

    /// Append a chunk, enforcing the size cap before any marker search.
    pub fn extend(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        if self.mode == FramingMode::PassThrough {
            match self.passthrough {
                Some(ref mut pending) => pending.extend_from_slice(chunk),
                None => self.passthrough = Some(chunk.to_vec()),
            }
            return;
        }

        self.buffer.extend_from_slice(chunk);

        // Sliding window: keep only the newest max_buffer bytes
        if self.buffer.len() > self.config.max_buffer {
            let excess = self.buffer.len() - self.config.max_buffer;
            self.buffer.drain(..excess);
            self.truncated += excess as u64;
        }
    }

    /// Pull the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match self.mode {
            FramingMode::PassThrough => self.passthrough.take(),
            FramingMode::EndOnly => {
                let end = find(&self.buffer, &self.config.end_marker, 0)?;
                let split = end + self.config.end_marker.len();
                Some(self.buffer.drain(..split).collect())
            }
            FramingMode::StartEnd => {
                let start = match find(&self.buffer, &self.config.start_marker, 0) {
                    Some(i) => i,
                    None => {
                        // No frame in flight
                        self.buffer.clear();
                        return None;
                    }
                };
                if start > 0 {
                    // Orphaned bytes before the start marker
                    self.buffer.drain(..start);
                }

                let end = find(
                    &self.buffer,
                    &self.config.end_marker,
                    self.config.start_marker.len(),
                )?;
                let split = end + self.config.end_marker.len();
                Some(self.buffer.drain(..split).collect())
            }
        }
    }

    /// Feed one chunk and return every packet it completes, in order.
    /// An empty chunk changes nothing.
    pub fn ingest(&mut self, label: &str, chunk: &[u8], timestamp: DateTime<Local>) -> Vec<Packet> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.extend(chunk);

        let mut packets = Vec::new();
        while let Some(bytes) = self.next_frame() {
            packets.push(Packet::new(label, timestamp, bytes));
        }
        packets
    }

    /// Emit whatever is left as a final, possibly malformed packet.
    pub fn flush(&mut self, label: &str, timestamp: DateTime<Local>) -> Option<Packet> {
        let bytes = match self.passthrough.take() {
            Some(pending) => pending,
            None if !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
            None => return None,
        };
        let mut packet = Packet::new(label, timestamp, bytes);
        packet.incomplete = true;
        Some(packet)
    }
}

/// Position of `needle` in `haystack` at or after `from`
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Local> {
        Local::now()
    }

    fn bytes_of(packets: &[Packet]) -> Vec<Vec<u8>> {
        packets.iter().map(|p| p.bytes.clone()).collect()
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(FramingConfig::from_specs(false, "STX", "ETX").mode(), FramingMode::PassThrough);
        assert_eq!(FramingConfig::from_specs(true, "", "ETX").mode(), FramingMode::EndOnly);
        assert_eq!(FramingConfig::from_specs(true, "STX", "ETX").mode(), FramingMode::StartEnd);
        // buffering without an end marker runs as pass-through
        assert_eq!(FramingConfig::from_specs(true, "STX", "").mode(), FramingMode::PassThrough);
    }

    #[test]
    fn test_pass_through_emits_each_chunk() {
        let mut framer = FrameExtractor::new(FramingConfig::pass_through());
        let packets = framer.ingest("RX1", &[0x02, 0x41, 0x03, 0x99], ts());
        assert_eq!(bytes_of(&packets), vec![vec![0x02, 0x41, 0x03, 0x99]]);
        assert!(framer.residual().is_empty());
        assert!(framer.flush("RX1", ts()).is_none());
    }

    #[test]
    fn test_end_only_across_chunks() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "", "0x03"));

        let first = framer.ingest("RX1", &[0xAA, 0xBB, 0x03], ts());
        let second = framer.ingest("RX1", &[0xCC, 0x03], ts());

        assert_eq!(bytes_of(&first), vec![vec![0xAA, 0xBB, 0x03]]);
        assert_eq!(bytes_of(&second), vec![vec![0xCC, 0x03]]);
        assert!(framer.residual().is_empty());
    }

    #[test]
    fn test_end_only_many_per_chunk_and_residual() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "", "\r\n"));
        let packets = framer.ingest("RX1", b"ab\r\ncd\r\nef", ts());
        assert_eq!(bytes_of(&packets), vec![b"ab\r\n".to_vec(), b"cd\r\n".to_vec()]);
        assert_eq!(framer.residual(), b"ef");

        // marker split across chunks
        let packets = framer.ingest("RX1", b"\r", ts());
        assert!(packets.is_empty());
        let packets = framer.ingest("RX1", b"\n", ts());
        assert_eq!(bytes_of(&packets), vec![b"ef\r\n".to_vec()]);
    }

    #[test]
    fn test_start_end_drops_orphans() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "0x02", "0x03"));
        let packets = framer.ingest("RX1", &[0xFF, 0x02, 0x11, 0x22, 0x03, 0x99], ts());

        assert_eq!(bytes_of(&packets), vec![vec![0x02, 0x11, 0x22, 0x03]]);
        // 0x99 has no start marker in front of it, so the next search drops it
        assert!(framer.residual().is_empty());
    }

    #[test]
    fn test_start_end_waits_for_end_marker() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "STX", "ETX"));
        assert!(framer.ingest("RX1", &[0x55, 0x02, 0x41], ts()).is_empty());
        assert_eq!(framer.residual(), &[0x02, 0x41]);

        let packets = framer.ingest("RX1", &[0x42, 0x03, 0x02, 0x43, 0x03], ts());
        assert_eq!(
            bytes_of(&packets),
            vec![vec![0x02, 0x41, 0x42, 0x03], vec![0x02, 0x43, 0x03]]
        );
        assert!(framer.residual().is_empty());
    }

    #[test]
    fn test_start_end_searches_end_after_start_bytes() {
        // Same byte for start and end: the end must come after the start marker
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "0x7E", "0x7E"));
        let packets = framer.ingest("RX1", &[0x7E, 0x01, 0x7E], ts());
        assert_eq!(bytes_of(&packets), vec![vec![0x7E, 0x01, 0x7E]]);
    }

    #[test]
    fn test_size_cap_keeps_newest_bytes() {
        let cap = 64;
        let mut framer =
            FrameExtractor::new(FramingConfig::from_specs(true, "", "ETX").with_max_buffer(cap));

        let stream: Vec<u8> = (0..500u32).map(|i| (i % 200) as u8 + 0x10).collect();
        for chunk in stream.chunks(37) {
            assert!(framer.ingest("RX1", chunk, ts()).is_empty());
            assert!(framer.residual().len() <= cap);
        }
        assert_eq!(framer.residual(), &stream[stream.len() - cap..]);
        assert_eq!(framer.truncated_bytes(), (stream.len() - cap) as u64);
    }

    #[test]
    fn test_size_cap_default_one_mebibyte() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "", "ETX"));
        let block = vec![0x55u8; 300 * 1024];
        for _ in 0..4 {
            framer.ingest("RX1", &block, ts());
            assert!(framer.residual().len() <= DEFAULT_MAX_BUFFER);
        }
        assert_eq!(framer.residual().len(), DEFAULT_MAX_BUFFER);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        for config in [
            FramingConfig::pass_through(),
            FramingConfig::from_specs(true, "", "ETX"),
            FramingConfig::from_specs(true, "STX", "ETX"),
        ] {
            let mut framer = FrameExtractor::new(config);
            framer.ingest("RX1", &[0x02, 0x41], ts());
            let before = framer.residual().to_vec();
            assert!(framer.ingest("RX1", &[], ts()).is_empty());
            assert_eq!(framer.residual(), before.as_slice());
        }
    }

    #[test]
    fn test_next_frame_is_restartable() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "", "ETX"));
        framer.extend(&[0x01, 0x03, 0x02, 0x03, 0x04]);

        assert_eq!(framer.next_frame(), Some(vec![0x01, 0x03]));
        // caller may stop pulling and come back later
        framer.extend(&[0x03]);
        assert_eq!(framer.next_frame(), Some(vec![0x02, 0x03]));
        assert_eq!(framer.next_frame(), Some(vec![0x04, 0x03]));
        assert_eq!(framer.next_frame(), None);
    }

    #[test]
    fn test_flush_marks_incomplete() {
        let mut framer = FrameExtractor::new(FramingConfig::from_specs(true, "STX", "ETX"));
        framer.ingest("RX2", &[0x02, 0x10, 0x20], ts());

        let packet = framer.flush("RX2", ts()).unwrap();
        assert!(packet.incomplete);
        assert_eq!(packet.label, "RX2");
        assert_eq!(packet.bytes, vec![0x02, 0x10, 0x20]);
        assert!(framer.flush("RX2", ts()).is_none());
    }
}
