// Server-sent event framing.
//
// The network delivers arbitrary byte chunks; a logical event is the text
// between blank lines. `SseFramer` buffers partial input and yields each
// complete frame exactly once, in order.

use bytes::{Bytes, BytesMut};

/// Splits a raw event stream into frames delimited by a blank line.
#[derive(Debug, Default)]
pub struct SseFramer {
    buf: BytesMut,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    ///
    /// Carriage returns are dropped so CRLF streams frame the same as LF.
    /// Frames that are empty after trimming are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf
            .extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        while let Some(pos) = find_blank_line(&self.buf) {
            let frame = self.buf.split_to(pos).freeze();
            let _ = self.buf.split_to(2);
            if !frame.iter().all(u8::is_ascii_whitespace) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
