use bytes::{Buf, BytesMut};

fn is_line_terminator(c: u8) -> bool {
    c == b'\r' || c == b'\n'
}

/// Accumulates raw socket bytes and splits them into protocol lines.
///
/// Both CRLF and bare-LF terminators are accepted, and a partial line is
/// buffered until its terminator arrives. The buffer implements
/// [`bytes::BufMut`], so a session can `read_buf` from its socket directly
/// into it.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: BytesMut,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }
}

impl LineBuffer {
    pub fn feed_from_slice(&mut self, buf: &[u8]) {
        self.buffer.extend_from_slice(buf);
    }

    /// Returns the next complete line, terminator stripped, or `None` if no
    /// full line is buffered yet. Empty lines are skipped.
    pub fn next_line(&mut self) -> Option<BytesMut> {
        while self.buffer.first().copied().is_some_and(is_line_terminator) {
            self.buffer.advance(1);
        }

        let end = self.buffer.iter().position(|&c| is_line_terminator(c))?;
        let line = self.buffer.split_to(end);
        // the terminator itself is skipped on the next call
        Some(line)
    }
}

// Delegates to the inner BytesMut so that tokio's `read_buf` can write
// received bytes straight into the line buffer without an extra copy.
unsafe impl bytes::BufMut for LineBuffer {
    fn remaining_mut(&self) -> usize {
        self.buffer.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, count: usize) {
        // SAFETY: forwarded as-is; the inner buffer enforces its own bounds
        unsafe {
            self.buffer.advance_mut(count);
        }
    }

    fn chunk_mut(&mut self) -> &mut bytes::buf::UninitSlice {
        self.buffer.chunk_mut()
    }
}
