//! Line reconstruction over raw pipe chunks

use std::collections::VecDeque;

/// Captured bytes kept per stream for verdicts
pub const MAX_CAPTURE: usize = 64 * 1024;

/// Longest line kept before it is cut and emitted as is
pub const MAX_LINE: usize = 64 * 1024;

/// Accumulates raw bytes from one stream and splits them into lines.
///
/// Both `\n` and `\r` terminate a line, since progress-printing tools rewrite
/// their status line with carriage returns. Empty lines are dropped, and a
/// line longer than [`MAX_LINE`] is emitted in pieces of that size.
#[derive(Debug, Default)]
pub struct LineBuffer {
    raw: Vec<u8>,
    partial: Vec<u8>,
    lines: VecDeque<String>,
}

impl LineBuffer {
    pub fn push(&mut self, data: &[u8]) {
        self.raw.extend_from_slice(data);
        if self.raw.len() > 2 * MAX_CAPTURE {
            let excess = self.raw.len() - MAX_CAPTURE;
            self.raw.drain(..excess);
        }
        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                self.flush_partial();
            } else {
                self.partial.push(byte);
                if self.partial.len() >= MAX_LINE {
                    self.flush_partial();
                }
            }
        }
    }

    /// Treat whatever is buffered as a final line (stream reached EOF)
    pub fn finish(&mut self) {
        self.flush_partial();
    }

    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            self.lines
                .push_back(String::from_utf8_lossy(&self.partial).into_owned());
            self.partial.clear();
        }
    }

    /// Complete lines received since the last call
    pub fn take_lines(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    /// Tail of the raw bytes seen on this stream
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        let start = self.raw.len().saturating_sub(MAX_CAPTURE);
        &self.raw[start..]
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.raw()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_cr_and_lf_across_chunks() {
        let mut buf = LineBuffer::default();
        buf.push(b"Elapsed 00:00:01\rElap");
        assert_eq!(buf.take_lines(), vec!["Elapsed 00:00:01".to_string()]);
        buf.push(b"sed 00:00:02\r\n");
        assert_eq!(buf.take_lines(), vec!["Elapsed 00:00:02".to_string()]);
        buf.push(b"tail");
        assert!(buf.take_lines().is_empty());
        buf.finish();
        assert_eq!(buf.take_lines(), vec!["tail".to_string()]);
    }

    #[test]
    fn unterminated_output_is_cut_into_bounded_lines() {
        let mut buf = LineBuffer::default();
        for _ in 0..5 {
            buf.push(&[b'.'; MAX_LINE / 2]);
        }
        let lines = buf.take_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.len() == MAX_LINE));
        assert_eq!(buf.partial.len(), MAX_LINE / 2);
        buf.push(b"\n");
        assert_eq!(buf.take_lines()[0].len(), MAX_LINE / 2);
    }

    #[test]
    fn raw_capture_is_bounded() {
        let mut buf = LineBuffer::default();
        for _ in 0..10 {
            buf.push(&[b'x'; MAX_CAPTURE / 2]);
        }
        assert_eq!(buf.raw().len(), MAX_CAPTURE);
    }
}
