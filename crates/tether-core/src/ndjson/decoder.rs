//! Incremental line decoder for subprocess output.
//!
//! Bytes are split on `\n` before any UTF-8 decoding happens, so a
//! multi-byte character cut in half by a read boundary stays buffered until
//! the rest of its line arrives. Unlike `LinesCodec`, a `\r` before the
//! newline is kept as line content.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Maximum length of a single line (1 MiB).
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One item produced by [`LineDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, without its `\n`.
    Line(String),
    /// A line grew past `limit` bytes. Its bytes are dropped up to and
    /// including the next newline; decoding carries on after it.
    Overflow { limit: usize },
}

/// `tokio_util` decoder turning a raw byte stream into non-blank text lines.
///
/// `decode` yields every line a read completes, `decode_eof` yields the
/// final unterminated line. Read errors surface from `FramedRead` once as
/// `Err`, after which the stream ends.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    max_length: usize,
    /// Bytes of the buffer already known to contain no newline.
    next_index: usize,
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub const fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    pub const fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub const fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Decoder for LineDecoder {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|&b| b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    if let Some(text) = non_blank(&line[..end]) {
                        return Ok(Some(Frame::Line(text)));
                    }
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    return Ok(Some(Frame::Overflow {
                        limit: self.max_length,
                    }));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        Ok(non_blank(&rest).map(Frame::Line))
    }
}

fn non_blank(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes);
    (!line.trim().is_empty()).then(|| line.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(text: &str) -> Frame {
        Frame::Line(text.to_owned())
    }

    fn drain(decoder: &mut LineDecoder, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn finish(decoder: &mut LineDecoder, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode_eof(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn decode_all(bytes: &[u8], chunk: usize) -> Vec<Frame> {
        let mut decoder = LineDecoder::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for c in bytes.chunks(chunk) {
            buf.extend_from_slice(c);
            frames.extend(drain(&mut decoder, &mut buf));
        }
        frames.extend(finish(&mut decoder, &mut buf));
        frames
    }

    #[test]
    fn splits_on_newline() {
        let mut decoder = LineDecoder::new();
        let mut buf = BytesMut::from(&b"a\nb\n"[..]);
        assert_eq!(drain(&mut decoder, &mut buf), [line("a"), line("b")]);
        assert!(finish(&mut decoder, &mut buf).is_empty());
    }

    #[test]
    fn keeps_partial_line_between_reads() {
        let mut decoder = LineDecoder::new();
        let mut buf = BytesMut::from(&b"{\"type\":"[..]);
        assert!(drain(&mut decoder, &mut buf).is_empty());
        assert_eq!(buf.len(), 8);

        buf.extend_from_slice(b"\"x\"}\nrest");
        assert_eq!(drain(&mut decoder, &mut buf), [line("{\"type\":\"x\"}")]);
        assert_eq!(finish(&mut decoder, &mut buf), [line("rest")]);
    }

    #[test]
    fn preserves_carriage_return() {
        assert_eq!(decode_all(b"line\r\n", 64), [line("line\r")]);
    }

    #[test]
    fn skips_blank_lines() {
        assert_eq!(decode_all(b"\n  \n\r\nx\n\t\n   ", 64), [line("x")]);
    }

    #[test]
    fn lines_are_not_trimmed() {
        assert_eq!(decode_all(b"  padded  \n", 64), [line("  padded  ")]);
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let text = "héllo → 世界\n";
        let bytes = text.as_bytes();
        // Split inside the 3-byte arrow.
        let cut = text.find('→').unwrap() + 1;
        let mut decoder = LineDecoder::new();
        let mut buf = BytesMut::from(&bytes[..cut]);
        assert!(drain(&mut decoder, &mut buf).is_empty());
        buf.extend_from_slice(&bytes[cut..]);
        assert_eq!(drain(&mut decoder, &mut buf), [line("héllo → 世界")]);
    }

    #[test]
    fn chunk_size_independence() {
        let input = "{\"a\":\"ü\"}\n\n{\"b\":\"日本語\"}\r\n  \nemoji 🎉 tail\n{\"partial\":\"ç\"}";
        let whole = decode_all(input.as_bytes(), input.len());
        assert_eq!(whole.len(), 4);
        for chunk in 1..=7 {
            assert_eq!(decode_all(input.as_bytes(), chunk), whole, "chunk={chunk}");
        }
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(decode_all(b"ok\xff\n", 64), [line("ok\u{fffd}")]);
    }

    #[test]
    fn line_at_limit_is_accepted() {
        let mut decoder = LineDecoder::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcd\nabcde\nok\n"[..]);
        assert_eq!(
            drain(&mut decoder, &mut buf),
            [line("abcd"), Frame::Overflow { limit: 4 }, line("ok")]
        );
    }

    #[test]
    fn endless_line_keeps_buffer_bounded() {
        let limit = 16 * 1024;
        let mut decoder = LineDecoder::with_max_length(limit);
        let mut buf = BytesMut::new();
        let chunk = [b'x'; 8 * 1024];
        let mut frames = Vec::new();

        for _ in 0..512 {
            buf.extend_from_slice(&chunk);
            frames.extend(drain(&mut decoder, &mut buf));
            assert!(buf.len() <= limit + 1, "buffer held {} bytes", buf.len());
        }
        assert_eq!(frames, [Frame::Overflow { limit }]);

        buf.extend_from_slice(b"tail of the long one\n{\"ok\":1}\n");
        assert_eq!(drain(&mut decoder, &mut buf), [line("{\"ok\":1}")]);
    }

    #[test]
    fn default_limit_discards_oversized_line() {
        let mut big = vec![b'y'; MAX_LINE_BYTES + 1];
        big.extend_from_slice(b"\nnext\n");
        let frames = decode_all(&big, 64 * 1024);
        assert_eq!(
            frames,
            [
                Frame::Overflow {
                    limit: MAX_LINE_BYTES
                },
                line("next")
            ]
        );
    }

    #[test]
    fn overflow_at_eof_yields_nothing_more() {
        let mut decoder = LineDecoder::with_max_length(4);
        let mut buf = BytesMut::from(&b"toolong"[..]);
        assert_eq!(
            finish(&mut decoder, &mut buf),
            [Frame::Overflow { limit: 4 }]
        );
        assert!(buf.is_empty());
    }
}
