//! Newline-delimited JSON framing.
//!
//! Every message travels as one JSON document followed by `\n`. Writers flush
//! after each frame so a peer never waits on a buffered update. [`FrameReader`]
//! keeps partially received lines across read timeouts, so a socket with a
//! read timeout can be polled without losing data. A line longer than the
//! reader's frame limit fails the stream instead of being buffered.
use std::io::{BufRead, BufReader, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RatesError;
use crate::result::Result;

/// Default upper bound for one frame, newline included.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Serializes `frame` as one JSON line and flushes `writer`.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Buffered reader that yields one decoded frame per line.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    max_frame_len: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte source, accepting frames of up to [`MAX_FRAME_LEN`] bytes.
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_len(inner, MAX_FRAME_LEN)
    }

    /// Wraps a byte source with a custom frame limit.
    pub fn with_max_frame_len(inner: R, max_frame_len: usize) -> Self {
        FrameReader {
            inner: BufReader::new(inner),
            pending: Vec::new(),
            max_frame_len,
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` once the peer closed the stream; an unterminated
    /// trailing line is discarded. Blank lines are skipped. A malformed line
    /// fails with `RatesError::Json` and is consumed, so the next call
    /// continues with the following line. On a read timeout the bytes read
    /// so far are kept for the next call. A line that grows past the frame
    /// limit fails with `RatesError::Transport`; the stream is unusable after
    /// that.
    pub fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let budget = (self.max_frame_len + 1).saturating_sub(self.pending.len());
            let read = (&mut self.inner)
                .take(budget as u64)
                .read_until(b'\n', &mut self.pending)?;
            if read == 0 {
                self.pending.clear();
                return Ok(None);
            }
            if self.pending.last() != Some(&b'\n') {
                if self.pending.len() > self.max_frame_len {
                    self.pending.clear();
                    return Err(RatesError::Transport(format!(
                        "frame longer than {} bytes",
                        self.max_frame_len
                    )));
                }
                continue;
            }

            let line = std::mem::take(&mut self.pending);
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(trimmed)?));
        }
    }

    /// Gives back the underlying source.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::error::RatesError;
    use crate::protocol::RateRequest;
    use std::io::{self, Cursor};

    #[test]
    fn writes_one_line_per_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, &RateRequest::new(Currency::EUR, Currency::USD)).unwrap();
        write_frame(&mut out, &RateRequest::new(Currency::USD, Currency::GBP)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn reads_frames_until_eof() {
        let input = "{\"base\":\"EUR\",\"destination\":\"USD\"}\n\n{\"base\":\"usd\",\"destination\":\"GBP\"}\n";
        let mut reader = FrameReader::new(Cursor::new(input));
        let first: RateRequest = reader.read_frame().unwrap().unwrap();
        assert_eq!(first, RateRequest::new(Currency::EUR, Currency::USD));
        // Currency codes on the wire are case sensitive.
        assert!(matches!(reader.read_frame::<RateRequest>(), Err(RatesError::Json(_))));
        assert!(reader.read_frame::<RateRequest>().unwrap().is_none());
    }

    #[test]
    fn malformed_line_does_not_poison_the_stream() {
        let input = "not json\n{\"base\":\"EUR\",\"destination\":\"JPY\"}\n";
        let mut reader = FrameReader::new(Cursor::new(input));
        assert!(matches!(reader.read_frame::<RateRequest>(), Err(RatesError::Json(_))));
        let next: RateRequest = reader.read_frame().unwrap().unwrap();
        assert_eq!(next.destination, Currency::JPY);
    }

    #[test]
    fn unterminated_line_past_the_limit_fails() {
        let flood = io::repeat(b'a').take(8 * MAX_FRAME_LEN as u64);
        let mut reader = FrameReader::new(flood);
        match reader.read_frame::<RateRequest>() {
            Err(RatesError::Transport(message)) => assert!(message.contains("frame longer")),
            other => panic!("expected transport error, got {:?}", other),
        }
        assert!(reader.pending.capacity() <= 4 * (MAX_FRAME_LEN + 1));
    }

    #[test]
    fn frame_at_the_limit_is_accepted() {
        let line = "{\"base\":\"EUR\",\"destination\":\"USD\"}\n";
        let mut reader = FrameReader::with_max_frame_len(Cursor::new(line), line.len());
        let frame: RateRequest = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.destination, Currency::USD);

        let mut reader = FrameReader::with_max_frame_len(Cursor::new(line), line.len() - 2);
        assert!(matches!(
            reader.read_frame::<RateRequest>(),
            Err(RatesError::Transport(_))
        ));
    }

    /// Yields its chunks one read at a time, timing out between them.
    struct Stuttering {
        chunks: Vec<&'static [u8]>,
        timed_out: bool,
    }

    impl Read for Stuttering {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.timed_out && !self.chunks.is_empty() {
                self.timed_out = true;
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"));
            }
            self.timed_out = false;
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn keeps_partial_line_across_timeouts() {
        let source = Stuttering {
            chunks: vec![b"{\"base\":\"EUR\",", b"\"destination\":\"CHF\"}\n"],
            timed_out: false,
        };
        let mut reader = FrameReader::new(source);
        let mut timeouts = 0;
        let frame: RateRequest = loop {
            match reader.read_frame() {
                Ok(Some(frame)) => break frame,
                Ok(None) => panic!("stream ended early"),
                Err(e) if e.is_timeout() => timeouts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        };
        assert_eq!(frame.destination, Currency::CHF);
        assert_eq!(timeouts, 2);
    }
}
