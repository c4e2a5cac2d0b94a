//! Boundary-framed reading over a continuous byte stream.
//!
//! The helper's stdout and stderr are plain pipes that stay open for the whole
//! session. Each response ends with the server boundary token, so a reader
//! that hands out bytes must never hand out the token itself and must report
//! end-of-stream once it has been seen.
//!
//! Buffer layout (all offsets into `buf`):
//!
//! ```text
//! 0 .. read_pos          already consumed by the caller
//! read_pos .. cleared    proven boundary-free, ready to hand out
//! cleared .. scan_pos    withheld: partial boundary match (or the boundary)
//! scan_pos .. filled     read from the source, not yet scanned
//! ```

use std::io::{self, BufRead, Read};

use crate::kmp::Pattern;

/// Default buffer capacity.
pub const DEFAULT_CAPACITY: usize = 32 * 1024;

/// A reader that stops at a boundary token.
#[derive(Debug)]
pub struct BoundaryReader<R> {
    inner: R,
    boundary: Pattern,
    buf: Box<[u8]>,
    read_pos: usize,
    cleared: usize,
    scan_pos: usize,
    filled: usize,
    matched: usize,
    manual_remaining: u64,
    boundary_found: bool,
    source_eof: bool,
}

impl<R: Read> BoundaryReader<R> {
    pub fn new(inner: R, boundary: Pattern) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, inner, boundary)
    }

    /// The capacity is raised to at least twice the boundary length so a
    /// withheld partial match never fills the buffer.
    pub fn with_capacity(capacity: usize, inner: R, boundary: Pattern) -> Self {
        let capacity = capacity.max(boundary.len() * 2).max(16);
        Self {
            inner,
            boundary,
            buf: vec![0; capacity].into_boxed_slice(),
            read_pos: 0,
            cleared: 0,
            scan_pos: 0,
            filled: 0,
            matched: 0,
            manual_remaining: 0,
            boundary_found: false,
            source_eof: false,
        }
    }

    pub fn boundary(&self) -> &Pattern {
        &self.boundary
    }

    /// True once the boundary has been matched in the current frame.
    pub fn boundary_reached(&self) -> bool {
        self.boundary_found
    }

    /// True once the underlying source reported end-of-file.
    pub fn source_exhausted(&self) -> bool {
        self.source_eof
    }

    /// Treat the next `n` bytes after the current read position as payload.
    ///
    /// They are handed out without boundary scanning. Scanning restarts at
    /// the read position, so anything already scanned ahead (including a
    /// boundary "found" inside the payload) is re-evaluated.
    pub fn manual_clear_next_bytes(&mut self, n: u64) {
        self.scan_pos = self.read_pos;
        self.cleared = self.read_pos;
        self.matched = 0;
        self.boundary_found = false;
        self.manual_remaining = n;
        self.scan();
    }

    /// Read and discard everything up to and including the boundary.
    ///
    /// Returns `Ok(true)` if the boundary was reached and `Ok(false)` if the
    /// source ended first.
    pub fn drain(&mut self) -> io::Result<bool> {
        loop {
            let available = self.fill_buf()?.len();
            if available == 0 {
                return Ok(self.boundary_found);
            }
            self.consume(available);
        }
    }

    /// Forget the current frame so the reader can serve the next one.
    ///
    /// Bytes between the read position and the end of the boundary are
    /// dropped. Bytes already buffered after the boundary belong to the next
    /// frame and are kept for scanning.
    pub fn discard_and_reset(&mut self) {
        self.read_pos = self.scan_pos;
        self.cleared = self.scan_pos;
        self.matched = 0;
        self.manual_remaining = 0;
        self.boundary_found = false;
    }

    /// Read one `\n`-terminated line without the terminator.
    ///
    /// Returns `None` at the end of the frame.
    pub fn read_frame_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn scan(&mut self) {
        let len = self.boundary.len();
        while self.scan_pos < self.filled && !self.boundary_found {
            let byte = self.buf[self.scan_pos];
            self.scan_pos += 1;

            if self.manual_remaining > 0 {
                self.manual_remaining -= 1;
                self.cleared = self.scan_pos;
                continue;
            }

            self.matched = self.boundary.advance(self.matched, byte);
            if self.matched == len {
                self.boundary_found = true;
                self.cleared = self.scan_pos - len;
            } else {
                self.cleared = self.scan_pos - self.matched;
            }
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        if self.read_pos > 0 {
            self.buf.copy_within(self.read_pos..self.filled, 0);
            self.filled -= self.read_pos;
            self.scan_pos -= self.read_pos;
            self.cleared -= self.read_pos;
            self.read_pos = 0;
        }

        if self.scan_pos < self.filled {
            self.scan();
            return Ok(());
        }

        if self.source_eof {
            self.matched = 0;
            self.cleared = self.scan_pos;
            return Ok(());
        }

        let n = loop {
            match self.inner.read(&mut self.buf[self.filled..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if n == 0 {
            // A partial match that never completes is ordinary data.
            self.source_eof = true;
            self.matched = 0;
            self.cleared = self.scan_pos;
            return Ok(());
        }

        self.filled += n;
        self.scan();
        Ok(())
    }
}

impl<R: Read> BufRead for BoundaryReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.read_pos == self.cleared {
            if self.boundary_found {
                return Ok(&[]);
            }
            if self.source_eof && self.scan_pos == self.filled && self.cleared == self.scan_pos {
                return Ok(&[]);
            }
            self.refill()?;
        }
        Ok(&self.buf[self.read_pos..self.cleared])
    }

    fn consume(&mut self, amt: usize) {
        self.read_pos = (self.read_pos + amt).min(self.cleared);
    }
}

impl<R: Read> Read for BoundaryReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out the given chunks one `read` call at a time.
    struct Chunked {
        chunks: VecDeque<Vec<u8>>,
    }

    impl Chunked {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            }
        }
    }

    impl Read for Chunked {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(out.len());
            out[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.chunks.push_front(chunk);
            }
            Ok(n)
        }
    }

    fn reader(boundary: &str, chunks: &[&[u8]]) -> BoundaryReader<Chunked> {
        BoundaryReader::new(Chunked::new(chunks), Pattern::new(boundary).unwrap())
    }

    fn read_all<R: Read>(r: &mut BoundaryReader<R>) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_stops_at_boundary() {
        let mut r = reader("XYZZY", &[b"hello worldXYZZYnext frame"]);
        assert_eq!(read_all(&mut r), b"hello world");
        assert!(r.boundary_reached());
        // Further reads keep reporting end-of-stream.
        assert_eq!(read_all(&mut r), b"");
    }

    #[test]
    fn test_partial_prefix_is_not_truncated() {
        let mut r = reader("XYZZY", &[b"payload...XYZZ", b"Q and more content"]);
        assert_eq!(read_all(&mut r), b"payload...XYZZQ and more content");
        assert!(!r.boundary_reached());
        assert!(r.source_exhausted());
    }

    #[test]
    fn test_partial_prefix_at_source_end_is_delivered() {
        let mut r = reader("XYZZY", &[b"tail XYZ"]);
        assert_eq!(read_all(&mut r), b"tail XYZ");
        assert!(!r.boundary_reached());
    }

    #[test]
    fn test_boundary_split_across_reads() {
        let boundary = "0123456789";
        let mut r = reader(boundary, &[b"data-012345", b"6789trailing"]);
        assert_eq!(read_all(&mut r), b"data-");
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_boundary_split_six_then_four() {
        let mut r = reader("ABCDEFGHIJ", &[b"ABCDEF", b"GHIJ"]);
        assert_eq!(read_all(&mut r), b"");
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_boundary_split_byte_by_byte() {
        let input = b"abcABCDEFGHIJdef";
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        let mut r = reader("ABCDEFGHIJ", &chunks);
        assert_eq!(read_all(&mut r), b"abc");
    }

    #[test]
    fn test_self_overlapping_boundary() {
        // Falling back to zero after "ABABA" + 'B' would miss this boundary.
        let mut r = reader("ABABAC", &[b"xxABABA", b"BACyy"]);
        assert_eq!(read_all(&mut r), b"xxAB");
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_repeated_byte_boundary() {
        let mut r = reader("AAB", &[b"xAAAAB"]);
        assert_eq!(read_all(&mut r), b"xAA");
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_withheld_bytes_released_after_mismatch() {
        let mut r = reader("XYZZY", &[b"ab", b"XY", b"Zc", b"XYZZY"]);
        assert_eq!(read_all(&mut r), b"abXYZc");
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_discard_and_reset_serves_next_frame() {
        let mut r = reader("--B--", &[b"first--B--second--B--"]);
        assert_eq!(read_all(&mut r), b"first");
        r.discard_and_reset();
        assert_eq!(read_all(&mut r), b"second");
        r.discard_and_reset();
        assert_eq!(read_all(&mut r), b"");
        assert!(!r.boundary_reached());
    }

    #[test]
    fn test_drain_discards_rest_of_frame() {
        let mut r = reader("--B--", &[b"line one\nline two\n--B--", b"next--B--"]);
        assert_eq!(r.read_frame_line().unwrap().as_deref(), Some("line one"));
        assert!(r.drain().unwrap());
        r.discard_and_reset();
        assert_eq!(read_all(&mut r), b"next");
    }

    #[test]
    fn test_drain_reports_missing_boundary() {
        let mut r = reader("--B--", &[b"truncated"]);
        assert!(!r.drain().unwrap());
    }

    #[test]
    fn test_manual_clear_skips_scanning() {
        // The payload contains the boundary itself.
        let mut r = reader("XYZZY", &[b"5\nXYZZYXYZZY"]);
        let size: u64 = r.read_frame_line().unwrap().unwrap().parse().unwrap();
        r.manual_clear_next_bytes(size);
        assert_eq!(read_all(&mut r), b"XYZZY");
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_manual_clear_across_refills() {
        let mut r = reader("END", &[b"4\nEN", b"D!", b"tailEND"]);
        let size: u64 = r.read_frame_line().unwrap().unwrap().parse().unwrap();
        r.manual_clear_next_bytes(size);
        let mut payload = vec![0; 4];
        r.read_exact(&mut payload).unwrap();
        assert_eq!(payload, b"END!");
        assert_eq!(read_all(&mut r), b"tail");
    }

    #[test]
    fn test_small_capacity_large_payload() {
        let mut input = vec![b'a'; 1000];
        input.extend_from_slice(b"<<STOP>>");
        let mut r = BoundaryReader::with_capacity(
            4,
            Chunked::new(&[&input]),
            Pattern::new("<<STOP>>").unwrap(),
        );
        assert_eq!(read_all(&mut r), vec![b'a'; 1000]);
        assert!(r.boundary_reached());
    }

    #[test]
    fn test_lines_within_frame() {
        let mut r = reader("##", &[b"F\n4096\nD\n", b"12\n##"]);
        let lines: Vec<String> = (&mut r).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["F", "4096", "D", "12"]);
    }
}
