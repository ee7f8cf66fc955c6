//! Pull-based windowed decompression.
//!
//! [`DecompressReader`] owns a compressed source and a [`Decompressor`]
//! engine.  Output is produced on demand: whenever a caller asks for more
//! bytes than are buffered, the reader pulls another window of compressed
//! input from the source and runs it through the engine.  Nothing is
//! decompressed past what the caller asked for, which bounds memory use by
//! the request size rather than by whatever the stream claims to expand to.

use std::io::{self, Read};

use super::CodecError;

/// Compressed bytes fed to the engine per pull.
pub const DEFAULT_WINDOW_SIZE: usize = 1024;

/// Upper bound on output space reserved per engine step.
const OUTPUT_STEP: usize = 64 * 1024;

/// One incremental decompression engine.
pub trait Decompressor {
    /// Feed `input`, appending output into the spare capacity of `output`.
    /// Returns the number of input bytes consumed and whether the end of the
    /// compressed stream was reached.
    fn step(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool), CodecError>;
}

impl Decompressor for flate2::Decompress {
    fn step(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool), CodecError> {
        let before = self.total_in();
        let status = self
            .decompress_vec(input, output, flate2::FlushDecompress::None)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        let consumed = (self.total_in() - before) as usize;
        Ok((consumed, matches!(status, flate2::Status::StreamEnd)))
    }
}

impl Decompressor for bzip2::Decompress {
    fn step(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool), CodecError> {
        let before = self.total_in();
        let status = self
            .decompress_vec(input, output)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        let consumed = (self.total_in() - before) as usize;
        Ok((consumed, matches!(status, bzip2::Status::StreamEnd)))
    }
}

pub struct DecompressReader<R: Read, D: Decompressor> {
    source:     R,
    engine:     D,
    window:     usize,
    /// Compressed bytes pulled from `source` but not yet consumed.
    pending:    Vec<u8>,
    /// Decompressed bytes; `out[pos..]` has not been handed out yet.
    out:        Vec<u8>,
    pos:        usize,
    source_eof: bool,
    finished:   bool,
}

impl<R: Read, D: Decompressor> DecompressReader<R, D> {
    pub fn new(source: R, engine: D, window: usize) -> Self {
        Self {
            source,
            engine,
            window:     window.max(1),
            pending:    Vec::new(),
            out:        Vec::new(),
            pos:        0,
            source_eof: false,
            finished:   false,
        }
    }

    /// Bytes decompressed but not yet returned.
    pub fn buffered(&self) -> usize {
        self.out.len() - self.pos
    }

    /// True once the compressed stream has ended (or the source ran dry).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Return the next `n` decompressed bytes, decompressing as much input as
    /// needed.  Fewer than `n` bytes are returned only at end of stream.
    pub fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        self.fill(n)?;
        let take = n.min(self.buffered());
        let chunk = self.out[self.pos..self.pos + take].to_vec();
        self.pos += take;
        self.compact();
        Ok(chunk)
    }

    fn fill(&mut self, want: usize) -> Result<(), CodecError> {
        while self.buffered() < want && !self.finished {
            if self.pending.is_empty() {
                self.pull_window()?;
            }

            // The engine may still hold output from earlier input, so it is
            // stepped even when no new input arrived.
            let room = (want - self.buffered()).clamp(1, OUTPUT_STEP);
            self.out.reserve(room);
            let produced_before = self.out.len();
            let (consumed, ended) = self.engine.step(&self.pending, &mut self.out)?;
            self.pending.drain(..consumed);

            if ended {
                self.finished = true;
            } else if consumed == 0 && self.out.len() == produced_before && !self.pull_window()? {
                // No progress and no more input: the stream was truncated.
                self.finished = true;
            }
        }
        Ok(())
    }

    /// Append one window of compressed input to `pending`.
    fn pull_window(&mut self) -> Result<bool, CodecError> {
        if self.source_eof {
            return Ok(false);
        }
        let start = self.pending.len();
        self.pending.resize(start + self.window, 0);
        let n = loop {
            match self.source.read(&mut self.pending[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        self.pending.truncate(start + n);
        if n == 0 {
            self.source_eof = true;
        }
        Ok(n > 0)
    }

    fn compact(&mut self) {
        if self.pos > 0 && self.pos * 2 >= self.out.len() {
            self.out.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl<R: Read, D: Decompressor> Read for DecompressReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill(buf.len())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let take = buf.len().min(self.buffered());
        buf[..take].copy_from_slice(&self.out[self.pos..self.pos + take]);
        self.pos += take;
        self.compact();
        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn incremental_reads_reassemble_stream() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let packed = zlib(&data);
        let mut r = DecompressReader::new(&packed[..], flate2::Decompress::new(true), 16);

        let mut out = Vec::new();
        for n in [1usize, 7, 4096, 3, 100_000] {
            out.extend(r.read_up_to(n).unwrap());
        }
        assert_eq!(out, data);
        assert!(r.is_finished());
        assert!(r.read_up_to(10).unwrap().is_empty());
    }

    #[test]
    fn truncated_input_returns_short_output() {
        let data = b"abcdefgh".repeat(4000);
        let packed = bzip2_packed(&data);
        let cut = &packed[..packed.len() / 2];
        let mut r = DecompressReader::new(cut, bzip2::Decompress::new(false), 128);
        let out = r.read_up_to(data.len()).unwrap();
        assert!(out.len() < data.len());
        assert!(data.starts_with(&out));
    }

    #[test]
    fn implements_io_read() {
        let data = b"streamed through std::io::Read".repeat(64);
        let packed = zlib(&data);
        let mut r = DecompressReader::new(&packed[..], flate2::Decompress::new(true), 32);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn corrupt_input_is_an_error() {
        let garbage = [0x78u8, 0x9c, 0xff, 0xff, 0xff, 0xff, 0x00, 0x12];
        let mut r = DecompressReader::new(&garbage[..], flate2::Decompress::new(true), 4);
        assert!(r.read_up_to(100).is_err());
    }

    fn bzip2_packed(data: &[u8]) -> Vec<u8> {
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(4));
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }
}
