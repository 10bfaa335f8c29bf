//! Raw-DEFLATE stream stages (no zlib/gzip wrapper).

use std::io;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{ZipError, ZipResult};
use crate::io::{BUFFER_SIZE, EntryStream};

/// Decode stage: inflates the inner stream on demand.
///
/// The encoded stream must end with a DEFLATE final block; running out of
/// inner bytes before that is stream corruption, not end-of-stream.
pub(crate) struct InflateStream<S> {
    inner: S,
    decoder: Decompress,
    input: Box<[u8; BUFFER_SIZE]>,
    input_pos: usize,
    input_len: usize,
    done: bool,
}

impl<S: EntryStream> InflateStream<S> {
    pub(crate) fn new(inner: S) -> ZipResult<Self> {
        let mut stream = Self {
            inner,
            decoder: Decompress::new(false),
            input: Box::new([0; BUFFER_SIZE]),
            input_pos: 0,
            input_len: 0,
            done: false,
        };
        stream.restart()?;
        Ok(stream)
    }
}

impl<S: EntryStream> EntryStream for InflateStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.done {
                return Ok(0);
            }
            if self.input_pos == self.input_len {
                let count = self.inner.read(&mut self.input[..])?;
                if count == 0 {
                    return Err(ZipError::MalformedArchive(
                        "deflate stream ended before its final block".into(),
                    ));
                }
                self.input_pos = 0;
                self.input_len = count;
            }
            let before_in = self.decoder.total_in();
            let before_out = self.decoder.total_out();
            let status = self
                .decoder
                .decompress(
                    &self.input[self.input_pos..self.input_len],
                    buf,
                    FlushDecompress::None,
                )
                .map_err(|e| ZipError::MalformedArchive(format!("invalid deflate data: {e}")))?;
            let consumed = (self.decoder.total_in() - before_in) as usize;
            let produced = (self.decoder.total_out() - before_out) as usize;
            self.input_pos += consumed;
            match status {
                Status::StreamEnd => self.done = true,
                Status::Ok => {}
                Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        return Err(ZipError::MalformedArchive(
                            "deflate decoder made no progress".into(),
                        ));
                    }
                }
            }
            if produced > 0 || self.done {
                return Ok(produced);
            }
        }
    }

    fn restart(&mut self) -> ZipResult<()> {
        self.inner.restart()?;
        self.decoder.reset(false);
        self.input_pos = 0;
        self.input_len = 0;
        self.done = false;
        Ok(())
    }

    fn has_more(&self) -> bool {
        !self.done
    }
}

/// Encode stage: deflates the inner stream at best compression.
pub(crate) struct DeflateStream<S> {
    inner: S,
    encoder: Compress,
    input: Box<[u8; BUFFER_SIZE]>,
    input_pos: usize,
    input_len: usize,
    inner_eof: bool,
    done: bool,
}

impl<S: EntryStream> DeflateStream<S> {
    pub(crate) fn new(inner: S) -> ZipResult<Self> {
        let mut stream = Self {
            inner,
            encoder: Compress::new(Compression::best(), false),
            input: Box::new([0; BUFFER_SIZE]),
            input_pos: 0,
            input_len: 0,
            inner_eof: false,
            done: false,
        };
        stream.restart()?;
        Ok(stream)
    }
}

impl<S: EntryStream> EntryStream for DeflateStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.done {
                return Ok(0);
            }
            if self.input_pos == self.input_len && !self.inner_eof {
                let count = self.inner.read(&mut self.input[..])?;
                if count == 0 {
                    self.inner_eof = true;
                } else {
                    self.input_pos = 0;
                    self.input_len = count;
                }
            }
            let flush = if self.inner_eof && self.input_pos == self.input_len {
                FlushCompress::Finish
            } else {
                FlushCompress::None
            };
            let before_in = self.encoder.total_in();
            let before_out = self.encoder.total_out();
            let status = self
                .encoder
                .compress(&self.input[self.input_pos..self.input_len], buf, flush)
                .map_err(io::Error::other)?;
            let consumed = (self.encoder.total_in() - before_in) as usize;
            let produced = (self.encoder.total_out() - before_out) as usize;
            self.input_pos += consumed;
            match status {
                Status::StreamEnd => self.done = true,
                Status::Ok => {}
                Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        return Err(ZipError::MalformedArchive(
                            "deflate encoder made no progress".into(),
                        ));
                    }
                }
            }
            if produced > 0 || self.done {
                return Ok(produced);
            }
        }
    }

    fn restart(&mut self) -> ZipResult<()> {
        self.inner.restart()?;
        self.encoder.reset();
        self.input_pos = 0;
        self.input_len = 0;
        self.inner_eof = false;
        self.done = false;
        Ok(())
    }

    fn has_more(&self) -> bool {
        !self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::VecStream;
    use crate::io::{read_to_end, stream_length};

    #[test]
    fn deflate_then_inflate_round_trips() {
        let plain: Vec<u8> = b"abcabcabc".iter().copied().cycle().take(10_000).collect();
        let mut deflated = DeflateStream::new(VecStream::new(plain.clone())).unwrap();
        let encoded = read_to_end(&mut deflated).unwrap();
        assert!(encoded.len() < plain.len());

        let mut inflated = InflateStream::new(VecStream::new(encoded)).unwrap();
        assert_eq!(read_to_end(&mut inflated).unwrap(), plain);
    }

    #[test]
    fn restart_resets_the_coders() {
        let plain: Vec<u8> = (0..200u8).cycle().take(5_000).collect();
        let mut deflated = DeflateStream::new(VecStream::new(plain.clone())).unwrap();
        let first = stream_length(&mut deflated).unwrap();
        let second = stream_length(&mut deflated).unwrap();
        assert_eq!(first, second);

        deflated.restart().unwrap();
        let encoded = read_to_end(&mut deflated).unwrap();
        let mut inflated = InflateStream::new(VecStream::new(encoded)).unwrap();
        let mut partial = [0u8; 100];
        inflated.read(&mut partial).unwrap();
        inflated.restart().unwrap();
        assert_eq!(read_to_end(&mut inflated).unwrap(), plain);
    }

    #[test]
    fn truncated_deflate_input_is_malformed() {
        let plain: Vec<u8> = b"xyzw".iter().copied().cycle().take(4_000).collect();
        let mut deflated = DeflateStream::new(VecStream::new(plain)).unwrap();
        let mut encoded = read_to_end(&mut deflated).unwrap();
        encoded.truncate(encoded.len() / 2);

        let mut inflated = InflateStream::new(VecStream::new(encoded)).unwrap();
        let result = read_to_end(&mut inflated);
        assert!(matches!(result, Err(ZipError::MalformedArchive(_))));
    }

    #[test]
    fn small_reads_drain_the_whole_stream() {
        let plain: Vec<u8> = b"0123456789".iter().copied().cycle().take(3_333).collect();
        let mut deflated = DeflateStream::new(VecStream::new(plain.clone())).unwrap();
        let encoded = read_to_end(&mut deflated).unwrap();

        let mut inflated = InflateStream::new(VecStream::new(encoded)).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let count = inflated.read(&mut buf).unwrap();
            if count == 0 {
                break;
            }
            out.extend_from_slice(&buf[..count]);
        }
        assert_eq!(out, plain);
    }
}
