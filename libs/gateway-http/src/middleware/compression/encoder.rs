//! Streaming encoders and their buffer pools.
//!
//! Gzip and deflate compress incrementally: every chunk written may release
//! output bytes immediately. Brotli's streaming state cannot be reused or
//! inspected mid-stream, so the brotli encoder accumulates input and emits a
//! single compressed block on finish. Output scratch buffers are recycled
//! through per-algorithm pools.

use std::io::Write;

use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use parking_lot::Mutex;

use super::negotiate::Algorithm;

const BROTLI_WINDOW: u32 = 22;
const BROTLI_BUFFER: usize = 4096;
const POOL_CAP: usize = 16;

pub(crate) enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
    Brotli { raw: Vec<u8>, level: u32 },
}

impl Encoder {
    fn new(algo: Algorithm, level: u32, sink: Vec<u8>) -> Self {
        match algo {
            Algorithm::Gzip => Self::Gzip(GzEncoder::new(sink, Compression::new(level))),
            Algorithm::Deflate => Self::Deflate(ZlibEncoder::new(sink, Compression::new(level))),
            Algorithm::Brotli => Self::Brotli { raw: sink, level },
        }
    }

    /// Feed a chunk; returns whatever compressed bytes are ready.
    pub(crate) fn write(&mut self, chunk: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(enc) => {
                enc.write_all(chunk)?;
                Ok(std::mem::take(enc.get_mut()))
            }
            Self::Deflate(enc) => {
                enc.write_all(chunk)?;
                Ok(std::mem::take(enc.get_mut()))
            }
            Self::Brotli { raw, .. } => {
                raw.extend_from_slice(chunk);
                Ok(Vec::new())
            }
        }
    }

    /// Close the stream; returns the trailing compressed bytes plus any
    /// scratch buffer worth returning to the pool.
    pub(crate) fn finish(self) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
        match self {
            Self::Gzip(enc) => Ok((enc.finish()?, Vec::new())),
            Self::Deflate(enc) => Ok((enc.finish()?, Vec::new())),
            Self::Brotli { mut raw, level } => {
                let mut out = Vec::new();
                {
                    let mut writer =
                        brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, level, BROTLI_WINDOW);
                    writer.write_all(&raw)?;
                }
                raw.clear();
                Ok((out, raw))
            }
        }
    }
}

/// Per-algorithm recycling of encoder scratch buffers.
pub(crate) struct EncoderPool {
    level: u32,
    buffers: [Mutex<Vec<Vec<u8>>>; 3],
}

impl EncoderPool {
    pub(crate) fn new(level: u32) -> Self {
        Self {
            level,
            buffers: [const { Mutex::new(Vec::new()) }; 3],
        }
    }

    fn slot(algo: Algorithm) -> usize {
        match algo {
            Algorithm::Gzip => 0,
            Algorithm::Deflate => 1,
            Algorithm::Brotli => 2,
        }
    }

    /// Take a recycled scratch buffer, or a fresh one when the pool is dry.
    pub(crate) fn acquire_buffer(&self, algo: Algorithm) -> Vec<u8> {
        self.buffers[Self::slot(algo)].lock().pop().unwrap_or_default()
    }

    pub(crate) fn acquire(&self, algo: Algorithm) -> Encoder {
        let sink = self.acquire_buffer(algo);
        Encoder::new(algo, self.level, sink)
    }

    /// Return a scratch buffer once the response stream has closed.
    pub(crate) fn release(&self, algo: Algorithm, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut buffers = self.buffers[Self::slot(algo)].lock();
        if buffers.len() < POOL_CAP {
            buffers.push(buffer);
        }
    }
}
