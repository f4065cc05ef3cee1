//! Scatter/gather byte buffer for request and response bodies.
//!
//! Response bodies arrive from the transport as a sequence of sequential
//! write callbacks; `BufferArray` captures them in a block list without
//! reallocating and moving data.  Positions are absolute; reads past the
//! end return short counts.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Allocation quantum for blocks.  A tuning parameter; bulk asset bodies
/// tend to arrive in chunks well under this size.
pub const BLOCK_ALLOC_SIZE: usize = 65536;

/// Block-list scatter/gather buffer.
///
/// Threading: not thread-safe.  Request bodies become shared-read once a
/// request is submitted (wrap in `Arc`); reply bodies are built on the
/// worker and handed to the consumer whole.
#[derive(Default)]
pub struct BufferArray {
    blocks: Vec<Vec<u8>>,
    len: usize,
}

impl BufferArray {
    pub fn new() -> BufferArray {
        BufferArray::default()
    }

    /// Build a buffer holding a copy of `src`.
    pub fn from_bytes(src: &[u8]) -> BufferArray {
        let mut ba = BufferArray::new();
        ba.append(src);
        ba
    }

    /// Count of bytes currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `src`, filling the tail block before opening a new one.
    /// Returns the count of bytes stored (always `src.len()`).
    pub fn append(&mut self, src: &[u8]) -> usize {
        let mut remaining = src;
        while !remaining.is_empty() {
            let spare = match self.blocks.last_mut() {
                Some(block) if block.len() < BLOCK_ALLOC_SIZE => block,
                _ => {
                    self.blocks.push(Vec::with_capacity(BLOCK_ALLOC_SIZE));
                    self.blocks.last_mut().unwrap()
                }
            };
            let take = remaining.len().min(BLOCK_ALLOC_SIZE - spare.len());
            spare.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            self.len += take;
        }
        src.len()
    }

    /// Guarantee a contiguous zero-filled region of `len` bytes at the
    /// end of the buffer and return it for the caller to fill.  The
    /// region counts toward `len()` whether or not it is written.
    pub fn append_alloc(&mut self, len: usize) -> &mut [u8] {
        self.blocks.push(vec![0u8; len]);
        self.len += len;
        self.blocks.last_mut().unwrap().as_mut_slice()
    }

    /// Copy out up to `dst.len()` bytes starting at `pos`.  Returns the
    /// count copied, short when `pos + dst.len()` runs past the data.
    pub fn read_at(&self, pos: usize, dst: &mut [u8]) -> usize {
        if pos >= self.len || dst.is_empty() {
            return 0;
        }
        let mut copied = 0;
        let mut block_start = 0;
        for block in &self.blocks {
            let block_end = block_start + block.len();
            let from = pos + copied;
            if from < block_end {
                let in_block = from - block_start;
                let take = (block.len() - in_block).min(dst.len() - copied);
                dst[copied..copied + take].copy_from_slice(&block[in_block..in_block + take]);
                copied += take;
                if copied == dst.len() {
                    break;
                }
            }
            block_start = block_end;
        }
        copied
    }

    /// Copy `src` into the buffer at `pos`, overwriting existing data
    /// and appending whatever extends past the current end.  `pos` must
    /// not exceed `len()`.  Returns the count written.
    pub fn write_at(&mut self, pos: usize, src: &[u8]) -> usize {
        assert!(pos <= self.len, "write position beyond end of buffer");
        let overlap = (self.len - pos).min(src.len());
        let mut copied = 0;
        if overlap > 0 {
            let mut block_start = 0;
            for block in &mut self.blocks {
                let block_end = block_start + block.len();
                let from = pos + copied;
                if from < block_end {
                    let in_block = from - block_start;
                    let take = (block.len() - in_block).min(overlap - copied);
                    block[in_block..in_block + take].copy_from_slice(&src[copied..copied + take]);
                    copied += take;
                    if copied == overlap {
                        break;
                    }
                }
                block_start = block_end;
            }
        }
        if copied < src.len() {
            self.append(&src[copied..]);
        }
        src.len()
    }

    /// Flatten into a single contiguous vector.  Intended for consumers
    /// that need the whole body at once (tests, small replies).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

impl std::fmt::Debug for BufferArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferArray")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

/// Positioned stream adapter over a `BufferArray`, for callers that want
/// `std::io` semantics (serializers, file sinks).
pub struct BufferStream {
    buffer: BufferArray,
    pos: usize,
}

impl BufferStream {
    pub fn new(buffer: BufferArray) -> BufferStream {
        BufferStream { buffer, pos: 0 }
    }

    pub fn into_inner(self) -> BufferArray {
        self.buffer
    }

    pub fn get_ref(&self) -> &BufferArray {
        &self.buffer
    }
}

impl Read for BufferStream {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.buffer.read_at(self.pos, dst);
        self.pos += n;
        Ok(n)
    }
}

impl Write for BufferStream {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        let n = self.buffer.write_at(self.pos, src);
        self.pos += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for BufferStream {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let new_pos = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => self.buffer.len() as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if new_pos < 0 || new_pos > self.buffer.len() as i64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek outside buffer",
            ));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }
}
