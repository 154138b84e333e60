//! Gzip random-access checkpoint layer.
//!
//! A plain gzip stream cannot be seeked: DEFLATE blocks reference a 32 KiB
//! sliding window of prior output and do not start on byte boundaries. This
//! module decompresses the stream once, recording a checkpoint after a block
//! boundary every `spacing` uncompressed bytes. A checkpoint carries the
//! compressed and uncompressed byte offsets, the bit phase of the block start
//! and a copy of the sliding window, which together are exactly the state
//! needed to restart inflate at that position.
//!
//! Random access then seeks the compressed file to the nearest checkpoint at
//! or before the requested offset, primes inflate with the stored bit
//! remainder, installs the stored window as the pre-dictionary and decodes
//! forward.

use crate::error::{Error, Result};
use libc::{c_int, c_uint, c_void};
use libz_sys::{
    inflate, inflateEnd, inflateInit2_, inflatePrime, inflateReset, inflateReset2,
    inflateSetDictionary, uInt, z_stream, zlibVersion, Z_BLOCK, Z_BUF_ERROR, Z_DATA_ERROR,
    Z_MEM_ERROR, Z_NEED_DICT, Z_NO_FLUSH, Z_STREAM_END, Z_STREAM_ERROR, Z_VERSION_ERROR,
};
use std::alloc::{self, Layout};
use std::ffi::CStr;
use std::io::{Read, Seek, SeekFrom};
use std::{mem, ptr};

/// DEFLATE window size; fixed for all gzip streams.
pub const WINDOW_SIZE: usize = 32768;

/// Default uncompressed distance between checkpoints.
pub const DEFAULT_SPACING: u64 = 1 << 20;

/// I/O chunk for the build and extract loops.
const CHUNK: usize = 1 << 14;

/// Window bits selecting gzip framing with header/trailer handling.
const GZIP_WBITS: c_int = 31;
/// Window bits selecting gzip framing with automatic zlib/gzip detection.
const AUTO_WBITS: c_int = 47;
/// Window bits selecting a raw DEFLATE stream.
const RAW_WBITS: c_int = -15;

/// Restart state for one position in the compressed stream.
///
/// `bits` is the number of bits of the byte at `coff - 1` that belong to the
/// block starting here; DEFLATE blocks are bit-aligned, so a checkpoint must
/// remember the bit phase as well as the byte offset.
#[derive(Clone, PartialEq, Eq)]
pub struct Checkpoint
{
    /// Offset in the uncompressed logical stream.
    pub uoff: u64,
    /// Offset in the compressed file of the first whole byte of the block.
    pub coff: u64,
    /// Unused bits of the preceding byte, 0..=7.
    pub bits: u8,
    /// Sliding window contents at this position, at most [`WINDOW_SIZE`]
    /// bytes; shorter near the start of the stream, empty at offset 0.
    pub window: Vec<u8>,
}

impl std::fmt::Debug for Checkpoint
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Checkpoint")
            .field("uoff", &self.uoff)
            .field("coff", &self.coff)
            .field("bits", &self.bits)
            .field("window_len", &self.window.len())
            .finish()
    }
}

/// A checkpoint table over one gzip-compressed file.
///
/// Concatenated gzip members are treated as a single logical stream;
/// checkpoints may fall inside any member.
#[derive(Debug, Clone)]
pub struct GzipIndex
{
    checkpoints: Vec<Checkpoint>,
    uncompressed_len: u64,
    spacing: u64,
}

impl GzipIndex
{
    /// Assemble an index from persisted checkpoints.
    ///
    /// Validates that checkpoints are strictly ordered by uncompressed
    /// offset; a violation means the stored table is corrupt.
    pub fn from_checkpoints(
        checkpoints: Vec<Checkpoint>,
        uncompressed_len: u64,
        spacing: u64,
    ) -> Result<Self>
    {
        if checkpoints.is_empty()
        {
            return Err(Error::Gzip("empty checkpoint table".into()));
        }
        for pair in checkpoints.windows(2)
        {
            if pair[1].uoff <= pair[0].uoff || pair[1].coff < pair[0].coff
            {
                return Err(Error::Gzip(format!(
                    "checkpoint offsets not monotonic: {} then {}",
                    pair[0].uoff, pair[1].uoff
                )));
            }
        }
        Ok(GzipIndex { checkpoints, uncompressed_len, spacing })
    }

    /// Build an index by decompressing `reader` end to end.
    ///
    /// Convenience wrapper around [`IndexingDecoder`] that discards the
    /// decompressed bytes.
    pub fn build<R: Read>(reader: R, spacing: u64) -> Result<Self>
    {
        let decoder = IndexingDecoder::new(reader, spacing)?;
        decoder.finish()
    }

    /// Total length of the uncompressed logical stream.
    pub fn uncompressed_len(&self) -> u64
    {
        self.uncompressed_len
    }

    /// Uncompressed distance targeted between checkpoints.
    pub fn spacing(&self) -> u64
    {
        self.spacing
    }

    /// All checkpoints, ordered by uncompressed offset.
    pub fn checkpoints(&self) -> &[Checkpoint]
    {
        &self.checkpoints
    }

    /// Number of checkpoints in the table.
    pub fn len(&self) -> usize
    {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.checkpoints.is_empty()
    }

    /// The checkpoint with the greatest uncompressed offset `<= uoff`.
    pub fn locate(&self, uoff: u64) -> &Checkpoint
    {
        match self.checkpoints.binary_search_by(|cp| cp.uoff.cmp(&uoff))
        {
            Ok(i) => &self.checkpoints[i],
            // The first checkpoint sits at offset 0, so i > 0 here.
            Err(i) => &self.checkpoints[i - 1],
        }
    }

    /// Read `out.len()` bytes of the uncompressed stream starting at `uoff`.
    ///
    /// Restarts inflate from the nearest checkpoint and decodes forward,
    /// discarding bytes before `uoff`. Returns the number of bytes written,
    /// which is short only when the request runs past the end of the stream.
    ///
    /// # Errors
    ///
    /// `Error::Gzip` when `uoff` lies beyond the stream, or when the
    /// compressed data is truncated or corrupt.
    pub fn extract<S: Read + Seek>(&self, src: &mut S, uoff: u64, out: &mut [u8]) -> Result<usize>
    {
        if out.is_empty()
        {
            return Ok(0);
        }
        if uoff >= self.uncompressed_len
        {
            return Err(Error::Gzip(format!(
                "offset {} beyond uncompressed stream length {}",
                uoff, self.uncompressed_len
            )));
        }

        let cp = self.locate(uoff);
        let back = if cp.bits != 0 { 1 } else { 0 };
        src.seek(SeekFrom::Start(cp.coff - back))?;

        let mut strm = ZStream::new(RAW_WBITS)?;
        if cp.bits != 0
        {
            let mut byte = [0u8; 1];
            src.read_exact(&mut byte)?;
            strm.prime(cp.bits as c_int, (byte[0] >> (8 - cp.bits)) as c_int)?;
        }
        if !cp.window.is_empty()
        {
            strm.set_dictionary(&cp.window)?;
        }

        let mut input = vec![0u8; CHUNK];
        let mut scratch = vec![0u8; CHUNK];
        let (mut in_pos, mut in_len) = (0usize, 0usize);
        let mut skip = uoff - cp.uoff;
        let mut written = 0usize;
        // Raw inflate stops before the 8-byte gzip trailer; later members are
        // decoded in gzip mode, which consumes their framing itself.
        let mut raw_member = true;
        let mut trailer_skip = 0usize;
        let mut at_member_boundary = false;

        while written < out.len()
        {
            if in_pos == in_len
            {
                in_len = src.read(&mut input)?;
                in_pos = 0;
                if in_len == 0
                {
                    if at_member_boundary
                    {
                        break; // clean end of the logical stream
                    }
                    return Err(Error::Gzip("unexpected end of compressed stream".into()));
                }
            }

            if trailer_skip > 0
            {
                let n = trailer_skip.min(in_len - in_pos);
                in_pos += n;
                trailer_skip -= n;
                if trailer_skip > 0
                {
                    continue;
                }
                at_member_boundary = true;
                strm.reset2(GZIP_WBITS)?;
                continue;
            }
            at_member_boundary = false;

            let target: &mut [u8] = if skip > 0
            {
                let cap = skip.min(scratch.len() as u64) as usize;
                &mut scratch[..cap]
            }
            else
            {
                &mut out[written..]
            };

            let step = strm.inflate(&input[in_pos..in_len], target, Z_NO_FLUSH)?;
            in_pos += step.consumed;
            if skip > 0
            {
                skip -= step.produced as u64;
            }
            else
            {
                written += step.produced;
            }

            if step.status == Z_STREAM_END
            {
                if raw_member
                {
                    raw_member = false;
                    trailer_skip = 8;
                }
                else
                {
                    at_member_boundary = true;
                    strm.reset()?;
                }
            }
        }

        Ok(written)
    }
}

/// Streaming gzip decoder that records checkpoints as a side effect.
///
/// Wraps the compressed source; reading through it yields the uncompressed
/// bytes while the checkpoint table accumulates. The index is complete once
/// the stream has been read to its end.
pub struct IndexingDecoder<R: Read>
{
    reader: R,
    strm: ZStream,
    window: SlidingWindow,
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    totin: u64,
    totout: u64,
    last_emit: u64,
    emitted_first: bool,
    spacing: u64,
    checkpoints: Vec<Checkpoint>,
    done: bool,
}

impl<R: Read> IndexingDecoder<R>
{
    /// Wrap a compressed source. `spacing` is the uncompressed distance
    /// targeted between checkpoints; actual checkpoints land on the first
    /// DEFLATE block boundary at or past each multiple.
    pub fn new(reader: R, spacing: u64) -> Result<Self>
    {
        Ok(Self {
            reader,
            strm: ZStream::new(AUTO_WBITS)?,
            window: SlidingWindow::new(),
            input: vec![0u8; CHUNK],
            in_pos: 0,
            in_len: 0,
            totin: 0,
            totout: 0,
            last_emit: 0,
            emitted_first: false,
            spacing: spacing.max(1),
            checkpoints: Vec::new(),
            done: false,
        })
    }

    /// Whether the underlying stream has been fully decoded.
    pub fn is_finished(&self) -> bool
    {
        self.done
    }

    /// Bytes of uncompressed output produced so far.
    pub fn uncompressed_position(&self) -> u64
    {
        self.totout
    }

    /// Consume the decoder, draining any remaining input, and return the
    /// completed checkpoint table.
    pub fn finish(mut self) -> Result<GzipIndex>
    {
        let mut sink = [0u8; CHUNK];
        while !self.done
        {
            match self.read(&mut sink)
            {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::Gzip(e.to_string())),
            }
        }
        GzipIndex::from_checkpoints(self.checkpoints, self.totout, self.spacing)
    }

    fn maybe_checkpoint(&mut self)
    {
        let dt = self.strm.data_type();
        // Bit 7: stopped at a block boundary. Bit 6: inside the final block
        // of a member, where a restart point would be useless.
        if (dt & 128) == 0 || (dt & 64) != 0
        {
            return;
        }
        let due = !self.emitted_first || self.totout - self.last_emit >= self.spacing;
        if !due
        {
            return;
        }
        self.checkpoints.push(Checkpoint {
            uoff: self.totout,
            coff: self.totin,
            bits: (dt & 7) as u8,
            window: self.window.snapshot(),
        });
        self.emitted_first = true;
        self.last_emit = self.totout;
    }
}

impl<R: Read> Read for IndexingDecoder<R>
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>
    {
        if self.done || buf.is_empty()
        {
            return Ok(0);
        }
        let mut produced = 0usize;

        while produced < buf.len() && !self.done
        {
            if self.in_pos == self.in_len
            {
                self.in_len = self.reader.read(&mut self.input)?;
                self.in_pos = 0;
                if self.in_len == 0
                {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "truncated gzip stream",
                    ));
                }
            }

            let step = self
                .strm
                .inflate(&self.input[self.in_pos..self.in_len], &mut buf[produced..], Z_BLOCK)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            self.in_pos += step.consumed;
            self.totin += step.consumed as u64;
            self.totout += step.produced as u64;
            self.window.push(&buf[produced..produced + step.produced]);
            produced += step.produced;

            if step.status == Z_STREAM_END
            {
                // Concatenated members continue the logical stream.
                if self.in_pos == self.in_len
                {
                    self.in_len = self.reader.read(&mut self.input)?;
                    self.in_pos = 0;
                }
                if self.in_pos == self.in_len
                {
                    self.done = true;
                }
                else
                {
                    self.strm.reset().map_err(|e| {
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                    })?;
                }
            }
            else
            {
                self.maybe_checkpoint();
            }
        }

        Ok(produced)
    }
}

/// Last [`WINDOW_SIZE`] bytes of decompressed output, oldest first on
/// snapshot.
struct SlidingWindow
{
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl SlidingWindow
{
    fn new() -> Self
    {
        Self { buf: vec![0u8; WINDOW_SIZE].into_boxed_slice(), pos: 0, filled: 0 }
    }

    fn push(&mut self, mut data: &[u8])
    {
        if data.len() >= WINDOW_SIZE
        {
            data = &data[data.len() - WINDOW_SIZE..];
            self.buf.copy_from_slice(data);
            self.pos = 0;
            self.filled = WINDOW_SIZE;
            return;
        }
        let mut rest = data;
        while !rest.is_empty()
        {
            let n = rest.len().min(WINDOW_SIZE - self.pos);
            self.buf[self.pos..self.pos + n].copy_from_slice(&rest[..n]);
            self.pos = (self.pos + n) % WINDOW_SIZE;
            self.filled = (self.filled + n).min(WINDOW_SIZE);
            rest = &rest[n..];
        }
    }

    fn snapshot(&self) -> Vec<u8>
    {
        if self.filled < WINDOW_SIZE
        {
            self.buf[..self.filled].to_vec()
        }
        else
        {
            let mut out = Vec::with_capacity(WINDOW_SIZE);
            out.extend_from_slice(&self.buf[self.pos..]);
            out.extend_from_slice(&self.buf[..self.pos]);
            out
        }
    }
}

/// Outcome of a single inflate call.
struct InflateStep
{
    consumed: usize,
    produced: usize,
    status: c_int,
}

/// Owned zlib inflate state.
///
/// Input and output buffers are handed over per call, so no raw pointers
/// outlive a single `inflate` invocation.
struct ZStream
{
    strm: Box<z_stream>,
}

impl ZStream
{
    fn new(window_bits: c_int) -> Result<Self>
    {
        let mut strm = Box::new(z_stream {
            next_in: ptr::null_mut(),
            avail_in: 0,
            total_in: 0,
            next_out: ptr::null_mut(),
            avail_out: 0,
            total_out: 0,
            msg: ptr::null_mut(),
            state: ptr::null_mut(),
            zalloc,
            zfree,
            opaque: ptr::null_mut(),
            data_type: 0,
            adler: 0,
            reserved: 0,
        });
        let ret = unsafe {
            inflateInit2_(
                strm.as_mut() as *mut z_stream,
                window_bits,
                zlibVersion(),
                mem::size_of::<z_stream>() as c_int,
            )
        };
        Self::check(ret, &strm)?;
        Ok(Self { strm })
    }

    fn data_type(&self) -> c_int
    {
        self.strm.data_type
    }

    fn inflate(&mut self, input: &[u8], output: &mut [u8], flush: c_int) -> Result<InflateStep>
    {
        self.strm.next_in = input.as_ptr() as *mut u8;
        self.strm.avail_in = input.len() as uInt;
        self.strm.next_out = output.as_mut_ptr();
        self.strm.avail_out = output.len() as uInt;

        let ret = unsafe { inflate(self.strm.as_mut() as *mut z_stream, flush) };
        let consumed = input.len() - self.strm.avail_in as usize;
        let produced = output.len() - self.strm.avail_out as usize;
        self.strm.next_in = ptr::null_mut();
        self.strm.next_out = ptr::null_mut();

        if ret == Z_NEED_DICT
        {
            return Err(Error::Gzip("unexpected dictionary request".into()));
        }
        if ret == Z_BUF_ERROR
        {
            return Err(Error::Gzip("no progress possible in compressed stream".into()));
        }
        let status = Self::check(ret, &self.strm)?;
        Ok(InflateStep { consumed, produced, status })
    }

    fn prime(&mut self, bits: c_int, value: c_int) -> Result<()>
    {
        let ret = unsafe { inflatePrime(self.strm.as_mut() as *mut z_stream, bits, value) };
        Self::check(ret, &self.strm).map(|_| ())
    }

    fn set_dictionary(&mut self, dict: &[u8]) -> Result<()>
    {
        let ret = unsafe {
            inflateSetDictionary(
                self.strm.as_mut() as *mut z_stream,
                dict.as_ptr(),
                dict.len() as uInt,
            )
        };
        Self::check(ret, &self.strm).map(|_| ())
    }

    fn reset(&mut self) -> Result<()>
    {
        let ret = unsafe { inflateReset(self.strm.as_mut() as *mut z_stream) };
        Self::check(ret, &self.strm).map(|_| ())
    }

    fn reset2(&mut self, window_bits: c_int) -> Result<()>
    {
        let ret = unsafe { inflateReset2(self.strm.as_mut() as *mut z_stream, window_bits) };
        Self::check(ret, &self.strm).map(|_| ())
    }

    fn check(ret: c_int, strm: &z_stream) -> Result<c_int>
    {
        if ret >= 0
        {
            return Ok(ret);
        }
        let detail = if strm.msg.is_null()
        {
            None
        }
        else
        {
            Some(unsafe { CStr::from_ptr(strm.msg) }.to_string_lossy().into_owned())
        };
        let kind = match ret
        {
            Z_STREAM_ERROR => "stream error",
            Z_DATA_ERROR => "data error",
            Z_MEM_ERROR => "out of memory",
            Z_VERSION_ERROR => "zlib version mismatch",
            _ => "error",
        };
        Err(Error::Gzip(match detail
        {
            Some(msg) => format!("{}: {}", kind, msg),
            None => kind.to_string(),
        }))
    }
}

impl Drop for ZStream
{
    fn drop(&mut self)
    {
        unsafe {
            inflateEnd(self.strm.as_mut() as *mut z_stream);
        }
    }
}

// zlib leaves allocation to the embedder. Allocations are prefixed with
// their size so zfree can rebuild the Layout.

const ALLOC_ALIGN: usize = mem::align_of::<usize>();

extern "C" fn zalloc(_opaque: *mut c_void, items: c_uint, size: c_uint) -> *mut c_void
{
    let total = match (items as usize)
        .checked_mul(size as usize)
        .map(|n| (n + ALLOC_ALIGN - 1) & !(ALLOC_ALIGN - 1))
        .and_then(|n| n.checked_add(mem::size_of::<usize>()))
    {
        Some(n) => n,
        None => return ptr::null_mut(),
    };
    let layout = match Layout::from_size_align(total, ALLOC_ALIGN)
    {
        Ok(layout) => layout,
        Err(_) => return ptr::null_mut(),
    };
    unsafe {
        let base = alloc::alloc(layout) as *mut usize;
        if base.is_null()
        {
            return base as *mut c_void;
        }
        *base = total;
        base.add(1) as *mut c_void
    }
}

extern "C" fn zfree(_opaque: *mut c_void, address: *mut c_void)
{
    unsafe {
        let base = (address as *mut usize).offset(-1);
        let total = *base;
        let layout = Layout::from_size_align_unchecked(total, ALLOC_ALIGN);
        alloc::dealloc(base as *mut u8, layout);
    }
}
