//! Positioned reads over plain or gzip-compressed sources.
//!
//! A [`SourceReader`] hides the difference between a flat file, where a
//! range is one seek plus one read, and a gzip file, where a range is served
//! by restarting inflate from a checkpoint. Decompressed spans are kept in a
//! small per-session LRU cache so clustered requests (iteration over a
//! region, repeated lookups of the same sequence) decompress each span once.

use crate::error::{Error, Result};
use crate::gzi::GzipIndex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Uncompressed bytes held per cache entry.
const CACHE_BLOCK: u64 = 256 * 1024;
/// Cache entries kept per session.
const CACHE_SLOTS: usize = 8;

/// Random-access byte source for one session.
pub struct SourceReader
{
    file: File,
    mode: Mode,
}

enum Mode
{
    Plain,
    Gzip
    {
        index: GzipIndex,
        cache: SpanCache,
    },
}

impl SourceReader
{
    /// Open a plain (uncompressed) source.
    pub fn plain(path: &Path) -> Result<Self>
    {
        Ok(Self { file: File::open(path)?, mode: Mode::Plain })
    }

    /// Open a gzip-compressed source served through its checkpoint table.
    pub fn gzip(path: &Path, index: GzipIndex) -> Result<Self>
    {
        Ok(Self {
            file: File::open(path)?,
            mode: Mode::Gzip { index, cache: SpanCache::new(CACHE_BLOCK, CACHE_SLOTS) },
        })
    }

    pub fn is_gzip(&self) -> bool
    {
        matches!(self.mode, Mode::Gzip { .. })
    }

    /// Read exactly `len` bytes of the logical (uncompressed) stream
    /// starting at `offset`.
    ///
    /// # Errors
    ///
    /// `Error::Io` with `UnexpectedEof` when the range runs past the end of
    /// a plain source; `Error::Gzip` for ranges past a compressed stream.
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>
    {
        let mut out = vec![0u8; len];
        if len == 0
        {
            return Ok(out);
        }
        match &mut self.mode
        {
            Mode::Plain =>
            {
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.read_exact(&mut out)?;
            }
            Mode::Gzip { index, cache } =>
            {
                let total = index.uncompressed_len();
                let end = offset + len as u64;
                if offset >= total || end > total
                {
                    return Err(Error::Gzip(format!(
                        "range {}..{} beyond uncompressed stream length {}",
                        offset, end, total
                    )));
                }
                let mut filled = 0usize;
                let mut block = offset / cache.block_size;
                while filled < len
                {
                    let block_start = block * cache.block_size;
                    let data = cache.get_or_fill(block, |start, want| {
                        let mut buf = vec![0u8; want];
                        let n = index.extract(&mut self.file, start, &mut buf)?;
                        buf.truncate(n);
                        Ok(buf)
                    })?;
                    let from = (offset + filled as u64 - block_start) as usize;
                    let take = (len - filled).min(data.len() - from);
                    out[filled..filled + take].copy_from_slice(&data[from..from + take]);
                    filled += take;
                    block += 1;
                }
            }
        }
        Ok(out)
    }

    /// Length of the logical stream, when known without scanning: exact for
    /// gzip sources (from the checkpoint table), file size for plain ones.
    pub fn logical_len(&self) -> Result<u64>
    {
        match &self.mode
        {
            Mode::Plain => Ok(self.file.metadata()?.len()),
            Mode::Gzip { index, .. } => Ok(index.uncompressed_len()),
        }
    }
}

/// LRU cache of decompressed, block-aligned spans.
struct SpanCache
{
    blocks: HashMap<u64, Vec<u8>>,
    order: VecDeque<u64>,
    slots: usize,
    block_size: u64,
}

impl SpanCache
{
    fn new(block_size: u64, slots: usize) -> Self
    {
        Self { blocks: HashMap::new(), order: VecDeque::new(), slots, block_size }
    }

    /// Fetch block `n`, filling it via `fill(start_offset, max_len)` on a
    /// miss and evicting the least recently used entry when full.
    fn get_or_fill<F>(&mut self, n: u64, fill: F) -> Result<&Vec<u8>>
    where
        F: FnOnce(u64, usize) -> Result<Vec<u8>>,
    {
        if self.blocks.contains_key(&n)
        {
            self.touch(n);
        }
        else
        {
            let data = fill(n * self.block_size, self.block_size as usize)?;
            if self.order.len() == self.slots
            {
                if let Some(evicted) = self.order.pop_front()
                {
                    self.blocks.remove(&evicted);
                }
            }
            self.blocks.insert(n, data);
            self.order.push_back(n);
        }
        Ok(&self.blocks[&n])
    }

    fn touch(&mut self, n: u64)
    {
        if let Some(pos) = self.order.iter().position(|&b| b == n)
        {
            self.order.remove(pos);
            self.order.push_back(n);
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write;

    fn bases(len: usize, seed: u64) -> Vec<u8>
    {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    #[test]
    fn plain_read_at()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut reader = SourceReader::plain(&path).unwrap();
        assert!(!reader.is_gzip());
        assert_eq!(reader.read_at(0, 4).unwrap(), b"0123");
        assert_eq!(reader.read_at(5, 5).unwrap(), b"56789");
        assert_eq!(reader.read_at(3, 0).unwrap(), b"");
        assert!(reader.read_at(8, 5).is_err());
        assert_eq!(reader.logical_len().unwrap(), 10);
    }

    #[test]
    fn gzip_read_at_matches_source()
    {
        let data = bases(700 * 1024, 41);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let index =
            GzipIndex::build(File::open(&path).unwrap(), 64 * 1024).unwrap();
        let mut reader = SourceReader::gzip(&path, index).unwrap();
        assert!(reader.is_gzip());
        assert_eq!(reader.logical_len().unwrap(), data.len() as u64);

        // Within one cache block, across blocks, and repeated (cache hits).
        for &(start, len) in &[
            (0usize, 100usize),
            (100_000, 1000),
            (CACHE_BLOCK as usize - 10, 20),
            (600_000, 100 * 1024),
            (100_000, 1000),
        ]
        {
            let got = reader.read_at(start as u64, len).unwrap();
            assert_eq!(got, &data[start..start + len], "range {}+{}", start, len);
        }

        assert!(reader.read_at(data.len() as u64 - 5, 10).is_err());
    }

    #[test]
    fn cache_evicts_least_recent()
    {
        let mut cache = SpanCache::new(10, 2);
        cache.get_or_fill(0, |_, _| Ok(vec![0u8; 10])).unwrap();
        cache.get_or_fill(1, |_, _| Ok(vec![1u8; 10])).unwrap();
        // Touch block 0, then insert block 2: block 1 is the eviction victim.
        cache.get_or_fill(0, |_, _| panic!("hit expected")).unwrap();
        cache.get_or_fill(2, |_, _| Ok(vec![2u8; 10])).unwrap();
        assert!(cache.blocks.contains_key(&0));
        assert!(!cache.blocks.contains_key(&1));
        assert!(cache.blocks.contains_key(&2));
    }
}
