//! FASTQ session and read accessor.
//!
//! Reads are addressed by 1-based id or by name; random access fetches the
//! contiguous byte span of the four-line record and parses it in place.
//! Whole-file aggregates (composition, length and quality extrema) are
//! gathered during the build, so quality-encoding detection never rescans
//! the file.

use crate::error::{Error, Result};
use crate::fasta::{antisense_str, complement_str, reverse_str};
use crate::gzi::{IndexingDecoder, DEFAULT_SPACING};
use crate::keys::Keys;
use crate::reader::SourceReader;
use crate::scan::{scan_fastq, FastqAggregates, ReadMeta};
use crate::stats::Composition;
use crate::store::{self, IndexFormat, IndexHeader, IndexStore, SCHEMA_VERSION};
use crate::FastxFormat;
use log::{info, warn};
use std::cell::RefCell;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Options for [`Fastq::open_with`].
#[derive(Debug, Clone)]
pub struct FastqOpts
{
    /// Never build or rebuild; surface a stale or missing index instead.
    pub read_only: bool,
    /// Gzip checkpoint spacing in uncompressed bytes.
    pub spacing: u64,
}

impl Default for FastqOpts
{
    fn default() -> Self
    {
        Self { read_only: false, spacing: DEFAULT_SPACING }
    }
}

/// Known quality-score encodings, with their legal quality-byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityEncoding
{
    SangerPhred33,
    Illumina18Phred33,
    PacBioHiFiPhred33,
    SolexaSolexa64,
    Illumina13Phred64,
    Illumina15Phred64,
    Unknown,
}

impl QualityEncoding
{
    const CANDIDATES: [(QualityEncoding, u8, u8); 6] = [
        (QualityEncoding::SangerPhred33, 33, 73),
        (QualityEncoding::Illumina18Phred33, 33, 74),
        (QualityEncoding::PacBioHiFiPhred33, 33, 93),
        (QualityEncoding::SolexaSolexa64, 59, 104),
        (QualityEncoding::Illumina13Phred64, 64, 104),
        (QualityEncoding::Illumina15Phred64, 66, 104),
    ];

    /// Every encoding whose legal range covers the observed quality bytes;
    /// `[Unknown]` when none does.
    pub fn detect(min_qual: u8, max_qual: u8) -> Vec<QualityEncoding>
    {
        let matches: Vec<QualityEncoding> = Self::CANDIDATES
            .iter()
            .filter(|(_, lo, hi)| min_qual >= *lo && max_qual <= *hi)
            .map(|(enc, _, _)| *enc)
            .collect();
        if matches.is_empty()
        {
            vec![QualityEncoding::Unknown]
        }
        else
        {
            matches
        }
    }

    /// ASCII offset of this encoding's Phred scores.
    pub fn phred_offset(self) -> u8
    {
        match self
        {
            QualityEncoding::SangerPhred33
            | QualityEncoding::Illumina18Phred33
            | QualityEncoding::PacBioHiFiPhred33
            | QualityEncoding::Unknown => 33,
            _ => 64,
        }
    }
}

impl std::fmt::Display for QualityEncoding
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        let name = match self
        {
            QualityEncoding::SangerPhred33 => "Sanger Phred+33",
            QualityEncoding::Illumina18Phred33 => "Illumina 1.8+ Phred+33",
            QualityEncoding::PacBioHiFiPhred33 => "PacBio HiFi Phred+33",
            QualityEncoding::SolexaSolexa64 => "Solexa Solexa+64",
            QualityEncoding::Illumina13Phred64 => "Illumina 1.3+ Phred+64",
            QualityEncoding::Illumina15Phred64 => "Illumina 1.5+ Phred+64",
            QualityEncoding::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

struct Session
{
    store: IndexStore,
    reader: SourceReader,
    header: IndexHeader,
    aggregates: FastqAggregates,
}

/// An indexed FASTQ file.
///
/// # Example
///
/// ```no_run
/// use fastxi::Fastq;
///
/// let fq = Fastq::open("reads.fq.gz").unwrap();
/// let read = fq.get_by_name("SRR123.17").unwrap();
/// println!("{}: {}", read.name(), read.seq().unwrap());
/// ```
#[derive(Clone)]
pub struct Fastq
{
    session: Rc<RefCell<Session>>,
    count: u64,
    path: PathBuf,
}

impl Fastq
{
    /// Open `path` with default options, building the index if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self>
    {
        Self::open_with(path, FastqOpts::default())
    }

    /// Open `path`, reusing a sealed side-car index when the source file is
    /// unchanged and rebuilding it otherwise (unless `read_only`).
    pub fn open_with<P: AsRef<Path>>(path: P, opts: FastqOpts) -> Result<Self>
    {
        let path = path.as_ref();
        if crate::detect_format(path)? != FastxFormat::Fastq
        {
            return Err(Error::Format(format!("{} is not FASTQ", path.display())));
        }
        let index_path = store::index_path_for(path);
        if index_path.exists()
        {
            match Self::open_sealed(path, &index_path)
            {
                Ok(fastq) => return Ok(fastq),
                Err(e) if e.is_rebuildable() && !opts.read_only =>
                {
                    warn!("rebuilding index {}: {}", index_path.display(), e);
                    std::fs::remove_file(&index_path)?;
                }
                Err(e) => return Err(e),
            }
        }
        else if opts.read_only
        {
            return Err(Error::IndexStale(format!(
                "no index for {} in a read-only session",
                path.display()
            )));
        }
        build_index(path, &opts)?;
        Self::open_sealed(path, &index_path)
    }

    /// Build the index without keeping a session open.
    pub fn build<P: AsRef<Path>>(path: P, opts: &FastqOpts) -> Result<()>
    {
        Self::open_with(path, opts.clone()).map(|_| ())
    }

    fn open_sealed(path: &Path, index_path: &Path) -> Result<Self>
    {
        let store = IndexStore::open_read(index_path)?;
        let header = store.validate_against(path, IndexFormat::Fastq)?;
        let reader = if header.is_gzip
        {
            SourceReader::gzip(path, store.load_gzip_index()?)?
        }
        else
        {
            SourceReader::plain(path)?
        };
        let count = store.read_count()?;
        let aggregates = store.read_fastq_aggregates()?;
        Ok(Self {
            session: Rc::new(RefCell::new(Session { store, reader, header, aggregates })),
            count,
            path: path.to_path_buf(),
        })
    }

    /// Number of reads.
    pub fn len(&self) -> u64
    {
        self.count
    }

    pub fn is_empty(&self) -> bool
    {
        self.count == 0
    }

    pub fn is_gzip(&self) -> bool
    {
        self.session.borrow().header.is_gzip
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Read by 1-based id; negative ids count from the end. Id 0 is
    /// rejected.
    pub fn get(&self, id: i64) -> Result<Read>
    {
        if id == 0
        {
            return Err(Error::IndexOutOfRange("read ids are 1-based; 0 is invalid".into()));
        }
        let actual = if id < 0 { self.count as i64 + id + 1 } else { id };
        if actual < 1 || actual as u64 > self.count
        {
            return Err(Error::IndexOutOfRange(format!(
                "read id {} outside 1..={}",
                id, self.count
            )));
        }
        let meta = self
            .session
            .borrow()
            .store
            .read_by_id(actual as u64)?
            .ok_or_else(|| Error::NotFound(format!("read id {}", actual)))?;
        Ok(self.wrap(meta))
    }

    /// Read by name.
    pub fn get_by_name(&self, name: &str) -> Result<Read>
    {
        let meta = self
            .session
            .borrow()
            .store
            .read_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(self.wrap(meta))
    }

    fn wrap(&self, meta: ReadMeta) -> Read
    {
        let line_term = self.session.borrow().aggregates.line_term;
        let phred = self.phred();
        Read { session: self.session.clone(), meta, line_term, phred }
    }

    /// Whether a read of that name exists.
    pub fn contains(&self, name: &str) -> Result<bool>
    {
        Ok(self.session.borrow().store.read_by_name(name)?.is_some())
    }

    /// The keys view over all read names.
    pub fn keys(&self) -> Result<Keys>
    {
        Ok(Keys::new(self.session.borrow().store.read_entries()?))
    }

    /// Iterate reads in id order. Handles stay valid after the loop.
    pub fn iter(&self) -> ReadIter
    {
        ReadIter { fastq: self.clone(), next_id: 1 }
    }

    // ------------------------------------------------------------------
    // aggregates

    /// Total bases across all reads.
    pub fn size(&self) -> u64
    {
        self.session.borrow().aggregates.total_bases
    }

    pub fn composition(&self) -> Composition
    {
        self.session.borrow().aggregates.composition.clone()
    }

    pub fn gc_content(&self) -> f64
    {
        self.composition().gc_content()
    }

    pub fn gc_skew(&self) -> f64
    {
        self.composition().gc_skew()
    }

    /// Mean read length.
    pub fn avglen(&self) -> f64
    {
        if self.count == 0
        {
            return 0.0;
        }
        self.size() as f64 / self.count as f64
    }

    pub fn minlen(&self) -> u64
    {
        self.session.borrow().aggregates.min_len
    }

    pub fn maxlen(&self) -> u64
    {
        self.session.borrow().aggregates.max_len
    }

    /// Smallest quality byte observed across the file.
    pub fn minqual(&self) -> u8
    {
        self.session.borrow().aggregates.min_qual
    }

    /// Largest quality byte observed across the file.
    pub fn maxqual(&self) -> u8
    {
        self.session.borrow().aggregates.max_qual
    }

    /// Candidate encodings consistent with the observed quality bytes.
    pub fn encoding_type(&self) -> Vec<QualityEncoding>
    {
        let session = self.session.borrow();
        QualityEncoding::detect(session.aggregates.min_qual, session.aggregates.max_qual)
    }

    /// Phred ASCII offset: 33 unless only +64 encodings match.
    pub fn phred(&self) -> u8
    {
        let encodings = self.encoding_type();
        if encodings.iter().any(|e| e.phred_offset() == 33)
        {
            33
        }
        else
        {
            64
        }
    }
}

fn build_index(path: &Path, opts: &FastqOpts) -> Result<()>
{
    let tmp = store::temp_index_path_for(path);
    info!("building FASTQ index for {}", path.display());
    let result = build_index_inner(path, &tmp, opts);
    if result.is_err()
    {
        store::discard_partial(&tmp);
    }
    result
}

fn build_index_inner(path: &Path, tmp: &Path, opts: &FastqOpts) -> Result<()>
{
    let is_gzip = crate::gzip_check(path)?;
    let (source_size, source_mtime) = store::source_fingerprint(path)?;
    let store = IndexStore::create(tmp)?;
    store.begin()?;

    let (reads, aggregates) = if is_gzip
    {
        let mut decoder = IndexingDecoder::new(File::open(path)?, opts.spacing)?;
        let scanned = scan_fastq(&mut decoder)?;
        let gzip_index = decoder.finish()?;
        for cp in gzip_index.checkpoints()
        {
            store.insert_checkpoint(cp)?;
        }
        store.write_gzip_meta(gzip_index.uncompressed_len(), gzip_index.spacing())?;
        scanned
    }
    else
    {
        scan_fastq(File::open(path)?)?
    };
    for read in &reads
    {
        store.insert_read(read)?;
    }
    store.write_fastq_aggregates(&aggregates)?;

    store.write_header(&IndexHeader {
        format: IndexFormat::Fastq,
        schema_version: SCHEMA_VERSION,
        source_path: path.display().to_string(),
        source_size,
        source_mtime,
        is_gzip,
        full_index: true,
    })?;
    store.commit()?;
    store.finalize()?;
    drop(store);
    store::seal(tmp, &store::index_path_for(path))
}

/// One read of an open [`Fastq`] session.
///
/// A `Read` is a view holding offsets; the sequence and quality strings are
/// fetched from the source on demand and remain retrievable for as long as
/// the session is open.
#[derive(Clone)]
pub struct Read
{
    session: Rc<RefCell<Session>>,
    meta: ReadMeta,
    line_term: u64,
    phred: u8,
}

impl Read
{
    /// 1-based id in file order.
    pub fn id(&self) -> u64
    {
        self.meta.id
    }

    pub fn name(&self) -> &str
    {
        &self.meta.name
    }

    /// Length in bases.
    pub fn len(&self) -> u64
    {
        self.meta.seq_len
    }

    pub fn is_empty(&self) -> bool
    {
        self.meta.seq_len == 0
    }

    /// Full header line including the leading `@`.
    pub fn description(&self) -> Result<String>
    {
        let mut session = self.session.borrow_mut();
        let raw =
            session.reader.read_at(self.meta.name_off - 1, self.meta.desc_len as usize + 1)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// The bases.
    pub fn seq(&self) -> Result<String>
    {
        let mut session = self.session.borrow_mut();
        let raw = session.reader.read_at(self.meta.seq_off, self.meta.seq_len as usize)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// The quality string, as stored.
    pub fn qual(&self) -> Result<String>
    {
        let mut session = self.session.borrow_mut();
        let raw = session.reader.read_at(self.meta.qual_off, self.meta.seq_len as usize)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Integer quality scores: each quality byte minus the detected Phred
    /// offset.
    pub fn quali(&self) -> Result<Vec<i32>>
    {
        let qual = self.qual()?;
        Ok(qual.bytes().map(|b| b as i32 - self.phred as i32).collect())
    }

    /// Bases in reverse order.
    pub fn reverse(&self) -> Result<String>
    {
        Ok(reverse_str(&self.seq()?))
    }

    /// Complemented bases.
    pub fn complement(&self) -> Result<String>
    {
        Ok(complement_str(&self.seq()?))
    }

    /// Reverse complement.
    pub fn antisense(&self) -> Result<String>
    {
        Ok(antisense_str(&self.seq()?))
    }

    /// Exact bytes of the four-line record, terminators preserved.
    pub fn raw(&self) -> Result<Vec<u8>>
    {
        let (start, end) = self.meta.raw_span(self.line_term);
        let mut session = self.session.borrow_mut();
        let total = session.reader.logical_len()?;
        let end = end.min(total); // final record may lack its terminator
        session.reader.read_at(start, (end - start) as usize)
    }
}

/// Iterator over all reads of a session, in id order.
pub struct ReadIter
{
    fastq: Fastq,
    next_id: u64,
}

impl Iterator for ReadIter
{
    type Item = Result<Read>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.next_id > self.fastq.len()
        {
            return None;
        }
        let item = self.fastq.get(self.next_id as i64);
        self.next_id += 1;
        Some(item)
    }
}

/// One record yielded by the streaming reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord
{
    pub name: String,
    /// Full header line including the leading `@`.
    pub description: String,
    pub seq: String,
    pub qual: String,
}

/// Streaming FASTQ reader: one forward pass, no index, no random seeks.
pub struct FastqStream
{
    lines: Box<dyn BufRead>,
    done: bool,
}

impl FastqStream
{
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self>
    {
        let path = path.as_ref();
        if crate::detect_format(path)? != FastxFormat::Fastq
        {
            return Err(Error::Format(format!("{} is not FASTQ", path.display())));
        }
        Ok(Self { lines: crate::open_text_stream(path)?, done: false })
    }

    fn next_content(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>>
    {
        buf.clear();
        let n = self.lines.read_until(b'\n', buf)?;
        if n == 0
        {
            return Ok(None);
        }
        let mut end = buf.len();
        while end > 0 && (buf[end - 1] == b'\n' || buf[end - 1] == b'\r')
        {
            end -= 1;
        }
        buf.truncate(end);
        Ok(Some(end))
    }
}

impl Iterator for FastqStream
{
    type Item = Result<FastqRecord>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done
        {
            return None;
        }
        let mut buf = Vec::new();
        // Header, skipping blank lines between records.
        let header = loop
        {
            match self.next_content(&mut buf)
            {
                Err(e) => return Some(Err(e)),
                Ok(None) =>
                {
                    self.done = true;
                    return None;
                }
                Ok(Some(0)) => continue,
                Ok(Some(_)) => break buf.clone(),
            }
        };
        if header[0] != b'@'
        {
            return Some(Err(Error::Format("expected `@` read header".into())));
        }
        let mut step = |what: &str| -> Result<Vec<u8>> {
            match self.next_content(&mut buf)?
            {
                None => Err(Error::Format(format!("truncated record: missing {}", what))),
                Some(_) => Ok(buf.clone()),
            }
        };
        let seq = match step("sequence")
        {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        match step("separator")
        {
            Ok(plus) if plus.first() == Some(&b'+') => {}
            Ok(_) => return Some(Err(Error::Format("expected `+` separator".into()))),
            Err(e) => return Some(Err(e)),
        }
        let qual = match step("quality")
        {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        if qual.len() != seq.len()
        {
            return Some(Err(Error::Format(format!(
                "quality length {} differs from sequence length {}",
                qual.len(),
                seq.len()
            ))));
        }
        let name_len = header[1..]
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .unwrap_or(header.len() - 1);
        Some(Ok(FastqRecord {
            name: String::from_utf8_lossy(&header[1..1 + name_len]).into_owned(),
            description: String::from_utf8_lossy(&header).into_owned(),
            seq: String::from_utf8_lossy(&seq).into_owned(),
            qual: String::from_utf8_lossy(&qual).into_owned(),
        }))
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
    use tempfile::TempDir;

    /// Four 150-base reads; quality bytes span `!` (33) to `I` (73).
    fn sample_fastq() -> Vec<u8>
    {
        let mut rng = StdRng::seed_from_u64(53);
        let mut data = Vec::new();
        for i in 0..4
        {
            let seq: String = (0..150).map(|_| b"ACGTN"[rng.gen_range(0..5)] as char).collect();
            let qual: String =
                (0..150).map(|k| (33 + ((k + i * 7) % 41)) as u8 as char).collect();
            data.extend_from_slice(
                format!("@read{} pair=1\n{}\n+\n{}\n", i + 1, seq, qual).as_bytes(),
            );
        }
        data
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf
    {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn write_gzip(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf
    {
        let path = dir.path().join(name);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        path
    }

    #[test]
    fn aggregates_and_encoding()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "test.fq", &sample_fastq());
        let fq = Fastq::open(&path).unwrap();

        assert_eq!(fq.len(), 4);
        assert_eq!(fq.size(), 600);
        assert_eq!(fq.minlen(), 150);
        assert_eq!(fq.maxlen(), 150);
        assert_eq!(fq.avglen(), 150.0);
        assert_eq!(fq.minqual(), 33);
        assert_eq!(fq.maxqual(), 73);
        assert_eq!(fq.phred(), 33);

        let encodings = fq.encoding_type();
        assert!(encodings.contains(&QualityEncoding::SangerPhred33));
        assert!(encodings.contains(&QualityEncoding::Illumina18Phred33));
        assert!(encodings.contains(&QualityEncoding::PacBioHiFiPhred33));
    }

    #[test]
    fn random_access_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let data = sample_fastq();
        let path = write_file(&dir, "test.fq", &data);
        let fq = Fastq::open(&path).unwrap();

        let text = String::from_utf8(data).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        let read = fq.get(2).unwrap();
        assert_eq!(read.name(), "read2");
        assert_eq!(read.description().unwrap(), lines[4]);
        assert_eq!(read.seq().unwrap(), lines[5]);
        assert_eq!(read.qual().unwrap(), lines[7]);
        assert_eq!(read.len(), 150);

        // quali is the per-byte Phred offset subtraction.
        let quali = read.quali().unwrap();
        assert_eq!(quali[0], lines[7].as_bytes()[0] as i32 - 33);

        // Negative id wraps from the end.
        assert_eq!(fq.get(-1).unwrap().name(), "read4");
        assert!(matches!(fq.get(0), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fq.get(5), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fq.get_by_name("nope"), Err(Error::NotFound(_))));
        assert!(fq.contains("read3").unwrap());
    }

    #[test]
    fn lookup_after_drop_returns_identical_bytes()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "test.fq", &sample_fastq());
        let fq = Fastq::open(&path).unwrap();

        let first = fq.get_by_name("read3").unwrap();
        let seq = first.seq().unwrap();
        let raw = first.raw().unwrap();
        drop(first);

        let again = fq.get_by_name("read3").unwrap();
        assert_eq!(again.seq().unwrap(), seq);
        assert_eq!(again.raw().unwrap(), raw);
    }

    #[test]
    fn raw_spans_four_lines()
    {
        let dir = tempfile::tempdir().unwrap();
        let data = b"@r1 x\nACGT\n+\nIIII\n@r2\nGGCC\n+\n!!!!\n";
        let path = write_file(&dir, "test.fq", data);
        let fq = Fastq::open(&path).unwrap();

        assert_eq!(fq.get(1).unwrap().raw().unwrap(), b"@r1 x\nACGT\n+\nIIII\n");
        assert_eq!(fq.get(2).unwrap().raw().unwrap(), b"@r2\nGGCC\n+\n!!!!\n");
    }

    #[test]
    fn orientation_operations()
    {
        let dir = tempfile::tempdir().unwrap();
        let data = b"@r1\nAACGTN\n+\nIIIIII\n";
        let path = write_file(&dir, "test.fq", data);
        let fq = Fastq::open(&path).unwrap();
        let read = fq.get(1).unwrap();

        assert_eq!(read.reverse().unwrap(), "NTGCAA");
        assert_eq!(read.complement().unwrap(), "TTGCAN");
        assert_eq!(read.antisense().unwrap(), "NACGTT");
    }

    #[test]
    fn gzip_fastq_random_access()
    {
        let dir = tempfile::tempdir().unwrap();
        let data = sample_fastq();
        let plain = write_file(&dir, "test.fq", &data);
        let gz = write_gzip(&dir, "test.fq.gz", &data);

        let fq_plain = Fastq::open(&plain).unwrap();
        let fq_gz =
            Fastq::open_with(&gz, FastqOpts { spacing: 4096, ..FastqOpts::default() }).unwrap();
        assert!(fq_gz.is_gzip());
        assert_eq!(fq_gz.len(), 4);
        assert_eq!(fq_gz.size(), fq_plain.size());

        for id in 1..=4
        {
            let a = fq_plain.get(id).unwrap();
            let b = fq_gz.get(id).unwrap();
            assert_eq!(a.seq().unwrap(), b.seq().unwrap());
            assert_eq!(a.qual().unwrap(), b.qual().unwrap());
            assert_eq!(a.raw().unwrap(), b.raw().unwrap());
        }
    }

    #[test]
    fn iteration_in_file_order()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "test.fq", &sample_fastq());
        let fq = Fastq::open(&path).unwrap();

        let names: Vec<String> =
            fq.iter().map(|r| r.unwrap().name().to_string()).collect();
        assert_eq!(names, vec!["read1", "read2", "read3", "read4"]);
    }

    #[test]
    fn streaming_reader()
    {
        let dir = tempfile::tempdir().unwrap();
        let data = b"@r1 d\nACGT\n+\nIIII\n@r2\nGG\n+ignored\n!!\n";
        let path = write_file(&dir, "test.fq", data);
        let records: Vec<FastqRecord> =
            FastqStream::open(&path).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "r1");
        assert_eq!(records[0].description, "@r1 d");
        assert_eq!(records[0].seq, "ACGT");
        assert_eq!(records[0].qual, "IIII");
        assert_eq!(records[1].seq, "GG");
    }

    #[test]
    fn encoding_detection_ranges()
    {
        // Space-only quality falls outside every candidate range.
        assert_eq!(QualityEncoding::detect(32, 32), vec![QualityEncoding::Unknown]);

        // 59..=104 matches Solexa only.
        let solexa = QualityEncoding::detect(59, 104);
        assert_eq!(solexa, vec![QualityEncoding::SolexaSolexa64]);

        // 64..=104 adds Illumina 1.3+.
        let il13 = QualityEncoding::detect(64, 104);
        assert!(il13.contains(&QualityEncoding::Illumina13Phred64));
        assert!(!il13.contains(&QualityEncoding::Illumina15Phred64));

        // 66..=104 adds Illumina 1.5+.
        let il15 = QualityEncoding::detect(66, 104);
        assert!(il15.contains(&QualityEncoding::Illumina15Phred64));
    }

    #[test]
    fn phred_64_when_only_64_candidates()
    {
        let dir = tempfile::tempdir().unwrap();
        let qual: String = (64u8..100).map(|b| b as char).collect();
        let seq: String = std::iter::repeat('A').take(qual.len()).collect();
        let data = format!("@r1\n{}\n+\n{}\n", seq, qual);
        let path = write_file(&dir, "test.fq", data.as_bytes());
        let fq = Fastq::open(&path).unwrap();
        assert_eq!(fq.phred(), 64);
        let read = fq.get(1).unwrap();
        assert_eq!(read.quali().unwrap()[0], 0);
    }

    #[test]
    fn rejects_fasta_input()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "test.fa", b">a\nACGT\n");
        assert!(matches!(Fastq::open(&path), Err(Error::Format(_))));
    }
}
