//! FASTA session and sequence accessor.
//!
//! [`Fasta::open`] detects compression, reuses a sealed `.fxi` side-car when
//! the source is unchanged, and otherwise scans the file once to build it.
//! Lookups hand out [`Sequence`] values: cheap handles carrying the stored
//! metadata plus the session, materializing bases only on demand.

use crate::error::{Error, Result};
use crate::fai::{strip_terminators, LineTable, SeqMeta};
use crate::gzi::{IndexingDecoder, DEFAULT_SPACING};
use crate::keys::Keys;
use crate::reader::SourceReader;
use crate::scan::scan_fasta;
use crate::stats::{self, Composition, SeqType};
use crate::store::{self, IndexFormat, IndexHeader, IndexStore, SCHEMA_VERSION};
use crate::FastxFormat;
use log::{info, warn};
use std::cell::RefCell;
use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Options for [`Fasta::open_with`].
#[derive(Debug, Clone)]
pub struct FastaOpts
{
    /// Tally per-sequence composition during the build instead of deferring
    /// it to first use.
    pub full_index: bool,
    /// Uppercase bases on materialization.
    pub uppercase: bool,
    /// Never build or rebuild; surface a stale or missing index instead.
    pub read_only: bool,
    /// Gzip checkpoint spacing in uncompressed bytes.
    pub spacing: u64,
}

impl Default for FastaOpts
{
    fn default() -> Self
    {
        Self { full_index: false, uppercase: false, read_only: false, spacing: DEFAULT_SPACING }
    }
}

/// Session state shared by all handles of one open file.
pub(crate) struct Session
{
    pub(crate) index_path: PathBuf,
    pub(crate) store: IndexStore,
    pub(crate) reader: SourceReader,
    pub(crate) header: IndexHeader,
    pub(crate) uppercase: bool,
    pub(crate) read_only: bool,
    total_comp: Option<Composition>,
}

impl Session
{
    /// Tally composition of one sequence by streaming its body span.
    fn compute_composition(&mut self, meta: &SeqMeta) -> Result<Composition>
    {
        const STEP: u64 = 1 << 20;
        let mut comp = Composition::default();
        let mut off = meta.seq_off;
        let end = meta.seq_off + meta.byte_len;
        while off < end
        {
            let len = STEP.min(end - off) as usize;
            let chunk = self.reader.read_at(off, len)?;
            for &b in &chunk
            {
                if b != b'\n' && b != b'\r'
                {
                    comp.tally(b);
                }
            }
            off += len as u64;
        }
        Ok(comp)
    }

    /// Promote a fast-mode index to full by persisting composition counts.
    fn ensure_full(&mut self) -> Result<()>
    {
        if self.header.full_index
        {
            return Ok(());
        }
        let missing = self.store.seq_ids_without_composition()?;
        if !missing.is_empty()
        {
            info!(
                "promoting {} to full index ({} sequences)",
                self.index_path.display(),
                missing.len()
            );
            let writer = IndexStore::open_write(&self.index_path)?;
            writer.begin()?;
            for id in missing
            {
                let (meta, _) = self
                    .store
                    .seq_by_id(id)?
                    .ok_or_else(|| Error::NotFound(format!("sequence id {}", id)))?;
                let comp = self.compute_composition(&meta)?;
                writer.update_seq_composition(id, &comp)?;
            }
            writer.set_full_index(true)?;
            writer.commit()?;
        }
        self.header.full_index = true;
        Ok(())
    }

    fn file_composition(&mut self) -> Result<Composition>
    {
        if let Some(comp) = &self.total_comp
        {
            return Ok(comp.clone());
        }
        let comp = match self.store.total_composition()?
        {
            Some(comp) => comp,
            None if self.read_only =>
            {
                let mut total = Composition::default();
                for entry in self.store.seq_entries()?
                {
                    let (meta, _) = self
                        .store
                        .seq_by_id(entry.id)?
                        .ok_or_else(|| Error::NotFound(format!("sequence id {}", entry.id)))?;
                    total.merge(&self.compute_composition(&meta)?);
                }
                total
            }
            None =>
            {
                self.ensure_full()?;
                self.store.total_composition()?.ok_or_else(|| {
                    Error::Format("composition still missing after promotion".into())
                })?
            }
        };
        self.total_comp = Some(comp.clone());
        Ok(comp)
    }

    fn seq_composition(&mut self, meta: &SeqMeta) -> Result<Composition>
    {
        if let Some(comp) = self.store.seq_composition(meta.id)?
        {
            return Ok(comp);
        }
        if self.read_only
        {
            return self.compute_composition(meta);
        }
        self.ensure_full()?;
        self.store
            .seq_composition(meta.id)?
            .ok_or_else(|| Error::Format("composition still missing after promotion".into()))
    }
}

/// An indexed FASTA file.
///
/// Cloning is cheap and shares the session; sessions are single-threaded.
///
/// # Example
///
/// ```no_run
/// use fastxi::Fasta;
///
/// let fa = Fasta::open("genome.fa.gz").unwrap();
/// println!("{} sequences, {} bases", fa.len(), fa.size().unwrap());
/// let fragment = fa.subseq("chr1", 10_001, 10_100).unwrap();
/// assert_eq!(fragment.len(), 100);
/// ```
#[derive(Clone)]
pub struct Fasta
{
    session: Rc<RefCell<Session>>,
    count: u64,
    seq_type: Rc<RefCell<Option<SeqType>>>,
    path: PathBuf,
}

impl Fasta
{
    /// Open `path` with default options, building the index if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self>
    {
        Self::open_with(path, FastaOpts::default())
    }

    /// Open `path`, reusing a sealed side-car index when the source file is
    /// unchanged and rebuilding it otherwise (unless `read_only`).
    pub fn open_with<P: AsRef<Path>>(path: P, opts: FastaOpts) -> Result<Self>
    {
        let path = path.as_ref();
        let format = crate::detect_format(path)?;
        if format != FastxFormat::Fasta
        {
            return Err(Error::Format(format!("{} is not FASTA", path.display())));
        }
        let index_path = store::index_path_for(path);
        if index_path.exists()
        {
            match Self::open_sealed(path, &index_path, &opts)
            {
                Ok(fasta) => return Ok(fasta),
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
        Self::open_sealed(path, &index_path, &opts)
    }

    /// Build the index without keeping a session open. A valid existing
    /// index is left untouched.
    pub fn build<P: AsRef<Path>>(path: P, opts: &FastaOpts) -> Result<()>
    {
        Self::open_with(path, opts.clone()).map(|_| ())
    }

    fn open_sealed(path: &Path, index_path: &Path, opts: &FastaOpts) -> Result<Self>
    {
        let store = IndexStore::open_read(index_path)?;
        let header = store.validate_against(path, IndexFormat::Fasta)?;
        let reader = if header.is_gzip
        {
            SourceReader::gzip(path, store.load_gzip_index()?)?
        }
        else
        {
            SourceReader::plain(path)?
        };
        let count = store.seq_count()?;
        Ok(Self {
            session: Rc::new(RefCell::new(Session {
                index_path: index_path.to_path_buf(),
                store,
                reader,
                header,
                uppercase: opts.uppercase,
                read_only: opts.read_only,
                total_comp: None,
            })),
            count,
            seq_type: Rc::new(RefCell::new(None)),
            path: path.to_path_buf(),
        })
    }

    /// Number of sequences.
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

    /// Sequence by 1-based id; negative ids count from the end (`-1` is the
    /// last sequence). Id 0 is rejected.
    pub fn get(&self, id: i64) -> Result<Sequence>
    {
        if id == 0
        {
            return Err(Error::IndexOutOfRange("sequence ids are 1-based; 0 is invalid".into()));
        }
        let actual = if id < 0 { self.count as i64 + id + 1 } else { id };
        if actual < 1 || actual as u64 > self.count
        {
            return Err(Error::IndexOutOfRange(format!(
                "sequence id {} outside 1..={}",
                id, self.count
            )));
        }
        let (meta, table) = self
            .session
            .borrow()
            .store
            .seq_by_id(actual as u64)?
            .ok_or_else(|| Error::NotFound(format!("sequence id {}", actual)))?;
        Ok(Sequence::new(self.session.clone(), meta, table))
    }

    /// Sequence by name.
    pub fn get_by_name(&self, name: &str) -> Result<Sequence>
    {
        let (meta, table) = self
            .session
            .borrow()
            .store
            .seq_by_name(name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Sequence::new(self.session.clone(), meta, table))
    }

    /// Whether a sequence of that name exists.
    pub fn contains(&self, name: &str) -> Result<bool>
    {
        Ok(self.session.borrow().store.seq_by_name(name)?.is_some())
    }

    /// Bases of the 1-based closed interval `[start, end]` of `name`.
    pub fn subseq(&self, name: &str, start: u64, end: u64) -> Result<String>
    {
        self.get_by_name(name)?.slice(start, end)?.seq()
    }

    /// Concatenation of the given intervals of `name`, in the given order,
    /// with no separator.
    pub fn fetch(&self, name: &str, intervals: &[(u64, u64)]) -> Result<String>
    {
        let seq = self.get_by_name(name)?;
        let mut out = String::new();
        for &(start, end) in intervals
        {
            out.push_str(&seq.slice(start, end)?.seq()?);
        }
        Ok(out)
    }

    /// Up-to-`k`-base flanks of the interval `[start, end]`, clipped at the
    /// sequence ends. Either side may come back empty.
    pub fn flank(&self, name: &str, start: u64, end: u64, k: u64) -> Result<(String, String)>
    {
        let seq = self.get_by_name(name)?;
        seq.check_interval(start, end)?;
        let left = if start > 1
        {
            let from = start.saturating_sub(k).max(1);
            seq.slice(from, start - 1)?.seq()?
        }
        else
        {
            String::new()
        };
        let right = if end < seq.full_len()
        {
            let to = (end + k).min(seq.full_len());
            seq.slice(end + 1, to)?.seq()?
        }
        else
        {
            String::new()
        };
        Ok((left, right))
    }

    /// The keys view over all sequence names.
    pub fn keys(&self) -> Result<Keys>
    {
        Ok(Keys::new(self.session.borrow().store.seq_entries()?))
    }

    /// Molecule type, inferred once from the head of the first sequence.
    pub fn seq_type(&self) -> Result<SeqType>
    {
        if let Some(t) = *self.seq_type.borrow()
        {
            return Ok(t);
        }
        let first = self.get(1)?;
        let sample_len = first.full_len().min(1000);
        let sample = if sample_len == 0
        {
            String::new()
        }
        else
        {
            first.slice(1, sample_len)?.seq()?
        };
        let inferred = stats::infer_type(sample.as_bytes());
        *self.seq_type.borrow_mut() = Some(inferred);
        Ok(inferred)
    }

    /// Iterate sequences in id order. Handles stay valid after the loop.
    pub fn iter(&self) -> SequenceIter
    {
        SequenceIter { fasta: self.clone(), next_id: 1 }
    }

    // ------------------------------------------------------------------
    // statistics

    /// Total bases across all sequences.
    pub fn size(&self) -> Result<u64>
    {
        self.session.borrow().store.total_bases()
    }

    /// Whole-file composition. A fast-mode index is promoted to full on
    /// first use.
    pub fn composition(&self) -> Result<Composition>
    {
        self.session.borrow_mut().file_composition()
    }

    pub fn gc_content(&self) -> Result<f64>
    {
        Ok(self.composition()?.gc_content())
    }

    pub fn gc_skew(&self) -> Result<f64>
    {
        Ok(self.composition()?.gc_skew())
    }

    /// Mean sequence length.
    pub fn mean(&self) -> Result<f64>
    {
        Ok(stats::mean(&self.session.borrow().store.seq_lengths()?))
    }

    /// Median sequence length.
    pub fn median(&self) -> Result<f64>
    {
        Ok(stats::median(&self.session.borrow().store.seq_lengths()?))
    }

    /// Np/Lp for `p` in `(0, 100)`: the length at which the running sum of
    /// descending lengths reaches `p` percent of the total, and how many
    /// sequences that took.
    pub fn nl(&self, p: u32) -> Result<(u64, u64)>
    {
        let mut lengths = self.session.borrow().store.seq_lengths()?;
        lengths.reverse();
        stats::nl(&lengths, p)
    }

    /// The longest sequence; ties break toward the smaller id.
    pub fn longest(&self) -> Result<Sequence>
    {
        let id = self
            .session
            .borrow()
            .store
            .extreme_seq_id(true)?
            .ok_or_else(|| Error::NotFound("empty index".into()))?;
        self.get(id as i64)
    }

    /// The shortest sequence; ties break toward the smaller id.
    pub fn shortest(&self) -> Result<Sequence>
    {
        let id = self
            .session
            .borrow()
            .store
            .extreme_seq_id(false)?
            .ok_or_else(|| Error::NotFound("empty index".into()))?;
        self.get(id as i64)
    }

    /// Number of sequences at least `threshold` bases long.
    pub fn count(&self, threshold: u64) -> Result<u64>
    {
        self.session.borrow().store.seq_count_at_least(threshold)
    }
}

fn build_index(path: &Path, opts: &FastaOpts) -> Result<()>
{
    let tmp = store::temp_index_path_for(path);
    info!("building FASTA index for {}", path.display());
    let result = build_index_inner(path, &tmp, opts);
    if result.is_err()
    {
        store::discard_partial(&tmp);
    }
    result
}

fn build_index_inner(path: &Path, tmp: &Path, opts: &FastaOpts) -> Result<()>
{
    let is_gzip = crate::gzip_check(path)?;
    let (source_size, source_mtime) = store::source_fingerprint(path)?;
    let store = IndexStore::create(tmp)?;
    store.begin()?;

    let seqs = if is_gzip
    {
        let mut decoder = IndexingDecoder::new(File::open(path)?, opts.spacing)?;
        let seqs = scan_fasta(&mut decoder, opts.full_index)?;
        let gzip_index = decoder.finish()?;
        for cp in gzip_index.checkpoints()
        {
            store.insert_checkpoint(cp)?;
        }
        store.write_gzip_meta(gzip_index.uncompressed_len(), gzip_index.spacing())?;
        seqs
    }
    else
    {
        scan_fasta(File::open(path)?, opts.full_index)?
    };
    for scanned in &seqs
    {
        store.insert_seq(scanned)?;
    }

    store.write_header(&IndexHeader {
        format: IndexFormat::Fasta,
        schema_version: SCHEMA_VERSION,
        source_path: path.display().to_string(),
        source_size,
        source_mtime,
        is_gzip,
        full_index: opts.full_index,
    })?;
    store.commit()?;
    store.finalize()?;
    drop(store);
    store::seal(tmp, &store::index_path_for(path))
}

/// One sequence of an open [`Fasta`] session, or a slice of one.
///
/// A `Sequence` is a view: it holds offsets, not bases, and stays valid for
/// the lifetime of the session. Slicing produces further views; bases are
/// read from the source only by the materializing operations (`seq`,
/// `reverse`, `complement`, ...).
#[derive(Clone)]
pub struct Sequence
{
    session: Rc<RefCell<Session>>,
    meta: SeqMeta,
    table: Option<Rc<LineTable>>,
    /// 1-based closed bounds within the full sequence; `None` is the whole
    /// sequence.
    region: Option<(u64, u64)>,
}

impl Sequence
{
    pub(crate) fn new(
        session: Rc<RefCell<Session>>,
        meta: SeqMeta,
        table: Option<LineTable>,
    ) -> Self
    {
        Self { session, meta, table: table.map(Rc::new), region: None }
    }

    /// 1-based id in file order.
    pub fn id(&self) -> u64
    {
        self.meta.id
    }

    /// Name; a slice renders as `name:start-end`.
    pub fn name(&self) -> String
    {
        match self.region
        {
            Some((start, end)) => format!("{}:{}-{}", self.meta.name, start, end),
            None => self.meta.name.clone(),
        }
    }

    /// Full header line, `>` excluded.
    pub fn description(&self) -> Result<String>
    {
        let mut session = self.session.borrow_mut();
        let raw = session.reader.read_at(self.meta.desc_off, self.meta.desc_len as usize)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Length of this view in bases.
    pub fn len(&self) -> u64
    {
        match self.region
        {
            Some((start, end)) => end - start + 1,
            None => self.meta.base_len,
        }
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Length of the underlying full sequence.
    pub fn full_len(&self) -> u64
    {
        self.meta.base_len
    }

    /// 1-based start of this view.
    pub fn start(&self) -> u64
    {
        self.region.map_or(1, |(s, _)| s)
    }

    /// 1-based end of this view.
    pub fn end(&self) -> u64
    {
        self.region.map_or(self.meta.base_len, |(_, e)| e)
    }

    /// Whether every body line of the record has the same width.
    pub fn is_normalized(&self) -> bool
    {
        self.meta.normalized
    }

    fn check_interval(&self, start: u64, end: u64) -> Result<()>
    {
        if start < 1 || end < start || end > self.len()
        {
            return Err(Error::IndexOutOfRange(format!(
                "interval {}..{} invalid for `{}` of length {}",
                start,
                end,
                self.name(),
                self.len()
            )));
        }
        Ok(())
    }

    /// A sub-view over the 1-based closed interval `[start, end]` of this
    /// view. Slices compose.
    pub fn slice(&self, start: u64, end: u64) -> Result<Sequence>
    {
        self.check_interval(start, end)?;
        let base = self.start();
        let mut sliced = self.clone();
        sliced.region = Some((base + start - 1, base + end - 1));
        Ok(sliced)
    }

    /// Single base at 0-based position `pos`; negative positions count from
    /// the end of the view.
    pub fn base_at(&self, pos: i64) -> Result<char>
    {
        let n = self.len() as i64;
        let actual = if pos < 0 { n + pos } else { pos };
        if actual < 0 || actual >= n
        {
            return Err(Error::IndexOutOfRange(format!(
                "position {} outside sequence of length {}",
                pos, n
            )));
        }
        let s = self.slice(actual as u64 + 1, actual as u64 + 1)?.seq()?;
        Ok(s.chars().next().unwrap_or('\0'))
    }

    /// Materialize the bases of this view.
    pub fn seq(&self) -> Result<String>
    {
        let (start, end) = match self.region
        {
            Some((s, e)) => (s - 1, e),
            None => (0, self.meta.base_len),
        };
        self.materialize(start, end)
    }

    fn materialize(&self, start0: u64, end0: u64) -> Result<String>
    {
        if start0 >= end0
        {
            return Ok(String::new());
        }
        let mut session = self.session.borrow_mut();
        let (byte_start, byte_end) =
            self.meta.span_of_bases(start0, end0, self.table.as_deref())?;
        let raw = session.reader.read_at(byte_start, (byte_end - byte_start) as usize)?;
        let mut bases = strip_terminators(&raw);
        if session.uppercase
        {
            bases.make_ascii_uppercase();
        }
        Ok(String::from_utf8_lossy(&bases).into_owned())
    }

    /// Bases of this view in reverse order.
    pub fn reverse(&self) -> Result<String>
    {
        Ok(reverse_str(&self.seq()?))
    }

    /// Complement of this view; `A<->T`, `C<->G`, `U->A`, `N->N`, IUPAC
    /// ambiguity codes mapped, case preserved.
    pub fn complement(&self) -> Result<String>
    {
        Ok(complement_str(&self.seq()?))
    }

    /// Reverse complement.
    pub fn antisense(&self) -> Result<String>
    {
        Ok(antisense_str(&self.seq()?))
    }

    /// Exact bytes of the whole record, header line through the last body
    /// line, original terminators preserved.
    pub fn raw(&self) -> Result<Vec<u8>>
    {
        let (start, end) = self.meta.raw_span();
        let mut session = self.session.borrow_mut();
        session.reader.read_at(start, (end - start) as usize)
    }

    /// Composition of this view. For the full sequence the stored counts
    /// are used, promoting a fast-mode index when needed; a slice is
    /// tallied from its materialized bases.
    pub fn composition(&self) -> Result<Composition>
    {
        if self.region.is_some()
        {
            let mut comp = Composition::default();
            comp.tally_all(self.seq()?.as_bytes());
            return Ok(comp);
        }
        self.session.borrow_mut().seq_composition(&self.meta)
    }

    pub fn gc_content(&self) -> Result<f64>
    {
        Ok(self.composition()?.gc_content())
    }

    pub fn gc_skew(&self) -> Result<f64>
    {
        Ok(self.composition()?.gc_skew())
    }

    /// 1-based position of the first occurrence of `needle`, or `None`.
    pub fn search(&self, needle: &str) -> Result<Option<u64>>
    {
        let hay = self.seq()?;
        Ok(memchr::memmem::find(hay.as_bytes(), needle.as_bytes()).map(|i| i as u64 + 1))
    }

    /// Whether `needle` occurs in this view.
    pub fn contains_seq(&self, needle: &str) -> Result<bool>
    {
        Ok(self.search(needle)?.is_some())
    }

    /// Iterate body lines without terminators.
    ///
    /// # Errors
    ///
    /// `Error::CursorConflict` on a sliced view: line boundaries belong to
    /// the full record.
    pub fn lines(&self) -> Result<LineIter>
    {
        if self.region.is_some()
        {
            return Err(Error::CursorConflict(
                "cannot iterate lines of a sliced sequence".into(),
            ));
        }
        Ok(LineIter { seq: self.clone(), line: 0 })
    }
}

/// Iterator over the body lines of one sequence.
pub struct LineIter
{
    seq: Sequence,
    line: u64,
}

impl Iterator for LineIter
{
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item>
    {
        let meta = &self.seq.meta;
        let (start, end) = match &self.seq.table
        {
            None =>
            {
                let start = self.line * meta.line_body;
                if start >= meta.base_len
                {
                    return None;
                }
                (start, (start + meta.line_body).min(meta.base_len))
            }
            Some(table) =>
            {
                let span = table.span_at(self.line as usize)?;
                let end = table
                    .span_at(self.line as usize + 1)
                    .map(|next| next.cum_bases)
                    .unwrap_or(meta.base_len);
                (span.cum_bases, end)
            }
        };
        self.line += 1;
        Some(self.seq.materialize(start, end))
    }
}

/// Iterator over all sequences of a session, in id order.
pub struct SequenceIter
{
    fasta: Fasta,
    next_id: u64,
}

impl Iterator for SequenceIter
{
    type Item = Result<Sequence>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.next_id > self.fasta.len()
        {
            return None;
        }
        let item = self.fasta.get(self.next_id as i64);
        self.next_id += 1;
        Some(item)
    }
}

/// One record yielded by the streaming reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord
{
    /// Header up to the first whitespace.
    pub name: String,
    /// Full header line, `>` excluded.
    pub description: String,
    pub seq: String,
}

/// Streaming FASTA reader: one forward pass, no index, no random seeks.
///
/// The degraded mode for callers that only iterate; gzip sources are
/// decompressed on the fly.
pub struct FastaStream
{
    lines: Box<dyn BufRead>,
    pending: Option<(String, String)>,
    uppercase: bool,
    done: bool,
}

impl FastaStream
{
    pub fn open<P: AsRef<Path>>(path: P, uppercase: bool) -> Result<Self>
    {
        let path = path.as_ref();
        if crate::detect_format(path)? != FastxFormat::Fasta
        {
            return Err(Error::Format(format!("{} is not FASTA", path.display())));
        }
        Ok(Self {
            lines: crate::open_text_stream(path)?,
            pending: None,
            uppercase,
            done: false,
        })
    }

    fn parse_header(line: &[u8]) -> (String, String)
    {
        let header = &line[1..];
        let name_len =
            header.iter().position(|b| b.is_ascii_whitespace()).unwrap_or(header.len());
        (
            String::from_utf8_lossy(&header[..name_len]).into_owned(),
            String::from_utf8_lossy(header).into_owned(),
        )
    }
}

impl Iterator for FastaStream
{
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done
        {
            return None;
        }
        let mut buf = Vec::new();
        let mut seq = String::new();
        loop
        {
            buf.clear();
            let n = match self.lines.read_until(b'\n', &mut buf)
            {
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            if n == 0
            {
                self.done = true;
                return self.pending.take().map(|(name, description)| {
                    Ok(FastaRecord { name, description, seq })
                });
            }
            let mut content: &[u8] = &buf;
            while let [rest @ .., b'\n' | b'\r'] = content
            {
                content = rest;
            }
            if content.first() == Some(&b'>')
            {
                let parsed = Self::parse_header(content);
                match self.pending.replace(parsed)
                {
                    Some((name, description)) =>
                    {
                        return Some(Ok(FastaRecord { name, description, seq }))
                    }
                    None if seq.is_empty() => continue,
                    None =>
                    {
                        return Some(Err(Error::Format(
                            "sequence data before first header".into(),
                        )))
                    }
                }
            }
            else if self.pending.is_some()
            {
                let mut line = String::from_utf8_lossy(content).into_owned();
                if self.uppercase
                {
                    line.make_ascii_uppercase();
                }
                seq.push_str(&line);
            }
            else if !content.is_empty()
            {
                return Some(Err(Error::Format(
                    "expected `>` header at start of FASTA stream".into(),
                )));
            }
        }
    }
}

pub(crate) fn complement_byte(b: u8) -> u8
{
    match b
    {
        b'A' => b'T',
        b'a' => b't',
        b'T' => b'A',
        b't' => b'a',
        b'C' => b'G',
        b'c' => b'g',
        b'G' => b'C',
        b'g' => b'c',
        b'U' => b'A',
        b'u' => b'a',
        b'R' => b'Y',
        b'r' => b'y',
        b'Y' => b'R',
        b'y' => b'r',
        b'K' => b'M',
        b'k' => b'm',
        b'M' => b'K',
        b'm' => b'k',
        b'B' => b'V',
        b'b' => b'v',
        b'V' => b'B',
        b'v' => b'b',
        b'D' => b'H',
        b'd' => b'h',
        b'H' => b'D',
        b'h' => b'd',
        other => other,
    }
}

pub(crate) fn complement_str(s: &str) -> String
{
    let bytes: Vec<u8> = s.bytes().map(complement_byte).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub(crate) fn reverse_str(s: &str) -> String
{
    s.chars().rev().collect()
}

pub(crate) fn antisense_str(s: &str) -> String
{
    let bytes: Vec<u8> = s.bytes().rev().map(complement_byte).collect();
    String::from_utf8_lossy(&bytes).into_owned()
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

    const SIMPLE: &[u8] = b">a\nACGT\nACGT\n>b\nNNNN\n";

    fn write_fasta(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf
    {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn write_gzip_fasta(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf
    {
        let path = dir.path().join(name);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        path
    }

    #[test]
    fn simple_fasta_statistics()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        assert_eq!(fa.len(), 2);
        assert!(!fa.is_gzip());
        assert_eq!(fa.size().unwrap(), 12);
        assert_eq!(fa.gc_content().unwrap(), 50.0);
        assert_eq!(fa.subseq("a", 2, 6).unwrap(), "CGTAC");
        assert_eq!(fa.longest().unwrap().name(), "a");
        assert_eq!(fa.shortest().unwrap().name(), "b");

        let comp = fa.composition().unwrap();
        assert_eq!((comp.a, comp.c, comp.g, comp.t, comp.n), (2, 2, 2, 2, 4));

        assert_eq!(fa.mean().unwrap(), 6.0);
        assert_eq!(fa.median().unwrap(), 6.0);
        assert_eq!(fa.count(5).unwrap(), 1);
        assert_eq!(fa.nl(50).unwrap(), (8, 1));
        assert_eq!(fa.seq_type().unwrap(), SeqType::Dna);
    }

    #[test]
    fn crlf_fasta_same_semantics()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", b">a\r\nACGT\r\nACGT\r\n>b\r\nNNNN\r\n");
        let fa = Fasta::open(&path).unwrap();

        assert_eq!(fa.len(), 2);
        assert_eq!(fa.size().unwrap(), 12);
        assert_eq!(fa.gc_content().unwrap(), 50.0);
        assert_eq!(fa.subseq("a", 2, 6).unwrap(), "CGTAC");
        let seq = fa.get_by_name("a").unwrap();
        assert_eq!(seq.meta.line_term, 2);
        assert_eq!(seq.seq().unwrap(), "ACGTACGT");
    }

    #[test]
    fn ragged_fasta_subseq()
    {
        let body = "ACGTACGTAC\nACGTACGT\nACGTACGTAC\n";
        let flat: String = body.chars().filter(|c| *c != '\n').collect();
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "ragged.fa", format!(">r\n{}", body).as_bytes());
        let fa = Fasta::open(&path).unwrap();

        let seq = fa.get_by_name("r").unwrap();
        assert!(!seq.is_normalized());
        assert_eq!(seq.seq().unwrap(), flat);
        for (start, end) in [(1u64, 28u64), (5, 15), (10, 19), (18, 20), (28, 28)]
        {
            assert_eq!(
                fa.subseq("r", start, end).unwrap(),
                &flat[start as usize - 1..end as usize],
                "subseq {}..{}",
                start,
                end
            );
        }
    }

    #[test]
    fn negative_and_invalid_ids()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        assert_eq!(fa.get(-1).unwrap().name(), "b");
        assert_eq!(fa.get(-2).unwrap().name(), "a");
        assert!(matches!(fa.get(0), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fa.get(3), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fa.get(-3), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fa.get_by_name("zz"), Err(Error::NotFound(_))));
    }

    #[test]
    fn subseq_validation()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        assert!(matches!(fa.subseq("a", 0, 3), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fa.subseq("a", 5, 3), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(fa.subseq("a", 1, 9), Err(Error::IndexOutOfRange(_))));
        assert_eq!(fa.subseq("a", 1, 8).unwrap(), "ACGTACGT");
        assert_eq!(fa.subseq("a", 8, 8).unwrap(), "T");
    }

    #[test]
    fn fetch_concatenates_in_order()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        assert_eq!(fa.fetch("a", &[(1, 4), (5, 8)]).unwrap(), "ACGTACGT");
        assert_eq!(fa.fetch("a", &[(5, 8), (1, 4)]).unwrap(), "ACGTACGT");
        assert_eq!(fa.fetch("a", &[(2, 3), (6, 7)]).unwrap(), "CGCG");
        assert!(fa.fetch("a", &[(2, 3), (6, 9)]).is_err());
    }

    #[test]
    fn flank_clips_at_ends()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        let (left, right) = fa.flank("a", 3, 6, 2).unwrap();
        assert_eq!(left, "AC");
        assert_eq!(right, "GT");

        let (left, right) = fa.flank("a", 1, 8, 5).unwrap();
        assert_eq!(left, "");
        assert_eq!(right, "");

        let (left, right) = fa.flank("a", 2, 7, 5).unwrap();
        assert_eq!(left, "A");
        assert_eq!(right, "T");
    }

    #[test]
    fn orientation_operations()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", b">x\nAACGTN\n");
        let fa = Fasta::open(&path).unwrap();
        let seq = fa.get_by_name("x").unwrap();

        assert_eq!(seq.reverse().unwrap(), "NTGCAA");
        assert_eq!(seq.complement().unwrap(), "TTGCAN");
        assert_eq!(seq.antisense().unwrap(), "NACGTT");
        assert_eq!(
            seq.antisense().unwrap(),
            reverse_str(&seq.complement().unwrap())
        );
    }

    #[test]
    fn slices_compose_and_index()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();
        let seq = fa.get_by_name("a").unwrap();

        let outer = seq.slice(2, 7).unwrap();
        assert_eq!(outer.seq().unwrap(), "CGTACG");
        assert_eq!(outer.name(), "a:2-7");
        assert_eq!(outer.len(), 6);

        let inner = outer.slice(2, 3).unwrap();
        assert_eq!(inner.seq().unwrap(), "GT");
        assert_eq!(inner.name(), "a:3-4");

        assert_eq!(seq.base_at(0).unwrap(), 'A');
        assert_eq!(seq.base_at(-1).unwrap(), 'T');
        assert_eq!(outer.base_at(1).unwrap(), 'G');
        assert!(outer.base_at(6).is_err());
    }

    #[test]
    fn raw_preserves_terminators()
    {
        let dir = tempfile::tempdir().unwrap();
        let data = b">a desc\r\nACGT\r\nAC\r\n>b\r\nGG\r\n";
        let path = write_fasta(&dir, "test.fa", data);
        let fa = Fasta::open(&path).unwrap();

        assert_eq!(fa.get_by_name("a").unwrap().raw().unwrap(), b">a desc\r\nACGT\r\nAC\r\n");
        assert_eq!(fa.get_by_name("b").unwrap().raw().unwrap(), b">b\r\nGG\r\n");
        assert_eq!(fa.get_by_name("a").unwrap().description().unwrap(), "a desc");
    }

    #[test]
    fn line_iteration()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", b">a\nACGT\nACGT\nAC\n");
        let fa = Fasta::open(&path).unwrap();
        let seq = fa.get_by_name("a").unwrap();

        let lines: Vec<String> = seq.lines().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["ACGT", "ACGT", "AC"]);

        let sliced = seq.slice(2, 5).unwrap();
        assert!(matches!(sliced.lines(), Err(Error::CursorConflict(_))));
    }

    #[test]
    fn search_and_containment()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();
        let seq = fa.get_by_name("a").unwrap();

        assert_eq!(seq.search("GTAC").unwrap(), Some(3));
        assert_eq!(seq.search("TTTT").unwrap(), None);
        assert!(seq.contains_seq("CGTA").unwrap());
    }

    #[test]
    fn iteration_matches_linear_read()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        let collected: Vec<(String, String)> = fa
            .iter()
            .map(|s| {
                let s = s.unwrap();
                (s.name(), s.seq().unwrap())
            })
            .collect();
        assert_eq!(
            collected,
            vec![("a".into(), "ACGTACGT".into()), ("b".into(), "NNNN".into())]
        );

        // Handles created in the loop stay valid afterwards.
        let first = fa.iter().next().unwrap().unwrap();
        assert_eq!(first.seq().unwrap(), "ACGTACGT");
        assert_eq!(first.seq().unwrap(), "ACGTACGT");
    }

    #[test]
    fn streaming_reader_yields_records()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", b"\n>a one\nacgt\nacgt\n>b\nNNNN\n");
        let records: Vec<FastaRecord> =
            FastaStream::open(&path, true).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a");
        assert_eq!(records[0].description, "a one");
        assert_eq!(records[0].seq, "ACGTACGT");
        assert_eq!(records[1].seq, "NNNN");
    }

    #[test]
    fn gzip_fasta_random_access_matches_plain()
    {
        let mut rng = StdRng::seed_from_u64(97);
        let mut data = Vec::new();
        let mut flat: Vec<String> = Vec::new();
        for i in 0..6
        {
            let bases: String =
                (0..300_000).map(|_| b"ACGT"[rng.gen_range(0..4)] as char).collect();
            data.extend_from_slice(format!(">seq{}\n", i).as_bytes());
            for chunk in bases.as_bytes().chunks(70)
            {
                data.extend_from_slice(chunk);
                data.push(b'\n');
            }
            flat.push(bases);
        }

        let dir = tempfile::tempdir().unwrap();
        let plain = write_fasta(&dir, "big.fa", &data);
        let gz = write_gzip_fasta(&dir, "big.fa.gz", &data);

        let fa_plain = Fasta::open(&plain).unwrap();
        let fa_gz = Fasta::open_with(
            &gz,
            FastaOpts { spacing: 128 * 1024, ..FastaOpts::default() },
        )
        .unwrap();
        assert!(fa_gz.is_gzip());
        assert_eq!(fa_gz.len(), 6);
        assert_eq!(fa_gz.size().unwrap(), fa_plain.size().unwrap());

        // A 1000-base window crossing well into checkpointed territory.
        for (name, start, end) in
            [("seq3", 150_001u64, 151_000u64), ("seq0", 1, 1000), ("seq5", 299_001, 300_000)]
        {
            let want = &flat[name[3..].parse::<usize>().unwrap()]
                [start as usize - 1..end as usize];
            assert_eq!(fa_gz.subseq(name, start, end).unwrap(), want);
            assert_eq!(
                fa_gz.subseq(name, start, end).unwrap(),
                fa_plain.subseq(name, start, end).unwrap()
            );
        }
    }

    #[test]
    fn fast_index_promotes_on_composition()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        {
            let fa = Fasta::open(&path).unwrap();
            assert!(!fa.session.borrow().header.full_index);
            let comp = fa.composition().unwrap();
            assert_eq!(comp.n, 4);
            assert!(fa.session.borrow().header.full_index);
        }
        // The promotion persisted: a fresh session sees stored counts.
        let fa = Fasta::open(&path).unwrap();
        assert!(fa.session.borrow().store.total_composition().unwrap().is_some());
    }

    #[test]
    fn uppercase_option()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", b">a\nacgt\n");
        let fa =
            Fasta::open_with(&path, FastaOpts { uppercase: true, ..FastaOpts::default() })
                .unwrap();
        assert_eq!(fa.get(1).unwrap().seq().unwrap(), "ACGT");

        let fa_lower = Fasta::open(&path).unwrap();
        assert_eq!(fa_lower.get(1).unwrap().seq().unwrap(), "acgt");
    }

    #[test]
    fn rna_and_protein_types()
    {
        let dir = tempfile::tempdir().unwrap();
        let rna = write_fasta(&dir, "rna.fa", b">r\nACGUACGU\n");
        assert_eq!(Fasta::open(&rna).unwrap().seq_type().unwrap(), SeqType::Rna);

        let prot = write_fasta(&dir, "prot.fa", b">p\nMKVLAEGQPF\n");
        assert_eq!(Fasta::open(&prot).unwrap().seq_type().unwrap(), SeqType::Protein);
    }

    #[test]
    fn keys_view_integration()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fa", SIMPLE);
        let fa = Fasta::open(&path).unwrap();

        let mut keys = fa.keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("a"));
        assert_eq!(keys.get(-1).unwrap(), "b");
        keys.sort(crate::keys::SortKey::Length, true);
        assert_eq!(keys.get(0).unwrap(), "a");
    }

    #[test]
    fn rejects_fastq_input()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fasta(&dir, "test.fq", b"@r1\nACGT\n+\nIIII\n");
        assert!(matches!(Fasta::open(&path), Err(Error::Format(_))));
    }
}
