//! First-pass scanners.
//!
//! One linear read over the source produces everything the index needs: per
//! sequence the header and body offsets plus line geometry (FASTA), per read
//! the four line offsets plus quality extrema (FASTQ), and optionally the
//! base composition. For gzipped sources the scanner reads through
//! [`crate::gzi::IndexingDecoder`], so the same pass also emits the
//! checkpoint table.

use crate::error::{Error, Result};
use crate::fai::{LineSpan, LineTable, SeqMeta};
use crate::stats::Composition;
use std::io::{BufRead, BufReader, Read};

/// One scanned FASTA sequence: metadata, the ragged-line sidecar when the
/// body is not uniformly wrapped, and the composition when requested.
#[derive(Debug, Clone)]
pub struct ScannedSeq
{
    pub meta: SeqMeta,
    pub table: Option<LineTable>,
    pub composition: Option<Composition>,
}

/// Offsets of one FASTQ read; `name_off` points past the `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMeta
{
    /// 1-based, contiguous, in file order.
    pub id: u64,
    /// Name: the header up to the first whitespace.
    pub name: String,
    pub name_off: u64,
    pub name_len: u64,
    /// Full header length after `@`, terminator excluded.
    pub desc_len: u64,
    pub seq_off: u64,
    pub seq_len: u64,
    pub qual_off: u64,
}

impl ReadMeta
{
    /// Byte span of the whole four-line record: `[header, end)`.
    pub fn raw_span(&self, line_term: u64) -> (u64, u64)
    {
        (self.name_off - 1, self.qual_off + self.seq_len + line_term)
    }
}

/// Whole-file FASTQ aggregates gathered during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqAggregates
{
    pub read_count: u64,
    pub total_bases: u64,
    pub composition: Composition,
    pub min_len: u64,
    pub max_len: u64,
    pub min_qual: u8,
    pub max_qual: u8,
    /// Terminator width, uniform across the file: 1 for LF, 2 for CRLF.
    pub line_term: u64,
}

/// Scan a FASTA stream, producing one [`ScannedSeq`] per record.
///
/// Blank lines before the first header are tolerated. Composition is
/// tallied only when `full` is set; a fast build defers it.
pub fn scan_fasta<R: Read>(source: R, full: bool) -> Result<Vec<ScannedSeq>>
{
    let mut lines = LineReader::new(source);
    let mut buf = Vec::new();
    let mut out: Vec<ScannedSeq> = Vec::new();
    let mut cur: Option<SeqBuilder> = None;

    while let Some(off) = lines.next_line(&mut buf)?
    {
        let content = line_content(&buf);
        if content.first() == Some(&b'>')
        {
            if let Some(builder) = cur.take()
            {
                out.push(builder.finish(off)?);
            }
            cur = Some(SeqBuilder::new(out.len() as u64 + 1, off, &buf, full)?);
        }
        else if let Some(builder) = cur.as_mut()
        {
            builder.push_line(off, &buf)?;
        }
        else if content.is_empty()
        {
            continue;
        }
        else
        {
            return Err(Error::Format(format!(
                "expected `>` header, found other content at byte {}",
                off
            )));
        }
    }

    match cur.take()
    {
        Some(builder) => out.push(builder.finish(lines.offset())?),
        None => return Err(Error::Format("no FASTA records found".into())),
    }
    Ok(out)
}

/// Scan a FASTQ stream, producing the read table and whole-file aggregates.
pub fn scan_fastq<R: Read>(source: R) -> Result<(Vec<ReadMeta>, FastqAggregates)>
{
    #[derive(PartialEq)]
    enum State
    {
        NeedName,
        NeedSeq,
        NeedPlus,
        NeedQual,
    }

    let mut lines = LineReader::new(source);
    let mut buf = Vec::new();
    let mut reads: Vec<ReadMeta> = Vec::new();
    let mut state = State::NeedName;
    let mut agg = FastqAggregates {
        read_count: 0,
        total_bases: 0,
        composition: Composition::default(),
        min_len: u64::MAX,
        max_len: 0,
        min_qual: u8::MAX,
        max_qual: 0,
        line_term: 0,
    };
    // Fields of the record being assembled.
    let (mut name, mut name_off, mut name_len, mut desc_len) = (String::new(), 0u64, 0u64, 0u64);
    let (mut seq_off, mut seq_len) = (0u64, 0u64);

    while let Some(off) = lines.next_line(&mut buf)?
    {
        let content = line_content(&buf);
        match state
        {
            State::NeedName =>
            {
                if content.is_empty()
                {
                    continue;
                }
                if content[0] != b'@'
                {
                    return Err(Error::Format(format!(
                        "expected `@` read header at byte {}",
                        off
                    )));
                }
                let header = &content[1..];
                name_len = header
                    .iter()
                    .position(|b| b.is_ascii_whitespace())
                    .unwrap_or(header.len()) as u64;
                name = String::from_utf8_lossy(&header[..name_len as usize]).into_owned();
                name_off = off + 1;
                desc_len = header.len() as u64;
                state = State::NeedSeq;
            }
            State::NeedSeq =>
            {
                let term = (buf.len() - content.len()) as u64;
                if agg.line_term == 0
                {
                    agg.line_term = if term == 0 { 1 } else { term };
                }
                else if term != 0 && term != agg.line_term
                {
                    return Err(Error::Format(format!(
                        "inconsistent line terminators at byte {}",
                        off
                    )));
                }
                seq_off = off;
                seq_len = content.len() as u64;
                for &b in content
                {
                    agg.composition.tally(b);
                }
                state = State::NeedPlus;
            }
            State::NeedPlus =>
            {
                if content.first() != Some(&b'+')
                {
                    return Err(Error::Format(format!(
                        "expected `+` separator at byte {}",
                        off
                    )));
                }
                state = State::NeedQual;
            }
            State::NeedQual =>
            {
                if content.len() as u64 != seq_len
                {
                    return Err(Error::Format(format!(
                        "quality length {} differs from sequence length {} for read `{}`",
                        content.len(),
                        seq_len,
                        name
                    )));
                }
                for &q in content
                {
                    agg.min_qual = agg.min_qual.min(q);
                    agg.max_qual = agg.max_qual.max(q);
                }
                agg.read_count += 1;
                agg.total_bases += seq_len;
                agg.min_len = agg.min_len.min(seq_len);
                agg.max_len = agg.max_len.max(seq_len);
                reads.push(ReadMeta {
                    id: reads.len() as u64 + 1,
                    name: std::mem::take(&mut name),
                    name_off,
                    name_len,
                    desc_len,
                    seq_off,
                    seq_len,
                    qual_off: off,
                });
                state = State::NeedName;
            }
        }
    }

    if state != State::NeedName
    {
        return Err(Error::Format("truncated FASTQ record at end of file".into()));
    }
    if reads.is_empty()
    {
        return Err(Error::Format("no FASTQ records found".into()));
    }
    if agg.min_len == u64::MAX
    {
        agg.min_len = 0;
    }
    Ok((reads, agg))
}

/// Assembles one sequence as its lines arrive.
struct SeqBuilder
{
    id: u64,
    name: String,
    desc_off: u64,
    desc_len: u64,
    header_end: u64,
    seq_off: Option<u64>,
    line_body: u64,
    line_term: u64,
    // Last body line seen; validated as non-terminal once another follows.
    prev: Option<(u64, u64)>, // (width, term)
    blank_pending: bool,
    ragged: bool,
    table: Vec<LineSpan>,
    cum: u64,
    composition: Option<Composition>,
}

impl SeqBuilder
{
    fn new(id: u64, header_off: u64, raw_line: &[u8], full: bool) -> Result<Self>
    {
        let content = line_content(raw_line);
        let header = &content[1..];
        let name_len =
            header.iter().position(|b| b.is_ascii_whitespace()).unwrap_or(header.len());
        if name_len == 0
        {
            return Err(Error::Format(format!("empty sequence name at byte {}", header_off)));
        }
        Ok(Self {
            id,
            name: String::from_utf8_lossy(&header[..name_len]).into_owned(),
            desc_off: header_off + 1,
            desc_len: header.len() as u64,
            header_end: header_off + raw_line.len() as u64,
            seq_off: None,
            line_body: 0,
            line_term: 1,
            prev: None,
            blank_pending: false,
            ragged: false,
            table: Vec::new(),
            cum: 0,
            composition: full.then(Composition::default),
        })
    }

    fn push_line(&mut self, off: u64, raw_line: &[u8]) -> Result<()>
    {
        let content = line_content(raw_line);
        if content.is_empty()
        {
            if self.seq_off.is_some()
            {
                self.blank_pending = true;
            }
            return Ok(());
        }
        let term = (raw_line.len() - content.len()) as u64;
        match self.seq_off
        {
            None =>
            {
                self.seq_off = Some(off);
                self.line_body = content.len() as u64;
                self.line_term = if term == 0 { 1 } else { term };
            }
            Some(_) =>
            {
                if self.blank_pending
                {
                    // A gap inside the body breaks the uniform arithmetic.
                    self.ragged = true;
                    self.blank_pending = false;
                }
                if let Some((prev_width, prev_term)) = self.prev
                {
                    if prev_width != self.line_body
                    {
                        self.ragged = true;
                    }
                    if prev_term != self.line_term
                    {
                        return Err(Error::Format(format!(
                            "mixed line terminators in sequence `{}`",
                            self.name
                        )));
                    }
                }
            }
        }
        self.table.push(LineSpan { byte_off: off, cum_bases: self.cum });
        self.cum += content.len() as u64;
        if let Some(composition) = self.composition.as_mut()
        {
            for &b in content
            {
                composition.tally(b);
            }
        }
        self.prev = Some((content.len() as u64, term));
        Ok(())
    }

    fn finish(mut self, next_off: u64) -> Result<ScannedSeq>
    {
        if let Some((width, term)) = self.prev
        {
            if width > self.line_body
            {
                self.ragged = true;
            }
            if term != 0 && term != self.line_term
            {
                return Err(Error::Format(format!(
                    "mixed line terminators in sequence `{}`",
                    self.name
                )));
            }
        }
        let seq_off = self.seq_off.unwrap_or(self.header_end);
        let meta = SeqMeta {
            id: self.id,
            name: self.name,
            desc_off: self.desc_off,
            desc_len: self.desc_len,
            seq_off,
            byte_len: next_off - seq_off,
            base_len: self.cum,
            line_body: self.line_body.max(1),
            line_term: self.line_term,
            normalized: !self.ragged,
        };
        let table = if self.ragged { Some(LineTable::new(self.table)) } else { None };
        Ok(ScannedSeq { meta, table, composition: self.composition })
    }
}

/// Buffered line reader tracking absolute byte offsets.
struct LineReader<R: Read>
{
    inner: BufReader<R>,
    offset: u64,
}

impl<R: Read> LineReader<R>
{
    fn new(source: R) -> Self
    {
        Self { inner: BufReader::new(source), offset: 0 }
    }

    /// Offset of the next unread byte.
    fn offset(&self) -> u64
    {
        self.offset
    }

    /// Read one line including its terminator into `buf`; returns the
    /// line's start offset, or `None` at end of input.
    fn next_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>>
    {
        buf.clear();
        let start = self.offset;
        let n = self.inner.read_until(b'\n', buf)?;
        if n == 0
        {
            return Ok(None);
        }
        self.offset += n as u64;
        Ok(Some(start))
    }
}

/// Line bytes with the trailing `\n` / `\r\n` removed.
fn line_content(line: &[u8]) -> &[u8]
{
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n'
    {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r'
    {
        end -= 1;
    }
    &line[..end]
}
