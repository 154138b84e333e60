//! Random, constant-time access to FASTA and FASTQ files, plain or
//! gzip-compressed.
//!
//! The first open of a file scans it once and writes a side-car index
//! (`<source>.fxi`, an embedded SQLite file) holding per-record offsets,
//! line geometry and, for gzip sources, a checkpoint table that lets
//! inflate restart mid-stream. Every later open reuses the index, so a
//! single sequence or any subrange of one is served by reading only the
//! bytes it occupies.
//!
//! ```no_run
//! use fastxi::{Fasta, Fastq};
//!
//! let fa = Fasta::open("genome.fa.gz").unwrap();
//! let exon = fa.subseq("chr7", 55_019_017, 55_019_365).unwrap();
//!
//! let fq = Fastq::open("reads.fq").unwrap();
//! let read = fq.get(-1).unwrap();
//! println!("{} {:?}", read.name(), read.quali().unwrap());
//! ```

pub mod error;
pub mod fai;
pub mod fasta;
pub mod fastq;
pub mod gzi;
pub mod keys;
pub mod reader;
pub mod scan;
pub mod stats;
pub mod store;

pub use error::{Error, Result};
pub use fasta::{Fasta, FastaOpts, FastaRecord, FastaStream, Sequence};
pub use fastq::{Fastq, FastqOpts, FastqRecord, FastqStream, QualityEncoding, Read};
pub use keys::{Filter, Keys, SortKey};
pub use stats::{Composition, SeqType};

use std::fs::File;
use std::io::{BufRead, BufReader, Read as _};
use std::path::Path;

/// Record format of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastxFormat
{
    Fasta,
    Fastq,
}

/// An open file of either format.
pub enum Fastx
{
    Fasta(Fasta),
    Fastq(Fastq),
}

impl Fastx
{
    /// Detect the format of `path` and open it accordingly.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Fastx>
    {
        let path = path.as_ref();
        match detect_format(path)?
        {
            FastxFormat::Fasta => Ok(Fastx::Fasta(Fasta::open(path)?)),
            FastxFormat::Fastq => Ok(Fastx::Fastq(Fastq::open(path)?)),
        }
    }

    pub fn format(&self) -> FastxFormat
    {
        match self
        {
            Fastx::Fasta(_) => FastxFormat::Fasta,
            Fastx::Fastq(_) => FastxFormat::Fastq,
        }
    }

    /// Number of records.
    pub fn len(&self) -> u64
    {
        match self
        {
            Fastx::Fasta(fa) => fa.len(),
            Fastx::Fastq(fq) => fq.len(),
        }
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    pub fn is_gzip(&self) -> bool
    {
        match self
        {
            Fastx::Fasta(fa) => fa.is_gzip(),
            Fastx::Fastq(fq) => fq.is_gzip(),
        }
    }
}

/// Whether `path` starts with the gzip magic bytes.
pub fn gzip_check<P: AsRef<Path>>(path: P) -> Result<bool>
{
    let mut file = File::open(path.as_ref())?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic)
    {
        Ok(()) => Ok(magic == [0x1f, 0x8b]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Open `path` as a forward text stream, decompressing gzip on the fly.
pub(crate) fn open_text_stream(path: &Path) -> Result<Box<dyn BufRead>>
{
    if gzip_check(path)?
    {
        let decoder = flate2::read::MultiGzDecoder::new(File::open(path)?);
        Ok(Box::new(BufReader::new(decoder)))
    }
    else
    {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

/// Determine the record format from the first non-blank line.
///
/// # Errors
///
/// `Error::Format` when the first non-blank byte is neither `>` nor `@`,
/// or the file is empty.
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<FastxFormat>
{
    let path = path.as_ref();
    let mut stream = open_text_stream(path)?;
    let mut line = Vec::new();
    loop
    {
        line.clear();
        if stream.read_until(b'\n', &mut line)? == 0
        {
            return Err(Error::Format(format!("{} is empty", path.display())));
        }
        match line.iter().find(|b| !b.is_ascii_whitespace())
        {
            None => continue,
            Some(b'>') => return Ok(FastxFormat::Fasta),
            Some(b'@') => return Ok(FastxFormat::Fastq),
            Some(_) =>
            {
                return Err(Error::Format(format!(
                    "{} is neither FASTA nor FASTQ",
                    path.display()
                )))
            }
        }
    }
}
