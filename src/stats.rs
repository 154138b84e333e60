//! Composition tallies and length statistics.
//!
//! The statistics engine works on values read back from the sealed index;
//! the functions here are the arithmetic, the sessions supply the data.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Tally of base occurrences, case-insensitive.
///
/// The five canonical nucleotide symbols get dedicated counters; anything
/// else (IUPAC ambiguity codes, protein residues, `U`) lands in `other`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composition
{
    pub a: u64,
    pub c: u64,
    pub g: u64,
    pub t: u64,
    pub n: u64,
    pub other: BTreeMap<u8, u64>,
}

impl Composition
{
    pub fn tally(&mut self, byte: u8)
    {
        match byte.to_ascii_uppercase()
        {
            b'A' => self.a += 1,
            b'C' => self.c += 1,
            b'G' => self.g += 1,
            b'T' => self.t += 1,
            b'N' => self.n += 1,
            up => *self.other.entry(up).or_insert(0) += 1,
        }
    }

    pub fn tally_all(&mut self, bytes: &[u8])
    {
        for &b in bytes
        {
            self.tally(b);
        }
    }

    pub fn merge(&mut self, other: &Composition)
    {
        self.a += other.a;
        self.c += other.c;
        self.g += other.g;
        self.t += other.t;
        self.n += other.n;
        for (&base, &count) in &other.other
        {
            *self.other.entry(base).or_insert(0) += count;
        }
    }

    /// All tallied bases, `other` included.
    pub fn total(&self) -> u64
    {
        self.a + self.c + self.g + self.t + self.n + self.other.values().sum::<u64>()
    }

    /// `100 * (C+G) / (A+C+G+T)`; bases outside ACGT are excluded.
    pub fn gc_content(&self) -> f64
    {
        let acgt = self.a + self.c + self.g + self.t;
        if acgt == 0
        {
            return 0.0;
        }
        100.0 * (self.c + self.g) as f64 / acgt as f64
    }

    /// `(G - C) / (G + C)`.
    pub fn gc_skew(&self) -> f64
    {
        let gc = self.g + self.c;
        if gc == 0
        {
            return 0.0;
        }
        (self.g as f64 - self.c as f64) / gc as f64
    }

    /// Serialize the `other` map as `(symbol, count)` records, count in
    /// little-endian.
    pub fn other_to_bytes(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(self.other.len() * 9);
        for (&base, &count) in &self.other
        {
            out.push(base);
            out.extend_from_slice(&count.to_le_bytes());
        }
        out
    }

    /// Inverse of [`Composition::other_to_bytes`].
    pub fn other_from_bytes(data: &[u8]) -> Result<BTreeMap<u8, u64>>
    {
        if data.len() % 9 != 0
        {
            return Err(Error::Format(format!(
                "composition blob length {} is not a multiple of 9",
                data.len()
            )));
        }
        let mut map = BTreeMap::new();
        for rec in data.chunks_exact(9)
        {
            map.insert(rec[0], u64::from_le_bytes(rec[1..].try_into().unwrap()));
        }
        Ok(map)
    }
}

/// Molecule type inferred from a sampled portion of the first sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqType
{
    Dna,
    Rna,
    Protein,
}

impl std::fmt::Display for SeqType
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self
        {
            SeqType::Dna => write!(f, "DNA"),
            SeqType::Rna => write!(f, "RNA"),
            SeqType::Protein => write!(f, "protein"),
        }
    }
}

/// Infer the molecule type of a sample.
///
/// Nucleotide ambiguity codes are disregarded; any residue outside the
/// nucleotide alphabet makes the sample protein, otherwise `U` without `T`
/// makes it RNA.
pub fn infer_type(sample: &[u8]) -> SeqType
{
    const AMBIGUITY: &[u8] = b"NRYSWKMBDHV";
    let (mut t, mut u) = (0u64, 0u64);
    for &b in sample
    {
        match b.to_ascii_uppercase()
        {
            b'A' | b'C' | b'G' => {}
            b'T' => t += 1,
            b'U' => u += 1,
            up if AMBIGUITY.contains(&up) => {}
            b'-' | b'*' | b'.' => {}
            _ => return SeqType::Protein,
        }
    }
    if u > 0 && t == 0
    {
        SeqType::Rna
    }
    else
    {
        SeqType::Dna
    }
}

/// Arithmetic mean of the lengths.
pub fn mean(lengths: &[u64]) -> f64
{
    if lengths.is_empty()
    {
        return 0.0;
    }
    lengths.iter().sum::<u64>() as f64 / lengths.len() as f64
}

/// Median of the lengths; `sorted` must be in ascending order.
pub fn median(sorted: &[u64]) -> f64
{
    match sorted.len()
    {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2] as f64,
        n => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
    }
}

/// Np/Lp statistic: walk the lengths in descending order until the running
/// sum reaches `p` percent of the total; returns that length and the count
/// of sequences consumed.
///
/// `sorted_desc` must be in descending order; `p` must lie in `(0, 100)`.
pub fn nl(sorted_desc: &[u64], p: u32) -> Result<(u64, u64)>
{
    if p == 0 || p >= 100
    {
        return Err(Error::IndexOutOfRange(format!("percentile {} outside (0, 100)", p)));
    }
    let total: u64 = sorted_desc.iter().sum();
    let goal = total as f64 * p as f64 / 100.0;
    let mut running = 0u64;
    for (i, &len) in sorted_desc.iter().enumerate()
    {
        running += len;
        if running as f64 >= goal
        {
            return Ok((len, i as u64 + 1));
        }
    }
    Ok((*sorted_desc.last().unwrap_or(&0), sorted_desc.len() as u64))
}

/// Number of lengths `>= threshold`.
pub fn count_at_least(lengths: &[u64], threshold: u64) -> u64
{
    lengths.iter().filter(|&&l| l >= threshold).count() as u64
}
