//! FASTA line geometry.
//!
//! Sequence bodies are wrapped into lines of a fixed width, so a logical
//! base index maps to a file byte offset with integer arithmetic once the
//! line body width and the terminator width are known:
//!
//! ```text
//! lines_full = i / line_body
//! column     = i % line_body
//! byte       = seq_off + lines_full * (line_body + line_term) + column
//! ```
//!
//! Sequences whose body lines vary in width (hand-edited files) fall back to
//! a compact per-line table translated by binary search.

use crate::error::{Error, Result};

/// Metadata for one sequence, recorded by the first scan and persisted in
/// the index store.
///
/// Offsets are bytes into the uncompressed source stream. `desc_off` points
/// just past the `>` of the header line; `seq_off` points at the first base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqMeta
{
    /// 1-based, contiguous, in file order.
    pub id: u64,
    /// Name: the header up to the first whitespace.
    pub name: String,
    /// Byte offset of the header text, after `>`.
    pub desc_off: u64,
    /// Header text length, terminator excluded.
    pub desc_len: u64,
    /// Byte offset of the first base.
    pub seq_off: u64,
    /// Byte span of the body, from `seq_off` through the final terminator.
    pub byte_len: u64,
    /// Number of bases.
    pub base_len: u64,
    /// Bases on each non-terminal body line.
    pub line_body: u64,
    /// Terminator width: 1 for LF, 2 for CRLF.
    pub line_term: u64,
    /// True when every body line except possibly the last has `line_body`
    /// bases; false sequences carry a [`LineTable`].
    pub normalized: bool,
}

impl SeqMeta
{
    /// File byte offset of 0-based base `i`.
    ///
    /// `ragged` must be the sequence's line table when `normalized` is
    /// false.
    pub fn byte_of_base(&self, i: u64, ragged: Option<&LineTable>) -> Result<u64>
    {
        if i >= self.base_len
        {
            return Err(Error::IndexOutOfRange(format!(
                "base {} beyond sequence `{}` of length {}",
                i, self.name, self.base_len
            )));
        }
        if self.normalized
        {
            let full_lines = i / self.line_body;
            let column = i % self.line_body;
            Ok(self.seq_off + full_lines * (self.line_body + self.line_term) + column)
        }
        else
        {
            let table = ragged.ok_or_else(|| {
                Error::Format(format!("sequence `{}` has no line table", self.name))
            })?;
            table.byte_of_base(i)
        }
    }

    /// Byte span `[start, end)` covering 0-based bases `[start0, end0)`,
    /// terminators included. `end0` must be greater than `start0`.
    pub fn span_of_bases(
        &self,
        start0: u64,
        end0: u64,
        ragged: Option<&LineTable>,
    ) -> Result<(u64, u64)>
    {
        let first = self.byte_of_base(start0, ragged)?;
        let last = self.byte_of_base(end0 - 1, ragged)?;
        Ok((first, last + 1))
    }

    /// Byte span of the whole record, header included: `[header, end)` where
    /// `end` is the byte just past the final body terminator.
    pub fn raw_span(&self) -> (u64, u64)
    {
        // desc_off points past the leading '>'.
        (self.desc_off - 1, self.seq_off + self.byte_len)
    }
}

/// Per-line sidecar for sequences with ragged body lines.
///
/// Entries are ordered by line; `cum_bases` is the number of bases on all
/// preceding lines, so base `i` lives on the last line whose `cum_bases`
/// is `<= i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable
{
    entries: Vec<LineSpan>,
}

/// One body line: its absolute byte offset and the bases preceding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan
{
    pub byte_off: u64,
    pub cum_bases: u64,
}

impl LineTable
{
    pub fn new(entries: Vec<LineSpan>) -> Self
    {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Line entry `i`, in file order.
    pub fn span_at(&self, i: usize) -> Option<LineSpan>
    {
        self.entries.get(i).copied()
    }

    /// File byte offset of 0-based base `i`.
    pub fn byte_of_base(&self, i: u64) -> Result<u64>
    {
        let idx = self.entries.partition_point(|e| e.cum_bases <= i);
        if idx == 0
        {
            return Err(Error::Format("line table does not cover base 0".into()));
        }
        let line = &self.entries[idx - 1];
        Ok(line.byte_off + (i - line.cum_bases))
    }

    /// Serialize as little-endian `(byte_off, cum_bases)` pairs.
    pub fn to_bytes(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(self.entries.len() * 16);
        for e in &self.entries
        {
            out.extend_from_slice(&e.byte_off.to_le_bytes());
            out.extend_from_slice(&e.cum_bases.to_le_bytes());
        }
        out
    }

    /// Inverse of [`LineTable::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self>
    {
        if data.len() % 16 != 0
        {
            return Err(Error::Format(format!(
                "line table blob length {} is not a multiple of 16",
                data.len()
            )));
        }
        let mut entries = Vec::with_capacity(data.len() / 16);
        for pair in data.chunks_exact(16)
        {
            let byte_off = u64::from_le_bytes(pair[..8].try_into().unwrap());
            let cum_bases = u64::from_le_bytes(pair[8..].try_into().unwrap());
            entries.push(LineSpan { byte_off, cum_bases });
        }
        Ok(Self { entries })
    }
}

/// Remove line terminators from an extracted body span in one pass.
///
/// Handles LF and CRLF; the result holds exactly the bases of the span.
pub fn strip_terminators(raw: &[u8]) -> Vec<u8>
{
    let mut out = Vec::with_capacity(raw.len());
    let mut start = 0;
    for nl in memchr::memchr2_iter(b'\n', b'\r', raw)
    {
        if nl > start
        {
            out.extend_from_slice(&raw[start..nl]);
        }
        start = nl + 1;
    }
    if start < raw.len()
    {
        out.extend_from_slice(&raw[start..]);
    }
    out
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn meta() -> SeqMeta
    {
        SeqMeta {
            id: 1,
            name: "chr1".to_string(),
            desc_off: 1,
            desc_len: 4,
            seq_off: 6,
            byte_len: 1013,
            base_len: 1000,
            line_body: 80,
            line_term: 1,
            normalized: true,
        }
    }

    #[test]
    fn byte_of_base_uniform()
    {
        let m = meta();
        assert_eq!(m.byte_of_base(0, None).unwrap(), 6);
        assert_eq!(m.byte_of_base(79, None).unwrap(), 85);
        // First base of the second line skips one terminator.
        assert_eq!(m.byte_of_base(80, None).unwrap(), 87);
        assert_eq!(m.byte_of_base(100, None).unwrap(), 107);
        assert!(m.byte_of_base(1000, None).is_err());
    }

    #[test]
    fn byte_of_base_crlf()
    {
        let mut m = meta();
        m.line_term = 2;
        assert_eq!(m.byte_of_base(0, None).unwrap(), 6);
        // Second line starts after 80 bases plus CR LF.
        assert_eq!(m.byte_of_base(80, None).unwrap(), 88);
        assert_eq!(m.byte_of_base(160, None).unwrap(), 170);
    }

    #[test]
    fn span_covers_terminators()
    {
        let m = meta();
        let (s, e) = m.span_of_bases(70, 90, None).unwrap();
        assert_eq!(s, 76);
        // 20 bases crossing one newline: 21 bytes.
        assert_eq!(e - s, 21);
    }

    #[test]
    fn ragged_lookup()
    {
        // Lines of widths 10, 8, 10 starting at byte 100, LF terminators.
        let table = LineTable::new(vec![
            LineSpan { byte_off: 100, cum_bases: 0 },
            LineSpan { byte_off: 111, cum_bases: 10 },
            LineSpan { byte_off: 120, cum_bases: 18 },
        ]);
        assert_eq!(table.byte_of_base(0).unwrap(), 100);
        assert_eq!(table.byte_of_base(9).unwrap(), 109);
        assert_eq!(table.byte_of_base(10).unwrap(), 111);
        assert_eq!(table.byte_of_base(17).unwrap(), 118);
        assert_eq!(table.byte_of_base(18).unwrap(), 120);
        assert_eq!(table.byte_of_base(27).unwrap(), 129);
    }

    #[test]
    fn line_table_round_trip()
    {
        let table = LineTable::new(vec![
            LineSpan { byte_off: 5, cum_bases: 0 },
            LineSpan { byte_off: 16, cum_bases: 10 },
        ]);
        let parsed = LineTable::from_bytes(&table.to_bytes()).unwrap();
        assert_eq!(table, parsed);

        assert!(LineTable::from_bytes(&[0u8; 15]).is_err());
    }

    #[test]
    fn strip_handles_lf_and_crlf()
    {
        assert_eq!(strip_terminators(b"ACGT\nACGT\nAC"), b"ACGTACGTAC");
        assert_eq!(strip_terminators(b"ACGT\r\nACGT\r\n"), b"ACGTACGT");
        assert_eq!(strip_terminators(b"ACGT"), b"ACGT");
        assert_eq!(strip_terminators(b""), b"");
    }
}
