//! Persistent `.fxi` index store.
//!
//! One embedded SQLite file beside the source holds everything the random
//! access paths need: the header fingerprint, the per-sequence or per-read
//! offset tables, the gzip checkpoint table and the aggregate statistics.
//! The store is written once under WAL during the build, sealed by an atomic
//! rename, and opened read-only afterwards.

use crate::error::{Error, Result};
use crate::fai::{LineTable, SeqMeta};
use crate::gzi::{Checkpoint, GzipIndex};
use crate::scan::{FastqAggregates, ReadMeta, ScannedSeq};
use crate::stats::Composition;
use log::debug;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Bumped whenever the schema changes; older indexes are rebuilt.
pub const SCHEMA_VERSION: i64 = 1;

/// Side-car suffix: `<source>.fxi`.
pub const INDEX_SUFFIX: &str = "fxi";

/// Index format discriminator stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat
{
    Fasta,
    Fastq,
}

impl IndexFormat
{
    fn as_str(self) -> &'static str
    {
        match self
        {
            IndexFormat::Fasta => "fasta",
            IndexFormat::Fastq => "fastq",
        }
    }

    fn parse(s: &str) -> Result<Self>
    {
        match s
        {
            "fasta" => Ok(IndexFormat::Fasta),
            "fastq" => Ok(IndexFormat::Fastq),
            other => Err(Error::IndexStale(format!("unknown index format `{}`", other))),
        }
    }
}

/// Header row set, written once at index creation.
#[derive(Debug, Clone)]
pub struct IndexHeader
{
    pub format: IndexFormat,
    pub schema_version: i64,
    pub source_path: String,
    pub source_size: u64,
    /// Source mtime in nanoseconds since the epoch.
    pub source_mtime: i64,
    pub is_gzip: bool,
    pub full_index: bool,
}

/// Size and mtime of the source file, the staleness fingerprint.
pub fn source_fingerprint(path: &Path) -> Result<(u64, i64)>
{
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok((meta.len(), mtime))
}

/// Side-car path for a source file.
pub fn index_path_for(source: &Path) -> PathBuf
{
    let mut name = source.as_os_str().to_os_string();
    name.push(".");
    name.push(INDEX_SUFFIX);
    PathBuf::from(name)
}

/// Temporary path used while building, renamed over the final path on seal.
pub fn temp_index_path_for(source: &Path) -> PathBuf
{
    let mut name = index_path_for(source).into_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Entry of the keys view: enough to sort, filter and slice without
/// touching the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry
{
    pub id: u64,
    pub name: String,
    pub len: u64,
}

/// Open handle on one `.fxi` file.
pub struct IndexStore
{
    conn: Connection,
}

impl IndexStore
{
    /// Create a fresh store at `path`, dropping any previous file.
    ///
    /// The connection runs in WAL mode for the duration of the build.
    pub fn create(path: &Path) -> Result<Self>
    {
        if path.exists()
        {
            std::fs::remove_file(path)?;
        }
        let conn = Connection::open(path)?;
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a sealed store read-only.
    pub fn open_read(path: &Path) -> Result<Self>
    {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Reopen a sealed store writable; only the composition upgrade path
    /// needs this.
    pub fn open_write(path: &Path) -> Result<Self>
    {
        Ok(Self { conn: Connection::open(path)? })
    }

    fn init_schema(&self) -> Result<()>
    {
        self.conn.execute_batch(
            "CREATE TABLE header (
                 key   TEXT PRIMARY KEY,
                 value BLOB
             );
             CREATE TABLE seq (
                 id         INTEGER PRIMARY KEY,
                 name       TEXT UNIQUE,
                 desc_off   INTEGER,
                 desc_len   INTEGER,
                 seq_off    INTEGER,
                 byte_len   INTEGER,
                 base_len   INTEGER,
                 line_body  INTEGER,
                 line_term  INTEGER,
                 normalized INTEGER,
                 lines      BLOB,
                 compA      INTEGER,
                 compC      INTEGER,
                 compG      INTEGER,
                 compT      INTEGER,
                 compN      INTEGER,
                 compOther  BLOB
             );
             CREATE INDEX seq_base_len ON seq(base_len);
             CREATE TABLE gzi (
                 uoff   INTEGER PRIMARY KEY,
                 coff   INTEGER,
                 bits   INTEGER,
                 window BLOB
             );
             CREATE TABLE read (
                 id       INTEGER PRIMARY KEY,
                 name     TEXT UNIQUE,
                 name_off INTEGER,
                 name_len INTEGER,
                 desc_len INTEGER,
                 seq_off  INTEGER,
                 seq_len  INTEGER,
                 qual_off INTEGER
             );
             CREATE TABLE agg (
                 key   TEXT PRIMARY KEY,
                 value BLOB
             );",
        )?;
        Ok(())
    }

    /// Start the bulk-insert transaction of a build.
    pub fn begin(&self) -> Result<()>
    {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commit the build transaction.
    pub fn commit(&self) -> Result<()>
    {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Leave WAL mode so the sealed file is a single self-contained
    /// database that read-only sessions can open anywhere.
    pub fn finalize(&self) -> Result<()>
    {
        let _: String =
            self.conn.query_row("PRAGMA journal_mode = DELETE", [], |r| r.get(0))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // header

    pub fn write_header(&self, header: &IndexHeader) -> Result<()>
    {
        let mut stmt =
            self.conn.prepare("INSERT OR REPLACE INTO header (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params!["format", header.format.as_str()])?;
        stmt.execute(params!["schema_version", header.schema_version])?;
        stmt.execute(params!["source_path", header.source_path])?;
        stmt.execute(params!["source_size", header.source_size as i64])?;
        stmt.execute(params!["source_mtime", header.source_mtime])?;
        stmt.execute(params!["is_gzip", header.is_gzip as i64])?;
        stmt.execute(params!["full_index", header.full_index as i64])?;
        Ok(())
    }

    fn header_i64(&self, key: &str) -> Result<i64>
    {
        self.conn
            .query_row("SELECT value FROM header WHERE key = ?1", [key], |r| r.get(0))
            .optional()?
            .ok_or_else(|| Error::IndexStale(format!("missing header key `{}`", key)))
    }

    fn header_text(&self, key: &str) -> Result<String>
    {
        self.conn
            .query_row("SELECT value FROM header WHERE key = ?1", [key], |r| r.get(0))
            .optional()?
            .ok_or_else(|| Error::IndexStale(format!("missing header key `{}`", key)))
    }

    pub fn read_header(&self) -> Result<IndexHeader>
    {
        Ok(IndexHeader {
            format: IndexFormat::parse(&self.header_text("format")?)?,
            schema_version: self.header_i64("schema_version")?,
            source_path: self.header_text("source_path")?,
            source_size: self.header_i64("source_size")? as u64,
            source_mtime: self.header_i64("source_mtime")?,
            is_gzip: self.header_i64("is_gzip")? != 0,
            full_index: self.header_i64("full_index")? != 0,
        })
    }

    /// Check a sealed index against the current source file.
    ///
    /// # Errors
    ///
    /// `Error::IndexStale` naming the first mismatch: schema version,
    /// size or mtime.
    pub fn validate_against(&self, source: &Path, format: IndexFormat) -> Result<IndexHeader>
    {
        let header = self.read_header()?;
        if header.schema_version != SCHEMA_VERSION
        {
            return Err(Error::IndexStale(format!(
                "schema version {} != {}",
                header.schema_version, SCHEMA_VERSION
            )));
        }
        if header.format != format
        {
            return Err(Error::IndexStale(format!(
                "index format {} does not match requested {}",
                header.format.as_str(),
                format.as_str()
            )));
        }
        let (size, mtime) = source_fingerprint(source)?;
        if header.source_size != size
        {
            return Err(Error::IndexStale(format!(
                "source size changed: {} -> {}",
                header.source_size, size
            )));
        }
        if header.source_mtime != mtime
        {
            return Err(Error::IndexStale("source mtime changed".into()));
        }
        Ok(header)
    }

    pub fn set_full_index(&self, full: bool) -> Result<()>
    {
        self.conn.execute(
            "INSERT OR REPLACE INTO header (key, value) VALUES ('full_index', ?1)",
            [full as i64],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // FASTA sequences

    pub fn insert_seq(&self, scanned: &ScannedSeq) -> Result<()>
    {
        let m = &scanned.meta;
        let lines = scanned.table.as_ref().map(|t| t.to_bytes());
        let comp = scanned.composition.as_ref();
        self.conn.execute(
            "INSERT INTO seq (id, name, desc_off, desc_len, seq_off, byte_len, base_len,
                              line_body, line_term, normalized, lines,
                              compA, compC, compG, compT, compN, compOther)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                m.id as i64,
                m.name,
                m.desc_off as i64,
                m.desc_len as i64,
                m.seq_off as i64,
                m.byte_len as i64,
                m.base_len as i64,
                m.line_body as i64,
                m.line_term as i64,
                m.normalized as i64,
                lines,
                comp.map(|c| c.a as i64),
                comp.map(|c| c.c as i64),
                comp.map(|c| c.g as i64),
                comp.map(|c| c.t as i64),
                comp.map(|c| c.n as i64),
                comp.map(|c| c.other_to_bytes()),
            ],
        )?;
        Ok(())
    }

    pub fn update_seq_composition(&self, id: u64, comp: &Composition) -> Result<()>
    {
        self.conn.execute(
            "UPDATE seq SET compA = ?2, compC = ?3, compG = ?4, compT = ?5, compN = ?6,
                            compOther = ?7
             WHERE id = ?1",
            params![
                id as i64,
                comp.a as i64,
                comp.c as i64,
                comp.g as i64,
                comp.t as i64,
                comp.n as i64,
                comp.other_to_bytes(),
            ],
        )?;
        Ok(())
    }

    pub fn seq_count(&self) -> Result<u64>
    {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM seq", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    const SEQ_COLUMNS: &'static str = "id, name, desc_off, desc_len, seq_off, byte_len, \
                                       base_len, line_body, line_term, normalized, lines";

    fn row_to_seq(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SeqMeta, Option<LineTable>)>
    {
        let meta = SeqMeta {
            id: row.get::<_, i64>(0)? as u64,
            name: row.get(1)?,
            desc_off: row.get::<_, i64>(2)? as u64,
            desc_len: row.get::<_, i64>(3)? as u64,
            seq_off: row.get::<_, i64>(4)? as u64,
            byte_len: row.get::<_, i64>(5)? as u64,
            base_len: row.get::<_, i64>(6)? as u64,
            line_body: row.get::<_, i64>(7)? as u64,
            line_term: row.get::<_, i64>(8)? as u64,
            normalized: row.get::<_, i64>(9)? != 0,
        };
        let lines: Option<Vec<u8>> = row.get(10)?;
        let table = lines.map(|blob| LineTable::from_bytes(&blob)).transpose().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Blob,
                "bad line table blob".into(),
            )
        })?;
        Ok((meta, table))
    }

    pub fn seq_by_id(&self, id: u64) -> Result<Option<(SeqMeta, Option<LineTable>)>>
    {
        let sql = format!("SELECT {} FROM seq WHERE id = ?1", Self::SEQ_COLUMNS);
        Ok(self.conn.query_row(&sql, [id as i64], Self::row_to_seq).optional()?)
    }

    pub fn seq_by_name(&self, name: &str) -> Result<Option<(SeqMeta, Option<LineTable>)>>
    {
        let sql = format!("SELECT {} FROM seq WHERE name = ?1", Self::SEQ_COLUMNS);
        Ok(self.conn.query_row(&sql, [name], Self::row_to_seq).optional()?)
    }

    /// Stored composition of one sequence, when present.
    pub fn seq_composition(&self, id: u64) -> Result<Option<Composition>>
    {
        let row = self
            .conn
            .query_row(
                "SELECT compA, compC, compG, compT, compN, compOther FROM seq WHERE id = ?1",
                [id as i64],
                |r| {
                    Ok((
                        r.get::<_, Option<i64>>(0)?,
                        r.get::<_, Option<i64>>(1)?,
                        r.get::<_, Option<i64>>(2)?,
                        r.get::<_, Option<i64>>(3)?,
                        r.get::<_, Option<i64>>(4)?,
                        r.get::<_, Option<Vec<u8>>>(5)?,
                    ))
                },
            )
            .optional()?;
        match row
        {
            Some((Some(a), Some(c), Some(g), Some(t), Some(n), other)) => Ok(Some(Composition {
                a: a as u64,
                c: c as u64,
                g: g as u64,
                t: t as u64,
                n: n as u64,
                other: match other
                {
                    Some(blob) => Composition::other_from_bytes(&blob)?,
                    None => Default::default(),
                },
            })),
            _ => Ok(None),
        }
    }

    /// Sum of stored per-sequence compositions; `None` when any sequence
    /// still lacks counts (fast-mode build not yet upgraded).
    pub fn total_composition(&self) -> Result<Option<Composition>>
    {
        let missing: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seq WHERE compA IS NULL", [], |r| r.get(0))?;
        if missing > 0
        {
            return Ok(None);
        }
        let mut total: Composition = self.conn.query_row(
            "SELECT SUM(compA), SUM(compC), SUM(compG), SUM(compT), SUM(compN) FROM seq",
            [],
            |r| {
                Ok(Composition {
                    a: r.get::<_, i64>(0)? as u64,
                    c: r.get::<_, i64>(1)? as u64,
                    g: r.get::<_, i64>(2)? as u64,
                    t: r.get::<_, i64>(3)? as u64,
                    n: r.get::<_, i64>(4)? as u64,
                    other: Default::default(),
                })
            },
        )?;
        let mut stmt =
            self.conn.prepare("SELECT compOther FROM seq WHERE compOther IS NOT NULL")?;
        let blobs = stmt.query_map([], |r| r.get::<_, Vec<u8>>(0))?;
        for blob in blobs
        {
            for (base, count) in Composition::other_from_bytes(&blob?)?
            {
                *total.other.entry(base).or_insert(0) += count;
            }
        }
        Ok(Some(total))
    }

    /// Ids of sequences lacking composition counts, in id order.
    pub fn seq_ids_without_composition(&self) -> Result<Vec<u64>>
    {
        let mut stmt =
            self.conn.prepare("SELECT id FROM seq WHERE compA IS NULL ORDER BY id")?;
        let rows = stmt.query_map([], |r| r.get::<_, i64>(0))?;
        rows.map(|r| Ok(r? as u64)).collect()
    }

    /// `(id, name, base_len)` for every sequence, in id order.
    pub fn seq_entries(&self) -> Result<Vec<KeyEntry>>
    {
        let mut stmt =
            self.conn.prepare("SELECT id, name, base_len FROM seq ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(KeyEntry {
                id: r.get::<_, i64>(0)? as u64,
                name: r.get(1)?,
                len: r.get::<_, i64>(2)? as u64,
            })
        })?;
        rows.map(|r| Ok(r?)).collect()
    }

    /// All sequence lengths, ascending.
    pub fn seq_lengths(&self) -> Result<Vec<u64>>
    {
        let mut stmt = self.conn.prepare("SELECT base_len FROM seq ORDER BY base_len")?;
        let rows = stmt.query_map([], |r| r.get::<_, i64>(0))?;
        rows.map(|r| Ok(r? as u64)).collect()
    }

    /// Sum of sequence lengths.
    pub fn total_bases(&self) -> Result<u64>
    {
        let n: Option<i64> =
            self.conn.query_row("SELECT SUM(base_len) FROM seq", [], |r| r.get(0))?;
        Ok(n.unwrap_or(0) as u64)
    }

    /// Id of the longest (`desc`) or shortest sequence; ties break toward
    /// the smaller id.
    pub fn extreme_seq_id(&self, longest: bool) -> Result<Option<u64>>
    {
        let sql = if longest
        {
            "SELECT id FROM seq ORDER BY base_len DESC, id ASC LIMIT 1"
        }
        else
        {
            "SELECT id FROM seq ORDER BY base_len ASC, id ASC LIMIT 1"
        };
        let id: Option<i64> = self.conn.query_row(sql, [], |r| r.get(0)).optional()?;
        Ok(id.map(|i| i as u64))
    }

    pub fn seq_count_at_least(&self, threshold: u64) -> Result<u64>
    {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seq WHERE base_len >= ?1",
            [threshold as i64],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    // ------------------------------------------------------------------
    // gzip checkpoints

    pub fn insert_checkpoint(&self, cp: &Checkpoint) -> Result<()>
    {
        self.conn.execute(
            "INSERT INTO gzi (uoff, coff, bits, window) VALUES (?1, ?2, ?3, ?4)",
            params![cp.uoff as i64, cp.coff as i64, cp.bits as i64, cp.window],
        )?;
        Ok(())
    }

    /// Record the stream-level gzip facts alongside the checkpoint rows.
    pub fn write_gzip_meta(&self, uncompressed_len: u64, spacing: u64) -> Result<()>
    {
        let mut stmt =
            self.conn.prepare("INSERT OR REPLACE INTO header (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params!["uncompressed_size", uncompressed_len as i64])?;
        stmt.execute(params!["gzip_spacing", spacing as i64])?;
        Ok(())
    }

    /// Load the checkpoint table back into a [`GzipIndex`].
    pub fn load_gzip_index(&self) -> Result<GzipIndex>
    {
        let uncompressed_len = self.header_i64("uncompressed_size")? as u64;
        let spacing = self.header_i64("gzip_spacing")? as u64;
        let mut stmt =
            self.conn.prepare("SELECT uoff, coff, bits, window FROM gzi ORDER BY uoff")?;
        let rows = stmt.query_map([], |r| {
            Ok(Checkpoint {
                uoff: r.get::<_, i64>(0)? as u64,
                coff: r.get::<_, i64>(1)? as u64,
                bits: r.get::<_, i64>(2)? as u8,
                window: r.get(3)?,
            })
        })?;
        let checkpoints: Vec<Checkpoint> =
            rows.collect::<rusqlite::Result<_>>()?;
        debug!("loaded {} gzip checkpoints", checkpoints.len());
        GzipIndex::from_checkpoints(checkpoints, uncompressed_len, spacing)
    }

    // ------------------------------------------------------------------
    // FASTQ reads

    pub fn insert_read(&self, read: &ReadMeta) -> Result<()>
    {
        self.conn.execute(
            "INSERT INTO read (id, name, name_off, name_len, desc_len, seq_off, seq_len,
                               qual_off)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                read.id as i64,
                read.name,
                read.name_off as i64,
                read.name_len as i64,
                read.desc_len as i64,
                read.seq_off as i64,
                read.seq_len as i64,
                read.qual_off as i64,
            ],
        )?;
        Ok(())
    }

    fn row_to_read(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadMeta>
    {
        Ok(ReadMeta {
            id: row.get::<_, i64>(0)? as u64,
            name: row.get(1)?,
            name_off: row.get::<_, i64>(2)? as u64,
            name_len: row.get::<_, i64>(3)? as u64,
            desc_len: row.get::<_, i64>(4)? as u64,
            seq_off: row.get::<_, i64>(5)? as u64,
            seq_len: row.get::<_, i64>(6)? as u64,
            qual_off: row.get::<_, i64>(7)? as u64,
        })
    }

    const READ_COLUMNS: &'static str =
        "id, name, name_off, name_len, desc_len, seq_off, seq_len, qual_off";

    pub fn read_count(&self) -> Result<u64>
    {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM read", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn read_by_id(&self, id: u64) -> Result<Option<ReadMeta>>
    {
        let sql = format!("SELECT {} FROM read WHERE id = ?1", Self::READ_COLUMNS);
        Ok(self.conn.query_row(&sql, [id as i64], Self::row_to_read).optional()?)
    }

    pub fn read_by_name(&self, name: &str) -> Result<Option<ReadMeta>>
    {
        let sql = format!("SELECT {} FROM read WHERE name = ?1", Self::READ_COLUMNS);
        Ok(self.conn.query_row(&sql, [name], Self::row_to_read).optional()?)
    }

    /// `(id, name, seq_len)` for every read, in id order.
    pub fn read_entries(&self) -> Result<Vec<KeyEntry>>
    {
        let mut stmt =
            self.conn.prepare("SELECT id, name, seq_len FROM read ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(KeyEntry {
                id: r.get::<_, i64>(0)? as u64,
                name: r.get(1)?,
                len: r.get::<_, i64>(2)? as u64,
            })
        })?;
        rows.map(|r| Ok(r?)).collect()
    }

    pub fn write_fastq_aggregates(&self, agg: &FastqAggregates) -> Result<()>
    {
        let mut stmt =
            self.conn.prepare("INSERT OR REPLACE INTO agg (key, value) VALUES (?1, ?2)")?;
        stmt.execute(params!["read_count", agg.read_count as i64])?;
        stmt.execute(params!["total_bases", agg.total_bases as i64])?;
        stmt.execute(params!["min_len", agg.min_len as i64])?;
        stmt.execute(params!["max_len", agg.max_len as i64])?;
        stmt.execute(params!["min_qual", agg.min_qual as i64])?;
        stmt.execute(params!["max_qual", agg.max_qual as i64])?;
        stmt.execute(params!["line_term", agg.line_term as i64])?;
        stmt.execute(params!["compA", agg.composition.a as i64])?;
        stmt.execute(params!["compC", agg.composition.c as i64])?;
        stmt.execute(params!["compG", agg.composition.g as i64])?;
        stmt.execute(params!["compT", agg.composition.t as i64])?;
        stmt.execute(params!["compN", agg.composition.n as i64])?;
        stmt.execute(params!["compOther", agg.composition.other_to_bytes()])?;
        Ok(())
    }

    fn agg_i64(&self, key: &str) -> Result<i64>
    {
        self.conn
            .query_row("SELECT value FROM agg WHERE key = ?1", [key], |r| r.get(0))
            .optional()?
            .ok_or_else(|| Error::IndexStale(format!("missing aggregate key `{}`", key)))
    }

    pub fn read_fastq_aggregates(&self) -> Result<FastqAggregates>
    {
        let other: Vec<u8> = self
            .conn
            .query_row("SELECT value FROM agg WHERE key = 'compOther'", [], |r| r.get(0))
            .optional()?
            .unwrap_or_default();
        Ok(FastqAggregates {
            read_count: self.agg_i64("read_count")? as u64,
            total_bases: self.agg_i64("total_bases")? as u64,
            min_len: self.agg_i64("min_len")? as u64,
            max_len: self.agg_i64("max_len")? as u64,
            min_qual: self.agg_i64("min_qual")? as u8,
            max_qual: self.agg_i64("max_qual")? as u8,
            line_term: self.agg_i64("line_term")? as u64,
            composition: Composition {
                a: self.agg_i64("compA")? as u64,
                c: self.agg_i64("compC")? as u64,
                g: self.agg_i64("compG")? as u64,
                t: self.agg_i64("compT")? as u64,
                n: self.agg_i64("compN")? as u64,
                other: Composition::other_from_bytes(&other)?,
            },
        })
    }
}

/// Atomically move a finished build into place.
pub fn seal(tmp: &Path, final_path: &Path) -> Result<()>
{
    std::fs::rename(tmp, final_path)?;
    debug!("sealed index {}", final_path.display());
    Ok(())
}

/// Remove a partial build, ignoring a file that never got created.
pub fn discard_partial(tmp: &Path)
{
    let _ = std::fs::remove_file(tmp);
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::scan::scan_fasta;
    use std::io::Cursor;

    fn scanned() -> Vec<ScannedSeq>
    {
        scan_fasta(Cursor::new(&b">a\nACGT\nACGT\n>b\nNNNN\n"[..]), true).unwrap()
    }

    #[test]
    fn header_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.fxi");
        let store = IndexStore::create(&path).unwrap();
        let header = IndexHeader {
            format: IndexFormat::Fasta,
            schema_version: SCHEMA_VERSION,
            source_path: "/data/test.fa".into(),
            source_size: 1234,
            source_mtime: 987654321,
            is_gzip: true,
            full_index: false,
        };
        store.write_header(&header).unwrap();

        let back = store.read_header().unwrap();
        assert_eq!(back.format, IndexFormat::Fasta);
        assert_eq!(back.source_size, 1234);
        assert_eq!(back.source_mtime, 987654321);
        assert!(back.is_gzip);
        assert!(!back.full_index);

        store.set_full_index(true).unwrap();
        assert!(store.read_header().unwrap().full_index);
    }

    #[test]
    fn seq_rows_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::create(&dir.path().join("t.fxi")).unwrap();
        store.begin().unwrap();
        for s in &scanned()
        {
            store.insert_seq(s).unwrap();
        }
        store.commit().unwrap();

        assert_eq!(store.seq_count().unwrap(), 2);
        let (a, table) = store.seq_by_id(1).unwrap().unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.base_len, 8);
        assert!(table.is_none());
        let (b, _) = store.seq_by_name("b").unwrap().unwrap();
        assert_eq!(b.id, 2);
        assert!(store.seq_by_name("zz").unwrap().is_none());
        assert!(store.seq_by_id(3).unwrap().is_none());

        let comp = store.seq_composition(1).unwrap().unwrap();
        assert_eq!((comp.a, comp.c, comp.g, comp.t), (2, 2, 2, 2));
        let total = store.total_composition().unwrap().unwrap();
        assert_eq!(total.n, 4);
        assert_eq!(store.total_bases().unwrap(), 12);
        assert_eq!(store.seq_lengths().unwrap(), vec![4, 8]);
        assert_eq!(store.extreme_seq_id(true).unwrap(), Some(1));
        assert_eq!(store.extreme_seq_id(false).unwrap(), Some(2));
        assert_eq!(store.seq_count_at_least(5).unwrap(), 1);

        let entries = store.seq_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], KeyEntry { id: 1, name: "a".into(), len: 8 });
    }

    #[test]
    fn fast_mode_composition_upgrade()
    {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::create(&dir.path().join("t.fxi")).unwrap();
        let seqs = scan_fasta(Cursor::new(&b">a\nACGT\n>b\nGGCC\n"[..]), false).unwrap();
        for s in &seqs
        {
            store.insert_seq(s).unwrap();
        }
        assert!(store.total_composition().unwrap().is_none());
        assert_eq!(store.seq_ids_without_composition().unwrap(), vec![1, 2]);

        let mut comp = Composition::default();
        comp.tally_all(b"ACGT");
        store.update_seq_composition(1, &comp).unwrap();
        let mut comp = Composition::default();
        comp.tally_all(b"GGCC");
        store.update_seq_composition(2, &comp).unwrap();

        let total = store.total_composition().unwrap().unwrap();
        assert_eq!((total.a, total.c, total.g, total.t), (1, 3, 3, 1));
    }

    #[test]
    fn checkpoint_rows_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::create(&dir.path().join("t.fxi")).unwrap();
        let cps = vec![
            Checkpoint { uoff: 0, coff: 10, bits: 0, window: Vec::new() },
            Checkpoint { uoff: 1 << 20, coff: 70_000, bits: 5, window: vec![7u8; 32768] },
        ];
        for cp in &cps
        {
            store.insert_checkpoint(cp).unwrap();
        }
        store.write_gzip_meta(2 << 20, 1 << 20).unwrap();

        let index = store.load_gzip_index().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.uncompressed_len(), 2 << 20);
        assert_eq!(index.spacing(), 1 << 20);
        assert_eq!(index.checkpoints()[1], cps[1]);
    }

    #[test]
    fn read_rows_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::create(&dir.path().join("t.fxi")).unwrap();
        let read = ReadMeta {
            id: 1,
            name: "r1".into(),
            name_off: 1,
            name_len: 2,
            desc_len: 7,
            seq_off: 9,
            seq_len: 150,
            qual_off: 162,
        };
        store.insert_read(&read).unwrap();
        assert_eq!(store.read_count().unwrap(), 1);
        assert_eq!(store.read_by_id(1).unwrap().unwrap(), read);
        assert_eq!(store.read_by_name("r1").unwrap().unwrap(), read);
        assert!(store.read_by_name("r2").unwrap().is_none());
    }

    #[test]
    fn fastq_aggregates_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::create(&dir.path().join("t.fxi")).unwrap();
        let mut composition = Composition::default();
        composition.tally_all(b"ACGTU");
        let agg = FastqAggregates {
            read_count: 4,
            total_bases: 600,
            composition,
            min_len: 150,
            max_len: 150,
            min_qual: 33,
            max_qual: 73,
            line_term: 1,
        };
        store.write_fastq_aggregates(&agg).unwrap();
        assert_eq!(store.read_fastq_aggregates().unwrap(), agg);
    }

    #[test]
    fn validate_detects_source_change()
    {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("test.fa");
        std::fs::write(&source, b">a\nACGT\n").unwrap();
        let (size, mtime) = source_fingerprint(&source).unwrap();

        let path = dir.path().join("test.fa.fxi");
        let store = IndexStore::create(&path).unwrap();
        store
            .write_header(&IndexHeader {
                format: IndexFormat::Fasta,
                schema_version: SCHEMA_VERSION,
                source_path: source.display().to_string(),
                source_size: size,
                source_mtime: mtime,
                is_gzip: false,
                full_index: true,
            })
            .unwrap();

        assert!(store.validate_against(&source, IndexFormat::Fasta).is_ok());
        assert!(matches!(
            store.validate_against(&source, IndexFormat::Fastq),
            Err(Error::IndexStale(_))
        ));

        std::fs::write(&source, b">a\nACGTACGT\n").unwrap();
        assert!(matches!(
            store.validate_against(&source, IndexFormat::Fasta),
            Err(Error::IndexStale(_))
        ));
    }

    #[test]
    fn index_paths()
    {
        let p = Path::new("/data/test.fa.gz");
        assert_eq!(index_path_for(p), PathBuf::from("/data/test.fa.gz.fxi"));
        assert_eq!(temp_index_path_for(p), PathBuf::from("/data/test.fa.gz.fxi.tmp"));
    }
}
