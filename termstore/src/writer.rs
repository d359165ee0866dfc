//! Streaming writers for dictionary and triple index files.
//!
//! Both writers stage their variable-size sections in anonymous temp files
//! (so nothing but the destination survives a crash), then assemble the
//! final file next to its destination and rename it into place.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};
use crate::header::{
    Crc32, DICT_MAGIC, FOOTER_MAGIC, HEADER_LEN, Header, Section, SectionKind, TRIPLES_MAGIC,
    TocEntry, VERSION,
};
use crate::sort::{ExternalSorter, IdTriple};
use crate::table::Width;
use crate::triples::TripleOrder;

/// Builds one store file section by section, then persists it atomically.
pub(crate) struct FileAssembler {
    tmp: NamedTempFile,
    out: BufWriter<File>,
    pos: u64,
    body_crc: Crc32,
    toc: Vec<TocEntry>,
    open: Option<(SectionKind, u64, Crc32)>,
}

impl FileAssembler {
    /// Start a file that will eventually replace `dest`.
    pub(crate) fn create(dest: &Path) -> Result<Self> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".tstore-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        let mut out = BufWriter::new(tmp.reopen()?);
        // header placeholder, patched in finish()
        out.write_all(&[0u8; HEADER_LEN])?;
        Ok(Self {
            tmp,
            out,
            pos: HEADER_LEN as u64,
            body_crc: Crc32::default(),
            toc: Vec::new(),
            open: None,
        })
    }

    pub(crate) fn begin(&mut self, kind: SectionKind) {
        debug_assert!(self.open.is_none(), "section already open");
        self.open = Some((kind, self.pos, Crc32::default()));
    }

    pub(crate) fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        self.body_crc.update(bytes);
        if let Some((_, _, crc)) = &mut self.open {
            crc.update(bytes);
        }
        Ok(())
    }

    pub(crate) fn put_uint(&mut self, v: u64, width: Width) -> Result<()> {
        let b = v.to_le_bytes();
        self.put(&b[..width.bytes()])
    }

    /// Copy raw bytes from `r` into the open section.
    pub(crate) fn copy_from<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.put(&buf[..n])?;
        }
    }

    pub(crate) fn end(&mut self) -> Result<Section> {
        let (kind, start, crc) = self
            .open
            .take()
            .ok_or(StoreError::Invalid("no open section"))?;
        let section = Section {
            off: start,
            len: self.pos - start,
        };
        self.toc.push(TocEntry {
            kind,
            section,
            crc32_u32: crc.finish(),
        });
        Ok(section)
    }

    /// Write TOC, footer and `header`, then rename the file onto `dest`.
    pub(crate) fn finish(mut self, mut header: Header, dest: &Path) -> Result<()> {
        if self.open.is_some() {
            return Err(StoreError::Invalid("section left open"));
        }
        header.toc_off_u64 = self.pos;
        header.toc_len_u32 = self.toc.len() as u32;
        let toc = std::mem::take(&mut self.toc);
        for e in &toc {
            self.put(&e.to_bytes())?;
        }
        let FileAssembler {
            tmp,
            mut out,
            body_crc,
            ..
        } = self;
        out.write_all(&body_crc.finish().to_le_bytes())?;
        out.write_all(FOOTER_MAGIC)?;
        let mut f = out.into_inner().map_err(|e| e.into_error())?;
        f.seek(SeekFrom::Start(0))?;
        f.write_all(&header.to_bytes())?;
        f.sync_all()?;
        drop(f);
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

/// Anonymous spill file holding little-endian `u64`s.
struct U64Spill {
    w: BufWriter<File>,
    n: u64,
}

impl U64Spill {
    fn new(work_dir: &Path) -> Result<Self> {
        Ok(Self {
            w: BufWriter::new(tempfile::tempfile_in(work_dir)?),
            n: 0,
        })
    }

    fn push(&mut self, v: u64) -> Result<()> {
        self.w.write_all(&v.to_le_bytes())?;
        self.n += 1;
        Ok(())
    }

    fn reader(self) -> Result<BufReader<File>> {
        let mut f = self.w.into_inner().map_err(|e| e.into_error())?;
        f.seek(SeekFrom::Start(0))?;
        Ok(BufReader::new(f))
    }

    /// Copy every value into the open section of `asm`, narrowed to `width`.
    fn drain_into(self, asm: &mut FileAssembler, width: Width) -> Result<()> {
        let n = self.n;
        let mut r = self.reader()?;
        let mut b = [0u8; 8];
        for _ in 0..n {
            r.read_exact(&mut b)?;
            asm.put_uint(u64::from_le_bytes(b), width)?;
        }
        Ok(())
    }
}

/// Writes a dictionary file from strings supplied in strictly ascending order.
///
/// Ids are assigned densely from [`crate::MIN_ID`] in push order.
pub struct DictWriter {
    blob: BufWriter<File>,
    offsets: U64Spill,
    count: u64,
    blob_len: u64,
    last: Option<Vec<u8>>,
    flags: u16,
    aux: u16,
}

impl DictWriter {
    /// Create a writer staging its data in anonymous files under `work_dir`.
    pub fn new(work_dir: &Path) -> Result<Self> {
        let mut offsets = U64Spill::new(work_dir)?;
        offsets.push(0)?;
        Ok(Self {
            blob: BufWriter::new(tempfile::tempfile_in(work_dir)?),
            offsets,
            count: 0,
            blob_len: 0,
            last: None,
            flags: 0,
            aux: 0,
        })
    }

    /// Header flags and aux field, used to tag composite `strings` files.
    pub(crate) fn with_header_bits(mut self, flags: u16, aux: u16) -> Self {
        self.flags = flags;
        self.aux = aux;
        self
    }

    /// Append the next string and return its id.
    pub fn push(&mut self, s: &[u8]) -> Result<u64> {
        if let Some(last) = &self.last {
            if last.as_slice() >= s {
                return Err(StoreError::Invalid(
                    "dictionary input is not strictly ascending",
                ));
            }
        }
        self.blob.write_all(s)?;
        self.blob_len += s.len() as u64;
        self.offsets.push(self.blob_len)?;
        self.count += 1;
        match &mut self.last {
            Some(last) => {
                last.clear();
                last.extend_from_slice(s);
            }
            None => self.last = Some(s.to_vec()),
        }
        Ok(self.count)
    }

    /// Number of strings pushed so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Assemble the file and atomically place it at `dest`. Returns the string count.
    pub fn finish(self, dest: &Path) -> Result<u64> {
        let offset_width = Width::for_max(self.blob_len);
        let mut blob = self.blob.into_inner().map_err(|e| e.into_error())?;
        blob.seek(SeekFrom::Start(0))?;

        let mut asm = FileAssembler::create(dest)?;
        asm.begin(SectionKind::Offsets);
        self.offsets.drain_into(&mut asm, offset_width)?;
        asm.end()?;
        asm.begin(SectionKind::Strings);
        asm.copy_from(&mut BufReader::new(blob).take(self.blob_len))?;
        asm.end()?;
        asm.finish(
            Header {
                magic: DICT_MAGIC,
                version_u16: VERSION,
                flags_u16: self.flags,
                count_u64: self.count,
                toc_off_u64: 0,
                toc_len_u32: 0,
                offset_width_u8: offset_width as u8,
                value_width_u8: 0,
                aux_u16: self.aux,
            },
            dest,
        )?;
        debug!(
            "wrote dictionary {} ({} strings, {} string bytes, {:?} offsets)",
            dest.display(),
            self.count,
            self.blob_len,
            offset_width
        );
        Ok(self.count)
    }
}

/// Writes one triple index file from triples already permuted into
/// `(key, sub_key, value)` and supplied in ascending order.
pub struct TripleIndexWriter {
    order: TripleOrder,
    keys: U64Spill,
    offsets: U64Spill,
    rows: U64Spill,
    by_value: ExternalSorter<IdTriple>,
    last: Option<IdTriple>,
    n_rows: u64,
    max_id: u64,
}

impl TripleIndexWriter {
    /// `sort_budget` bounds the memory of the secondary `(key, value, sub_key)` sort.
    pub fn new(work_dir: &Path, order: TripleOrder, sort_budget: usize) -> Result<Self> {
        Self::with_compression(work_dir, order, sort_budget, false)
    }

    pub(crate) fn with_compression(
        work_dir: &Path,
        order: TripleOrder,
        sort_budget: usize,
        compress: bool,
    ) -> Result<Self> {
        Ok(Self {
            order,
            keys: U64Spill::new(work_dir)?,
            offsets: U64Spill::new(work_dir)?,
            rows: U64Spill::new(work_dir)?,
            by_value: ExternalSorter::new(
                work_dir,
                &format!("{}-by-value", order.file_name()),
                sort_budget,
                compress,
            )?,
            last: None,
            n_rows: 0,
            max_id: 0,
        })
    }

    pub fn push(&mut self, t: IdTriple) -> Result<()> {
        let [key, sub_key, value] = t;
        match self.last {
            Some(last) if last > t => {
                return Err(StoreError::Invalid("triple input is not sorted"));
            }
            Some(last) if last[0] == key => {}
            _ => {
                self.keys.push(key)?;
                self.offsets.push(self.n_rows)?;
            }
        }
        self.rows.push(sub_key)?;
        self.rows.push(value)?;
        self.by_value.push([key, value, sub_key])?;
        self.n_rows += 1;
        self.max_id = self.max_id.max(key).max(sub_key).max(value);
        self.last = Some(t);
        Ok(())
    }

    /// Assemble and atomically place the file at `dest`. Returns the triple count.
    pub fn finish(mut self, dest: &Path) -> Result<u64> {
        self.offsets.push(self.n_rows)?;
        let value_width = Width::for_max(self.max_id);
        let offset_width = Width::for_max(self.n_rows);
        let n_keys = self.keys.n;

        let mut asm = FileAssembler::create(dest)?;
        asm.begin(SectionKind::Keys);
        self.keys.drain_into(&mut asm, value_width)?;
        asm.end()?;
        asm.begin(SectionKind::Offsets);
        self.offsets.drain_into(&mut asm, offset_width)?;
        asm.end()?;
        asm.begin(SectionKind::Rows);
        self.rows.drain_into(&mut asm, value_width)?;
        asm.end()?;
        asm.begin(SectionKind::ByValue);
        let mut n_secondary = 0u64;
        for t in self.by_value.finish()? {
            let [_, value, sub_key] = t?;
            asm.put_uint(value, value_width)?;
            asm.put_uint(sub_key, value_width)?;
            n_secondary += 1;
        }
        asm.end()?;
        if n_secondary != self.n_rows {
            return Err(StoreError::Corrupt(format!(
                "secondary rows {n_secondary} != primary rows {}",
                self.n_rows
            )));
        }
        asm.finish(
            Header {
                magic: TRIPLES_MAGIC,
                version_u16: VERSION,
                flags_u16: self.order as u16,
                count_u64: self.n_rows,
                toc_off_u64: 0,
                toc_len_u32: 0,
                offset_width_u8: offset_width as u8,
                value_width_u8: value_width as u8,
                aux_u16: 0,
            },
            dest,
        )?;
        info!(
            "wrote {:?} index {} ({} triples, {} keys, {:?} ids)",
            self.order,
            dest.display(),
            self.n_rows,
            n_keys,
            value_width
        );
        Ok(self.n_rows)
    }
}

/// Publish a fully written staging directory as `dest` with a single rename.
///
/// `dest` may be absent or an empty directory; anything else is refused so a
/// finished store is never partially overwritten.
pub(crate) fn publish_dir(staging: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        let empty = dest.is_dir() && fs::read_dir(dest)?.next().is_none();
        if !empty {
            return Err(StoreError::DestinationExists(dest.to_path_buf()));
        }
        fs::remove_dir(dest)?;
    }
    sync_dir(staging)?;
    fs::rename(staging, dest)?;
    match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => sync_dir(p)?,
        _ => sync_dir(Path::new("."))?,
    }
    Ok(())
}

/// Copy `src` to `dest` and flush the copy to disk.
pub(crate) fn copy_synced(src: &Path, dest: &Path) -> Result<u64> {
    let n = fs::copy(src, dest)?;
    File::open(dest)?.sync_all()?;
    Ok(n)
}

/// Flush a directory's entries to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directory handles cannot be synced on this platform.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Parent directory used for a staging directory next to `dest`.
pub(crate) fn staging_parent(dest: &Path) -> io::Result<&Path> {
    match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => {
            fs::create_dir_all(p)?;
            Ok(p)
        }
        _ => Ok(Path::new(".")),
    }
}
