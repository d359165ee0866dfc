//! External chunk-sort-merge.
//!
//! Records are buffered up to a byte budget, sorted, and spilled to run files
//! inside a directory owned by the calling builder. Finishing the sorter
//! yields a k-way merge over all runs; when nothing was spilled the merge is
//! a plain in-memory sort. Run files are deleted when the merge is dropped
//! and, at the latest, when the builder's temp directory goes away.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, StoreError};

/// Fixed-layout record used by the triple builders: three ids.
pub type IdTriple = [u64; 3];

/// A value that can be spilled to, and read back from, a run file.
pub(crate) trait Record: Ord + Sized {
    /// Approximate heap footprint, used against the sort budget.
    fn mem_size(&self) -> usize;
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;
    /// `Ok(None)` on a clean end of run.
    fn read_from<R: BufRead>(r: &mut R) -> io::Result<Option<Self>>;
}

pub(crate) fn write_uvarint<W: Write>(mut v: u64, w: &mut W) -> io::Result<()> {
    let mut buf = [0u8; 10];
    let mut n = 0;
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        buf[n] = b;
        n += 1;
        if v == 0 {
            break;
        }
    }
    w.write_all(&buf[..n])
}

pub(crate) fn read_uvarint<R: BufRead>(r: &mut R) -> io::Result<Option<u64>> {
    if r.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let (mut x, mut s) = (0u64, 0u32);
    for _ in 0..10 {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        let b = b[0] as u64;
        x |= (b & 0x7f) << s;
        if b & 0x80 == 0 {
            return Ok(Some(x));
        }
        s += 7;
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "uvarint too long"))
}

impl Record for Vec<u8> {
    fn mem_size(&self) -> usize {
        self.len() + std::mem::size_of::<Vec<u8>>()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_uvarint(self.len() as u64, w)?;
        w.write_all(self)
    }

    fn read_from<R: BufRead>(r: &mut R) -> io::Result<Option<Self>> {
        let Some(len) = read_uvarint(r)? else {
            return Ok(None);
        };
        let mut v = vec![0u8; len as usize];
        r.read_exact(&mut v)?;
        Ok(Some(v))
    }
}

impl Record for IdTriple {
    fn mem_size(&self) -> usize {
        std::mem::size_of::<IdTriple>()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for v in self {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn read_from<R: BufRead>(r: &mut R) -> io::Result<Option<Self>> {
        if r.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let mut b = [0u8; 24];
        r.read_exact(&mut b)?;
        let mut out = [0u64; 3];
        for (i, v) in out.iter_mut().enumerate() {
            let mut w = [0u8; 8];
            w.copy_from_slice(&b[i * 8..i * 8 + 8]);
            *v = u64::from_le_bytes(w);
        }
        Ok(Some(out))
    }
}

enum RunWriter {
    Plain(BufWriter<File>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl RunWriter {
    fn create(path: &Path, compress: bool) -> io::Result<Self> {
        let f = BufWriter::new(File::create(path)?);
        #[cfg(feature = "zstd")]
        {
            if compress {
                return Ok(RunWriter::Zstd(zstd::stream::write::Encoder::new(f, 0)?));
            }
        }
        let _ = compress;
        Ok(RunWriter::Plain(f))
    }

    fn finish(self) -> io::Result<()> {
        match self {
            RunWriter::Plain(mut w) => w.flush(),
            #[cfg(feature = "zstd")]
            RunWriter::Zstd(e) => e.finish()?.flush(),
        }
    }
}

impl Write for RunWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RunWriter::Plain(w) => w.write(buf),
            #[cfg(feature = "zstd")]
            RunWriter::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RunWriter::Plain(w) => w.flush(),
            #[cfg(feature = "zstd")]
            RunWriter::Zstd(e) => e.flush(),
        }
    }
}

type RunReader = Box<dyn BufRead + Send>;

fn open_run(path: &Path, compress: bool) -> io::Result<RunReader> {
    let f = File::open(path)?;
    #[cfg(feature = "zstd")]
    {
        if compress {
            return Ok(Box::new(BufReader::new(zstd::stream::read::Decoder::new(f)?)));
        }
    }
    let _ = compress;
    Ok(Box::new(BufReader::new(f)))
}

/// Bounded-memory sorter spilling runs into a caller-owned directory.
pub(crate) struct ExternalSorter<T: Record> {
    dir: PathBuf,
    name: String,
    budget: usize,
    compress: bool,
    buf: Vec<T>,
    buf_bytes: usize,
    runs: Vec<PathBuf>,
    len: u64,
}

impl<T: Record> ExternalSorter<T> {
    pub(crate) fn new(dir: &Path, name: &str, budget: usize, compress: bool) -> Result<Self> {
        if compress && !cfg!(feature = "zstd") {
            return Err(StoreError::Invalid("zstd feature not enabled"));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            budget: budget.max(1),
            compress,
            buf: Vec::new(),
            buf_bytes: 0,
            runs: Vec::new(),
            len: 0,
        })
    }

    pub(crate) fn push(&mut self, item: T) -> Result<()> {
        self.buf_bytes += item.mem_size();
        self.buf.push(item);
        self.len += 1;
        if self.buf_bytes >= self.budget {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of records pushed so far.
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    fn spill(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.buf.sort_unstable();
        let path = self
            .dir
            .join(format!("{}-{:05}.run", self.name, self.runs.len()));
        let mut w = RunWriter::create(&path, self.compress)?;
        for item in &self.buf {
            item.write_to(&mut w)?;
        }
        w.finish()?;
        debug!(
            "spilled run {} ({} records, ~{} bytes)",
            path.display(),
            self.buf.len(),
            self.buf_bytes
        );
        self.runs.push(path);
        self.buf.clear();
        self.buf_bytes = 0;
        Ok(())
    }

    /// Sort everything pushed so far and return it as an ascending sequence.
    pub(crate) fn finish(mut self) -> Result<Merged<T>> {
        if self.runs.is_empty() {
            self.buf.sort_unstable();
            let items = std::mem::take(&mut self.buf);
            return Ok(Merged {
                inner: MergeInner::Memory(items.into_iter()),
                runs: Vec::new(),
            });
        }
        self.spill()?;
        debug!(
            "merging {} runs of {} ({} records)",
            self.runs.len(),
            self.name,
            self.len
        );
        let runs = std::mem::take(&mut self.runs);
        let mut readers = Vec::with_capacity(runs.len());
        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (i, path) in runs.iter().enumerate() {
            let mut r = open_run(path, self.compress)?;
            if let Some(first) = T::read_from(&mut r)? {
                heap.push(Reverse((first, i)));
            }
            readers.push(r);
        }
        Ok(Merged {
            inner: MergeInner::Runs { readers, heap },
            runs,
        })
    }
}

enum MergeInner<T> {
    Memory(std::vec::IntoIter<T>),
    Runs {
        readers: Vec<RunReader>,
        heap: BinaryHeap<Reverse<(T, usize)>>,
    },
}

/// Ascending output of an [`ExternalSorter`]. Duplicates are preserved.
pub(crate) struct Merged<T: Record> {
    inner: MergeInner<T>,
    runs: Vec<PathBuf>,
}

impl<T: Record> Iterator for Merged<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            MergeInner::Memory(it) => it.next().map(Ok),
            MergeInner::Runs { readers, heap } => {
                let Reverse((item, i)) = heap.pop()?;
                match T::read_from(&mut readers[i]) {
                    Ok(Some(next)) => heap.push(Reverse((next, i))),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e.into())),
                }
                Some(Ok(item))
            }
        }
    }
}

impl<T: Record> Drop for Merged<T> {
    fn drop(&mut self) {
        for path in &self.runs {
            let _ = fs::remove_file(path);
        }
    }
}
