//! Random-access byte sources.
//!
//! The demuxer never streams: every read names an absolute offset, so the
//! same reader is shared by the box walker and both sample table indices.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{DemuxError, Result};

/// Blocking positional reader.
pub trait ByteRangeReader: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes read, which is short only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total length of the source in bytes.
    fn file_size(&self) -> u64;
}

/// Read exactly `buf.len()` bytes or fail with [`DemuxError::ShortRead`].
pub fn read_exact_at(reader: &dyn ByteRangeReader, offset: u64, buf: &mut [u8]) -> Result<()> {
    let got = reader.read_at(offset, buf)?;
    if got < buf.len() {
        return Err(DemuxError::ShortRead {
            offset,
            wanted: buf.len(),
            got,
        });
    }
    Ok(())
}

/// Adapter for any `Read + Seek` source (files, cursors).
pub struct FileReader<R: Read + Seek + Send> {
    inner: Mutex<R>,
    size: u64,
}

impl<R: Read + Seek + Send> FileReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: Mutex::new(inner),
            size,
        })
    }
}

impl<R: Read + Seek + Send> ByteRangeReader for FileReader<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        inner.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            match inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn file_size(&self) -> u64 {
        self.size
    }
}

/// In-memory source.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Bytes,
}

impl MemoryReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteRangeReader for MemoryReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn file_size(&self) -> u64 {
        self.data.len() as u64
    }
}
