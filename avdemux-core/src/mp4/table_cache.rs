//! Paged access to fixed-stride `stbl` sub-tables.
//!
//! Sample tables can run to millions of entries, so only a bounded window of
//! each is resident. A miss re-reads the window from the source; the backing
//! bytes never change, so a window is never stale.

use bytes::Buf;

use crate::error::{DemuxError, Result};
use crate::mp4::atom::FourCC;
use crate::reader::{read_exact_at, ByteRangeReader};

#[derive(Debug)]
pub struct TableCache {
    fourcc: FourCC,
    entries_offset: u64,
    entry_count: u32,
    entry_size: usize,
    capacity: u32,
    first_cached: u32,
    cached: Vec<u8>,
}

impl TableCache {
    /// `entries_offset` is the absolute offset of entry 0; `available` is the
    /// number of box body bytes from there to the end of the box.
    pub fn new(
        fourcc: FourCC,
        entries_offset: u64,
        entry_count: u32,
        entry_size: usize,
        capacity: u32,
        available: u64,
    ) -> Result<Self> {
        let needed = entry_count as u64 * entry_size as u64;
        if needed > available {
            return Err(DemuxError::Truncated {
                fourcc,
                needed,
                available,
            });
        }
        Ok(Self {
            fourcc,
            entries_offset,
            entry_count,
            entry_size,
            capacity: capacity.max(1),
            first_cached: 0,
            cached: Vec::new(),
        })
    }

    pub fn fourcc(&self) -> FourCC {
        self.fourcc
    }

    pub fn len(&self) -> u32 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    fn cached_entries(&self) -> u32 {
        (self.cached.len() / self.entry_size) as u32
    }

    /// Raw bytes of entry `index`.
    pub fn entry(&mut self, reader: &dyn ByteRangeReader, index: u32) -> Result<&[u8]> {
        if index >= self.entry_count {
            return Err(DemuxError::SampleTable(format!(
                "{} entry {} past end of {}-entry table",
                self.fourcc, index, self.entry_count
            )));
        }

        let resident = index >= self.first_cached
            && index < self.first_cached + self.cached_entries();
        if !resident {
            self.load_window(reader, index)?;
        }

        let start = (index - self.first_cached) as usize * self.entry_size;
        Ok(&self.cached[start..start + self.entry_size])
    }

    pub fn u32_at(&mut self, reader: &dyn ByteRangeReader, index: u32, field: usize) -> Result<u32> {
        let mut entry = &self.entry(reader, index)?[field * 4..];
        Ok(entry.get_u32())
    }

    pub fn u64_at(&mut self, reader: &dyn ByteRangeReader, index: u32) -> Result<u64> {
        let mut entry = self.entry(reader, index)?;
        Ok(entry.get_u64())
    }

    fn load_window(&mut self, reader: &dyn ByteRangeReader, index: u32) -> Result<()> {
        // Keep the tail of the table whole once the cursor gets there.
        let first = index.min(self.entry_count.saturating_sub(self.capacity));
        let count = self.capacity.min(self.entry_count - first);

        self.cached.resize(count as usize * self.entry_size, 0);
        let offset = self.entries_offset + first as u64 * self.entry_size as u64;
        if let Err(e) = read_exact_at(reader, offset, &mut self.cached) {
            self.cached.clear();
            return Err(e);
        }
        self.first_cached = first;

        tracing::trace!(
            "{} window loaded: entries {}..{} of {}",
            self.fourcc,
            first,
            first + count,
            self.entry_count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::atom::STSZ;
    use crate::reader::MemoryReader;

    fn table_bytes(count: u32) -> Vec<u8> {
        let mut data = vec![0xAA; 6];
        for i in 0..count {
            data.extend_from_slice(&(i * 10).to_be_bytes());
        }
        data
    }

    #[test]
    fn pages_through_small_window() {
        let reader = MemoryReader::new(table_bytes(10));
        let mut table = TableCache::new(STSZ, 6, 10, 4, 3, 40).expect("table");

        assert_eq!(table.u32_at(&reader, 0, 0).unwrap(), 0);
        assert_eq!(table.u32_at(&reader, 2, 0).unwrap(), 20);
        assert_eq!(table.u32_at(&reader, 5, 0).unwrap(), 50);
        assert_eq!(table.u32_at(&reader, 9, 0).unwrap(), 90);
        // tail window covers 7..10
        assert_eq!(table.u32_at(&reader, 7, 0).unwrap(), 70);
        assert_eq!(table.u32_at(&reader, 1, 0).unwrap(), 10);
    }

    #[test]
    fn rejects_table_larger_than_box() {
        let err = TableCache::new(STSZ, 6, 10, 4, 3, 39).unwrap_err();
        assert!(matches!(err, DemuxError::Truncated { needed: 40, available: 39, .. }));
    }

    #[test]
    fn index_past_end_is_an_inconsistency() {
        let reader = MemoryReader::new(table_bytes(2));
        let mut table = TableCache::new(STSZ, 6, 2, 4, 8, 8).unwrap();
        assert!(matches!(table.entry(&reader, 2), Err(DemuxError::SampleTable(_))));
    }

    #[test]
    fn short_source_fails_the_read() {
        let reader = MemoryReader::new(table_bytes(2));
        // claims 4 entries but file only holds 2
        let mut table = TableCache::new(STSZ, 6, 4, 4, 8, 16).unwrap();
        assert!(matches!(table.entry(&reader, 0), Err(DemuxError::ShortRead { .. })));
    }
}
