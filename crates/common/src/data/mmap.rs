//! Memory-mapped chunk dataset.
//!
//! A cache file is a dense `(num_chunks, seqlen)` array of u16 little-endian
//! token ids with no header; the row count is recovered from the file size.
//! The mapping itself is created lazily on first access so a handle can be
//! cloned and handed to worker threads or processes while still *unopened* —
//! each receiver re-opens the file for itself instead of inheriting a live
//! mapping across the boundary.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

/// Bytes per stored token id.
const ID_WIDTH: usize = std::mem::size_of::<u16>();

/// Lazily mapped, read-only view of one cache file.
pub struct MmapTextDataset {
    path: PathBuf,
    seqlen: usize,
    num_chunks: usize,
    map: OnceLock<Mmap>,
}

impl MmapTextDataset {
    /// Open a cache file. Only the file size is touched here; the mapping is
    /// deferred until the first [`get`](Self::get).
    ///
    /// A byte length that is not a multiple of the record width loses its
    /// trailing partial record; this logs a warning rather than failing so a
    /// cache truncated by an interrupted copy is still usable.
    pub fn open(path: &Path, seqlen: usize) -> Result<Self> {
        assert!(seqlen > 0, "seqlen must be positive");
        let bytes = std::fs::metadata(path)
            .with_context(|| format!("stat cache file {}", path.display()))?
            .len() as usize;
        let record_bytes = seqlen * ID_WIDTH;
        if bytes % record_bytes != 0 {
            tracing::warn!(
                path = %path.display(),
                bytes,
                record_bytes,
                "cache file is not a whole number of records; dropping trailing partial record"
            );
        }
        Ok(Self {
            path: path.to_path_buf(),
            seqlen,
            num_chunks: bytes / record_bytes,
            map: OnceLock::new(),
        })
    }

    /// Number of chunks in the file.
    pub fn len(&self) -> usize {
        self.num_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.num_chunks == 0
    }

    /// Record width in tokens.
    pub fn seqlen(&self) -> usize {
        self.seqlen
    }

    /// Row `i`, widened from stored u16 to the i64 that downstream embedding
    /// lookups take. O(1); the first call maps the file, all later calls only
    /// read from the established mapping.
    pub fn get(&self, i: usize) -> Result<Vec<i64>> {
        if i >= self.num_chunks {
            bail!(
                "chunk index {i} out of range for {} ({} chunks)",
                self.path.display(),
                self.num_chunks
            );
        }
        let map = self.mapping()?;
        let start = i * self.seqlen * ID_WIDTH;
        let row = &map[start..start + self.seqlen * ID_WIDTH];
        Ok(row
            .chunks_exact(ID_WIDTH)
            .map(|b| i64::from(u16::from_le_bytes([b[0], b[1]])))
            .collect())
    }

    /// First-access initialization. Safe under concurrent readers: a lost
    /// race drops its mapping and uses the winner's.
    fn mapping(&self) -> Result<&Mmap> {
        if let Some(map) = self.map.get() {
            return Ok(map);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open cache file {}", self.path.display()))?;
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmap cache file {}", self.path.display()))?;
        let _ = self.map.set(map);
        Ok(self.map.get().expect("mapping initialized above"))
    }
}

impl Clone for MmapTextDataset {
    /// Clones are unopened: only the path and shape travel, never the live
    /// mapping. The clone performs its own first-access initialization.
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            seqlen: self.seqlen,
            num_chunks: self.num_chunks,
            map: OnceLock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    fn write_cache(dir: &Path, name: &str, rows: &[Vec<u16>]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for row in rows {
            for id in row {
                file.write_all(&id.to_le_bytes()).unwrap();
            }
        }
        file.sync_all().unwrap();
        path
    }

    fn sample_rows() -> Vec<Vec<u16>> {
        vec![
            vec![0, 10, 11, 12, 13, 14, 15, 1],
            vec![0, 16, 2, 2, 2, 2, 2, 1],
            vec![0, 2, 2, 2, 2, 2, 2, 1],
        ]
    }

    #[test]
    fn round_trips_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "train.bin", &sample_rows());

        let ds = MmapTextDataset::open(&path, 8).unwrap();
        assert_eq!(ds.len(), 3);
        for (i, row) in sample_rows().iter().enumerate() {
            let expected: Vec<i64> = row.iter().map(|&t| i64::from(t)).collect();
            assert_eq!(ds.get(i).unwrap(), expected);
        }
    }

    #[test]
    fn len_is_known_before_the_mapping_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "train.bin", &sample_rows());

        let ds = MmapTextDataset::open(&path, 8).unwrap();
        assert_eq!(ds.len(), 3);
        assert!(ds.map.get().is_none(), "open must not map the file");
        ds.get(0).unwrap();
        assert!(ds.map.get().is_some());
    }

    #[test]
    fn trailing_partial_record_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "train.bin", &sample_rows());
        // Append half a record.
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0u8; 8]).unwrap();

        let ds = MmapTextDataset::open(&path, 8).unwrap();
        assert_eq!(ds.len(), 3);
        assert!(ds.get(3).is_err());
    }

    #[test]
    fn clone_is_unopened_and_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "train.bin", &sample_rows());

        let ds = MmapTextDataset::open(&path, 8).unwrap();
        ds.get(0).unwrap();
        let copy = ds.clone();
        assert!(copy.map.get().is_none(), "clone must not carry the mapping");
        assert_eq!(copy.get(1).unwrap(), ds.get(1).unwrap());
    }

    #[test]
    fn concurrent_first_access_is_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "train.bin", &sample_rows());

        let ds = Arc::new(MmapTextDataset::open(&path, 8).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ds = Arc::clone(&ds);
                std::thread::spawn(move || ds.get(i % 3).unwrap())
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let expected: Vec<i64> = sample_rows()[i % 3].iter().map(|&t| i64::from(t)).collect();
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn out_of_range_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "train.bin", &sample_rows());
        let ds = MmapTextDataset::open(&path, 8).unwrap();
        assert!(ds.get(3).is_err());
    }

    #[test]
    fn empty_file_has_zero_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(dir.path(), "val.bin", &[]);
        let ds = MmapTextDataset::open(&path, 8).unwrap();
        assert!(ds.is_empty());
    }
}
