//! On-disk matrix cache.
//!
//! One file per entry, `{hex_key}.bin`, with a versioned header followed by
//! two row-major i32 grids. Corrupt or unreadable files are treated as misses;
//! writes go to a temp file first and are renamed into place.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

use crate::geo::Coordinate;

/// Bumped whenever the on-disk layout changes; folded into the key so stale
/// formats never collide with fresh ones.
const SCHEMA_VERSION: u8 = 1;

const MAGIC: &[u8; 4] = b"FPMX";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// The distance/duration payload of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMatrix {
    pub distances_m: Vec<Vec<i32>>,
    pub durations_s: Vec<Vec<i32>>,
}

#[derive(Debug, Clone)]
pub struct MatrixCache {
    directory: PathBuf,
    ttl: Duration,
}

/// FNV-1a, 64-bit. Stable across processes and platforms, which file names
/// and cross-run cache hits require.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Canonical cache key over provider identity, the ordered coordinate list at
/// 6-decimal precision, the optional departure time, and the costing profile.
pub fn cache_key(
    provider_id: &str,
    coordinates: &[Coordinate],
    departure_hhmm: Option<&str>,
    costing_profile: &str,
) -> u64 {
    let mut canonical = String::new();
    canonical.push(char::from(b'0' + SCHEMA_VERSION));
    canonical.push('|');
    canonical.push_str(provider_id);
    canonical.push('|');
    canonical.push_str(costing_profile);
    canonical.push('|');
    canonical.push_str(departure_hhmm.unwrap_or("-"));
    for coord in coordinates {
        canonical.push('|');
        canonical.push_str(&coord.key());
    }
    fnv1a(canonical.as_bytes())
}

impl MatrixCache {
    pub fn new(directory: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            directory: directory.into(),
            ttl,
        }
    }

    fn entry_path(&self, key: u64) -> PathBuf {
        self.directory.join(format!("{:016x}.bin", key))
    }

    /// Look up an entry. Stale, corrupt, or missing entries all read as
    /// `None`; corruption additionally logs a warning.
    pub fn load(&self, key: u64, provider_id: &str) -> Option<CachedMatrix> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        match read_entry(&path, provider_id) {
            Ok((written_at, matrix)) => {
                let age = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .saturating_sub(Duration::from_secs(written_at));
                if age < self.ttl {
                    Some(matrix)
                } else {
                    None
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "treating cache entry as miss");
                None
            }
        }
    }

    /// Write an entry atomically: temp file in the same directory, then rename.
    pub fn store(&self, key: u64, provider_id: &str, matrix: &CachedMatrix) -> Result<(), CacheError> {
        fs::create_dir_all(&self.directory)?;
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("tmp");

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            write_entry(&mut writer, provider_id, now, matrix)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Drop every entry, regardless of age.
    pub fn purge(&self) -> Result<(), CacheError> {
        if !self.directory.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|ext| ext == "bin") {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn write_entry(
    writer: &mut impl Write,
    provider_id: &str,
    timestamp: u64,
    matrix: &CachedMatrix,
) -> Result<(), CacheError> {
    let n = matrix.distances_m.len();
    if matrix.durations_s.len() != n
        || matrix.distances_m.iter().any(|r| r.len() != n)
        || matrix.durations_s.iter().any(|r| r.len() != n)
    {
        return Err(CacheError::Corrupt("non-square matrix payload".into()));
    }

    writer.write_all(MAGIC)?;
    writer.write_all(&[SCHEMA_VERSION])?;
    let id_bytes = provider_id.as_bytes();
    writer.write_all(&(id_bytes.len() as u16).to_le_bytes())?;
    writer.write_all(id_bytes)?;
    writer.write_all(&timestamp.to_le_bytes())?;
    writer.write_all(&(n as u32).to_le_bytes())?;
    for grid in [&matrix.distances_m, &matrix.durations_s] {
        for row in grid.iter() {
            for &cell in row {
                writer.write_all(&cell.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], CacheError> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| CacheError::Corrupt("truncated entry".into()))?;
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_grid(bytes: &[u8], cursor: &mut usize, n: usize) -> Result<Vec<Vec<i32>>, CacheError> {
    let mut grid = Vec::with_capacity(n);
    for _ in 0..n {
        let mut row = Vec::with_capacity(n);
        for _ in 0..n {
            let cell = take(bytes, cursor, 4)?;
            row.push(i32::from_le_bytes(cell.try_into().unwrap_or([0; 4])));
        }
        grid.push(row);
    }
    Ok(grid)
}

fn read_entry(path: &Path, expected_provider: &str) -> Result<(u64, CachedMatrix), CacheError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    let mut cursor = 0usize;

    if take(&bytes, &mut cursor, 4)? != MAGIC {
        return Err(CacheError::Corrupt("bad magic".into()));
    }
    if take(&bytes, &mut cursor, 1)?[0] != SCHEMA_VERSION {
        return Err(CacheError::Corrupt("schema version mismatch".into()));
    }

    let id_len =
        u16::from_le_bytes(take(&bytes, &mut cursor, 2)?.try_into().unwrap_or([0; 2])) as usize;
    let provider = String::from_utf8(take(&bytes, &mut cursor, id_len)?.to_vec())
        .map_err(|_| CacheError::Corrupt("provider id not utf-8".into()))?;
    if provider != expected_provider {
        return Err(CacheError::Corrupt(format!(
            "provider mismatch: entry has {:?}",
            provider
        )));
    }

    let timestamp =
        u64::from_le_bytes(take(&bytes, &mut cursor, 8)?.try_into().unwrap_or([0; 8]));
    let n = u32::from_le_bytes(take(&bytes, &mut cursor, 4)?.try_into().unwrap_or([0; 4])) as usize;

    let distances_m = read_grid(&bytes, &mut cursor, n)?;
    let durations_s = read_grid(&bytes, &mut cursor, n)?;
    if cursor != bytes.len() {
        return Err(CacheError::Corrupt("trailing bytes".into()));
    }

    Ok((timestamp, CachedMatrix { distances_m, durations_s }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> CachedMatrix {
        CachedMatrix {
            distances_m: vec![vec![0, 120, 340], vec![130, 0, 210], vec![345, 215, 0]],
            durations_s: vec![vec![0, 30, 80], vec![31, 0, 52], vec![81, 53, 0]],
        }
    }

    fn coords() -> Vec<Coordinate> {
        vec![
            Coordinate::new(42.70, 23.32).unwrap(),
            Coordinate::new(42.71, 23.33).unwrap(),
            Coordinate::new(42.72, 23.34).unwrap(),
        ]
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::new(dir.path(), Duration::from_secs(3600));
        let key = cache_key("osrm", &coords(), None, "driving");

        let matrix = sample_matrix();
        cache.store(key, "osrm", &matrix).unwrap();
        let loaded = cache.load(key, "osrm").expect("fresh entry should hit");
        assert_eq!(loaded, matrix);
    }

    #[test]
    fn keys_differ_by_provider_departure_and_order() {
        let base = cache_key("osrm", &coords(), None, "driving");
        assert_ne!(base, cache_key("valhalla", &coords(), None, "driving"));
        assert_ne!(base, cache_key("osrm", &coords(), Some("08:30"), "driving"));
        assert_ne!(base, cache_key("osrm", &coords(), None, "truck"));

        let mut reversed = coords();
        reversed.reverse();
        assert_ne!(base, cache_key("osrm", &reversed, None, "driving"));
    }

    #[test]
    fn zero_ttl_always_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::new(dir.path(), Duration::ZERO);
        let key = cache_key("osrm", &coords(), None, "driving");
        cache.store(key, "osrm", &sample_matrix()).unwrap();
        assert!(cache.load(key, "osrm").is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::new(dir.path(), Duration::from_secs(3600));
        let key = cache_key("osrm", &coords(), None, "driving");
        cache.store(key, "osrm", &sample_matrix()).unwrap();

        let path = dir.path().join(format!("{:016x}.bin", key));
        fs::write(&path, b"garbage").unwrap();
        assert!(cache.load(key, "osrm").is_none());
    }

    #[test]
    fn provider_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::new(dir.path(), Duration::from_secs(3600));
        let key = cache_key("osrm", &coords(), None, "driving");
        cache.store(key, "osrm", &sample_matrix()).unwrap();
        assert!(cache.load(key, "valhalla").is_none());
    }

    #[test]
    fn purge_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MatrixCache::new(dir.path(), Duration::from_secs(3600));
        let key = cache_key("osrm", &coords(), None, "driving");
        cache.store(key, "osrm", &sample_matrix()).unwrap();
        cache.purge().unwrap();
        assert!(cache.load(key, "osrm").is_none());
    }
}
