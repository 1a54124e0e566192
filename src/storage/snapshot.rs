//! On-disk snapshot of the vector store.
//!
//! Two companion files live in the embeddings directory:
//!
//! `matrix.bin`
//! - magic: `b"LSMX"`
//! - version: u8 (1), followed by 3 reserved bytes
//! - rows: u64 (little-endian)
//! - dimension: u32 (little-endian)
//! - paths_checksum: u32 (CRC32 of the `files.json` bytes this matrix belongs to)
//! - payload_checksum: u32 (CRC32 of the matrix payload)
//! - header_checksum: u32 (CRC32 of the 28 header bytes before it)
//! - payload: rows * dimension f32 values, row-major, little-endian
//!
//! `files.json`
//! - JSON array of paths; entry `i` owns matrix row `i`.
//!
//! Both files are written to a temp file, synced and renamed. The rename pair
//! is not atomic as a whole, so the matrix header pins the exact path list it
//! was written with; a load that sees one new file and one old file fails the
//! paths checksum instead of silently mis-joining rows.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"LSMX";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// magic(4) + version(1) + reserved(3) + rows(8) + dimension(4) + three checksums(12)
const HEADER_SIZE: usize = 32;

/// Row-aligned contents of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub dimension: usize,
    pub paths: Vec<PathBuf>,
    /// Row-major, `paths.len() * dimension` values
    pub matrix: Vec<f32>,
}

impl Snapshot {
    pub fn rows(&self) -> usize {
        self.paths.len()
    }

    /// Vector stored at `row`
    pub fn row(&self, row: usize) -> &[f32] {
        &self.matrix[row * self.dimension..(row + 1) * self.dimension]
    }
}

/// Location of the two snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotFiles {
    matrix_path: PathBuf,
    files_path: PathBuf,
}

impl SnapshotFiles {
    pub fn new(matrix_path: PathBuf, files_path: PathBuf) -> Self {
        Self {
            matrix_path,
            files_path,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.matrix_path(), config.files_path())
    }

    pub fn matrix_path(&self) -> &Path {
        &self.matrix_path
    }

    pub fn files_path(&self) -> &Path {
        &self.files_path
    }

    /// Load and validate the snapshot.
    ///
    /// Returns `Ok(None)` when no snapshot has been written yet. A half-present
    /// or inconsistent pair is `CorruptSnapshot`; a valid snapshot built for a
    /// different dimension is `DimensionMismatch`.
    pub fn load(&self, expected_dimension: usize) -> Result<Option<Snapshot>> {
        if !self.matrix_path.exists() && !self.files_path.exists() {
            return Ok(None);
        }

        let path_bytes = std::fs::read(&self.files_path).map_err(|e| {
            Error::CorruptSnapshot(format!("cannot read {}: {}", self.files_path.display(), e))
        })?;
        let matrix_bytes = std::fs::read(&self.matrix_path).map_err(|e| {
            Error::CorruptSnapshot(format!("cannot read {}: {}", self.matrix_path.display(), e))
        })?;

        let header = Header::parse(&matrix_bytes)?;

        if header.paths_checksum != crc32fast::hash(&path_bytes) {
            return Err(Error::CorruptSnapshot(
                "path list does not belong to this matrix".to_string(),
            ));
        }

        let paths: Vec<PathBuf> = serde_json::from_slice(&path_bytes)
            .map_err(|e| Error::CorruptSnapshot(format!("invalid path list: {}", e)))?;

        if paths.len() as u64 != header.rows {
            return Err(Error::CorruptSnapshot(format!(
                "matrix has {} rows but path list has {} entries",
                header.rows,
                paths.len()
            )));
        }

        let dimension = header.dimension as usize;
        let payload = &matrix_bytes[HEADER_SIZE..];
        let expected_len = paths.len() * dimension * 4;
        if payload.len() != expected_len {
            return Err(Error::CorruptSnapshot(format!(
                "matrix payload is {} bytes, expected {}",
                payload.len(),
                expected_len
            )));
        }
        if header.payload_checksum != crc32fast::hash(payload) {
            return Err(Error::CorruptSnapshot("matrix checksum mismatch".to_string()));
        }

        if dimension != expected_dimension {
            return Err(Error::DimensionMismatch {
                expected: expected_dimension,
                got: dimension,
            });
        }

        let matrix = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Some(Snapshot {
            dimension,
            paths,
            matrix,
        }))
    }

    /// Persist a matrix and its row-aligned path list.
    pub fn save(&self, dimension: usize, paths: &[PathBuf], matrix: &[f32]) -> Result<()> {
        if matrix.len() != paths.len() * dimension {
            return Err(Error::CorruptSnapshot(format!(
                "refusing to write {} values for {} rows of dimension {}",
                matrix.len(),
                paths.len(),
                dimension
            )));
        }

        let path_bytes = serde_json::to_vec(paths)?;

        let mut payload = Vec::with_capacity(matrix.len() * 4);
        for value in matrix {
            payload.extend_from_slice(&value.to_le_bytes());
        }

        let header = Header {
            rows: paths.len() as u64,
            dimension: dimension as u32,
            paths_checksum: crc32fast::hash(&path_bytes),
            payload_checksum: crc32fast::hash(&payload),
        };

        // Matrix first: until files.json is replaced too, the pair fails the
        // paths checksum and a reader rebuilds.
        write_atomic(&self.matrix_path, &[&header.to_bytes(), &payload])?;
        write_atomic(&self.files_path, &[&path_bytes])?;
        Ok(())
    }
}

#[derive(Debug)]
struct Header {
    rows: u64,
    dimension: u32,
    paths_checksum: u32,
    payload_checksum: u32,
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(MAGIC);
        bytes[4] = FORMAT_VERSION;
        bytes[8..16].copy_from_slice(&self.rows.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.dimension.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.paths_checksum.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.payload_checksum.to_le_bytes());
        let checksum = crc32fast::hash(&bytes[0..28]);
        bytes[28..32].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::CorruptSnapshot("matrix file is truncated".to_string()));
        }
        if &bytes[0..4] != MAGIC {
            return Err(Error::CorruptSnapshot("bad magic".to_string()));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "unsupported format version {}",
                bytes[4]
            )));
        }

        let stored = u32::from_le_bytes(read_array(&bytes[28..32]));
        if stored != crc32fast::hash(&bytes[0..28]) {
            return Err(Error::CorruptSnapshot("header checksum mismatch".to_string()));
        }

        Ok(Self {
            rows: u64::from_le_bytes(read_array(&bytes[8..16])),
            dimension: u32::from_le_bytes(read_array(&bytes[16..20])),
            paths_checksum: u32::from_le_bytes(read_array(&bytes[20..24])),
            payload_checksum: u32::from_le_bytes(read_array(&bytes[24..28])),
        })
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Write `parts` to a temp file next to `path`, sync it, then rename it over `path`.
fn write_atomic(path: &Path, parts: &[&[u8]]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let result = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        for part in parts {
            writer.write_all(part)?;
        }
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tempfile::TempDir;

    fn files(dir: &TempDir) -> SnapshotFiles {
        SnapshotFiles::new(dir.path().join("matrix.bin"), dir.path().join("files.json"))
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(files(&dir).load(3).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_bit_exact() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        let paths = vec![PathBuf::from("/n/a.txt"), PathBuf::from("/n/b.md")];
        let matrix = vec![0.1f32, -0.0, f32::MIN_POSITIVE, 1.0 / 3.0, 0.7071068, -0.5];

        files.save(3, &paths, &matrix).unwrap();
        let snapshot = files.load(3).unwrap().unwrap();

        assert_eq!(snapshot.paths, paths);
        assert_eq!(snapshot.rows(), 2);
        let bits: Vec<u32> = snapshot.matrix.iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = matrix.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
        assert_eq!(snapshot.row(1), &matrix[3..6]);
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.save(384, &[], &[]).unwrap();
        let snapshot = files.load(384).unwrap().unwrap();
        assert_eq!(snapshot.dimension, 384);
        assert_eq!(snapshot.rows(), 0);
        assert!(snapshot.matrix.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.save(2, &[PathBuf::from("/a")], &[1.0, 0.0]).unwrap();

        let result = files.load(384);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 384, got: 2 })
        ));
    }

    #[test]
    fn test_mismatched_pair_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.save(2, &[PathBuf::from("/a")], &[1.0, 0.0]).unwrap();

        // Simulate a crash between the two renames: new path list, old matrix.
        std::fs::write(files.files_path(), br#"["/a","/b"]"#).unwrap();

        assert!(matches!(files.load(2), Err(Error::CorruptSnapshot(_))));
    }

    #[test]
    fn test_payload_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.save(2, &[PathBuf::from("/a")], &[1.0, 0.0]).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(files.matrix_path())
            .unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64 + 1)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        assert!(matches!(files.load(2), Err(Error::CorruptSnapshot(_))));
    }

    #[test]
    fn test_missing_companion_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let files = files(&dir);
        files.save(2, &[PathBuf::from("/a")], &[1.0, 0.0]).unwrap();
        std::fs::remove_file(files.files_path()).unwrap();

        assert!(matches!(files.load(2), Err(Error::CorruptSnapshot(_))));
    }

    #[test]
    fn test_save_rejects_misaligned_matrix() {
        let dir = TempDir::new().unwrap();
        let result = files(&dir).save(2, &[PathBuf::from("/a")], &[1.0]);
        assert!(result.is_err());
    }
}
