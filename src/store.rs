//! Working-set persistence: vectors.bin + chunks.json side by side.
//!
//! vectors.bin layout:
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of the payload, little-endian)
//!
//! Payload:
//! - entry_count * dimensions f32 values (little-endian), row-major
//!
//! chunks.json is the parallel chunk metadata as a JSON array. Both files
//! are required on load; either one missing or inconsistent with the other
//! fails the load closed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::chunker::Chunk;
use crate::index::{FlatIndex, IndexError};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
pub const HEADER_SIZE: usize = 47;

/// Errors that can occur during persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: artifacts were built with a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: vectors file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Chunk metadata is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Artifacts disagree: {vectors} vectors, {chunks} chunks")]
    CountMismatch { vectors: usize, chunks: usize },

    #[error("Chunk at position {position} has id {id}")]
    IdOutOfOrder { position: usize, id: usize },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// The index and its parallel chunk metadata.
///
/// Construction is the only way to pair the two, and it enforces the
/// alignment invariant: one vector row per chunk, and `chunks[i].id == i`.
pub struct WorkingSet {
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

impl WorkingSet {
    /// Pair an index with its chunks, validating alignment.
    pub fn new(index: FlatIndex, chunks: Vec<Chunk>) -> Result<Self, StoreError> {
        if index.len() != chunks.len() {
            return Err(StoreError::CountMismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }
        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.id != position {
                return Err(StoreError::IdOutOfOrder {
                    position,
                    id: chunk.id,
                });
            }
        }
        Ok(Self { index, chunks })
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Storage manager for the artifact pair.
pub struct WorkingSetStore {
    vectors_path: PathBuf,
    chunks_path: PathBuf,
}

impl WorkingSetStore {
    pub fn new(vectors_path: PathBuf, chunks_path: PathBuf) -> Self {
        Self {
            vectors_path,
            chunks_path,
        }
    }

    pub fn vectors_path(&self) -> &Path {
        &self.vectors_path
    }

    pub fn chunks_path(&self) -> &Path {
        &self.chunks_path
    }

    /// Check if the vectors artifact exists.
    pub fn vectors_exist(&self) -> bool {
        self.vectors_path.exists()
    }

    /// Check if both artifacts exist.
    pub fn artifacts_exist(&self) -> bool {
        self.vectors_path.exists() && self.chunks_path.exists()
    }

    /// Persist a working set.
    ///
    /// Destination directories are created if absent. Each file is written
    /// to a temp file next to its destination and renamed into place.
    pub fn save(&self, working_set: &WorkingSet, model_id: &[u8; 32]) -> Result<(), StoreError> {
        for path in [&self.vectors_path, &self.chunks_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        write_atomic(&self.vectors_path, |path| {
            write_vectors_file(path, working_set.index(), model_id)
        })?;
        write_atomic(&self.chunks_path, |path| {
            write_chunks_file(path, working_set.chunks())
        })?;

        Ok(())
    }

    /// Load the working set from storage.
    ///
    /// Both artifact files must exist before either is read. The vectors
    /// header is validated against the active model and every alignment
    /// invariant is rechecked before the set is returned.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<WorkingSet, StoreError> {
        for path in [&self.vectors_path, &self.chunks_path] {
            if !path.exists() {
                return Err(StoreError::MissingArtifact(path.clone()));
            }
        }

        let index = self.read_vectors(expected_model_id, expected_dimensions)?;
        let chunks = self.read_chunks()?;

        WorkingSet::new(index, chunks)
    }

    fn read_vectors(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<FlatIndex, StoreError> {
        let file = File::open(&self.vectors_path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, expected_model_id, expected_dimensions)?;

        // the checksum covers only the payload, so the count field is
        // checked against the real file length before anything is allocated
        let expected_len = header
            .entry_count
            .checked_mul(header.dimensions as u64)
            .and_then(|values| values.checked_mul(4))
            .and_then(|payload| payload.checked_add(HEADER_SIZE as u64))
            .ok_or_else(|| {
                StoreError::InvalidFormat(format!(
                    "entry count {} overflows the file layout",
                    header.entry_count
                ))
            })?;
        if file_len != expected_len {
            return Err(StoreError::InvalidFormat(format!(
                "vectors file is {file_len} bytes, header implies {expected_len}"
            )));
        }

        let mut payload = vec![0u8; (expected_len - HEADER_SIZE as u64) as usize];
        reader.read_exact(&mut payload).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                StoreError::InvalidFormat("vector payload truncated".to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        if crc32fast::hash(&payload) != header.checksum {
            return Err(StoreError::ChecksumMismatch);
        }

        let mut data = Vec::with_capacity(payload.len() / 4);
        for bytes in payload.chunks_exact(4) {
            data.push(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }

        Ok(FlatIndex::from_raw(header.dimensions as usize, data)?)
    }

    fn read_chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        let bytes = std::fs::read(&self.chunks_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write via temp file + rename, cleaning the temp file up on failure.
fn write_atomic(
    path: &Path,
    write_fn: impl FnOnce(&Path) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let temp_path = path.with_extension("tmp");

    let result = write_fn(&temp_path);
    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
        return result;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
    checksum: u32,
}

fn write_vectors_file(
    path: &Path,
    index: &FlatIndex,
    model_id: &[u8; 32],
) -> Result<(), StoreError> {
    // payload first, so the checksum covers every vector byte
    let mut payload = Vec::with_capacity(index.raw_vectors().len() * 4);
    for value in index.raw_vectors() {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    let checksum = crc32fast::hash(&payload);

    let header = Header {
        version: FORMAT_VERSION,
        model_id: *model_id,
        dimensions: index.dimensions() as u16,
        entry_count: index.len() as u64,
        checksum,
    };

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, &header)?;
    writer.write_all(&payload)?;

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

fn write_chunks_file(path: &Path, chunks: &[Chunk]) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(chunks)?;

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;

    Ok(())
}

fn write_header(writer: &mut BufWriter<File>, header: &Header) -> Result<(), StoreError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());
    header_bytes[43..47].copy_from_slice(&header.checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_header(reader: &mut BufReader<File>) -> Result<Header, StoreError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::InvalidFormat("vectors file shorter than header".to_string())
        } else {
            StoreError::Io(err)
        }
    })?;

    let version = header_bytes[0];

    // Version check first
    if version > FORMAT_VERSION {
        return Err(StoreError::VersionMismatch(version, FORMAT_VERSION));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
    let entry_count = u64::from_le_bytes([
        header_bytes[35],
        header_bytes[36],
        header_bytes[37],
        header_bytes[38],
        header_bytes[39],
        header_bytes[40],
        header_bytes[41],
        header_bytes[42],
    ]);
    let checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);

    Ok(Header {
        version,
        model_id,
        dimensions,
        entry_count,
        checksum,
    })
}

/// Validate header against expected values.
fn validate_header(
    header: &Header,
    expected_model_id: &[u8; 32],
    expected_dimensions: usize,
) -> Result<(), StoreError> {
    if header.model_id != *expected_model_id {
        return Err(StoreError::ModelMismatch);
    }

    if header.dimensions as usize != expected_dimensions {
        return Err(StoreError::DimensionMismatch {
            expected: expected_dimensions,
            got: header.dimensions as usize,
        });
    }

    Ok(())
}
