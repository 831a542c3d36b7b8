//! Binary storage for vector embeddings.
//!
//! File format (one file per index, e.g. found_vectors.bin):
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u8
//! - id: [u8; id_len] (UTF-8 item id)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::eid::Eid;
use crate::matching::index::VectorIndex;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was embedded with a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// SHA256 of the embedding model name, stored in the header so that a
/// model swap is detected as an explicit error instead of silently mixing
/// incompatible vector spaces.
pub fn model_id_for(model_name: &str) -> [u8; 32] {
    let digest = Sha256::digest(model_name.as_bytes());
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest);
    id
}

/// Storage manager for one vector index file.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index from storage.
    ///
    /// Fails when the file belongs to a different model or dimensionality;
    /// the caller must re-embed rather than coerce.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;
        self.validate_header(&header, expected_model_id, expected_dimensions)?;

        let mut index =
            VectorIndex::with_capacity(header.dimensions as usize, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, embedding) = self.read_entry(&mut reader, header.dimensions as usize)?;
            // Skip entries that fail to insert (e.g., zero norm)
            let _ = index.insert(id, embedding);
        }

        Ok(index)
    }

    /// Save the vector index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, index, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the storage file if it exists.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: index.dimensions() as u16,
            entry_count: index.len() as u64,
        };
        self.write_header(&mut writer, &header)?;

        for (id, embedding) in index.iter() {
            self.write_entry(&mut writer, id, embedding)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];
        if version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
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
        let stored_checksum = u32::from_le_bytes([
            header_bytes[43],
            header_bytes[44],
            header_bytes[45],
            header_bytes[46],
        ]);

        // Checksum covers the header without the checksum field itself
        let computed_checksum = crc32fast::hash(&header_bytes[0..43]);
        if stored_checksum != computed_checksum {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
        })
    }

    fn validate_header(
        &self,
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        header: &Header,
    ) -> Result<(), VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_entry(
        &self,
        reader: &mut BufReader<File>,
        dimensions: usize,
    ) -> Result<(Eid, Vec<f32>), VectorStorageError> {
        let mut len_byte = [0u8; 1];
        reader.read_exact(&mut len_byte)?;

        let mut id_bytes = vec![0u8; len_byte[0] as usize];
        reader.read_exact(&mut id_bytes)?;
        let id = String::from_utf8(id_bytes)
            .map_err(|e| VectorStorageError::InvalidFormat(format!("non-UTF8 id: {e}")))?;

        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            reader.read_exact(&mut float_bytes)?;
            embedding.push(f32::from_le_bytes(float_bytes));
        }

        Ok((Eid::from(id), embedding))
    }

    fn write_entry(
        &self,
        writer: &mut BufWriter<File>,
        id: &Eid,
        embedding: &[f32],
    ) -> Result<(), VectorStorageError> {
        let id_bytes = id.as_str().as_bytes();
        if id_bytes.len() > u8::MAX as usize {
            return Err(VectorStorageError::InvalidFormat(format!(
                "id too long: {} bytes",
                id_bytes.len()
            )));
        }

        writer.write_all(&[id_bytes.len() as u8])?;
        writer.write_all(id_bytes)?;

        for &value in embedding {
            writer.write_all(&value.to_le_bytes())?;
        }

        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_model_id() -> [u8; 32] {
        model_id_for("test-embedding-model")
    }

    #[test]
    fn test_save_and_load_empty() {
        let dir = tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        let model_id = test_model_id();

        let index = VectorIndex::new(1536);
        storage.save(&index, &model_id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id, 1536).unwrap();
        assert_eq!(loaded.len(), 0);
        assert_eq!(loaded.dimensions(), 1536);
    }

    #[test]
    fn test_save_and_load_with_entries() {
        let dir = tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(Eid::from("alpha"), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert(Eid::from("beta"), vec![0.0, 1.0, 0.0]).unwrap();
        index.insert(Eid::from("gamma"), vec![0.0, 0.0, 1.0]).unwrap();

        storage.save(&index, &model_id).unwrap();

        let loaded = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get(&Eid::from("alpha")).unwrap(), &vec![1.0, 0.0, 0.0]);
        assert_eq!(loaded.get(&Eid::from("beta")).unwrap(), &vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));

        let index = VectorIndex::new(3);
        storage.save(&index, &test_model_id()).unwrap();

        let wrong = model_id_for("some-other-model");
        let result = storage.load(&wrong, 3);
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));
        let model_id = test_model_id();

        let index = VectorIndex::new(3);
        storage.save(&index, &model_id).unwrap();

        let result = storage.load(&model_id, 1536);
        assert!(matches!(
            result,
            Err(VectorStorageError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        let index = VectorIndex::new(3);
        let result = storage.save(&index, &test_model_id());

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join("vectors.bin"));

        let index = VectorIndex::new(3);
        storage.save(&index, &test_model_id()).unwrap();
        assert!(storage.exists());

        storage.delete().unwrap();
        assert!(!storage.exists());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let storage = VectorStorage::new(path.clone());
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(Eid::from("alpha"), vec![1.0, 0.0, 0.0]).unwrap();
        storage.save(&index, &model_id).unwrap();

        // Flip a byte inside the header
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&model_id, 3);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
    }

    #[test]
    fn test_model_id_is_stable() {
        assert_eq!(model_id_for("m"), model_id_for("m"));
        assert_ne!(model_id_for("m"), model_id_for("n"));
    }
}
