//! Persisted knowledge-base snapshots: chunk text plus embedding vectors,
//! tagged with the model identity that produced them.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embedder::EmbeddingClient;
use crate::ingestor::{Chunk, IngestedDocument};

/// One embedding vector tied to a chunk in the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Identifier of the chunk this vector represents.
    pub chunk_id: usize,
    /// Model embedding vector.
    pub vector: Vec<f32>,
}

/// In-memory knowledge base: chunks, vectors, and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Embedding model identity used to produce every vector.
    pub model_id: String,
    /// CRC32 of the source document the chunks came from.
    pub source_checksum: u32,
    /// Backing chunk text, ordered by id.
    pub chunks: Vec<Chunk>,
    /// One record per chunk, aligned with `chunks`.
    pub vectors: Vec<EmbeddingRecord>,
}

/// Errors surfaced while reading or writing a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// No snapshot exists at the given path.
    NotFound,
    /// The snapshot could not be read or written.
    Io(String),
    /// The snapshot decoded but violates its own invariants.
    Malformed(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "knowledge base snapshot not found"),
            Self::Io(detail) => write!(f, "snapshot I/O failure: {detail}"),
            Self::Malformed(detail) => write!(f, "snapshot is malformed: {detail}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> Self {
        if err.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl KnowledgeBase {
    /// Embeds every chunk of `doc` through `client` and assembles a snapshot.
    ///
    /// Batches sequentially; the offline builder binary parallelizes the same
    /// work with a worker pool and assembles through [`KnowledgeBase::from_parts`].
    pub fn build(doc: IngestedDocument, client: &EmbeddingClient) -> Result<Self> {
        let mut vectors = Vec::with_capacity(doc.chunks.len());
        for batch in doc.chunks.chunks(client.batch_size()) {
            let inputs: Vec<&str> = batch.iter().map(|chunk| chunk.text.as_str()).collect();
            let embedded = client
                .embed_batch(&inputs)
                .context("failed to embed chunk batch")?;
            for (chunk, vector) in batch.iter().zip(embedded) {
                vectors.push(EmbeddingRecord {
                    chunk_id: chunk.id,
                    vector,
                });
            }
        }
        Self::from_parts(
            client.model_id().to_string(),
            doc.source_checksum,
            doc.chunks,
            vectors,
        )
        .map_err(anyhow::Error::from)
    }

    /// Assembles and validates a snapshot from pre-computed parts.
    pub fn from_parts(
        model_id: String,
        source_checksum: u32,
        chunks: Vec<Chunk>,
        vectors: Vec<EmbeddingRecord>,
    ) -> Result<Self, SnapshotError> {
        let kb = Self {
            model_id,
            source_checksum,
            chunks,
            vectors,
        };
        kb.validate()?;
        Ok(kb)
    }

    /// Loads a snapshot from `path`.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let raw = fs::read_to_string(path)?;
        let kb: Self = serde_json::from_str(&raw)
            .map_err(|err| SnapshotError::Malformed(err.to_string()))?;
        kb.validate()?;
        Ok(kb)
    }

    /// Writes the snapshot to `path` atomically: the JSON lands in a sibling
    /// temp file which is renamed over the destination, so readers never
    /// observe a half-written snapshot.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SnapshotError::Io(format!("unusable snapshot path {path:?}")))?;
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, process::id()));

        let result = (|| -> Result<(), SnapshotError> {
            let file =
                File::create(&tmp_path).map_err(|err| SnapshotError::Io(err.to_string()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)
                .map_err(|err| SnapshotError::Io(err.to_string()))?;
            writer
                .flush()
                .map_err(|err| SnapshotError::Io(err.to_string()))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|err| SnapshotError::Io(err.to_string()))?;
            fs::rename(&tmp_path, path).map_err(|err| SnapshotError::Io(err.to_string()))?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    /// Number of chunks in the snapshot.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Vector dimensionality, if any vectors are present.
    pub fn dimensions(&self) -> Option<usize> {
        self.vectors.first().map(|record| record.vector.len())
    }

    /// Looks up a chunk by id.
    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.iter().find(|chunk| chunk.id == id)
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        if self.model_id.trim().is_empty() {
            return Err(SnapshotError::Malformed("empty model id".to_string()));
        }
        if self.vectors.len() != self.chunks.len() {
            return Err(SnapshotError::Malformed(format!(
                "{} vectors for {} chunks",
                self.vectors.len(),
                self.chunks.len()
            )));
        }
        let mut seen = vec![false; self.chunks.len()];
        for record in &self.vectors {
            let Some(position) = self
                .chunks
                .iter()
                .position(|chunk| chunk.id == record.chunk_id)
            else {
                return Err(SnapshotError::Malformed(format!(
                    "vector references unknown chunk {}",
                    record.chunk_id
                )));
            };
            if seen[position] {
                return Err(SnapshotError::Malformed(format!(
                    "chunk {} has more than one vector",
                    record.chunk_id
                )));
            }
            seen[position] = true;
        }
        if let Some(dims) = self.dimensions() {
            if dims == 0 {
                return Err(SnapshotError::Malformed("zero-length vectors".to_string()));
            }
            if let Some(record) = self.vectors.iter().find(|r| r.vector.len() != dims) {
                return Err(SnapshotError::Malformed(format!(
                    "chunk {} vector has {} dimensions, expected {}",
                    record.chunk_id,
                    record.vector.len(),
                    dims
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;

    fn sample_kb() -> KnowledgeBase {
        let chunks = vec![
            Chunk {
                id: 0,
                text: "Maintenance fluids follow body weight bands.".to_string(),
                source_offset: 0,
            },
            Chunk {
                id: 1,
                text: "A resuscitation bolus is 20 mL per kg.".to_string(),
                source_offset: 45,
            },
        ];
        let vectors = vec![
            EmbeddingRecord {
                chunk_id: 0,
                vector: vec![0.1, 0.2, 0.3],
            },
            EmbeddingRecord {
                chunk_id: 1,
                vector: vec![0.4, 0.5, 0.6],
            },
        ];
        KnowledgeBase::from_parts("test-embed-v1".to_string(), 99, chunks, vectors)
            .expect("valid kb")
    }

    fn scratch_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("wardbot-kb-test-{}-{}.json", process::id(), name))
    }

    #[test]
    fn save_then_load_round_trips() {
        let kb = sample_kb();
        let path = scratch_path("roundtrip");
        kb.save(&path).expect("save");

        let loaded = KnowledgeBase::load(&path).expect("load");
        assert_eq!(loaded.model_id, kb.model_id);
        assert_eq!(loaded.source_checksum, kb.source_checksum);
        assert_eq!(loaded.chunks, kb.chunks);
        for (a, b) in loaded.vectors.iter().zip(&kb.vectors) {
            assert_eq!(a.chunk_id, b.chunk_id);
            for (x, y) in a.vector.iter().zip(&b.vector) {
                assert!((x - y).abs() < 1e-6);
            }
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let kb = sample_kb();
        let path = scratch_path("tmpcheck");
        kb.save(&path).expect("save");

        let dir = path.parent().expect("parent dir");
        let leftovers: Vec<_> = fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .contains("wardbot-kb-test")
                    && entry.file_name().to_string_lossy().ends_with(".tmp")
            })
            .collect();
        assert!(leftovers.is_empty(), "temp files remained: {leftovers:?}");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let path = scratch_path("nonexistent");
        match KnowledgeBase::load(&path) {
            Err(SnapshotError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn vector_count_mismatch_is_malformed() {
        let mut kb = sample_kb();
        kb.vectors.pop();
        match kb.validate() {
            Err(SnapshotError::Malformed(detail)) => {
                assert!(detail.contains("vectors for"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn dangling_chunk_id_is_malformed() {
        let mut kb = sample_kb();
        kb.vectors[1].chunk_id = 42;
        match kb.validate() {
            Err(SnapshotError::Malformed(detail)) => {
                assert!(detail.contains("unknown chunk 42"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn ragged_dimensions_are_malformed() {
        let mut kb = sample_kb();
        kb.vectors[1].vector.push(0.7);
        assert!(matches!(kb.validate(), Err(SnapshotError::Malformed(_))));
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let path = scratch_path("garbage");
        fs::write(&path, b"{not json").expect("write");
        assert!(matches!(
            KnowledgeBase::load(&path),
            Err(SnapshotError::Malformed(_))
        ));
        fs::remove_file(&path).ok();
    }
}
