use crate::error::{RagError, Result};
use crate::utils::write_atomic;
use ndarray::{Array2, ArrayView1};
use std::path::Path;

const MAGIC: &[u8; 4] = b"DQIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub distance: f32,
}

/// Exact nearest-neighbour index over a fixed set of embeddings.
///
/// Row `i` is the embedding of chunk `i`; the index never changes after
/// [`VectorIndex::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    vectors: Array2<f32>,
}

impl VectorIndex {
    pub fn build(embeddings: &[Vec<f32>]) -> Result<Self> {
        let first = embeddings
            .first()
            .ok_or_else(|| RagError::EmptyInput("no embeddings to index".into()))?;
        let dim = first.len();
        if dim == 0 {
            return Err(RagError::EmptyInput("zero-dimension embeddings".into()));
        }

        let mut flat = Vec::with_capacity(embeddings.len() * dim);
        for embedding in embeddings {
            if embedding.len() != dim {
                return Err(RagError::DimensionMismatch {
                    expected: dim,
                    actual: embedding.len(),
                });
            }
            flat.extend_from_slice(embedding);
        }

        let vectors = Array2::from_shape_vec((embeddings.len(), dim), flat)
            .map_err(|e| RagError::EmptyInput(e.to_string()))?;
        Ok(VectorIndex { vectors })
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    /// Returns up to `k` positions ordered by ascending L2 distance.
    ///
    /// Equal distances keep the lower position first. `k` larger than the
    /// index is clamped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if query.len() != self.dim() {
            return Err(RagError::DimensionMismatch {
                expected: self.dim(),
                actual: query.len(),
            });
        }

        let query = ArrayView1::from(query);
        let mut hits: Vec<Hit> = self
            .vectors
            .rows()
            .into_iter()
            .enumerate()
            .map(|(position, row)| {
                let diff = &row - &query;
                Hit {
                    position,
                    distance: diff.dot(&diff).sqrt(),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k.min(self.len()));
        Ok(hits)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.dim() as u64).to_le_bytes());
        for &v in self.vectors.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let corrupt = |msg: &str| RagError::CacheCorrupt(msg.to_string());

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(corrupt("missing index header"));
        }
        let read_u64 = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf) as usize
        };
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        if u32::from_le_bytes(version) != FORMAT_VERSION {
            return Err(corrupt("unsupported index format version"));
        }

        let rows = read_u64(8);
        let dim = read_u64(16);
        let expected_len = rows
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN));
        if rows == 0 || dim == 0 || expected_len != Some(bytes.len()) {
            return Err(corrupt("index body does not match its header"));
        }

        let flat: Vec<f32> = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let vectors = Array2::from_shape_vec((rows, dim), flat)
            .map_err(|e| RagError::CacheCorrupt(e.to_string()))?;
        Ok(VectorIndex { vectors })
    }

    pub async fn persist(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()).await
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_bytes(&bytes)
    }
}
