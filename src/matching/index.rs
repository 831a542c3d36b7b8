//! In-memory vector index with cosine similarity search.
//!
//! Holds one embedding per item id at a fixed dimensionality. Two instances
//! exist at runtime: one over found-item combined embeddings (forward
//! search) and one over lost-item embeddings (reverse matching).

use std::collections::HashMap;

use crate::eid::Eid;

pub struct VectorIndex {
    entries: HashMap<Eid, Vec<f32>>,
    /// Expected embedding dimensions
    dimensions: usize,
}

/// Search result from the vector index.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: Eid,
    /// Cosine similarity score (0.0 to 1.0)
    pub similarity: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or update an entry.
    ///
    /// Rejects wrong-dimension and zero-norm embeddings; the latter cannot
    /// participate in cosine similarity.
    pub fn insert(&mut self, id: Eid, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        if l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(id, embedding);
        Ok(())
    }

    pub fn get(&self, id: &Eid) -> Option<&Vec<f32>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Eid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Eid, &Vec<f32>)> {
        self.entries.iter()
    }

    /// Search for similar vectors using cosine similarity.
    ///
    /// `candidate_ids`, when supplied, restricts the search to that subset.
    /// Results are sorted by similarity descending; equal scores break by
    /// ascending id so the ordering is deterministic.
    pub fn search(
        &self,
        query: &[f32],
        candidate_ids: Option<&[Eid]>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .filter(|(id, _)| candidate_ids.map(|ids| ids.contains(id)).unwrap_or(true))
            .filter_map(|(id, embedding)| {
                let similarity = cosine_similarity(query, embedding, query_norm);
                (similarity >= threshold).then(|| SearchResult {
                    id: id.clone(),
                    similarity,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);

        Ok(results)
    }

    /// Bulk load entries, used when loading from storage.
    pub fn bulk_load(&mut self, entries: Vec<(Eid, Vec<f32>)>) -> Result<(), IndexError> {
        for (id, embedding) in entries {
            self.insert(id, embedding)?;
        }
        Ok(())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}
