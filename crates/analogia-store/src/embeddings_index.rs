use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;
use crate::ids::Id;

/// Entity embeddings kept alongside the index snapshot.
///
/// The first vector inserted fixes the dimension; `clear` releases it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingsIndex {
    vectors: AHashMap<Id, Vec<f32>>,
    dimension: Option<usize>,
}

impl EmbeddingsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any previous vector for `id`. Empty vectors and vectors
    /// whose length differs from the index dimension are rejected.
    pub fn insert(&mut self, id: Id, vector: Vec<f32>) -> Result<(), EmbeddingError> {
        if vector.is_empty() {
            return Err(EmbeddingError::Empty { id });
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(EmbeddingError::DimensionMismatch {
                    id,
                    expected,
                    found: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    pub fn find(&self, id: Id) -> Option<&[f32]> {
        self.vectors.get(&id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.vectors.contains_key(&id)
    }

    pub fn remove(&mut self, id: Id) -> Option<Vec<f32>> {
        self.vectors.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
        self.dimension = None;
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
