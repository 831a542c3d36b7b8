//! Matching engine: embeddings in, ranked candidates out.
//!
//! # Architecture
//!
//! - `combine`: weighted merge of visual and textual embeddings
//! - `index`: in-memory vector index with cosine similarity search
//! - `retriever`: cascading-threshold retrieval + query vagueness floor
//! - `lexical`: token-overlap fallback when vector search yields nothing
//! - `geo`: haversine distance filtering and final ranking
//! - `reverse`: matching new found items against standing lost-item alerts
//! - `claim`: the claim transaction
//! - `storage`: binary file persistence for the vector indexes
//! - `embeddings`: client for the external text-embedding model

pub mod combine;
pub mod embeddings;
mod geo;
mod index;
mod lexical;
mod retriever;
mod storage;

pub mod claim;
pub mod reverse;

pub use combine::{combine, CombineError};
pub use embeddings::{EmbeddingError, RemoteEmbedder, TextEmbedder};
pub use geo::{filter_and_rank, haversine_miles, GeoCandidate, GeoQuery, RankedResult};
pub use index::{IndexError, SearchResult, VectorIndex};
pub use lexical::fallback_matches;
pub use retriever::{validate_query, QueryTooVague, Retriever};
pub use storage::{model_id_for, VectorStorage, VectorStorageError};

/// Similarity assigned to lexical-fallback matches, where no true cosine
/// similarity was computed.
pub const FALLBACK_SCORE: f32 = 0.5;
