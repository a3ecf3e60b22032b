pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::{euclidean_distance, Detection, Embedding, EmbeddingProvider};
pub use pipeline::{Pipeline, PipelineOptions};
