pub mod attendance;
pub mod config;
pub mod matcher;
pub mod probe;
pub mod rebuild;
pub mod recognizer;
pub mod storage;

// Re-export vision types for convenience
pub use rollcall_vision::{face, pipeline, Embedding, EmbeddingProvider, Pipeline};

pub use matcher::MatchResult;
pub use recognizer::Recognizer;
pub use storage::{Gallery, GalleryStore, StoreError};
