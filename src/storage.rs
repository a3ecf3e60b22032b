use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("gallery at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("reading gallery at {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing gallery at {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identity → embedding pairs searched by the matcher.
///
/// Persisted as two index-aligned sequences. Identities are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    embeddings: Vec<Vec<f32>>,
    identities: Vec<String>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. An identity already present keeps its position but takes the new embedding.
    pub fn insert(&mut self, identity: String, embedding: Vec<f32>) {
        match self.identities.iter().position(|id| *id == identity) {
            Some(idx) => self.embeddings[idx] = embedding,
            None => {
                self.identities.push(identity);
                self.embeddings.push(embedding);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Embedding length shared by every entry, `None` when empty
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings.first().map(Vec::len)
    }

    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    pub fn get(&self, identity: &str) -> Option<&[f32]> {
        self.identities
            .iter()
            .position(|id| id == identity)
            .map(|idx| self.embeddings[idx].as_slice())
    }

    /// Entries in gallery order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.identities
            .iter()
            .zip(self.embeddings.iter())
            .map(|(id, e)| (id.as_str(), e.as_slice()))
    }

    fn check(&self) -> Result<(), String> {
        if self.embeddings.len() != self.identities.len() {
            return Err(format!(
                "{} embeddings for {} identities",
                self.embeddings.len(),
                self.identities.len()
            ));
        }
        if let Some(dim) = self.dimension() {
            if let Some(bad) = self.embeddings.iter().position(|e| e.len() != dim) {
                return Err(format!(
                    "embedding for {} has length {}, expected {}",
                    self.identities[bad],
                    self.embeddings[bad].len(),
                    dim
                ));
            }
        }
        Ok(())
    }
}

/// File-backed gallery. The whole blob is rewritten on every save.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted gallery. A missing file is an empty gallery.
    pub fn load(&self) -> Result<Gallery, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Gallery::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let gallery: Gallery = postcard::from_bytes(&data).map_err(|e| self.corrupt(e.to_string()))?;
        gallery.check().map_err(|reason| self.corrupt(reason))?;
        Ok(gallery)
    }

    /// Replace the persisted gallery. Written to a sibling temp file first, then renamed over.
    pub fn save(&self, gallery: &Gallery) -> Result<(), StoreError> {
        let data = postcard::to_allocvec(gallery).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
        })?;

        let tmp = self.tmp_path();
        self.write_file(&tmp, &data)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|source| {
                let _ = std::fs::remove_file(&tmp);
                StoreError::Write {
                    path: self.path.clone(),
                    source,
                }
            })
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(data)?;
        file.sync_all()
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "gallery".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
