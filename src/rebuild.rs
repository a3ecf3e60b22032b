use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::{
    storage::{Gallery, GalleryStore},
    EmbeddingProvider,
};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Result of deriving a gallery from a photo directory
#[derive(Debug, Clone, Default)]
pub struct Rebuild {
    pub gallery: Gallery,
    /// File names that produced no embedding, in processing order
    pub failures: Vec<String>,
}

/// Identity a photo registers under: its file stem, if the extension is allowed.
pub fn identity_for(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let stem = path.file_stem()?.to_string_lossy();
    (!stem.is_empty()).then(|| stem.into_owned())
}

/// Regular files in `dir` with an allowed extension, sorted by file name.
pub fn photo_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("reading photo directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && identity_for(&path).is_some() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Embed every photo in `dir`. Photos that fail are reported, never fatal.
///
/// A later file mapping to an existing identity replaces its embedding. Every
/// entry shares the length of the first accepted embedding; others are failures.
pub fn build_gallery<P: EmbeddingProvider + ?Sized>(provider: &mut P, dir: &Path) -> Result<Rebuild> {
    let mut rebuild = Rebuild::default();

    for path in photo_files(dir)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(identity) = identity_for(&path) else {
            continue;
        };

        let embedding = first_embedding(provider, &path).and_then(|e| {
            match rebuild.gallery.dimension() {
                Some(dim) if dim != e.len() => {
                    anyhow::bail!("embedding has length {}, gallery uses {}", e.len(), dim)
                }
                _ => Ok(e),
            }
        });

        match embedding {
            Ok(embedding) => rebuild.gallery.insert(identity, embedding),
            Err(e) => {
                warn!("{}: {:#}", name, e);
                rebuild.failures.push(name);
            }
        }
    }

    info!(
        "Built gallery with {} identities ({} failed)",
        rebuild.gallery.len(),
        rebuild.failures.len()
    );
    Ok(rebuild)
}

fn first_embedding<P: EmbeddingProvider + ?Sized>(provider: &mut P, path: &Path) -> Result<Vec<f32>> {
    let img = image::open(path).context("decoding image")?;
    let embeddings = provider
        .extract_embeddings(&img)
        .context("extracting embedding")?;
    match embeddings.into_iter().next() {
        Some(e) if !e.is_empty() => Ok(e.to_vec()),
        Some(_) => anyhow::bail!("provider returned an empty embedding"),
        None => anyhow::bail!("no face detected"),
    }
}

/// Rebuild the gallery from `dir` and replace the persisted one, partial results included.
pub fn rebuild<P: EmbeddingProvider + ?Sized>(
    store: &GalleryStore,
    provider: &mut P,
    dir: &Path,
) -> Result<Rebuild> {
    let rebuild = build_gallery(provider, dir)?;
    store.save(&rebuild.gallery)?;
    Ok(rebuild)
}
