use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use log::{debug, info};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::{
    matcher::{self, MatchResult},
    probe, rebuild,
    storage::{Gallery, GalleryStore},
    Embedding, EmbeddingProvider,
};

/// Gallery store, embedding provider and threshold behind the two operations the
/// web layer needs: rebuild after the photo set changes, identify per probe.
///
/// The gallery is cached in memory. Identify works on a shared snapshot, rebuild
/// computes the replacement without holding the cache lock and swaps it in after
/// the store has been written. The provider is locked per extraction, so identify
/// calls interleave with a running rebuild.
pub struct Recognizer<P> {
    store: GalleryStore,
    provider: Mutex<P>,
    threshold: f32,
    cache: RwLock<Option<Arc<Gallery>>>,
    rebuilding: Mutex<()>,
}

/// Provider access that takes the lock for one extraction at a time
struct Shared<'a, P>(&'a Mutex<P>);

impl<P: EmbeddingProvider> EmbeddingProvider for Shared<'_, P> {
    fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        self.0
            .lock()
            .map_err(|_| poisoned())?
            .extract_embeddings(img)
    }
}

impl<P: EmbeddingProvider> Recognizer<P> {
    pub fn new(store: GalleryStore, provider: P, threshold: f32) -> Self {
        Self {
            store,
            provider: Mutex::new(provider),
            threshold,
            cache: RwLock::new(None),
            rebuilding: Mutex::new(()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    /// Current gallery, read from the store on first use.
    pub fn gallery(&self) -> Result<Arc<Gallery>> {
        if let Some(g) = self.cache.read().map_err(|_| poisoned())?.as_ref() {
            return Ok(Arc::clone(g));
        }

        let mut cache = self.cache.write().map_err(|_| poisoned())?;
        if let Some(g) = cache.as_ref() {
            return Ok(Arc::clone(g));
        }
        let loaded = Arc::new(self.store.load()?);
        info!("Loaded {} gallery entries", loaded.len());
        *cache = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Drop the cached gallery so the next call re-reads the store.
    pub fn invalidate(&self) -> Result<()> {
        *self.cache.write().map_err(|_| poisoned())? = None;
        Ok(())
    }

    /// Rebuild from `photo_dir`, persist, and swap the cache. Returns the files that failed.
    pub fn rebuild_gallery(&self, photo_dir: &Path) -> Result<Vec<String>> {
        // rebuilds are serialised so their saves and swaps cannot interleave
        let _rebuilding = self.rebuilding.lock().map_err(|_| poisoned())?;

        let built = rebuild::rebuild(&self.store, &mut Shared(&self.provider), photo_dir)
            .context("rebuilding gallery")?;
        *self.cache.write().map_err(|_| poisoned())? = Some(Arc::new(built.gallery));

        Ok(built.failures)
    }

    /// Identify a probe given as raw image bytes or a data URL.
    pub fn identify_bytes(&self, bytes: &[u8]) -> Result<MatchResult> {
        let img = probe::decode_probe(bytes)?;
        self.identify_image(&img)
    }

    pub fn identify_image(&self, img: &DynamicImage) -> Result<MatchResult> {
        let gallery = self.gallery()?;
        if gallery.is_empty() {
            return Ok(MatchResult::NoGalleryData);
        }

        let embeddings = Shared(&self.provider)
            .extract_embeddings(img)
            .context("extracting probe embedding")?;

        if let (Some(probe), Some(dim)) = (embeddings.first(), gallery.dimension()) {
            if probe.len() != dim {
                anyhow::bail!(
                    "probe embedding has length {}, gallery uses {}",
                    probe.len(),
                    dim
                );
            }
        }

        let result = matcher::identify(&gallery, &embeddings, self.threshold);
        debug!("identify: {:?} (threshold {:.3})", result, self.threshold);
        Ok(result)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("recognizer lock poisoned")
}
