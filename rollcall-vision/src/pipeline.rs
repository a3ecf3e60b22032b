use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use ort::session::Session;
use std::path::Path;

use crate::face::{self, Detection, Embedding, EmbeddingProvider};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Minimum YuNet confidence for a face to be kept
    pub score_threshold: f32,
    /// IoU above which overlapping detections are suppressed
    pub nms_threshold: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        detector_model: &Path,
        recognizer_model: &Path,
        options: PipelineOptions,
    ) -> Result<Self> {
        Ok(Self {
            detector: crate::model::load_session(detector_model)?,
            encoder: crate::model::load_session(recognizer_model)?,
            options,
        })
    }

    /// All faces in the image, most confident first
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(
            &mut self.detector,
            img,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")
    }

    pub fn embed(&mut self, img: &RgbImage, detection: &Detection) -> Result<Embedding> {
        let aligned = face::align_face(img, detection, 112).context("aligning face")?;
        face::encode_face(&mut self.encoder, &aligned).context("encoding face")
    }
}

impl EmbeddingProvider for Pipeline {
    fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        let detections = self.detect(img)?;
        log::debug!("detected {} face(s)", detections.len());
        if detections.is_empty() {
            return Ok(vec![]);
        }

        let rgb = img.to_rgb8();
        detections.iter().map(|d| self.embed(&rgb, d)).collect()
    }
}
