use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array1, Array4, ArrayView1};
use ort::{session::Session, value::Value};

/// Detection result from YuNet
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points, eyes first (image-left eye at index 0)
}

/// Face embedding (SFace output)
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(vector: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(vector),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    /// Scale to unit L2 norm. A zero vector is returned unchanged.
    pub fn normalized(mut self) -> Self {
        let norm = self.vector.dot(&self.vector).sqrt();
        if norm > 0.0 {
            self.vector.mapv_inplace(|x| x / norm);
        }
        self
    }

    pub fn distance_to(&self, other: ArrayView1<f32>) -> f32 {
        euclidean_distance(self.vector.view(), other)
    }
}

/// Source of face embeddings for an image.
///
/// Returns one embedding per detected face; an empty vector means no face was found.
/// Ordering is up to the implementation and callers treat the first entry as "the" face.
pub trait EmbeddingProvider {
    fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        (**self).extract_embeddings(img)
    }
}

/// Euclidean distance over the common prefix of two vectors
pub fn euclidean_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Where the source image sits inside the square detector canvas
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> (Self, u32, u32) {
        let scale = target as f32 / width.max(height) as f32;
        let new_w = ((width as f32 * scale) as u32).clamp(1, target);
        let new_h = ((height as f32 * scale) as u32).clamp(1, target);
        let lb = Self {
            scale,
            offset_x: ((target - new_w) / 2) as f32,
            offset_y: ((target - new_h) / 2) as f32,
        };
        (lb, new_w, new_h)
    }

    fn unmap(&self, d: Detection) -> Detection {
        let mut landmarks = d.landmarks;
        for point in landmarks.chunks_exact_mut(2) {
            point[0] = (point[0] - self.offset_x) / self.scale;
            point[1] = (point[1] - self.offset_y) / self.scale;
        }
        Detection {
            bbox: [
                (d.bbox[0] - self.offset_x) / self.scale,
                (d.bbox[1] - self.offset_y) / self.scale,
                d.bbox[2] / self.scale,
                d.bbox[3] / self.scale,
            ],
            score: d.score,
            landmarks,
        }
    }
}

/// Planar BGR tensor [1, 3, H, W] with values in [0, 255], the layout both models expect
pub fn bgr_planar(img: &RgbImage) -> Array4<f32> {
    let (w, h) = img.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        img.get_pixel(x as u32, y as u32)[2 - c] as f32
    })
}

/// Detect faces, most confident first.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("empty image");
    }

    let target = yunet::INPUT_SIZE;
    let (letterbox, new_w, new_h) = Letterbox::fit(width, height, target);
    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let mut canvas = RgbImage::new(target, target);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let input = Value::from_array(bgr_planar(&canvas))?;
    let outputs = session.run(ort::inputs![input])?;

    let mut heads: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(outputs.len());
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let raw = yunet::decode(&heads, target as usize, score_threshold).context("decoding YuNet")?;
    let detections = raw.into_iter().map(|d| letterbox.unmap(d)).collect();

    Ok(nms(detections, nms_threshold))
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let w = (a[0] + a[2]).min(b[0] + b[2]) - a[0].max(b[0]);
    let h = (a[1] + a[3]).min(b[1] + b[3]) - a[1].max(b[1]);
    if w <= 0.0 || h <= 0.0 {
        return 0.0;
    }
    let inter = w * h;
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

// ArcFace 112x112 template eye positions
const TEMPLATE_EYES: [(f32, f32); 2] = [(38.2946, 51.6963), (73.5318, 51.5014)];

/// Similarity transform (rotation, uniform scale, translation) taking the detected
/// eyes onto the template eyes. Stored as the complex map `dst = s * src + t`.
#[derive(Debug, Clone, Copy)]
struct EyeTransform {
    s: (f32, f32),
    t: (f32, f32),
}

impl EyeTransform {
    fn new(left: (f32, f32), right: (f32, f32), size: u32) -> Result<Self> {
        let k = size as f32 / 112.0;
        let dst0 = (TEMPLATE_EYES[0].0 * k, TEMPLATE_EYES[0].1 * k);
        let dst1 = (TEMPLATE_EYES[1].0 * k, TEMPLATE_EYES[1].1 * k);

        let src = (right.0 - left.0, right.1 - left.1);
        let dst = (dst1.0 - dst0.0, dst1.1 - dst0.1);
        let norm = src.0 * src.0 + src.1 * src.1;
        if norm <= f32::EPSILON {
            anyhow::bail!("degenerate eye landmarks");
        }

        // s = dst / src
        let s = (
            (dst.0 * src.0 + dst.1 * src.1) / norm,
            (dst.1 * src.0 - dst.0 * src.1) / norm,
        );
        let rotated = mul(s, left);
        let t = (dst0.0 - rotated.0, dst0.1 - rotated.1);
        Ok(Self { s, t })
    }

    /// Map an output pixel back into the source image
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let d = (x - self.t.0, y - self.t.1);
        let norm = self.s.0 * self.s.0 + self.s.1 * self.s.1;
        (
            (d.0 * self.s.0 + d.1 * self.s.1) / norm,
            (d.1 * self.s.0 - d.0 * self.s.1) / norm,
        )
    }
}

fn mul(a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    (a.0 * b.0 - a.1 * b.1, a.0 * b.1 + a.1 * b.0)
}

/// Align and crop a face to `size` x `size` using its eye landmarks
pub fn align_face(img: &RgbImage, detection: &Detection, size: u32) -> Result<RgbImage> {
    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);
    let transform = EyeTransform::new(left, right, size)?;

    let mut output = RgbImage::new(size, size);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let (sx, sy) = transform.to_source(x as f32, y as f32);
        if let Some(p) = sample(img, sx, sy) {
            *pixel = p;
        }
    }
    Ok(output)
}

/// Bilinear lookup, `None` outside the image
fn sample(src: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Encode an aligned face to an L2-normalised embedding using SFace
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Embedding> {
    let size = 112;
    let input = if face.dimensions() == (size, size) {
        bgr_planar(face)
    } else {
        let resized = image::imageops::resize(face, size, size, FilterType::Triangle);
        bgr_planar(&resized)
    };

    let input = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        anyhow::bail!("unexpected SFace output shape {:?}", &shape[..]);
    }

    Ok(Embedding::from_vec(data[..dim].to_vec()).normalized())
}
