//! YuNet detector post-processing
//!
//! The 2023mar model emits twelve heads, four per stride (8, 16, 32), in this order:
//! cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32.
//! Every head is laid out as [1, H*W, C] over a square grid of `input_size / stride` cells.
//!
//! Decoding is anchor-free:
//! score = sqrt(cls * obj)
//! cx = (col + dx) * stride, cy = (row + dy) * stride
//! w = exp(dw) * stride,     h = exp(dh) * stride
//! landmark = (col + lx, row + ly) * stride

use anyhow::Result;

use crate::face::Detection;

/// Side of the square canvas the detector is fed with.
pub const INPUT_SIZE: u32 = 640;

pub const STRIDES: [usize; 3] = [8, 16, 32];

const HEADS: usize = 4 * STRIDES.len();

/// Decode raw YuNet outputs into detections in canvas pixel coordinates.
///
/// `outputs` holds `(shape, data)` per head, in model output order.
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<Detection>> {
    if outputs.len() != HEADS {
        anyhow::bail!(
            "YuNet produced {} outputs, expected {}",
            outputs.len(),
            HEADS
        );
    }

    let mut detections = Vec::new();

    for (level, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;

        let cls = head(outputs, level, cells, 1)?;
        let obj = head(outputs, level + 3, cells, 1)?;
        let bbox = head(outputs, level + 6, cells, 4)?;
        let kps = head(outputs, level + 9, cells, 10)?;

        let s = stride as f32;
        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }

            let row = (idx / cols) as f32;
            let col = (idx % cols) as f32;

            let b = &bbox[idx * 4..idx * 4 + 4];
            let cx = (col + b[0]) * s;
            let cy = (row + b[1]) * s;
            let w = b[2].exp() * s;
            let h = b[3].exp() * s;

            let mut landmarks = [0.0f32; 10];
            for (k, point) in kps[idx * 10..idx * 10 + 10].chunks_exact(2).enumerate() {
                landmarks[k * 2] = (col + point[0]) * s;
                landmarks[k * 2 + 1] = (row + point[1]) * s;
            }

            detections.push(Detection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}

fn head<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    index: usize,
    cells: usize,
    channels: usize,
) -> Result<&'a [f32]> {
    let (shape, data) = &outputs[index];
    if data.len() != cells * channels {
        anyhow::bail!(
            "YuNet output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            cells,
            channels
        );
    }
    Ok(data)
}
