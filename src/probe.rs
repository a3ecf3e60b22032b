//! Probe image decoding.
//!
//! Probes arrive either as raw encoded image bytes (an uploaded file) or as a
//! `data:` URL captured from a browser canvas.

use anyhow::{Context, Result};
use base64::Engine;
use image::DynamicImage;

const DATA_URL_PREFIX: &[u8] = b"data:";

/// Decode probe bytes into an RGB image.
pub fn decode_probe(bytes: &[u8]) -> Result<DynamicImage> {
    // raw image bytes are decoded untouched, only URL text is trimmed
    let image_bytes = if bytes.trim_ascii_start().starts_with(DATA_URL_PREFIX) {
        decode_data_url(bytes.trim_ascii())?
    } else {
        bytes.to_vec()
    };

    let img = image::load_from_memory(&image_bytes).context("decoding probe image")?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Payload of a base64 `data:` URL. The media type is not checked.
pub fn decode_data_url(url: &[u8]) -> Result<Vec<u8>> {
    let comma = url
        .iter()
        .position(|&b| b == b',')
        .context("data URL has no payload separator")?;
    let (header, payload) = (&url[..comma], &url[comma + 1..]);
    if !header.ends_with(b";base64") {
        anyhow::bail!("data URL is not base64 encoded");
    }

    let payload: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("invalid base64 in data URL")
}
