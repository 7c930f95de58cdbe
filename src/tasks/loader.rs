use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::RgbaImage;
use image::imageops::{self, FilterType};
use tracing::debug;

use crate::error::DecodeError;
use crate::events::PreparedImageCpu;

/// Turns an image path into RGBA8 pixels. Called synchronously from the
/// slideshow tick.
pub trait Decoder {
    fn decode(&mut self, path: &Path) -> Result<PreparedImageCpu, DecodeError>;
}

/// Decoder backed by the `image` crate. Applies EXIF orientation and
/// optionally shrinks images whose longest side exceeds `max_dimension`
/// (usually the GPU's texture size limit).
#[derive(Debug, Clone, Default)]
pub struct ImageDecoder {
    max_dimension: Option<u32>,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension.max(1));
        self
    }

    pub fn max_dimension(&self) -> Option<u32> {
        self.max_dimension
    }
}

impl Decoder for ImageDecoder {
    fn decode(&mut self, path: &Path) -> Result<PreparedImageCpu, DecodeError> {
        let mut rgba = decode_rgba8_apply_exif(path)?;
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty { width, height });
        }
        if let Some(limit) = self.max_dimension {
            if width.max(height) > limit {
                let (w, h) = fit_within(width, height, limit);
                debug!(path = %path.display(), from = ?(width, height), to = ?(w, h), "downsampling oversized image");
                rgba = imageops::resize(&rgba, w, h, FilterType::Triangle);
            }
        }
        let (width, height) = rgba.dimensions();
        debug!(path = %path.display(), width, height, "decoded");
        Ok(PreparedImageCpu {
            path: path.to_path_buf(),
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

fn fit_within(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let scale = limit as f64 / width.max(height) as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, limit);
    let h = ((height as f64 * scale).round() as u32).clamp(1, limit);
    (w, h)
}

fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage, DecodeError> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgba8();
    Ok(apply_orientation(img, read_orientation(path).unwrap_or(1)))
}

fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    debug!(path = %path.display(), orientation, "exif orientation");
    Some(orientation)
}
