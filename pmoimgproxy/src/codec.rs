//! Capacité de décodage/transformation des images
//!
//! Les opérations sont synchrones et coûteuses : le dispatcher les exécute
//! hors de l'exécuteur async via `spawn_blocking`.

use crate::error::{ProxyError, Result};
use crate::params::{CropRect, Dimensions, FitMode, ScaleTarget};
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use std::io::Cursor;

/// Image transformée et réencodée
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Contrat du codec
pub trait ImageCodec: Send + Sync {
    /// Lit les dimensions natives, un préfixe de l'image peut suffire
    fn probe(&self, bytes: &[u8]) -> Result<Dimensions>;

    fn crop(&self, bytes: &[u8], rect: CropRect) -> Result<Encoded>;

    fn resize(&self, bytes: &[u8], target: ScaleTarget) -> Result<Encoded>;
}

/// Codec basé sur la crate `image`
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRsCodec;

impl ImageRsCodec {
    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ProxyError::Transform(format!("cannot read image header: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<(DynamicImage, Option<ImageFormat>)> {
        let reader = Self::reader(bytes)?;
        let format = reader.format();
        let img = reader
            .decode()
            .map_err(|e| ProxyError::Transform(format!("cannot decode image: {}", e)))?;
        Ok((img, format))
    }
}

impl ImageCodec for ImageRsCodec {
    fn probe(&self, bytes: &[u8]) -> Result<Dimensions> {
        let (width, height) = Self::reader(bytes)?
            .into_dimensions()
            .map_err(|e| ProxyError::Transform(format!("cannot probe image: {}", e)))?;
        Ok(Dimensions::new(width, height))
    }

    fn crop(&self, bytes: &[u8], rect: CropRect) -> Result<Encoded> {
        let (img, format) = Self::decode(bytes)?;

        if rect.x >= img.width() || rect.y >= img.height() {
            return Err(ProxyError::Transform(format!(
                "crop origin ({}, {}) outside of {}x{} image",
                rect.x,
                rect.y,
                img.width(),
                img.height()
            )));
        }
        let width = rect.width.min(img.width() - rect.x).max(1);
        let height = rect.height.min(img.height() - rect.y).max(1);

        let cropped = img.crop_imm(rect.x, rect.y, width, height);
        encode(&cropped, format)
    }

    fn resize(&self, bytes: &[u8], target: ScaleTarget) -> Result<Encoded> {
        let (img, format) = Self::decode(bytes)?;

        let resized = match target.fit {
            FitMode::Exact => img.resize_exact(target.width, target.height, FilterType::Lanczos3),
            FitMode::Within => img.resize(target.width, target.height, FilterType::Lanczos3),
        };
        encode(&resized, format)
    }
}

/// Réencode dans le format d'origine, en PNG si ce n'est pas possible
fn encode(img: &DynamicImage, format: Option<ImageFormat>) -> Result<Encoded> {
    if let Some(format) = format.filter(|f| f.writing_enabled() && *f != ImageFormat::Png) {
        let attempt = match format {
            // Le JPEG n'a pas de canal alpha
            ImageFormat::Jpeg => write_as(&DynamicImage::ImageRgb8(img.to_rgb8()), format),
            _ => write_as(img, format),
        };
        match attempt {
            Ok(encoded) => return Ok(encoded),
            Err(e) => tracing::debug!("Cannot encode as {:?} ({}), falling back to PNG", format, e),
        }
    }

    write_as(img, ImageFormat::Png)
        .map_err(|e| ProxyError::Transform(format!("cannot encode image: {}", e)))
}

fn write_as(img: &DynamicImage, format: ImageFormat) -> image::ImageResult<Encoded> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)?;
    Ok(Encoded {
        bytes: out.into_inner(),
        mime_type: format.to_mime_type().to_string(),
    })
}
