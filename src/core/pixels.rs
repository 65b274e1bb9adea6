use image::{ImageFormat, Rgba, RgbaImage};
use std::path::Path;

use crate::error::{PdfDiffError, Result};

/// Decoded raster page: `height` rows of `width` RGBA8 samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    image: RgbaImage,
}

impl PixelGrid {
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Read a raster file (format guessed from its contents) into RGBA8
    pub fn decode<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = image::ImageReader::open(path)?.with_guessed_format()?;
        let decoded = reader.decode().map_err(|source| PdfDiffError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            image: decoded.into_rgba8(),
        })
    }

    /// Write the grid as an RGBA PNG
    pub fn encode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| match e {
                image::ImageError::IoError(io) => PdfDiffError::Io(io),
                other => PdfDiffError::Image(other),
            })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut Rgba<u8> {
        self.image.get_pixel_mut(x, y)
    }
}
