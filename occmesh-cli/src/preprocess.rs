//! Input image preparation
//!
//! Images go through background removal, are cropped to their foreground,
//! fitted into a square canvas at 80% size and composited over white.

use anyhow::{anyhow, Result};
use image::{imageops, imageops::FilterType, DynamicImage, Rgb, RgbImage, RgbaImage};

/// Side of the square output canvas in pixels
pub const CANVAS_SIZE: u32 = 200;
/// Share of the canvas the foreground is scaled to
pub const CONTENT_SCALE: f32 = 0.8;

/// Turns background pixels transparent
pub trait BackgroundFilter {
    fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage>;
}

/// Keeps the alpha channel the image already has
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAlpha;

impl BackgroundFilter for KeepAlpha {
    fn remove_background(&self, image: RgbaImage) -> Result<RgbaImage> {
        Ok(image)
    }
}

/// Makes every pixel close to a key color transparent
#[derive(Debug, Clone, Copy)]
pub struct ColorKeyFilter {
    pub key: [u8; 3],
    /// Largest per-channel difference still treated as background
    pub tolerance: u8,
}

impl ColorKeyFilter {
    pub fn new(key: [u8; 3], tolerance: u8) -> Self {
        Self { key, tolerance }
    }

    /// Key color from the top-left pixel, as a plain backdrop usually reaches the corners
    pub fn from_corner(image: &RgbaImage, tolerance: u8) -> Option<Self> {
        let p = image.get_pixel_checked(0, 0)?;
        Some(Self::new([p[0], p[1], p[2]], tolerance))
    }

    fn matches(&self, rgb: [u8; 3]) -> bool {
        rgb.iter()
            .zip(self.key.iter())
            .all(|(&c, &k)| c.abs_diff(k) <= self.tolerance)
    }
}

impl BackgroundFilter for ColorKeyFilter {
    fn remove_background(&self, mut image: RgbaImage) -> Result<RgbaImage> {
        for pixel in image.pixels_mut() {
            if self.matches([pixel[0], pixel[1], pixel[2]]) {
                pixel[3] = 0;
            }
        }
        Ok(image)
    }
}

/// Smallest `(x, y, width, height)` rectangle holding every non-transparent pixel
pub fn alpha_bounding_box(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
}

/// Size of the foreground once fitted into the canvas and scaled down
fn content_size(width: u32, height: u32) -> (u32, u32) {
    // Thumbnails only shrink
    let fit = (CANVAS_SIZE as f32 / width.max(height) as f32).min(1.0);
    let scale = fit * CONTENT_SCALE;
    let w = ((width as f32 * scale) as u32).max(1);
    let h = ((height as f32 * scale) as u32).max(1);
    (w, h)
}

/// Prepare an image for generation
pub fn preprocess(image: &DynamicImage, filter: &dyn BackgroundFilter) -> Result<RgbImage> {
    let rgba = filter.remove_background(image.to_rgba8())?;

    // A fully transparent image is used whole
    let cropped = match alpha_bounding_box(&rgba) {
        Some((x, y, w, h)) => imageops::crop_imm(&rgba, x, y, w, h).to_image(),
        None => rgba,
    };
    if cropped.width() == 0 || cropped.height() == 0 {
        return Err(anyhow!("image is empty"));
    }

    let (w, h) = content_size(cropped.width(), cropped.height());
    let content = imageops::resize(&cropped, w, h, FilterType::Lanczos3);

    let mut canvas = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgb([255, 255, 255]));
    let x0 = (CANVAS_SIZE - w) / 2;
    let y0 = (CANVAS_SIZE - h) / 2;
    for (x, y, pixel) in content.enumerate_pixels() {
        let alpha = pixel[3] as f32 / 255.0;
        let target = canvas.get_pixel_mut(x0 + x, y0 + y);
        for c in 0..3 {
            let blended = pixel[c] as f32 * alpha + target[c] as f32 * (1.0 - alpha);
            target[c] = blended.round() as u8;
        }
    }

    Ok(canvas)
}
