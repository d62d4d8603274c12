//! Glyph measurement and drawing.

use std::path::{Path, PathBuf};

use fontdue::{Font, FontSettings};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Fonts tried, in order, when no font path is configured.
pub const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/PingFang.ttc",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:/Windows/Fonts/msyh.ttc",
    "C:/Windows/Fonts/arial.ttf",
];

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to read font {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse font {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no usable font found; pass --font")]
    NotFound,
}

/// Something that can measure and paint a single line of text.
///
/// Implementations must clip to the canvas; callers may pass positions that
/// put part of the text outside it.
pub trait Typeface: Send + Sync {
    /// Advance width of `text` in pixels.
    fn measure(&self, text: &str) -> u32;

    /// Paint `text` with its top-left corner at `(x, y)`.
    fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>);
}

/// A TrueType/OpenType face rasterized with `fontdue` at a fixed pixel size.
pub struct FontFace {
    font: Font,
    px: f32,
    ascent: f32,
}

impl FontFace {
    pub fn from_bytes(bytes: Vec<u8>, px: f32, path: &Path) -> Result<Self, FontError> {
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|message| {
            FontError::Parse {
                path: path.to_path_buf(),
                message: message.to_string(),
            }
        })?;
        let ascent = font
            .horizontal_line_metrics(px)
            .map(|m| m.ascent)
            .unwrap_or(px * 0.8);
        Ok(Self { font, px, ascent })
    }

    pub fn load(path: &Path, px: f32) -> Result<Self, FontError> {
        let bytes = std::fs::read(path).map_err(|source| FontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(bytes, px, path)
    }

    /// Load `path` if given, otherwise the first candidate that exists.
    pub fn locate(path: Option<&Path>, px: f32) -> Result<Self, FontError> {
        if let Some(path) = path {
            return Self::load(path, px);
        }
        let found = FONT_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|p| p.is_file())
            .ok_or(FontError::NotFound)?;
        tracing::debug!(font = %found.display(), "using system font");
        Self::load(found, px)
    }
}

impl Typeface for FontFace {
    fn measure(&self, text: &str) -> u32 {
        let width: f32 = text
            .chars()
            .map(|c| self.font.metrics(c, self.px).advance_width)
            .sum();
        width.ceil() as u32
    }

    fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let baseline = y as f32 + self.ascent;
        let mut pen_x = x as f32;

        for c in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(c, self.px);
            let gx = (pen_x + metrics.xmin as f32).round() as i32;
            let gy = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i32;
            blend_mask(canvas, gx, gy, metrics.width, metrics.height, &bitmap, color);
            pen_x += metrics.advance_width;
        }
    }
}

/// Alpha-blend a coverage mask onto the canvas, clipping to its bounds.
pub fn blend_mask(
    canvas: &mut RgbImage,
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    mask: &[u8],
    color: Rgb<u8>,
) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);

    for row in 0..height {
        let py = y + row as i32;
        if py < 0 || py >= ch {
            continue;
        }
        for col in 0..width {
            let px = x + col as i32;
            if px < 0 || px >= cw {
                continue;
            }
            let coverage = mask[row * width + col];
            if coverage == 0 {
                continue;
            }
            let dst = canvas.get_pixel_mut(px as u32, py as u32);
            blend_pixel(dst, color, coverage);
        }
    }
}

fn blend_pixel(dst: &mut Rgb<u8>, src: Rgb<u8>, alpha: u8) {
    let alpha = u16::from(alpha);
    let inv_alpha = 255 - alpha;
    for channel in 0..3 {
        let d = u16::from(dst.0[channel]);
        let s = u16::from(src.0[channel]);
        dst.0[channel] = ((s * alpha + d * inv_alpha + 127) / 255) as u8;
    }
}
