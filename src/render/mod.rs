//! Burning active subtitle lines into video frames.
//!
//! [`FrameRenderer`] is stateless: every call is a function of the frame, the
//! track and the frame's timestamp, so one renderer can be shared freely.

pub mod font;

use std::sync::Arc;

use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::event::SubtitleEvent;
use crate::track::Track;
use crate::wrap::wrap;

pub use font::{FontError, FontFace, Typeface};

/// Offsets of the outline pass around each line.
const OUTLINE_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// A decoded frame and its playback time in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub image: RgbImage,
    pub timestamp: f64,
}

impl RenderFrame {
    pub fn new(image: RgbImage, timestamp: f64) -> Self {
        Self { image, timestamp }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RenderError {
    #[error("frame is {got:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },

    #[error("frame {width}x{height} leaves no room inside the margins")]
    FrameTooSmall { width: u32, height: u32 },
}

/// Placement and colors for burned-in text.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStyle {
    pub width: u32,
    pub height: u32,
    pub margin_x: u32,
    pub margin_y: u32,
    pub line_height: u32,
    pub fill: Rgb<u8>,
    pub outline: Rgb<u8>,
}

impl RenderStyle {
    /// Default style for a `width`x`height` video.
    ///
    /// 5% horizontal margins, 30px vertical margin, line height of font size
    /// plus 8px.
    pub fn for_frame(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            margin_x: width / 20,
            margin_y: 30,
            line_height: font_size_for(height).round() as u32 + 8,
            fill: Rgb([255, 255, 255]),
            outline: Rgb([0, 0, 0]),
        }
    }

    pub fn usable_width(&self) -> u32 {
        self.width.saturating_sub(2 * self.margin_x)
    }
}

/// Pixel size of subtitle text for a video of the given height.
pub fn font_size_for(height: u32) -> f32 {
    (height as f32 * 0.025).floor().max(14.0)
}

/// A wrapped line and its top-left position.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
}

pub struct FrameRenderer {
    typeface: Arc<dyn Typeface>,
    style: RenderStyle,
}

impl FrameRenderer {
    pub fn new(typeface: Arc<dyn Typeface>, style: RenderStyle) -> Self {
        Self { typeface, style }
    }

    /// Composite the events active at `frame.timestamp` onto the frame.
    ///
    /// Returns the number of lines drawn. On error the frame is untouched.
    pub fn render(&self, frame: &mut RenderFrame, track: &Track) -> Result<usize, RenderError> {
        let active = track.active_at(frame.timestamp);
        self.render_events(&mut frame.image, &active)
    }

    /// Composite the given events, stacked in order, onto `image`.
    pub fn render_events(
        &self,
        image: &mut RgbImage,
        events: &[&SubtitleEvent],
    ) -> Result<usize, RenderError> {
        let lines = self.layout(image.dimensions(), events)?;

        for line in &lines {
            for (dx, dy) in OUTLINE_OFFSETS {
                self.typeface
                    .draw(image, line.x + dx, line.y + dy, &line.text, self.style.outline);
            }
            self.typeface
                .draw(image, line.x, line.y, &line.text, self.style.fill);
        }

        Ok(lines.len())
    }

    /// Wrap and position every line without touching any pixels.
    pub fn layout(
        &self,
        dimensions: (u32, u32),
        events: &[&SubtitleEvent],
    ) -> Result<Vec<PlacedLine>, RenderError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let style = &self.style;
        let expected = (style.width, style.height);
        if dimensions != expected {
            return Err(RenderError::DimensionMismatch {
                expected,
                got: dimensions,
            });
        }

        let usable = style.usable_width();
        if usable == 0 || style.height <= 2 * style.margin_y {
            return Err(RenderError::FrameTooSmall {
                width: style.width,
                height: style.height,
            });
        }

        let measure = |text: &str| self.typeface.measure(text);
        let texts: Vec<String> = events
            .iter()
            .flat_map(|event| wrap(event.text(), usable, measure))
            .collect();

        let (width, height) = (style.width as i32, style.height as i32);
        let (margin_x, margin_y) = (style.margin_x as i32, style.margin_y as i32);
        let line_height = style.line_height as i32;

        let block_height = texts.len() as i32 * line_height;
        let top = (height - margin_y - block_height).max(margin_y);

        let placed = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let text_width = self.typeface.measure(&text) as i32;
                let mut x = (width - text_width) / 2;
                if x < margin_x {
                    x = margin_x;
                } else if x + text_width > width - margin_x {
                    x = width - margin_x - text_width;
                }
                PlacedLine {
                    text,
                    x,
                    y: top + i as i32 * line_height,
                }
            })
            .collect();

        Ok(placed)
    }
}
