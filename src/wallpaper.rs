//! Placeholder artwork served by `/wallpaper` and `/logo`.

use std::collections::HashMap;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageResult, Rgba, RgbaImage};

pub const LOGO_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100">
  <rect x="10" y="20" width="80" height="60" rx="5" ry="5" fill="#333"/>
  <rect x="15" y="25" width="70" height="50" rx="3" ry="3" fill="#4CAF50"/>
  <circle cx="50" cy="75" r="5" fill="#333"/>
  <line x1="30" y1="15" x2="40" y2="5" stroke="#333" stroke-width="2"/>
  <line x1="70" y1="15" x2="60" y2="5" stroke="#333" stroke-width="2"/>
</svg>"##;

const MAX_DIMENSION: u32 = 4096;
const TILE: u32 = 20;
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pattern {
    #[default]
    Solid,
    Gradient,
    Checkerboard,
}

impl Pattern {
    /// Unknown names fall back to a solid fill.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gradient" => Pattern::Gradient,
            "checkerboard" => Pattern::Checkerboard,
            _ => Pattern::Solid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub pattern: Pattern,
    pub opacity: f64,
    pub border_width: u32,
    pub background: Rgba<u8>,
    pub border_color: Rgba<u8>,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            pattern: Pattern::Solid,
            opacity: 1.0,
            border_width: 0,
            background: WHITE,
            border_color: Rgba([0, 0, 0, 255]),
        }
    }
}

impl ImageParams {
    /// Read parameters from a query string map.  Values that fail to parse
    /// keep their defaults; dimensions are clamped to `1..=4096`.
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u32| {
            query
                .get(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(default)
        };

        Self {
            width: number("width", defaults.width).clamp(1, MAX_DIMENSION),
            height: number("height", defaults.height).clamp(1, MAX_DIMENSION),
            pattern: query.get("pattern").map_or(defaults.pattern, |p| Pattern::parse(p)),
            opacity: query
                .get("opacity")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map_or(defaults.opacity, |v| v.clamp(0.0, 1.0)),
            border_width: number("border_width", defaults.border_width),
            background: query.get("bg_color").map_or(defaults.background, |c| parse_color(c)),
            border_color: query
                .get("border_color")
                .map_or(defaults.border_color, |c| parse_color(c)),
        }
    }
}

/// Parse `RRGGBB` (optionally `#`-prefixed).  Anything unparsable is white.
pub fn parse_color(hex: &str) -> Rgba<u8> {
    let hex = hex.trim().trim_start_matches('#');
    match u32::from_str_radix(hex, 16) {
        Ok(c) => Rgba([(c >> 16) as u8, (c >> 8) as u8, c as u8, 255]),
        Err(_) => WHITE,
    }
}

pub fn generate(params: &ImageParams) -> RgbaImage {
    let (width, height) = (params.width, params.height);
    let bg = params.background;

    let mut img = match params.pattern {
        Pattern::Solid => RgbaImage::from_pixel(width, height, bg),
        Pattern::Gradient => RgbaImage::from_fn(width, height, |_, y| {
            mix(bg, WHITE, f64::from(y) / f64::from(height))
        }),
        Pattern::Checkerboard => RgbaImage::from_fn(width, height, |x, y| {
            if (x / TILE + y / TILE) % 2 == 0 {
                bg
            } else {
                WHITE
            }
        }),
    };

    if params.opacity < 1.0 {
        for pixel in img.pixels_mut() {
            pixel[3] = (f64::from(pixel[3]) * params.opacity) as u8;
        }
    }

    // Concentric one-pixel rectangles, outermost first.
    let rings = params.border_width.min(width.div_ceil(2)).min(height.div_ceil(2));
    for i in 0..rings {
        let (right, bottom) = (width - 1 - i, height - 1 - i);
        for x in i..=right {
            img.put_pixel(x, i, params.border_color);
            img.put_pixel(x, bottom, params.border_color);
        }
        for y in i..=bottom {
            img.put_pixel(i, y, params.border_color);
            img.put_pixel(right, y, params.border_color);
        }
    }

    img
}

pub fn encode_png(img: RgbaImage) -> ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn mix(from: Rgba<u8>, to: Rgba<u8>, ratio: f64) -> Rgba<u8> {
    let channel = |i: usize| {
        (f64::from(from[i]) * (1.0 - ratio) + f64::from(to[i]) * ratio).round() as u8
    };
    Rgba([channel(0), channel(1), channel(2), channel(3)])
}
