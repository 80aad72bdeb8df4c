use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StudioError, StudioResult};
use crate::raster::encode_rgb_png;

pub const DEFAULT_GAP: u32 = 20;
pub const DEFAULT_MAX_CANVAS_SIDE: u32 = 16384;
const GRID_PANELS: usize = 4;

/// Spacing between panels and the largest canvas side a strip may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripOptions {
    pub gap: u32,
    pub max_canvas_side: u32,
}

impl Default for StripOptions {
    fn default() -> Self {
        Self {
            gap: DEFAULT_GAP,
            max_canvas_side: DEFAULT_MAX_CANVAS_SIDE,
        }
    }
}

impl StripOptions {
    pub fn with_gap(self, gap: u32) -> Self {
        Self { gap, ..self }
    }

    /// `count` sides of `side` pixels with a gap between each pair.
    fn span(&self, side: u32, count: u32) -> Option<u32> {
        side.checked_mul(count)?
            .checked_add(self.gap.checked_mul(count.saturating_sub(1))?)
    }

    fn check_canvas(&self, width: Option<u32>, height: Option<u32>) -> StudioResult<(u32, u32)> {
        match (width, height) {
            (Some(width), Some(height))
                if width <= self.max_canvas_side && height <= self.max_canvas_side =>
            {
                Ok((width, height))
            }
            _ => Err(self.oversized()),
        }
    }

    fn oversized(&self) -> StudioError {
        StudioError::validation(format!(
            "composed image would exceed {}px per side (gap {})",
            self.max_canvas_side, self.gap
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StripLayout {
    #[default]
    Grid,
    Horizontal,
    Vertical,
}

impl StripLayout {
    pub const ALL: [StripLayout; 3] = [
        StripLayout::Grid,
        StripLayout::Horizontal,
        StripLayout::Vertical,
    ];

    pub fn parse(raw: &str) -> StudioResult<Self> {
        let lower = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|layout| layout.as_str() == lower)
            .ok_or_else(|| {
                StudioError::validation(format!(
                    "unknown layout '{}' (expected grid, horizontal or vertical)",
                    raw
                ))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StripLayout::Grid => "grid",
            StripLayout::Horizontal => "horizontal",
            StripLayout::Vertical => "vertical",
        }
    }

    pub fn file_name(&self) -> String {
        format!("comic-{}.png", self.as_str())
    }
}

/// Lays finished panels out on a white canvas. Every slot must be filled and
/// every panel must share the first panel's size.
pub fn compose<B: AsRef<[u8]>>(
    images: &[Option<B>],
    layout: StripLayout,
    options: StripOptions,
) -> StudioResult<Vec<u8>> {
    if images.is_empty() {
        return Err(StudioError::validation("no panels to compose"));
    }
    if let Some(index) = images.iter().position(Option::is_none) {
        return Err(StudioError::missing_panel(index));
    }
    if layout == StripLayout::Grid && images.len() != GRID_PANELS {
        return Err(StudioError::validation(format!(
            "grid layout needs exactly {} panels, got {}",
            GRID_PANELS,
            images.len()
        )));
    }

    let panels = images
        .iter()
        .enumerate()
        .filter_map(|(index, image)| image.as_ref().map(|bytes| (index, bytes)))
        .map(|(index, bytes)| decode_panel(index, bytes.as_ref()))
        .collect::<StudioResult<Vec<_>>>()?;
    let (width, height) = panels[0].dimensions();
    if let Some(index) = panels
        .iter()
        .position(|panel| panel.dimensions() != (width, height))
    {
        let (w, h) = panels[index].dimensions();
        return Err(StudioError::validation(format!(
            "panel {} is {}x{} but panel 1 is {}x{}",
            index + 1,
            w,
            h,
            width,
            height
        )));
    }

    let count = panels.len() as u32;
    let (canvas_w, canvas_h) = match layout {
        StripLayout::Grid => (options.span(width, 2), options.span(height, 2)),
        StripLayout::Horizontal => (options.span(width, count), Some(height)),
        StripLayout::Vertical => (Some(width), options.span(height, count)),
    };
    let (canvas_w, canvas_h) = options.check_canvas(canvas_w, canvas_h)?;
    let gap = options.gap;
    let mut canvas = white_canvas(canvas_w, canvas_h);
    for (idx, panel) in panels.iter().enumerate() {
        let idx = idx as i64;
        let (step_x, step_y) = (width as i64 + gap as i64, height as i64 + gap as i64);
        let (x, y) = match layout {
            StripLayout::Grid => ((idx % 2) * step_x, (idx / 2) * step_y),
            StripLayout::Horizontal => (idx * step_x, 0),
            StripLayout::Vertical => (0, idx * step_y),
        };
        imageops::overlay(&mut canvas, panel, x, y);
    }
    debug!(
        layout = layout.as_str(),
        width = canvas_w,
        height = canvas_h,
        "composed strip"
    );
    finish(canvas)
}

/// Stacks arbitrary images top to bottom, scaling each to the widest width.
pub fn merge_vertical<B: AsRef<[u8]>>(
    images: &[B],
    options: StripOptions,
) -> StudioResult<Vec<u8>> {
    if images.is_empty() {
        return Err(StudioError::validation("no images to merge"));
    }
    let decoded = images
        .iter()
        .enumerate()
        .map(|(index, bytes)| decode_panel(index, bytes.as_ref()))
        .collect::<StudioResult<Vec<_>>>()?;
    let max_width = decoded
        .iter()
        .map(|image| image.width())
        .max()
        .unwrap_or(1);

    let mut heights = Vec::with_capacity(decoded.len());
    for image in &decoded {
        let scaled = image.height() as f64 * max_width as f64 / image.width() as f64;
        if !scaled.is_finite() || scaled > options.max_canvas_side as f64 {
            return Err(options.oversized());
        }
        heights.push((scaled.round() as u32).max(1));
    }
    let total_height = heights
        .iter()
        .try_fold(0u32, |total, height| total.checked_add(*height))
        .and_then(|total| {
            total.checked_add(options.gap.checked_mul(heights.len() as u32 - 1)?)
        });
    let (max_width, total_height) = options.check_canvas(Some(max_width), total_height)?;

    let scaled: Vec<RgbaImage> = decoded
        .into_iter()
        .zip(&heights)
        .map(|(image, height)| {
            if image.width() == max_width {
                return image;
            }
            imageops::resize(&image, max_width, *height, FilterType::Lanczos3)
        })
        .collect();

    let mut canvas = white_canvas(max_width, total_height);
    let mut y = 0i64;
    for image in &scaled {
        imageops::overlay(&mut canvas, image, 0, y);
        y += image.height() as i64 + options.gap as i64;
    }
    debug!(count = scaled.len(), width = max_width, height = total_height, "merged images");
    finish(canvas)
}

fn decode_panel(index: usize, bytes: &[u8]) -> StudioResult<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgba8())
        .map_err(|err| StudioError::validation(format!("image {} could not be decoded: {}", index + 1, err)))
}

fn white_canvas(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
}

fn finish(canvas: RgbaImage) -> StudioResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    encode_rgb_png(&rgb).map_err(|err| StudioError::render(format!("{:#}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::solid_png;

    const COLORS: [[u8; 3]; 4] = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [10, 10, 10]];

    fn panels(width: u32, height: u32) -> Vec<Option<Vec<u8>>> {
        COLORS
            .iter()
            .map(|color| Some(solid_png(width, height, *color)))
            .collect()
    }

    fn decode(bytes: &[u8]) -> image::RgbImage {
        let image = image::load_from_memory(bytes).unwrap();
        assert_eq!(image.color(), image::ColorType::Rgb8);
        image.to_rgb8()
    }

    #[test]
    fn grid_places_panels_in_reading_order() {
        let strip = decode(
            &compose(&panels(100, 100), StripLayout::Grid, StripOptions::default()).unwrap(),
        );
        assert_eq!(strip.dimensions(), (220, 220));
        assert_eq!(strip.get_pixel(0, 0).0, COLORS[0]);
        assert_eq!(strip.get_pixel(120, 0).0, COLORS[1]);
        assert_eq!(strip.get_pixel(0, 120).0, COLORS[2]);
        assert_eq!(strip.get_pixel(120, 120).0, COLORS[3]);
        assert_eq!(strip.get_pixel(110, 50).0, [255, 255, 255]);
    }

    #[test]
    fn horizontal_strip_offsets_each_panel() {
        let strip = decode(
            &compose(&panels(100, 100), StripLayout::Horizontal, StripOptions::default()).unwrap(),
        );
        assert_eq!(strip.dimensions(), (460, 100));
        for (idx, color) in COLORS.iter().enumerate() {
            assert_eq!(strip.get_pixel(idx as u32 * 120, 50).0, *color);
        }
    }

    #[test]
    fn vertical_strip_stacks_panels() {
        let options = StripOptions::default().with_gap(10);
        let strip = decode(&compose(&panels(80, 50), StripLayout::Vertical, options).unwrap());
        assert_eq!(strip.dimensions(), (80, 230));
        assert_eq!(strip.get_pixel(40, 180).0, COLORS[3]);
        assert_eq!(strip.get_pixel(40, 55).0, [255, 255, 255]);
    }

    #[test]
    fn missing_panel_is_reported_by_index() {
        let mut images = panels(100, 100);
        images[2] = None;
        let err = compose(&images, StripLayout::Grid, StripOptions::default()).unwrap_err();
        assert!(matches!(err, StudioError::MissingPanel { index: 2 }));
    }

    #[test]
    fn grid_requires_four_panels() {
        let images = panels(50, 50)[..3].to_vec();
        assert!(matches!(
            compose(&images, StripLayout::Grid, StripOptions::default()),
            Err(StudioError::InputValidation(_))
        ));
        assert!(compose(&images, StripLayout::Horizontal, StripOptions::default()).is_ok());
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let mut images = panels(100, 100);
        images[1] = Some(solid_png(90, 100, [0, 0, 0]));
        let err = compose(&images, StripLayout::Vertical, StripOptions::default()).unwrap_err();
        assert!(err.to_string().contains("panel 2"));
    }

    #[test]
    fn merge_scales_to_widest_image() {
        let images = vec![solid_png(100, 50, [255, 0, 0]), solid_png(50, 50, [0, 0, 255])];
        let merged = decode(&merge_vertical(&images, StripOptions::default()).unwrap());
        assert_eq!(merged.dimensions(), (100, 170));
        assert_eq!(merged.get_pixel(50, 60).0, [255, 255, 255]);
        assert_eq!(merged.get_pixel(50, 120).0, [0, 0, 255]);
    }

    #[test]
    fn huge_gap_is_rejected_instead_of_overflowing() {
        let options = StripOptions::default().with_gap(u32::MAX);
        for layout in StripLayout::ALL {
            let err = compose(&panels(10, 10), layout, options).unwrap_err();
            assert!(matches!(err, StudioError::InputValidation(_)), "{:?}", layout);
        }
        let images = vec![solid_png(10, 10, [0, 0, 0]), solid_png(10, 10, [0, 0, 0])];
        assert!(matches!(
            merge_vertical(&images, options),
            Err(StudioError::InputValidation(_))
        ));
    }

    #[test]
    fn canvas_limit_caps_strip_size() {
        let options = StripOptions {
            gap: 20,
            max_canvas_side: 400,
        };
        let err = compose(&panels(100, 100), StripLayout::Horizontal, options).unwrap_err();
        assert!(err.to_string().contains("400px"));
        assert!(compose(&panels(100, 100), StripLayout::Grid, options).is_ok());

        let tall = vec![solid_png(200, 10, [0, 0, 0]), solid_png(1, 10, [0, 0, 0])];
        assert!(merge_vertical(&tall, options).is_err());
    }

    #[test]
    fn layout_names_parse() {
        assert_eq!(StripLayout::parse("Grid").unwrap(), StripLayout::Grid);
        assert!(StripLayout::parse("diagonal").is_err());
        assert_eq!(StripLayout::Vertical.file_name(), "comic-vertical.png");
    }
}
