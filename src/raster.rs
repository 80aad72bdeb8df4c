use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, ImageReader, RgbImage, RgbaImage};
use resvg::render;
use std::io::Cursor;
use std::path::Path;
use tiny_skia::{
    Color, FillRule, IntSize, Paint, Path as SkPath, Pixmap, Stroke, Transform,
};
use tracing::{debug, warn};
use usvg::{Options, Tree};

use crate::bubble::{FitOptions, Rect, TextLayout};
use crate::font::{ResolvedFont, resolve_bubble_font};
use crate::settings::Settings;

#[cfg(target_os = "macos")]
fn bubble_fallback_fonts() -> &'static [&'static str] {
    &["Apple SD Gothic Neo", "Noto Sans KR", "sans-serif"]
}

#[cfg(target_os = "windows")]
fn bubble_fallback_fonts() -> &'static [&'static str] {
    &["Malgun Gothic", "Noto Sans KR", "sans-serif"]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn bubble_fallback_fonts() -> &'static [&'static str] {
    &[
        "Noto Sans KR",
        "Noto Sans CJK KR",
        "NanumGothic",
        "sans-serif",
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub text: String,
    pub fill: String,
    pub stroke: String,
    pub narration_fill: String,
    pub narration_text: String,
    pub caption_text: String,
    pub caption_stroke: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            text: "#111111".to_string(),
            fill: "#ffffff".to_string(),
            stroke: "#111111".to_string(),
            narration_fill: "#fde047".to_string(),
            narration_text: "#111111".to_string(),
            caption_text: "#ffffff".to_string(),
            caption_stroke: "#000000".to_string(),
        }
    }
}

/// Fonts, colors and fitting rules shared by every burn-in.
#[derive(Clone)]
pub struct RenderContext {
    pub font: ResolvedFont,
    pub palette: Palette,
    pub fit: FitOptions,
    pub stroke_width: f32,
}

impl RenderContext {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let font_path = settings.font_path.as_deref().map(Path::new);
        let font = match resolve_bubble_font(
            font_path,
            settings.font_family.as_deref(),
            bubble_fallback_fonts(),
        ) {
            Ok(font) => font,
            Err(err) if font_path.is_none() && settings.font_family.is_none() => {
                warn!("no bubble font available, text widths are estimated: {}", err);
                ResolvedFont::detached()
            }
            Err(err) => return Err(err),
        };
        debug!(family = %font.family, "resolved bubble font");
        Ok(Self {
            font,
            palette: settings.palette.clone(),
            fit: FitOptions {
                min_font_size: settings.min_font_size,
                ..FitOptions::default()
            },
            stroke_width: settings.stroke_width,
        })
    }

    /// Context without system fonts, for headless use and tests.
    pub fn detached() -> Self {
        Self {
            font: ResolvedFont::detached(),
            palette: Palette::default(),
            fit: FitOptions::default(),
            stroke_width: 3.0,
        }
    }
}

pub(crate) struct TextPaint<'a> {
    pub(crate) fill: &'a str,
    pub(crate) stroke: Option<(&'a str, f32)>,
}

pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .with_context(|| "failed to detect image format")?
        .into_dimensions()
        .with_context(|| "failed to read image dimensions")
}

pub fn decode_pixmap(bytes: &[u8]) -> Result<Pixmap> {
    let image = image::load_from_memory(bytes)
        .with_context(|| "failed to decode image")?
        .to_rgba8();
    pixmap_from_rgba(image)
}

pub(crate) fn pixmap_from_rgba(image: RgbaImage) -> Result<Pixmap> {
    let (width, height) = image.dimensions();
    let size = IntSize::from_wh(width, height).ok_or_else(|| anyhow!("image has no pixels"))?;
    let mut data = image.into_raw();
    for px in data.chunks_exact_mut(4) {
        let alpha = px[3] as u16;
        for channel in &mut px[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }
    Pixmap::from_vec(data, size).ok_or_else(|| anyhow!("failed to build pixmap"))
}

/// Flattens onto white and encodes an RGB PNG.
pub fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>> {
    let rgb = flatten_to_rgb(pixmap)?;
    encode_rgb_png(&rgb)
}

pub(crate) fn encode_rgb_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .with_context(|| "failed to encode png")?;
    Ok(bytes)
}

fn flatten_to_rgb(pixmap: &Pixmap) -> Result<RgbImage> {
    let mut raw = Vec::with_capacity(pixmap.pixels().len() * 3);
    for px in pixmap.pixels() {
        let inv = 255 - px.alpha() as u16;
        // premultiplied over white: c + (1 - a) * 255
        raw.push((px.red() as u16 + inv).min(255) as u8);
        raw.push((px.green() as u16 + inv).min(255) as u8);
        raw.push((px.blue() as u16 + inv).min(255) as u8);
    }
    RgbImage::from_raw(pixmap.width(), pixmap.height(), raw)
        .ok_or_else(|| anyhow!("failed to build rgb image"))
}

pub(crate) fn parse_hex_color(value: &str) -> Result<Color> {
    let hex = value.trim().trim_start_matches('#');
    let channel = |idx: usize| -> Result<u8> {
        let part = hex
            .get(idx..idx + 2)
            .ok_or_else(|| anyhow!("invalid color '{}'", value))?;
        u8::from_str_radix(part, 16).with_context(|| format!("invalid color '{}'", value))
    };
    match hex.len() {
        6 => Ok(Color::from_rgba8(channel(0)?, channel(2)?, channel(4)?, 255)),
        8 => Ok(Color::from_rgba8(
            channel(0)?,
            channel(2)?,
            channel(4)?,
            channel(6)?,
        )),
        _ => Err(anyhow!("invalid color '{}'", value)),
    }
}

pub(crate) fn solid_paint(color: &str, opacity: f32) -> Result<Paint<'static>> {
    let mut color = parse_hex_color(color)?;
    color.apply_opacity(opacity);
    let mut paint = Paint::default();
    paint.set_color(color);
    paint.anti_alias = true;
    Ok(paint)
}

pub(crate) fn fill_rect(pixmap: &mut Pixmap, rect: Rect, color: &str, opacity: f32) -> Result<()> {
    let sk_rect = tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.width, rect.height)
        .ok_or_else(|| anyhow!("invalid fill rect {:?}", rect))?;
    let paint = solid_paint(color, opacity)?;
    pixmap.fill_rect(sk_rect, &paint, Transform::identity(), None);
    Ok(())
}

pub(crate) fn fill_path(pixmap: &mut Pixmap, path: &SkPath, color: &str) -> Result<()> {
    let paint = solid_paint(color, 1.0)?;
    pixmap.fill_path(path, &paint, FillRule::Winding, Transform::identity(), None);
    Ok(())
}

pub(crate) fn stroke_path(pixmap: &mut Pixmap, path: &SkPath, color: &str, width: f32) -> Result<()> {
    let paint = solid_paint(color, 1.0)?;
    let stroke = Stroke {
        width,
        line_join: tiny_skia::LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(path, &paint, &stroke, Transform::identity(), None);
    Ok(())
}

/// Draws a fitted text block centered in `area` through usvg text layout.
pub(crate) fn draw_text_block(
    pixmap: &mut Pixmap,
    ctx: &RenderContext,
    layout: &TextLayout,
    area: Rect,
    paint: TextPaint<'_>,
) -> Result<()> {
    if layout.lines.is_empty() {
        return Ok(());
    }
    let width = pixmap.width();
    let height = pixmap.height();
    let center_x = area.x + area.width * 0.5;
    let top = area.y + (area.height - layout.block_height()) * 0.5;
    let family = escape_xml(&ctx.font.family);
    let stroke_attrs = match paint.stroke {
        Some((color, stroke_width)) => format!(
            r#" stroke="{color}" stroke-width="{stroke_width}" stroke-linejoin="round" paint-order="stroke""#
        ),
        None => String::new(),
    };

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    for (idx, line) in layout.lines.iter().enumerate() {
        let baseline =
            top + layout.line_height * idx as f32 + layout.line_height * 0.5 + layout.font_size * 0.35;
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" font-family="{family}" fill="{fill}" text-anchor="middle"{stroke}>{text}</text>"#,
            x = center_x,
            y = baseline,
            size = layout.font_size,
            family = family,
            fill = paint.fill,
            stroke = stroke_attrs,
            text = escape_xml(line)
        ));
    }
    svg.push_str("</svg>");

    let options = Options {
        fontdb: ctx.font.database.clone(),
        ..Options::default()
    };
    let tree = Tree::from_str(&svg, &options).with_context(|| "failed to parse text overlay")?;
    render(&tree, Transform::identity(), &mut pixmap.as_mut());
    Ok(())
}

pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
