use anyhow::{Result, anyhow};
use std::f32::consts::TAU;
use tiny_skia::{Path, PathBuilder, Pixmap};

use crate::raster::{
    RenderContext, TextPaint, draw_text_block, fill_path, fill_rect, stroke_path,
};
use crate::script::PanelScript;

use super::{
    BubbleConfig, BubbleStyle, Point, Rect, TailGeometry, TextLayout, fit_text, shape_rect,
    tail_geometry, text_area,
};

const THOUGHT_PUFFS: usize = 10;
const SHOUT_SPIKES: usize = 16;

/// Text a bubble of `style` shows for `panel`, `None` for a silent panel.
pub fn bubble_text(style: BubbleStyle, panel: &PanelScript) -> Option<String> {
    if style.prefixes_speaker() {
        panel.attributed_text()
    } else {
        panel.spoken_text().map(str::to_string)
    }
}

/// Fits `text` into the interior of the bubble without drawing anything.
pub fn layout_bubble(
    bubble: &BubbleConfig,
    text: Option<&str>,
    image_width: u32,
    image_height: u32,
    ctx: &RenderContext,
) -> TextLayout {
    let Some(text) = text.filter(|value| !value.trim().is_empty()) else {
        return TextLayout::empty(bubble.max_font_size, &ctx.fit);
    };
    let shape = shape_rect(bubble, image_width as f32, image_height as f32);
    let area = text_area(bubble.style, shape);
    fit_text(
        text,
        area.width,
        area.height,
        bubble.max_font_size,
        ctx.font.metrics.as_ref(),
        &ctx.fit,
    )
}

/// Draws the bubble shape, then the fitted text, onto `pixmap`.
pub fn render_bubble(
    pixmap: &mut Pixmap,
    bubble: &BubbleConfig,
    text: Option<&str>,
    ctx: &RenderContext,
) -> Result<TextLayout> {
    let bounds_w = pixmap.width() as f32;
    let bounds_h = pixmap.height() as f32;
    let shape = shape_rect(bubble, bounds_w, bounds_h);
    let palette = &ctx.palette;

    match bubble.style {
        BubbleStyle::Speech => {
            let tail = tail_geometry(shape, bubble.tail, bounds_w, bounds_h);
            let mut pb = PathBuilder::new();
            pb.push_oval(sk_rect(shape)?);
            push_triangle(&mut pb, &tail);
            let path = finish(pb)?;
            stroke_path(pixmap, &path, &palette.stroke, ctx.stroke_width)?;
            fill_path(pixmap, &path, &palette.fill)?;
        }
        BubbleStyle::Thought => {
            let paths = thought_paths(shape, bubble, bounds_w, bounds_h)?;
            for path in &paths {
                stroke_path(pixmap, path, &palette.stroke, ctx.stroke_width)?;
            }
            for path in &paths {
                fill_path(pixmap, path, &palette.fill)?;
            }
        }
        BubbleStyle::Shout => {
            let tail = tail_geometry(shape, bubble.tail, bounds_w, bounds_h);
            let mut pb = PathBuilder::new();
            push_star(&mut pb, shape);
            push_triangle(&mut pb, &tail);
            let path = finish(pb)?;
            stroke_path(pixmap, &path, &palette.stroke, ctx.stroke_width)?;
            fill_path(pixmap, &path, &palette.fill)?;
        }
        BubbleStyle::Narration => {
            fill_rect(pixmap, shape, &palette.narration_fill, 1.0)?;
        }
        BubbleStyle::Caption => {}
    }

    let layout = layout_bubble(bubble, text, pixmap.width(), pixmap.height(), ctx);
    let area = text_area(bubble.style, shape);
    let paint = match bubble.style {
        BubbleStyle::Narration => TextPaint {
            fill: &palette.narration_text,
            stroke: None,
        },
        BubbleStyle::Caption => TextPaint {
            fill: &palette.caption_text,
            stroke: Some((&palette.caption_stroke, ctx.stroke_width + 1.0)),
        },
        _ => TextPaint {
            fill: &palette.text,
            stroke: None,
        },
    };
    draw_text_block(pixmap, ctx, &layout, area, paint)?;
    Ok(layout)
}

fn sk_rect(rect: Rect) -> Result<tiny_skia::Rect> {
    tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.width, rect.height)
        .ok_or_else(|| anyhow!("invalid bubble rect {:?}", rect))
}

fn finish(pb: PathBuilder) -> Result<Path> {
    pb.finish().ok_or_else(|| anyhow!("bubble outline is empty"))
}

fn push_triangle(pb: &mut PathBuilder, tail: &TailGeometry) {
    pb.move_to(tail.base_a.x, tail.base_a.y);
    pb.line_to(tail.tip.x, tail.tip.y);
    pb.line_to(tail.base_b.x, tail.base_b.y);
    pb.close();
}

fn push_star(pb: &mut PathBuilder, shape: Rect) {
    let center = shape.center();
    let rx = shape.width * 0.5;
    let ry = shape.height * 0.5;
    let points = SHOUT_SPIKES * 2;
    for idx in 0..points {
        let angle = TAU * idx as f32 / points as f32 - TAU / 4.0;
        let scale = if idx % 2 == 0 { 1.0 } else { 0.72 };
        let x = center.x + rx * scale * angle.cos();
        let y = center.y + ry * scale * angle.sin();
        if idx == 0 {
            pb.move_to(x, y);
        } else {
            pb.line_to(x, y);
        }
    }
    pb.close();
}

/// Core ellipse, a ring of puffs on its rim, and three shrinking tail circles.
fn thought_paths(
    shape: Rect,
    bubble: &BubbleConfig,
    bounds_w: f32,
    bounds_h: f32,
) -> Result<Vec<Path>> {
    let center = shape.center();
    let rx = shape.width * 0.5;
    let ry = shape.height * 0.5;
    let puff = rx.min(ry) * 0.32;
    let core = shape.scaled(0.86);

    let mut paths = Vec::with_capacity(THOUGHT_PUFFS + 4);
    let mut pb = PathBuilder::new();
    pb.push_oval(sk_rect(core)?);
    paths.push(finish(pb)?);

    for idx in 0..THOUGHT_PUFFS {
        let angle = TAU * idx as f32 / THOUGHT_PUFFS as f32;
        let x = center.x + (rx - puff) * angle.cos();
        let y = center.y + (ry - puff) * angle.sin();
        if let Some(path) = PathBuilder::from_circle(x, y, puff) {
            paths.push(path);
        }
    }

    let tail = tail_geometry(shape, bubble.tail, bounds_w, bounds_h);
    let base = rx.min(ry) * 0.12;
    for (t, scale) in [(0.3, 1.0), (0.62, 0.7), (0.92, 0.45)] {
        let point = lerp(tail.root, tail.tip, t);
        if let Some(path) = PathBuilder::from_circle(point.x, point.y, (base * scale).max(1.5)) {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn lerp(from: Point, to: Point, t: f32) -> Point {
    Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t)
}
