use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tiny_skia::{PathBuilder, Pixmap};
use tracing::debug;

use crate::bubble::{
    FitOptions, Rect, bubble_text, compute_default_bubble, default_max_font_size, fit_text,
    render_bubble,
};
use crate::error::{StudioError, StudioResult};
use crate::raster::{
    RenderContext, TextPaint, decode_pixmap, draw_text_block, encode_png, fill_rect, stroke_path,
};
use crate::script::PanelScript;

const NARRATION_BAND_RATIO: f32 = 0.18;
const SIMPLE_BAND_RATIO: f32 = 0.22;
const WEBTOON_BOX_RATIO: f32 = 0.2;
const CINEMATIC_BAND_RATIO: f32 = 0.25;
const FRAME_MARGIN_RATIO: f32 = 0.04;
const WEBTOON_BORDER: f32 = 4.0;

/// How dialogue is presented on a finished panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FrameStyle {
    #[default]
    SpeechBubble,
    Simple,
    Webtoon,
    Narration,
    Cinematic,
}

impl FrameStyle {
    pub const ALL: [FrameStyle; 5] = [
        FrameStyle::SpeechBubble,
        FrameStyle::Simple,
        FrameStyle::Webtoon,
        FrameStyle::Narration,
        FrameStyle::Cinematic,
    ];

    pub fn parse(raw: &str) -> StudioResult<Self> {
        let lower = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == lower)
            .ok_or_else(|| {
                StudioError::validation(format!(
                    "unknown frame style '{}' (expected one of: {})",
                    raw,
                    Self::ALL.map(|style| style.as_str()).join(", ")
                ))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStyle::SpeechBubble => "speech-bubble",
            FrameStyle::Simple => "simple",
            FrameStyle::Webtoon => "webtoon",
            FrameStyle::Narration => "narration",
            FrameStyle::Cinematic => "cinematic",
        }
    }

    /// Only the bubble style keeps an editable object after generation.
    pub fn is_editable(&self) -> bool {
        matches!(self, FrameStyle::SpeechBubble)
    }

    fn prefixes_speaker(&self) -> bool {
        matches!(self, FrameStyle::Simple | FrameStyle::Webtoon)
    }
}

/// Burns the panel's dialogue into `raw` with a fixed frame. Silent panels come
/// back as the art re-encoded to a flat PNG.
pub fn apply_text_frame(
    raw: &[u8],
    panel: &PanelScript,
    style: FrameStyle,
    ctx: &RenderContext,
) -> StudioResult<Vec<u8>> {
    let mut pixmap = decode_pixmap(raw).map_err(|err| {
        StudioError::validation(format!("panel {} image: {:#}", panel.panel, err))
    })?;
    burn_frame(&mut pixmap, panel, style, ctx)
        .and_then(|_| encode_png(&pixmap))
        .map_err(|err| StudioError::render(format!("{:#}", err)))
}

fn burn_frame(
    pixmap: &mut Pixmap,
    panel: &PanelScript,
    style: FrameStyle,
    ctx: &RenderContext,
) -> Result<()> {
    let width = pixmap.width() as f32;
    let height = pixmap.height() as f32;

    if style == FrameStyle::SpeechBubble {
        let bubble = compute_default_bubble(pixmap.width(), pixmap.height(), panel);
        let text = bubble_text(bubble.style, panel);
        if text.is_some() {
            render_bubble(pixmap, &bubble, text.as_deref(), ctx)?;
        }
        return Ok(());
    }

    let text = if style.prefixes_speaker() {
        panel.attributed_text()
    } else {
        panel.spoken_text().map(str::to_string)
    };
    let Some(text) = text else {
        debug!(panel = panel.panel, "no dialogue, frame skipped");
        return Ok(());
    };

    let palette = &ctx.palette;
    let margin = height * FRAME_MARGIN_RATIO;
    let (area, paint) = match style {
        FrameStyle::Narration => {
            let band = Rect::new(0.0, 0.0, width, height * NARRATION_BAND_RATIO);
            fill_rect(pixmap, band, &palette.narration_fill, 1.0)?;
            (
                band,
                TextPaint {
                    fill: &palette.narration_text,
                    stroke: None,
                },
            )
        }
        FrameStyle::Simple => {
            let band_h = height * SIMPLE_BAND_RATIO;
            let band = Rect::new(0.0, height - band_h, width, band_h);
            fill_rect(pixmap, band, &palette.fill, 0.8)?;
            (
                band,
                TextPaint {
                    fill: &palette.text,
                    stroke: None,
                },
            )
        }
        FrameStyle::Webtoon => {
            let box_h = height * WEBTOON_BOX_RATIO;
            let side = width * FRAME_MARGIN_RATIO;
            let area = Rect::new(side, height - box_h - margin, width - side * 2.0, box_h);
            fill_rect(pixmap, area, &palette.fill, 1.0)?;
            let outline = tiny_skia::Rect::from_xywh(area.x, area.y, area.width, area.height)
                .map(PathBuilder::from_rect)
                .ok_or_else(|| anyhow!("invalid webtoon frame {:?}", area))?;
            stroke_path(pixmap, &outline, &palette.stroke, WEBTOON_BORDER)?;
            (
                area,
                TextPaint {
                    fill: &palette.text,
                    stroke: None,
                },
            )
        }
        FrameStyle::Cinematic => {
            let band_h = height * CINEMATIC_BAND_RATIO;
            (
                Rect::new(0.0, height - band_h - margin, width, band_h),
                TextPaint {
                    fill: &palette.caption_text,
                    stroke: Some((&palette.caption_stroke, ctx.stroke_width + 1.0)),
                },
            )
        }
        FrameStyle::SpeechBubble => return Ok(()),
    };

    let options = FitOptions {
        padding_x: ctx.fit.padding_x.max(width * 0.03),
        ..ctx.fit
    };
    let layout = fit_text(
        &text,
        area.width,
        area.height,
        default_max_font_size(height),
        ctx.font.metrics.as_ref(),
        &options,
    );
    debug!(
        panel = panel.panel,
        frame = style.as_str(),
        font_size = layout.font_size,
        clipped = layout.clipped,
        "burned text frame"
    );
    draw_text_block(pixmap, ctx, &layout, area, paint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::sample_script;
    use crate::test_util::solid_png;

    fn burn(style: FrameStyle, panel: &PanelScript) -> image::RgbImage {
        let raw = solid_png(200, 200, [200, 0, 0]);
        let bytes = apply_text_frame(&raw, panel, style, &RenderContext::detached()).unwrap();
        let image = image::load_from_memory(&bytes).unwrap();
        assert_eq!(image.color(), image::ColorType::Rgb8);
        image.to_rgb8()
    }

    fn close(actual: [u8; 3], expected: [u8; 3]) -> bool {
        actual
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.abs_diff(*b) <= 2)
    }

    #[test]
    fn frame_style_ids_round_trip() {
        for style in FrameStyle::ALL {
            assert_eq!(FrameStyle::parse(style.as_str()).unwrap(), style);
        }
        assert!(matches!(
            FrameStyle::parse("comic-sans"),
            Err(StudioError::InputValidation(_))
        ));
        assert_eq!(
            serde_json::to_value(FrameStyle::SpeechBubble).unwrap(),
            "speech-bubble"
        );
    }

    #[test]
    fn narration_frame_draws_top_banner() {
        let script = sample_script();
        let image = burn(FrameStyle::Narration, &script.panels[1]);
        assert_eq!(image.get_pixel(100, 10).0, [0xfd, 0xe0, 0x47]);
        assert_eq!(image.get_pixel(100, 100).0, [200, 0, 0]);
    }

    #[test]
    fn simple_frame_blends_bottom_strip() {
        let script = sample_script();
        let image = burn(FrameStyle::Simple, &script.panels[1]);
        assert!(close(image.get_pixel(3, 195).0, [244, 204, 204]));
        assert_eq!(image.get_pixel(100, 20).0, [200, 0, 0]);
    }

    #[test]
    fn webtoon_frame_has_bordered_box() {
        let script = sample_script();
        let image = burn(FrameStyle::Webtoon, &script.panels[1]);
        assert_eq!(image.get_pixel(20, 170).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(8, 170).0, [0x11, 0x11, 0x11]);
        assert_eq!(image.get_pixel(2, 170).0, [200, 0, 0]);
    }

    #[test]
    fn cinematic_frame_has_no_backing() {
        let script = sample_script();
        let image = burn(FrameStyle::Cinematic, &script.panels[1]);
        assert_eq!(image.get_pixel(2, 180).0, [200, 0, 0]);
    }

    #[test]
    fn silent_panel_is_reencoded_untouched() {
        let script = sample_script();
        for style in FrameStyle::ALL {
            let image = burn(style, &script.panels[3]);
            assert!(image.pixels().all(|px| px.0 == [200, 0, 0]), "{:?}", style);
        }
    }

    #[test]
    fn bubble_frame_burns_default_bubble() {
        let script = sample_script();
        let image = burn(FrameStyle::SpeechBubble, &script.panels[0]);
        let bubble = compute_default_bubble(200, 200, &script.panels[0]);
        let center = bubble.rect.center();
        assert_eq!(
            image.get_pixel(center.x as u32, center.y as u32).0,
            [255, 255, 255]
        );
    }

    #[test]
    fn undecodable_art_is_rejected() {
        let script = sample_script();
        let err = apply_text_frame(
            b"not an image",
            &script.panels[0],
            FrameStyle::Simple,
            &RenderContext::detached(),
        )
        .unwrap_err();
        assert!(err.is_user_error());
    }
}
