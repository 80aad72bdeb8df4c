use std::sync::Arc;
use tracing::debug;

use crate::bubble::{
    BubbleConfig, BubbleStyle, ResizeHandle, TailAnchor, TextLayout, bubble_text,
    compute_default_bubble, layout_bubble, nearest_tail_anchor, render_bubble, resize_rect,
    translate_rect,
};
use crate::error::{StudioError, StudioResult};
use crate::raster::{RenderContext, decode_pixmap, encode_png, image_dimensions};
use crate::script::PanelScript;

/// Unburned panel art plus its decoded size.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl RawImage {
    pub fn decode(bytes: impl Into<Arc<[u8]>>) -> StudioResult<Self> {
        let bytes = bytes.into();
        let (width, height) = image_dimensions(&bytes)
            .map_err(|err| StudioError::validation(format!("unreadable panel image: {:#}", err)))?;
        Ok(Self {
            bytes,
            width,
            height,
        })
    }
}

/// Art state of one panel. Raw art and a burned image never coexist.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PanelArt {
    #[default]
    Empty,
    Raw {
        image: RawImage,
        bubble: BubbleConfig,
        layout: TextLayout,
        edited: bool,
    },
    Final {
        image: Arc<[u8]>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Empty,
    Configured,
    Edited,
    Final,
}

impl PanelPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PanelPhase::Empty => "empty",
            PanelPhase::Configured => "configured",
            PanelPhase::Edited => "edited",
            PanelPhase::Final => "final",
        }
    }
}

/// One user gesture on a live bubble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BubbleEdit {
    Move { dx: f32, dy: f32 },
    Resize { handle: ResizeHandle, dx: f32, dy: f32 },
    SetTail(TailAnchor),
    /// Snap the tail to the anchor nearest to a pointer position.
    PointTail { x: f32, y: f32 },
    SetStyle(BubbleStyle),
    Replace(BubbleConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelController {
    index: usize,
    art: PanelArt,
}

impl PanelController {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            art: PanelArt::Empty,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn art(&self) -> &PanelArt {
        &self.art
    }

    pub fn phase(&self) -> PanelPhase {
        match &self.art {
            PanelArt::Empty => PanelPhase::Empty,
            PanelArt::Raw { edited: false, .. } => PanelPhase::Configured,
            PanelArt::Raw { edited: true, .. } => PanelPhase::Edited,
            PanelArt::Final { .. } => PanelPhase::Final,
        }
    }

    pub fn has_image(&self) -> bool {
        !matches!(self.art, PanelArt::Empty)
    }

    pub fn bubble(&self) -> Option<&BubbleConfig> {
        match &self.art {
            PanelArt::Raw { bubble, .. } => Some(bubble),
            _ => None,
        }
    }

    pub fn layout(&self) -> Option<&TextLayout> {
        match &self.art {
            PanelArt::Raw { layout, .. } => Some(layout),
            _ => None,
        }
    }

    pub fn raw_image(&self) -> Option<&RawImage> {
        match &self.art {
            PanelArt::Raw { image, .. } => Some(image),
            _ => None,
        }
    }

    /// Takes fresh art and places the default bubble; any previous bubble is lost.
    pub fn install_raw(
        &mut self,
        bytes: impl Into<Arc<[u8]>>,
        panel: &PanelScript,
        ctx: &RenderContext,
    ) -> StudioResult<()> {
        let image = RawImage::decode(bytes)?;
        let bubble = compute_default_bubble(image.width, image.height, panel);
        let layout = layout_for(&bubble, &image, panel, ctx);
        debug!(
            panel = self.index + 1,
            width = image.width,
            height = image.height,
            style = bubble.style.as_str(),
            "installed raw panel art"
        );
        self.art = PanelArt::Raw {
            image,
            bubble,
            layout,
            edited: false,
        };
        Ok(())
    }

    pub fn install_final(&mut self, bytes: impl Into<Arc<[u8]>>) {
        self.art = PanelArt::Final {
            image: bytes.into(),
        };
    }

    pub fn discard(&mut self) {
        self.art = PanelArt::Empty;
    }

    pub fn apply_edit(
        &mut self,
        edit: BubbleEdit,
        panel: &PanelScript,
        ctx: &RenderContext,
    ) -> StudioResult<()> {
        let PanelArt::Raw { image, bubble, .. } = &self.art else {
            return Err(StudioError::validation(format!(
                "panel {} has no editable bubble",
                self.index + 1
            )));
        };
        let bounds_w = image.width as f32;
        let bounds_h = image.height as f32;
        let next = match edit {
            BubbleEdit::Move { dx, dy } => BubbleConfig {
                rect: translate_rect(bubble.rect, dx, dy, bounds_w, bounds_h),
                ..*bubble
            },
            BubbleEdit::Resize { handle, dx, dy } => BubbleConfig {
                rect: resize_rect(bubble.rect, handle, dx, dy, bounds_w, bounds_h),
                ..*bubble
            },
            BubbleEdit::SetTail(tail) => bubble.with_tail(tail),
            BubbleEdit::PointTail { x, y } => bubble.with_tail(nearest_tail_anchor(bubble.rect, x, y)),
            BubbleEdit::SetStyle(style) => bubble.with_style(style),
            BubbleEdit::Replace(config) => config.clamped(image.width, image.height),
        };
        let layout = layout_for(&next, image, panel, ctx);
        let image = image.clone();
        self.art = PanelArt::Raw {
            image,
            bubble: next,
            layout,
            edited: true,
        };
        Ok(())
    }

    /// Recomputes the text layout after the panel's dialogue or speaker changed.
    pub fn sync_text(&mut self, panel: &PanelScript, ctx: &RenderContext) {
        if let PanelArt::Raw {
            image,
            bubble,
            layout,
            ..
        } = &mut self.art
        {
            *layout = layout_for(bubble, image, panel, ctx);
        }
    }

    /// Burned PNG of the current state, `None` while the panel has no art.
    pub fn preview(&self, panel: &PanelScript, ctx: &RenderContext) -> StudioResult<Option<Vec<u8>>> {
        match &self.art {
            PanelArt::Empty => Ok(None),
            PanelArt::Final { image } => Ok(Some(image.to_vec())),
            PanelArt::Raw { image, bubble, .. } => burn_bubble(image, bubble, panel, ctx).map(Some),
        }
    }

    pub fn export(&self, panel: &PanelScript, ctx: &RenderContext) -> StudioResult<Vec<u8>> {
        self.preview(panel, ctx)?
            .ok_or_else(|| StudioError::missing_panel(self.index))
    }
}

fn layout_for(
    bubble: &BubbleConfig,
    image: &RawImage,
    panel: &PanelScript,
    ctx: &RenderContext,
) -> TextLayout {
    let text = bubble_text(bubble.style, panel);
    layout_bubble(bubble, text.as_deref(), image.width, image.height, ctx)
}

fn burn_bubble(
    image: &RawImage,
    bubble: &BubbleConfig,
    panel: &PanelScript,
    ctx: &RenderContext,
) -> StudioResult<Vec<u8>> {
    let text = bubble_text(bubble.style, panel);
    let burned = decode_pixmap(&image.bytes).and_then(|mut pixmap| {
        match text.as_deref() {
            Some(text) => {
                render_bubble(&mut pixmap, bubble, Some(text), ctx)?;
            }
            None => debug!(panel = panel.panel, "no dialogue, bubble skipped"),
        }
        encode_png(&pixmap)
    });
    burned.map_err(|err| StudioError::render(format!("panel {}: {:#}", panel.panel, err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bubble::{MIN_BUBBLE_SIZE, Rect};
    use crate::script::sample_script;
    use crate::test_util::solid_png;

    fn configured(panel: &PanelScript) -> PanelController {
        let mut controller = PanelController::new(0);
        controller
            .install_raw(solid_png(400, 300, [40, 90, 160]), panel, &RenderContext::detached())
            .unwrap();
        controller
    }

    #[test]
    fn lifecycle_moves_through_phases() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let mut controller = PanelController::new(0);
        assert_eq!(controller.phase(), PanelPhase::Empty);

        controller
            .install_raw(solid_png(400, 300, [40, 90, 160]), &script.panels[0], &ctx)
            .unwrap();
        assert_eq!(controller.phase(), PanelPhase::Configured);

        controller
            .apply_edit(BubbleEdit::Move { dx: 10.0, dy: 5.0 }, &script.panels[0], &ctx)
            .unwrap();
        assert_eq!(controller.phase(), PanelPhase::Edited);

        controller.install_final(solid_png(4, 4, [0, 0, 0]));
        assert_eq!(controller.phase(), PanelPhase::Final);
        assert!(controller.bubble().is_none());

        controller.discard();
        assert_eq!(controller.phase(), PanelPhase::Empty);
    }

    #[test]
    fn edits_never_touch_raw_bytes() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let mut controller = configured(&script.panels[0]);
        let before = controller.raw_image().unwrap().bytes.clone();
        for edit in [
            BubbleEdit::Move { dx: -30.0, dy: 12.0 },
            BubbleEdit::SetStyle(BubbleStyle::Shout),
            BubbleEdit::PointTail { x: 0.0, y: 57.0 },
        ] {
            controller.apply_edit(edit, &script.panels[0], &ctx).unwrap();
        }
        let after = &controller.raw_image().unwrap().bytes;
        assert!(Arc::ptr_eq(&before, after));
        let bubble = controller.bubble().unwrap();
        assert_eq!(bubble.style, BubbleStyle::Shout);
        assert_eq!(bubble.tail.edge(), crate::bubble::Edge::Left);
    }

    #[test]
    fn degenerate_resize_is_clamped_to_minimum() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let mut controller = configured(&script.panels[0]);
        controller
            .apply_edit(
                BubbleEdit::Resize {
                    handle: ResizeHandle::BottomRight,
                    dx: -2000.0,
                    dy: -2000.0,
                },
                &script.panels[0],
                &ctx,
            )
            .unwrap();
        let rect = controller.bubble().unwrap().rect;
        assert_eq!(rect.width, MIN_BUBBLE_SIZE);
        assert_eq!(rect.height, MIN_BUBBLE_SIZE);
        assert!(controller.layout().unwrap().clipped);
    }

    #[test]
    fn replace_is_clamped_into_image() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let mut controller = configured(&script.panels[0]);
        let mut config = *controller.bubble().unwrap();
        config.rect = Rect::new(350.0, 280.0, 900.0, 2.0);
        controller
            .apply_edit(BubbleEdit::Replace(config), &script.panels[0], &ctx)
            .unwrap();
        let rect = controller.bubble().unwrap().rect;
        assert!(rect.within(400.0, 300.0));
        assert_eq!(rect.height, MIN_BUBBLE_SIZE);
    }

    #[test]
    fn new_raw_art_discards_edited_bubble() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let mut controller = configured(&script.panels[0]);
        controller
            .apply_edit(BubbleEdit::SetStyle(BubbleStyle::Caption), &script.panels[0], &ctx)
            .unwrap();
        controller
            .install_raw(solid_png(400, 300, [0, 0, 0]), &script.panels[0], &ctx)
            .unwrap();
        assert_eq!(controller.phase(), PanelPhase::Configured);
        assert_eq!(controller.bubble().unwrap().style, BubbleStyle::Speech);
    }

    #[test]
    fn edit_without_bubble_is_rejected() {
        let script = sample_script();
        let mut controller = PanelController::new(2);
        let err = controller
            .apply_edit(
                BubbleEdit::SetTail(TailAnchor::TopLeft),
                &script.panels[2],
                &RenderContext::detached(),
            )
            .unwrap_err();
        assert!(matches!(err, StudioError::InputValidation(_)));
    }

    #[test]
    fn export_of_empty_panel_reports_index() {
        let script = sample_script();
        let controller = PanelController::new(3);
        let err = controller
            .export(&script.panels[3], &RenderContext::detached())
            .unwrap_err();
        assert!(matches!(err, StudioError::MissingPanel { index: 3 }));
    }

    #[test]
    fn export_burns_bubble_and_keeps_size() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let controller = configured(&script.panels[1]);
        let png = controller.export(&script.panels[1], &ctx).unwrap();
        let image = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (400, 300));
        let center = controller.bubble().unwrap().rect.center();
        assert_eq!(
            image.get_pixel(center.x as u32, center.y as u32).0,
            [255, 255, 255]
        );
        assert_eq!(image.get_pixel(200, 290).0, [40, 90, 160]);
    }

    #[test]
    fn sync_text_tracks_dialogue() {
        let script = sample_script();
        let ctx = RenderContext::detached();
        let mut controller = configured(&script.panels[1]);
        assert!(!controller.layout().unwrap().lines.is_empty());
        let silent = script.set_dialogue(1, "none").unwrap();
        controller.sync_text(&silent.panels[1], &ctx);
        assert!(controller.layout().unwrap().lines.is_empty());
    }

    #[test]
    fn silent_panel_exports_without_bubble() {
        let script = sample_script();
        let silent = &script.panels[3];
        assert!(silent.spoken_text().is_none());
        let controller = configured(silent);
        let center = controller.bubble().unwrap().rect.center();

        let exported = controller.export(silent, &RenderContext::detached()).unwrap();
        let image = image::load_from_memory(&exported).unwrap().to_rgb8();
        assert_eq!(
            image.get_pixel(center.x as u32, center.y as u32).0,
            [40, 90, 160]
        );
        assert_eq!(image.get_pixel(0, 0).0, [40, 90, 160]);
    }
}
