use tracing::{debug, info};

use crate::bubble::BubbleStyle;
use crate::compose::{StripLayout, StripOptions, compose};
use crate::data::{ImageAttachment, encode_base64};
use crate::error::{StudioError, StudioResult};
use crate::frame::{FrameStyle, apply_text_frame};
use crate::panel::{BubbleEdit, PanelArt, PanelController};
use crate::raster::{RenderContext, image_dimensions};
use crate::script::{FullScript, InstagramPost, PANELS_PER_EPISODE, PanelScript, Speaker, StoryFormat};
use crate::settings::Settings;

/// Everything one comic session knows. Transitions never mutate in place: each
/// returns the next record, and a failed transition leaves the old one as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct Studio {
    topic: String,
    category: String,
    art_style: String,
    frame_style: FrameStyle,
    format: StoryFormat,
    script: Option<FullScript>,
    panels: Vec<PanelController>,
    post: Option<InstagramPost>,
    episode: u32,
}

impl Studio {
    pub fn new(settings: &Settings) -> Self {
        Self {
            topic: String::new(),
            category: settings.default_category().to_string(),
            art_style: settings.default_art_style().to_string(),
            frame_style: settings.frame_style,
            format: StoryFormat::Single,
            script: None,
            panels: empty_panels(PANELS_PER_EPISODE),
            post: None,
            episode: 1,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn art_style(&self) -> &str {
        &self.art_style
    }

    pub fn frame_style(&self) -> FrameStyle {
        self.frame_style
    }

    pub fn format(&self) -> StoryFormat {
        self.format
    }

    pub fn script(&self) -> Option<&FullScript> {
        self.script.as_ref()
    }

    pub fn panels(&self) -> &[PanelController] {
        &self.panels
    }

    pub fn post(&self) -> Option<&InstagramPost> {
        self.post.as_ref()
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn is_continuation(&self) -> bool {
        self.episode > 1
    }

    pub fn with_topic(&self, topic: &str) -> StudioResult<Self> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(StudioError::validation("topic is empty"));
        }
        Ok(Self {
            topic: topic.to_string(),
            ..self.clone()
        })
    }

    pub fn with_category(&self, category: &str) -> Self {
        Self {
            category: category.trim().to_string(),
            ..self.clone()
        }
    }

    pub fn with_art_style(&self, art_style: &str) -> StudioResult<Self> {
        let art_style = art_style.trim();
        if art_style.is_empty() {
            return Err(StudioError::validation("art style is empty"));
        }
        Ok(Self {
            art_style: art_style.to_string(),
            ..self.clone()
        })
    }

    pub fn with_format(&self, format: StoryFormat) -> Self {
        Self {
            format,
            ..self.clone()
        }
    }

    /// Installs a new script; all panel art and the post are dropped.
    pub fn with_script(&self, script: FullScript) -> StudioResult<Self> {
        script.validate(self.format)?;
        script.ensure_character_names()?;
        let panels = empty_panels(script.panels.len());
        info!(
            panels = script.panels.len(),
            characters = script.characters.len(),
            "script installed"
        );
        Ok(Self {
            script: Some(script),
            panels,
            post: None,
            ..self.clone()
        })
    }

    pub fn rename_character(
        &self,
        index: usize,
        new_name: &str,
        ctx: &RenderContext,
    ) -> StudioResult<Self> {
        let script = self.require_script()?.rename_character(index, new_name)?;
        Ok(self.with_updated_script(script, ctx))
    }

    /// Changes who speaks; a live bubble follows with the matching shape.
    pub fn set_panel_speaker(
        &self,
        panel_index: usize,
        speaker: Speaker,
        ctx: &RenderContext,
    ) -> StudioResult<Self> {
        let style = match speaker {
            Speaker::Thought => BubbleStyle::Thought,
            _ => BubbleStyle::Speech,
        };
        let script = self.require_script()?.set_panel_speaker(panel_index, speaker)?;
        let mut next = self.with_updated_script(script, ctx);
        if let Some(controller) = next.panels.get_mut(panel_index)
            && controller.bubble().is_some()
            && let Some(panel) = next.script.as_ref().and_then(|s| s.panels.get(panel_index))
        {
            controller.apply_edit(BubbleEdit::SetStyle(style), panel, ctx)?;
        }
        Ok(next)
    }

    pub fn set_dialogue(
        &self,
        panel_index: usize,
        dialogue: &str,
        ctx: &RenderContext,
    ) -> StudioResult<Self> {
        let script = self.require_script()?.set_dialogue(panel_index, dialogue)?;
        Ok(self.with_updated_script(script, ctx))
    }

    /// Stores a character reference sheet; the bytes must be a readable image.
    pub fn set_character_portrait(&self, index: usize, bytes: &[u8]) -> StudioResult<Self> {
        let attachment = ImageAttachment::from_bytes(bytes.to_vec())
            .map_err(|err| StudioError::validation(format!("{:#}", err)))?;
        image_dimensions(&attachment.bytes)
            .map_err(|err| StudioError::validation(format!("unreadable portrait: {:#}", err)))?;
        let script = self
            .require_script()?
            .set_portrait(index, Some(encode_base64(&attachment.bytes)))?;
        Ok(Self {
            script: Some(script),
            ..self.clone()
        })
    }

    /// Leaving the bubble style burns every raw panel with the new frame.
    /// Any other switch drops burned images, which can't be re-framed.
    pub fn set_frame_style(&self, style: FrameStyle, ctx: &RenderContext) -> StudioResult<Self> {
        if style == self.frame_style {
            return Ok(self.clone());
        }
        let mut next = Self {
            frame_style: style,
            ..self.clone()
        };
        if self.frame_style.is_editable() {
            let script = self.script.as_ref();
            for controller in &mut next.panels {
                let PanelArt::Raw { image, .. } = controller.art() else {
                    continue;
                };
                let panel = script
                    .and_then(|script| script.panels.get(controller.index()))
                    .ok_or_else(|| StudioError::missing_panel(controller.index()))?;
                let burned = apply_text_frame(&image.bytes, panel, style, ctx)?;
                controller.install_final(burned);
            }
        } else {
            for controller in &mut next.panels {
                controller.discard();
            }
        }
        debug!(from = self.frame_style.as_str(), to = style.as_str(), "frame style changed");
        Ok(next)
    }

    /// Routes fresh art through the live bubble or straight through the frame.
    pub fn with_panel_image(
        &self,
        panel_index: usize,
        bytes: Vec<u8>,
        ctx: &RenderContext,
    ) -> StudioResult<Self> {
        let panel = self.require_panel(panel_index)?.clone();
        let mut next = self.clone();
        let controller = next
            .panels
            .get_mut(panel_index)
            .ok_or_else(|| StudioError::validation(format!("no panel #{}", panel_index + 1)))?;
        if self.frame_style.is_editable() {
            controller.install_raw(bytes, &panel, ctx)?;
        } else {
            let burned = apply_text_frame(&bytes, &panel, self.frame_style, ctx)?;
            controller.install_final(burned);
        }
        Ok(next)
    }

    /// Installs one image per panel, in order.
    pub fn with_panel_images(&self, images: Vec<Vec<u8>>, ctx: &RenderContext) -> StudioResult<Self> {
        if images.len() != self.panels.len() {
            return Err(StudioError::validation(format!(
                "expected {} panel images, got {}",
                self.panels.len(),
                images.len()
            )));
        }
        images
            .into_iter()
            .enumerate()
            .try_fold(self.clone(), |studio, (idx, bytes)| {
                studio.with_panel_image(idx, bytes, ctx)
            })
    }

    pub fn edit_bubble(
        &self,
        panel_index: usize,
        edit: BubbleEdit,
        ctx: &RenderContext,
    ) -> StudioResult<Self> {
        let panel = self.require_panel(panel_index)?.clone();
        let mut next = self.clone();
        let controller = next
            .panels
            .get_mut(panel_index)
            .ok_or_else(|| StudioError::validation(format!("no panel #{}", panel_index + 1)))?;
        controller.apply_edit(edit, &panel, ctx)?;
        Ok(next)
    }

    pub fn with_post(&self, post: InstagramPost) -> Self {
        Self {
            post: Some(post),
            ..self.clone()
        }
    }

    /// Moves to the next episode. Portraits survive for characters that kept
    /// their name; art and post start over.
    pub fn with_continuation(
        &self,
        script: FullScript,
        continuation_topic: &str,
    ) -> StudioResult<Self> {
        let previous = self.require_script()?;
        script.validate(StoryFormat::Serial)?;
        script.ensure_character_names()?;
        let script = script.inherit_portraits(previous);
        let topic = continuation_topic_or_default(&self.topic, continuation_topic);
        info!(topic = %topic, episode = self.episode + 1, "continuation installed");
        Ok(Self {
            topic,
            format: StoryFormat::Serial,
            panels: empty_panels(script.panels.len()),
            script: Some(script),
            post: None,
            episode: self.episode + 1,
            ..self.clone()
        })
    }

    /// Starts over, keeping the art style, category and frame style.
    pub fn reset(&self) -> Self {
        Self {
            topic: String::new(),
            category: self.category.clone(),
            art_style: self.art_style.clone(),
            frame_style: self.frame_style,
            format: StoryFormat::Single,
            script: None,
            panels: empty_panels(PANELS_PER_EPISODE),
            post: None,
            episode: 1,
        }
    }

    pub fn missing_panels(&self) -> Vec<usize> {
        self.panels
            .iter()
            .filter(|controller| !controller.has_image())
            .map(PanelController::index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.script.is_some() && self.missing_panels().is_empty()
    }

    pub fn panel_preview(
        &self,
        panel_index: usize,
        ctx: &RenderContext,
    ) -> StudioResult<Option<Vec<u8>>> {
        let panel = self.require_panel(panel_index)?;
        match self.panels.get(panel_index) {
            Some(controller) => controller.preview(panel, ctx),
            None => Err(StudioError::validation(format!("no panel #{}", panel_index + 1))),
        }
    }

    /// Flat PNG of every panel with bubbles burned in.
    pub fn final_images(&self, ctx: &RenderContext) -> StudioResult<Vec<Vec<u8>>> {
        let script = self.require_script()?;
        self.panels
            .iter()
            .zip(&script.panels)
            .map(|(controller, panel)| controller.export(panel, ctx))
            .collect()
    }

    pub fn compose(
        &self,
        layout: StripLayout,
        options: StripOptions,
        ctx: &RenderContext,
    ) -> StudioResult<Vec<u8>> {
        self.export(layout, options, ctx).map(|(_, strip)| strip)
    }

    /// Final panel images and the strip built from them; each panel renders once.
    pub fn export(
        &self,
        layout: StripLayout,
        options: StripOptions,
        ctx: &RenderContext,
    ) -> StudioResult<(Vec<Vec<u8>>, Vec<u8>)> {
        if let Some(index) = self.missing_panels().first() {
            return Err(StudioError::missing_panel(*index));
        }
        let images = self.final_images(ctx)?;
        let slots = images
            .iter()
            .map(|image| Some(image.as_slice()))
            .collect::<Vec<_>>();
        let strip = compose(&slots, layout, options)?;
        Ok((images, strip))
    }

    fn require_script(&self) -> StudioResult<&FullScript> {
        self.script
            .as_ref()
            .ok_or_else(|| StudioError::validation("no script yet"))
    }

    fn require_panel(&self, panel_index: usize) -> StudioResult<&PanelScript> {
        self.require_script()?
            .panels
            .get(panel_index)
            .ok_or_else(|| StudioError::validation(format!("no panel #{}", panel_index + 1)))
    }

    fn with_updated_script(&self, script: FullScript, ctx: &RenderContext) -> Self {
        let mut next = self.clone();
        for (controller, panel) in next.panels.iter_mut().zip(&script.panels) {
            controller.sync_text(panel, ctx);
        }
        next.script = Some(script);
        next
    }
}

fn empty_panels(count: usize) -> Vec<PanelController> {
    (0..count).map(PanelController::new).collect()
}

pub fn continuation_topic_or_default(topic: &str, continuation_topic: &str) -> String {
    let continuation_topic = continuation_topic.trim();
    if continuation_topic.is_empty() {
        format!("{} (continued)", topic.trim())
    } else {
        continuation_topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelPhase;
    use crate::raster::decode_pixmap;
    use crate::script::sample_script;
    use crate::test_util::solid_png;

    const RED: [u8; 3] = [220, 40, 40];

    fn ctx() -> RenderContext {
        RenderContext::detached()
    }

    fn scripted() -> Studio {
        Studio::new(&Settings::default())
            .with_topic("고양이의 하루")
            .unwrap()
            .with_script(sample_script())
            .unwrap()
    }

    fn illustrated(studio: &Studio) -> Studio {
        let images = (0..4).map(|_| solid_png(200, 300, RED)).collect();
        studio.with_panel_images(images, &ctx()).unwrap()
    }

    #[test]
    fn new_studio_uses_settings_defaults() {
        let studio = Studio::new(&Settings::default());
        assert_eq!(studio.frame_style(), FrameStyle::SpeechBubble);
        assert_eq!(studio.panels().len(), 4);
        assert_eq!(studio.missing_panels(), vec![0, 1, 2, 3]);
        assert!(!studio.is_complete());
        assert!(studio.with_topic("  ").is_err());
    }

    #[test]
    fn rejected_script_leaves_studio_untouched() {
        let studio = scripted();
        let mut short = sample_script();
        short.panels.pop();
        let err = studio.with_script(short).unwrap_err();
        assert!(matches!(err, StudioError::InputValidation(_)));
        assert_eq!(studio.script().map(|s| s.panels.len()), Some(4));
    }

    #[test]
    fn rename_updates_script_and_live_layout() {
        let studio = illustrated(&scripted());
        let renamed = studio.rename_character(1, "제니", &ctx()).unwrap();

        let script = renamed.script().unwrap();
        assert_eq!(script.panels[1].speaker, Speaker::Named("제니".to_string()));
        let layout = renamed.panels()[1].layout().unwrap();
        assert_eq!(layout.lines.join(" "), "제니: 또 왔어?");
        assert_eq!(studio.script().unwrap().characters[1].name, "이제니");

        assert!(studio.rename_character(0, "", &ctx()).is_err());
    }

    #[test]
    fn speaker_change_reshapes_bubble() {
        let studio = illustrated(&scripted());
        let next = studio.set_panel_speaker(0, Speaker::Thought, &ctx()).unwrap();
        assert_eq!(next.panels()[0].bubble().unwrap().style, BubbleStyle::Thought);

        let back = next
            .set_panel_speaker(2, Speaker::Named("양하치".to_string()), &ctx())
            .unwrap();
        assert_eq!(back.panels()[2].bubble().unwrap().style, BubbleStyle::Speech);
    }

    #[test]
    fn dialogue_edit_refits_text() {
        let studio = illustrated(&scripted());
        let next = studio.set_dialogue(3, "조용한 밤", &ctx()).unwrap();
        assert_eq!(next.panels()[3].layout().unwrap().lines.join(" "), "조용한 밤");
        assert!(studio.panels()[3].layout().unwrap().lines.is_empty());
    }

    #[test]
    fn leaving_bubble_style_burns_panels() {
        let studio = illustrated(&scripted());
        let framed = studio.set_frame_style(FrameStyle::Narration, &ctx()).unwrap();
        assert!(
            framed
                .panels()
                .iter()
                .all(|panel| panel.phase() == PanelPhase::Final && panel.bubble().is_none())
        );
        let images = framed.final_images(&ctx()).unwrap();
        let pixmap = decode_pixmap(&images[0]).unwrap();
        let band = pixmap.pixel(100, 5).unwrap();
        assert_eq!((band.red(), band.green(), band.blue()), (0xfd, 0xe0, 0x47));

        let back = framed.set_frame_style(FrameStyle::SpeechBubble, &ctx()).unwrap();
        assert_eq!(back.missing_panels(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn framed_studio_burns_new_art_immediately() {
        let studio = scripted()
            .set_frame_style(FrameStyle::Simple, &ctx())
            .unwrap()
            .with_panel_image(0, solid_png(200, 300, RED), &ctx())
            .unwrap();
        assert_eq!(studio.panels()[0].phase(), PanelPhase::Final);
        assert!(studio.edit_bubble(0, BubbleEdit::Move { dx: 5.0, dy: 5.0 }, &ctx()).is_err());
    }

    #[test]
    fn bubble_edits_mark_panel_edited() {
        let studio = illustrated(&scripted());
        let next = studio
            .edit_bubble(1, BubbleEdit::Move { dx: -500.0, dy: 0.0 }, &ctx())
            .unwrap();
        assert_eq!(next.panels()[1].phase(), PanelPhase::Edited);
        assert_eq!(next.panels()[1].bubble().unwrap().rect.x, 0.0);
        assert_eq!(studio.panels()[1].phase(), PanelPhase::Configured);
    }

    #[test]
    fn export_reports_first_missing_panel() {
        let studio = scripted()
            .with_panel_image(0, solid_png(200, 300, RED), &ctx())
            .unwrap()
            .with_panel_image(1, solid_png(200, 300, RED), &ctx())
            .unwrap();
        assert_eq!(studio.missing_panels(), vec![2, 3]);
        assert!(matches!(
            studio.final_images(&ctx()),
            Err(StudioError::MissingPanel { index: 2 })
        ));
        assert!(matches!(
            studio.compose(StripLayout::Grid, StripOptions::default(), &ctx()),
            Err(StudioError::MissingPanel { index: 2 })
        ));
    }

    #[test]
    fn complete_studio_composes_grid() {
        let studio = illustrated(&scripted());
        assert!(studio.is_complete());
        let strip = studio.compose(StripLayout::Grid, StripOptions::default(), &ctx()).unwrap();
        assert_eq!(image_dimensions(&strip).unwrap(), (420, 620));

        let (images, exported) = studio
            .export(StripLayout::Grid, StripOptions::default(), &ctx())
            .unwrap();
        assert_eq!(images, studio.final_images(&ctx()).unwrap());
        assert_eq!(exported, strip);
    }

    #[test]
    fn portraits_must_be_images() {
        let studio = scripted();
        assert!(matches!(
            studio.set_character_portrait(0, b"not an image"),
            Err(StudioError::InputValidation(_))
        ));
        let next = studio
            .set_character_portrait(0, &solid_png(8, 8, RED))
            .unwrap();
        assert!(next.script().unwrap().characters[0].portrait.is_some());
    }

    #[test]
    fn continuation_keeps_surviving_portraits() {
        let studio = illustrated(&scripted())
            .set_character_portrait(0, &solid_png(8, 8, RED))
            .unwrap()
            .with_post(InstagramPost {
                description: "d".to_string(),
                hashtags: Vec::new(),
            });
        let mut next_script = sample_script();
        next_script.characters[1].name = "새 인물".to_string();

        let next = studio.with_continuation(next_script, "  ").unwrap();
        assert_eq!(next.topic(), "고양이의 하루 (continued)");
        assert_eq!(next.episode(), 2);
        assert!(next.is_continuation());
        assert_eq!(next.format(), StoryFormat::Serial);
        assert!(next.post().is_none());
        assert_eq!(next.missing_panels(), vec![0, 1, 2, 3]);
        let characters = &next.script().unwrap().characters;
        assert!(characters[0].portrait.is_some());
        assert!(characters[1].portrait.is_none());
    }

    #[test]
    fn reset_keeps_style_choices() {
        let studio = illustrated(&scripted())
            .with_art_style("아메리칸 코믹스")
            .unwrap()
            .with_category("판타지")
            .set_frame_style(FrameStyle::Webtoon, &ctx())
            .unwrap();
        let fresh = studio.reset();
        assert_eq!(fresh.art_style(), "아메리칸 코믹스");
        assert_eq!(fresh.category(), "판타지");
        assert_eq!(fresh.frame_style(), FrameStyle::Webtoon);
        assert!(fresh.script().is_none());
        assert_eq!(fresh.topic(), "");
    }
}
