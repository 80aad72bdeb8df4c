use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod bubble;
pub mod compose;
pub mod data;
pub mod error;
pub mod font;
pub mod frame;
pub mod generator;
pub mod logging;
pub mod panel;
pub mod prompts;
mod providers;
pub mod raster;
pub mod script;
pub mod server;
pub mod settings;
pub mod studio;
#[cfg(test)]
mod test_util;

pub use error::{StudioError, StudioResult};
pub use generator::ComicGenerator;
pub use providers::{Gemini, ImageResponse, Provider, ProviderResponse, ProviderUsage, ToolSpec};
pub use studio::Studio;

use compose::{StripLayout, StripOptions, merge_vertical};
use frame::FrameStyle;
use raster::RenderContext;
use script::{ContinuationType, StoryFormat};
use settings::Settings;

pub const MERGED_FILE_NAME: &str = "merged-comic.png";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub topic: Option<String>,
    pub category: Option<String>,
    pub art_style: Option<String>,
    pub frame_style: Option<String>,
    pub format: Option<String>,
    pub layout: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub image_model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
}

impl Config {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Settings with the command line overrides applied.
pub fn load_settings(config: &Config) -> Result<Settings> {
    let path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(path)?;
    if let Some(model) = non_empty(config.model.as_deref()) {
        settings.text_model = model.to_string();
    }
    if let Some(model) = non_empty(config.image_model.as_deref()) {
        settings.image_model = model.to_string();
    }
    if let Some(style) = non_empty(config.frame_style.as_deref()) {
        settings.frame_style = FrameStyle::parse(style)?;
    }
    if let Some(layout) = non_empty(config.layout.as_deref()) {
        settings.layout = StripLayout::parse(layout)?;
    }
    Ok(settings)
}

pub fn open_generator(settings: &Settings, key: Option<&str>) -> Result<ComicGenerator<Gemini>> {
    let key = providers::resolve_key(key).with_context(|| "no Gemini API key found")?;
    let provider = providers::build_provider(key, &settings.text_model, &settings.image_model);
    Ok(ComicGenerator::new(provider, settings))
}

/// Files written by a finished run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub files: Vec<PathBuf>,
    pub studio: Studio,
}

/// Script, character sheets, panel art and post in one go, written to the output directory.
pub async fn run(config: Config) -> Result<RunOutput> {
    let settings = load_settings(&config)?;
    let topic = non_empty(config.topic.as_deref()).ok_or_else(|| anyhow!("--topic is required"))?;
    let ctx = RenderContext::from_settings(&settings)?;
    let generator = open_generator(&settings, config.key.as_deref())?;

    let mut studio = Studio::new(&settings).with_topic(topic)?;
    if let Some(category) = non_empty(config.category.as_deref()) {
        studio = studio.with_category(category);
    }
    if let Some(style) = non_empty(config.art_style.as_deref()) {
        studio = studio.with_art_style(style)?;
    }
    if let Some(format) = non_empty(config.format.as_deref()) {
        studio = studio.with_format(StoryFormat::parse(format)?);
    }

    let script = generator
        .generate_script(studio.topic(), studio.category(), studio.format())
        .await?;
    studio = studio.with_script(script)?;

    studio = illustrate(&generator, studio, &ctx).await?;
    studio = attach_post(&generator, studio).await;

    let files = write_outputs(
        &studio,
        &ctx,
        settings.layout,
        settings.strip_options(),
        &config.output_dir(),
    )?;
    Ok(RunOutput { files, studio })
}

/// Character sheets first, then every panel with the sheets as references.
pub async fn illustrate<P: Provider>(
    generator: &ComicGenerator<P>,
    studio: Studio,
    ctx: &RenderContext,
) -> Result<Studio> {
    let script = studio
        .script()
        .cloned()
        .ok_or_else(|| anyhow!("no script to illustrate"))?;
    let mut studio = studio;
    if !script.all_portraits_ready() {
        let missing = script
            .characters
            .iter()
            .enumerate()
            .filter(|(_, character)| character.portrait.is_none())
            .map(|(idx, character)| (idx, character.clone()))
            .collect::<Vec<_>>();
        let characters = missing
            .iter()
            .map(|(_, character)| character.clone())
            .collect::<Vec<_>>();
        let sheets = generator
            .generate_character_sheets(&characters, studio.art_style())
            .await?;
        for ((idx, _), sheet) in missing.iter().zip(sheets) {
            studio = studio.set_character_portrait(*idx, &sheet)?;
        }
        info!(count = missing.len(), "character sheets ready");
    }

    let script = studio
        .script()
        .cloned()
        .ok_or_else(|| anyhow!("no script to illustrate"))?;
    let images = generator
        .generate_panel_images(&script, studio.art_style())
        .await?;
    info!(count = images.len(), "panel art ready");
    Ok(studio.with_panel_images(images, ctx)?)
}

/// Redraws one panel from its description, with the current portraits as references.
pub async fn regenerate_panel<P: Provider>(
    generator: &ComicGenerator<P>,
    studio: &Studio,
    panel_index: usize,
    ctx: &RenderContext,
) -> Result<Studio> {
    let script = studio
        .script()
        .ok_or_else(|| anyhow!("no script to illustrate"))?;
    let panel = script
        .panels
        .get(panel_index)
        .ok_or_else(|| StudioError::validation(format!("no panel #{}", panel_index + 1)))?;
    let image = generator
        .generate_image(&panel.description, &script.characters, studio.art_style())
        .await?;
    info!(panel = panel_index + 1, "panel art regenerated");
    Ok(studio.with_panel_image(panel_index, image, ctx)?)
}

/// The post is a nice-to-have; a failure only costs the caption.
pub async fn attach_post<P: Provider>(generator: &ComicGenerator<P>, studio: Studio) -> Studio {
    let Some(script) = studio.script() else {
        return studio;
    };
    match generator
        .generate_instagram_post(studio.topic(), script)
        .await
    {
        Ok(post) => studio.with_post(post),
        Err(err) => {
            warn!("instagram post skipped: {}", err);
            studio
        }
    }
}

/// Next episode of the current story, art regenerated from scratch.
pub async fn continue_story<P: Provider>(
    generator: &ComicGenerator<P>,
    studio: &Studio,
    continuation_topic: &str,
    kind: ContinuationType,
) -> Result<Studio> {
    let script = studio
        .script()
        .ok_or_else(|| anyhow!("no script to continue"))?;
    let topic = studio::continuation_topic_or_default(studio.topic(), continuation_topic);
    let next = generator
        .generate_continuation_script(studio.topic(), script, &topic, studio.category(), kind)
        .await?;
    Ok(studio.with_continuation(next, &topic)?)
}

/// Writes `panel-N.png`, the composed strip, `script.json` and `post.txt`.
pub fn write_outputs(
    studio: &Studio,
    ctx: &RenderContext,
    layout: StripLayout,
    options: StripOptions,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let script = studio
        .script()
        .ok_or_else(|| anyhow!("nothing to export yet"))?;
    let (images, strip) = studio.export(layout, options, ctx)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    let mut files = Vec::new();
    for (idx, image) in images.iter().enumerate() {
        files.push(write_file(dir, &format!("panel-{}.png", idx + 1), image)?);
    }
    files.push(write_file(dir, &layout.file_name(), &strip)?);
    let json = serde_json::to_vec_pretty(script).with_context(|| "failed to serialize script")?;
    files.push(write_file(dir, "script.json", &json)?);
    if let Some(post) = studio.post() {
        files.push(write_file(dir, "post.txt", post.to_text().as_bytes())?);
    }
    Ok(files)
}

/// Stacks arbitrary images into `merged-comic.png`.
pub fn merge_files(paths: &[PathBuf], options: StripOptions, dir: &Path) -> Result<PathBuf> {
    let images = paths
        .iter()
        .map(|path| data::load_image(path).map(|image| image.bytes))
        .collect::<Result<Vec<_>>>()?;
    let merged = merge_vertical(&images, options)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    write_file(dir, MERGED_FILE_NAME, &merged)
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(path)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::mock::MockProvider;
    use crate::prompts::{POST_TOOL, SCRIPT_TOOL};
    use crate::script::sample_script;
    use crate::test_util::solid_png;
    use serde_json::json;

    fn scripted_studio() -> Studio {
        Studio::new(&Settings::default())
            .with_topic("고양이")
            .unwrap()
            .with_script(sample_script())
            .unwrap()
    }

    #[tokio::test]
    async fn illustrate_fills_portraits_and_panels() {
        let provider = MockProvider::default();
        let generator = ComicGenerator::new(provider.clone(), &Settings::default());
        let ctx = RenderContext::detached();
        let studio = illustrate(&generator, scripted_studio(), &ctx).await.unwrap();

        assert!(studio.is_complete());
        assert!(studio.script().unwrap().all_portraits_ready());
        let calls = provider.calls();
        assert_eq!(calls.len(), 6);
        assert!(calls[2..].iter().all(|call| call.images == 2));
    }

    #[tokio::test]
    async fn regenerate_panel_redraws_only_that_panel() {
        let provider = MockProvider::default();
        let generator = ComicGenerator::new(provider.clone(), &Settings::default());
        let ctx = RenderContext::detached();
        let studio = regenerate_panel(&generator, &scripted_studio(), 1, &ctx)
            .await
            .unwrap();
        assert_eq!(studio.missing_panels(), vec![0, 2, 3]);
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].user[0].contains(&sample_script().panels[1].description));

        let err = regenerate_panel(&generator, &scripted_studio(), 7, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudioError>(),
            Some(StudioError::InputValidation(_))
        ));
    }

    #[tokio::test]
    async fn post_failure_keeps_the_studio() {
        let generator = ComicGenerator::new(MockProvider::default(), &Settings::default());
        let studio = attach_post(&generator, scripted_studio()).await;
        assert!(studio.post().is_none());

        let generator = ComicGenerator::new(
            MockProvider::default()
                .with_answer(POST_TOOL, json!({"description": "d", "hashtags": ["a"]})),
            &Settings::default(),
        );
        let studio = attach_post(&generator, scripted_studio()).await;
        assert_eq!(studio.post().unwrap().hashtags, vec!["#a"]);
    }

    #[tokio::test]
    async fn continue_story_advances_episode() {
        let provider = MockProvider::default()
            .with_answer(SCRIPT_TOOL, serde_json::to_value(sample_script()).unwrap());
        let generator = ComicGenerator::new(provider, &Settings::default());
        let next = continue_story(&generator, &scripted_studio(), "", ContinuationType::End)
            .await
            .unwrap();
        assert_eq!(next.episode(), 2);
        assert_eq!(next.topic(), "고양이 (continued)");
    }

    #[test]
    fn write_outputs_lays_out_the_export() {
        let ctx = RenderContext::detached();
        let images = (0..4).map(|_| solid_png(120, 90, [30, 60, 90])).collect();
        let studio = scripted_studio()
            .with_panel_images(images, &ctx)
            .unwrap()
            .with_post(script::InstagramPost {
                description: "d".to_string(),
                hashtags: vec!["#cat".to_string()],
            });
        let dir = tempfile::tempdir().unwrap();
        let files =
            write_outputs(&studio, &ctx, StripLayout::Vertical, StripOptions::default(), dir.path())
                .unwrap();
        let names = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "panel-1.png",
                "panel-2.png",
                "panel-3.png",
                "panel-4.png",
                "comic-vertical.png",
                "script.json",
                "post.txt"
            ]
        );
        let strip = std::fs::read(dir.path().join("comic-vertical.png")).unwrap();
        assert_eq!(raster::image_dimensions(&strip).unwrap(), (120, 420));
    }

    #[test]
    fn write_outputs_refuses_incomplete_sets() {
        let ctx = RenderContext::detached();
        let dir = tempfile::tempdir().unwrap();
        let options = StripOptions::default();
        let err = write_outputs(&scripted_studio(), &ctx, StripLayout::Grid, options, dir.path())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudioError>(),
            Some(StudioError::MissingPanel { index: 0 })
        ));
    }

    #[test]
    fn merge_files_writes_merged_comic() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.png");
        let second = dir.path().join("b.png");
        std::fs::write(&first, solid_png(100, 50, [0, 0, 0])).unwrap();
        std::fs::write(&second, solid_png(50, 50, [0, 0, 0])).unwrap();
        let options = StripOptions::default().with_gap(10);
        let merged = merge_files(&[first, second], options, dir.path()).unwrap();
        assert!(merged.ends_with(MERGED_FILE_NAME));
        let bytes = std::fs::read(merged).unwrap();
        assert_eq!(raster::image_dimensions(&bytes).unwrap(), (100, 160));
    }
}
