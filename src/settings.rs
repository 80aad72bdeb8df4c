use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::compose::{DEFAULT_GAP, DEFAULT_MAX_CANVAS_SIDE, StripLayout, StripOptions};
use crate::frame::FrameStyle;
use crate::raster::Palette;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Clone)]
pub struct Settings {
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub min_font_size: f32,
    pub stroke_width: f32,
    pub palette: Palette,
    pub gap: u32,
    pub max_canvas_side: u32,
    pub layout: StripLayout,
    pub frame_style: FrameStyle,
    pub text_model: String,
    pub image_model: String,
    pub language: String,
    pub idea_count: usize,
    pub art_styles: Vec<String>,
    pub categories: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            font_path: None,
            font_family: None,
            min_font_size: 10.0,
            stroke_width: 3.0,
            palette: Palette::default(),
            gap: DEFAULT_GAP,
            max_canvas_side: DEFAULT_MAX_CANVAS_SIDE,
            layout: StripLayout::Grid,
            frame_style: FrameStyle::SpeechBubble,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            language: "Korean".to_string(),
            idea_count: 5,
            art_styles: Vec::new(),
            categories: Vec::new(),
        }
    }
}

impl Settings {
    pub fn strip_options(&self) -> StripOptions {
        StripOptions {
            gap: self.gap,
            max_canvas_side: self.max_canvas_side,
        }
    }

    pub fn default_art_style(&self) -> &str {
        self.art_styles
            .first()
            .map(String::as_str)
            .unwrap_or("cartoon")
    }

    pub fn default_category(&self) -> &str {
        self.categories
            .first()
            .map(String::as_str)
            .unwrap_or("general")
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    render: Option<RenderSettings>,
    compose: Option<ComposeSettings>,
    models: Option<ModelSettings>,
    story: Option<StorySettings>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSettings {
    font_path: Option<String>,
    font_family: Option<String>,
    min_font_size: Option<f32>,
    stroke_width: Option<f32>,
    text_color: Option<String>,
    fill_color: Option<String>,
    stroke_color: Option<String>,
    narration_fill_color: Option<String>,
    narration_text_color: Option<String>,
    caption_text_color: Option<String>,
    caption_stroke_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ComposeSettings {
    gap: Option<u32>,
    max_canvas_side: Option<u32>,
    layout: Option<String>,
    frame_style: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSettings {
    text: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorySettings {
    language: Option<String>,
    idea_count: Option<usize>,
    art_styles: Option<Vec<String>>,
    categories: Option<Vec<String>>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<embedded>"))?)?;
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?)?;
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content).with_context(|| format!("failed to parse settings: {}", path.display()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(render) = incoming.render {
            if let Some(path) = non_empty(render.font_path) {
                self.font_path = Some(path);
            }
            if let Some(family) = non_empty(render.font_family) {
                self.font_family = Some(family);
            }
            if let Some(size) = render.min_font_size
                && size > 0.0
            {
                self.min_font_size = size;
            }
            if let Some(width) = render.stroke_width
                && width >= 0.0
            {
                self.stroke_width = width;
            }
            let palette = &mut self.palette;
            for (slot, value) in [
                (&mut palette.text, render.text_color),
                (&mut palette.fill, render.fill_color),
                (&mut palette.stroke, render.stroke_color),
                (&mut palette.narration_fill, render.narration_fill_color),
                (&mut palette.narration_text, render.narration_text_color),
                (&mut palette.caption_text, render.caption_text_color),
                (&mut palette.caption_stroke, render.caption_stroke_color),
            ] {
                if let Some(color) = non_empty(value) {
                    crate::raster::parse_hex_color(&color)?;
                    *slot = color;
                }
            }
        }
        if let Some(compose) = incoming.compose {
            if let Some(gap) = compose.gap {
                self.gap = gap;
            }
            if let Some(max_side) = compose.max_canvas_side {
                if max_side == 0 {
                    return Err(anyhow!("[compose].max_canvas_side must be positive"));
                }
                self.max_canvas_side = max_side;
            }
            if let Some(layout) = non_empty(compose.layout) {
                self.layout = StripLayout::parse(&layout)?;
            }
            if let Some(style) = non_empty(compose.frame_style) {
                self.frame_style = FrameStyle::parse(&style)?;
            }
        }
        if let Some(models) = incoming.models {
            if let Some(model) = non_empty(models.text) {
                self.text_model = model;
            }
            if let Some(model) = non_empty(models.image) {
                self.image_model = model;
            }
        }
        if let Some(story) = incoming.story {
            if let Some(language) = non_empty(story.language) {
                self.language = language;
            }
            if let Some(count) = story.idea_count
                && count > 0
            {
                self.idea_count = count;
            }
            if let Some(styles) = story.art_styles {
                self.art_styles = styles;
            }
            if let Some(categories) = story.categories {
                self.categories = categories;
            }
        }
        Ok(())
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".comic-strip-studio"))
        }
    })
}
