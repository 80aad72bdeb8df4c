use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tera::{Context as TeraContext, Tera};

use crate::error::{StudioError, StudioResult};
use crate::providers::ToolSpec;
use crate::script::{
    Character, ContinuationType, FullScript, InstagramPost, PANELS_PER_EPISODE, StoryFormat,
};

pub const SCRIPT_TOOL: &str = "deliver_script";
pub const POST_TOOL: &str = "deliver_post";
pub const IDEAS_TOOL: &str = "deliver_ideas";

const SCRIPT_PROMPT: &str = include_str!("templates/script_prompt.tera");
const CONTINUATION_PROMPT: &str = include_str!("templates/continuation_prompt.tera");
const POST_PROMPT: &str = include_str!("templates/post_prompt.tera");
const IDEAS_PROMPT: &str = include_str!("templates/ideas_prompt.tera");
const PANEL_IMAGE_PROMPT: &str = include_str!("templates/panel_image_prompt.tera");
const CHARACTER_SHEET_PROMPT: &str = include_str!("templates/character_sheet_prompt.tera");

const MAX_HASHTAGS: usize = 15;

pub fn script_tool_spec() -> ToolSpec {
    ToolSpec {
        name: SCRIPT_TOOL.to_string(),
        description: "Return the comic script: characters and panels.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "characters": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "description": {"type": "string"}
                        },
                        "required": ["name", "description"]
                    }
                },
                "panels": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "panel": {"type": "integer"},
                            "character": {"type": "string"},
                            "description": {"type": "string"},
                            "dialogue": {"type": "string"}
                        },
                        "required": ["panel", "character", "description", "dialogue"]
                    }
                }
            },
            "required": ["characters", "panels"]
        }),
    }
}

pub fn post_tool_spec() -> ToolSpec {
    ToolSpec {
        name: POST_TOOL.to_string(),
        description: "Return the Instagram description and hashtags.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "hashtags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["description", "hashtags"]
        }),
    }
}

pub fn ideas_tool_spec() -> ToolSpec {
    ToolSpec {
        name: IDEAS_TOOL.to_string(),
        description: "Return the list of comic topic ideas.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "ideas": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["ideas"]
        }),
    }
}

pub fn render_script_prompt(
    topic: &str,
    category: &str,
    format: StoryFormat,
    language: &str,
) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("topic", topic);
    context.insert("category", category);
    context.insert("format", format.as_str());
    context.insert("language", language);
    let panel_rule = match format {
        StoryFormat::Single => format!("exactly {} panels", PANELS_PER_EPISODE),
        StoryFormat::Serial => format!(
            "at least {} panels forming one episode of a series",
            PANELS_PER_EPISODE
        ),
    };
    context.insert("panel_rule", &panel_rule);
    context.insert("serial", &matches!(format, StoryFormat::Serial));
    context.insert("tool_name", SCRIPT_TOOL);
    Tera::one_off(SCRIPT_PROMPT, &context, false).with_context(|| "failed to render script prompt")
}

pub fn render_continuation_prompt(
    topic: &str,
    previous: &FullScript,
    continuation_topic: &str,
    category: &str,
    continuation: ContinuationType,
    language: &str,
) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("topic", topic);
    context.insert("category", category);
    context.insert("continuation_topic", continuation_topic);
    context.insert("language", language);
    context.insert("previous_script", &script_for_prompt(previous)?);
    context.insert("panel_count", &PANELS_PER_EPISODE);
    context.insert("ending", &matches!(continuation, ContinuationType::End));
    context.insert("tool_name", SCRIPT_TOOL);
    Tera::one_off(CONTINUATION_PROMPT, &context, false)
        .with_context(|| "failed to render continuation prompt")
}

pub fn render_post_prompt(topic: &str, script: &FullScript, language: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("topic", topic);
    context.insert("language", language);
    context.insert("script", &script_for_prompt(script)?);
    context.insert("tool_name", POST_TOOL);
    Tera::one_off(POST_PROMPT, &context, false).with_context(|| "failed to render post prompt")
}

pub fn render_ideas_prompt(category: &str, count: usize, language: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("category", category);
    context.insert("count", &count);
    context.insert("language", language);
    context.insert("tool_name", IDEAS_TOOL);
    Tera::one_off(IDEAS_PROMPT, &context, false).with_context(|| "failed to render ideas prompt")
}

pub fn render_panel_image_prompt(
    description: &str,
    characters: &[Character],
    art_style: &str,
) -> Result<String> {
    let listed = characters
        .iter()
        .map(|character| {
            json!({
                "name": character.name,
                "description": character.description,
            })
        })
        .collect::<Vec<_>>();
    let mut context = TeraContext::new();
    context.insert("description", description);
    context.insert("art_style", art_style);
    context.insert("has_characters", &!listed.is_empty());
    context.insert(
        "has_references",
        &characters.iter().any(|character| character.portrait.is_some()),
    );
    context.insert("characters", &listed);
    Tera::one_off(PANEL_IMAGE_PROMPT, &context, false)
        .with_context(|| "failed to render panel image prompt")
}

pub fn render_character_sheet_prompt(description: &str, art_style: &str) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("description", description);
    context.insert("art_style", art_style);
    Tera::one_off(CHARACTER_SHEET_PROMPT, &context, false)
        .with_context(|| "failed to render character sheet prompt")
}

/// Pretty JSON of a script without portrait payloads.
fn script_for_prompt(script: &FullScript) -> Result<String> {
    let mut stripped = script.clone();
    for character in &mut stripped.characters {
        character.portrait = None;
    }
    serde_json::to_string_pretty(&stripped).with_context(|| "failed to serialize script")
}

pub fn parse_script_args(value: Value, format: StoryFormat) -> StudioResult<FullScript> {
    let mut script: FullScript = serde_json::from_value(value)
        .map_err(|err| StudioError::external(format!("malformed script from model: {}", err)))?;

    script.panels.sort_by_key(|panel| panel.panel);
    for (idx, panel) in script.panels.iter_mut().enumerate() {
        panel.panel = idx as u32 + 1;
        panel.description = panel.description.trim().to_string();
        panel.dialogue = panel.dialogue.trim().to_string();
    }
    for character in &mut script.characters {
        character.name = character.name.trim().to_string();
        character.description = character.description.trim().to_string();
        character.portrait = None;
    }
    script.ensure_character_names()?;
    script.validate(format)?;
    Ok(script)
}

#[derive(Debug, Deserialize)]
struct PostArgs {
    description: String,
    #[serde(default)]
    hashtags: HashtagList,
}

/// Models sometimes return hashtags as one space separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HashtagList {
    List(Vec<String>),
    Text(String),
}

impl Default for HashtagList {
    fn default() -> Self {
        HashtagList::List(Vec::new())
    }
}

impl HashtagList {
    fn into_tags(self) -> Vec<String> {
        match self {
            HashtagList::List(tags) => tags,
            HashtagList::Text(text) => text.split_whitespace().map(str::to_string).collect(),
        }
    }
}

pub fn parse_post_args(value: Value) -> StudioResult<InstagramPost> {
    let args: PostArgs = serde_json::from_value(value)
        .map_err(|err| StudioError::external(format!("malformed post from model: {}", err)))?;
    let description = args.description.trim().to_string();
    if description.is_empty() {
        return Err(StudioError::external("post description is empty"));
    }
    Ok(InstagramPost {
        description,
        hashtags: normalize_hashtags(args.hashtags.into_tags()),
    })
}

fn normalize_hashtags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let body: String = tag
            .trim()
            .trim_start_matches('#')
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .collect();
        if body.is_empty() {
            continue;
        }
        let tag = format!("#{}", body);
        if !out.contains(&tag) {
            out.push(tag);
        }
        if out.len() == MAX_HASHTAGS {
            break;
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct IdeasArgs {
    ideas: Vec<String>,
}

pub fn parse_ideas_args(value: Value, count: usize) -> StudioResult<Vec<String>> {
    let args: IdeasArgs = serde_json::from_value(value)
        .map_err(|err| StudioError::external(format!("malformed ideas from model: {}", err)))?;
    let mut ideas: Vec<String> = Vec::new();
    for idea in args.ideas {
        let idea = strip_numbering(idea.trim());
        if idea.is_empty() || ideas.iter().any(|known| known == idea) {
            continue;
        }
        ideas.push(idea.to_string());
    }
    if ideas.is_empty() {
        return Err(StudioError::external("model returned no ideas"));
    }
    ideas.truncate(count.max(1));
    Ok(ideas)
}

fn strip_numbering(idea: &str) -> &str {
    let rest = idea.trim_start_matches(|ch: char| ch.is_ascii_digit());
    if rest.len() == idea.len() {
        return idea.trim_start_matches(['-', '*']).trim();
    }
    match rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
        Some(rest) => rest.trim(),
        None => idea,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Speaker, sample_script};

    #[test]
    fn script_prompt_mentions_format_rules() {
        let single = render_script_prompt("고양이", "일상", StoryFormat::Single, "Korean").unwrap();
        assert!(single.contains("Produce exactly 4 panels."));
        assert!(!single.contains("hook"));
        assert!(single.contains("`deliver_script`"));

        let serial = render_script_prompt("고양이", "일상", StoryFormat::Serial, "Korean").unwrap();
        assert!(serial.contains("at least 4 panels"));
        assert!(serial.contains("End the episode on a hook"));
    }

    #[test]
    fn continuation_prompt_strips_portraits() {
        let mut script = sample_script();
        script.characters[0].portrait = Some("BASE64PORTRAIT".to_string());
        let prompt = render_continuation_prompt(
            "고양이",
            &script,
            "냉장고 대작전",
            "일상",
            ContinuationType::End,
            "Korean",
        )
        .unwrap();
        assert!(prompt.contains("Next episode: 냉장고 대작전"));
        assert!(prompt.contains("final episode"));
        assert!(prompt.contains("\"양하치\""));
        assert!(!prompt.contains("BASE64PORTRAIT"));
    }

    #[test]
    fn panel_image_prompt_lists_characters() {
        let mut script = sample_script();
        let prompt =
            render_panel_image_prompt("cat waves", &script.characters, "명랑만화").unwrap();
        assert!(prompt.contains("- 양하치: a scruffy cat in a hoodie\n"));
        assert!(!prompt.contains("reference sheets"));

        script.characters[1].portrait = Some("AAAA".to_string());
        let prompt =
            render_panel_image_prompt("cat waves", &script.characters, "명랑만화").unwrap();
        assert!(prompt.contains("reference sheets"));

        let prompt = render_panel_image_prompt("empty room", &[], "명랑만화").unwrap();
        assert!(!prompt.contains("Characters in this story"));
    }

    #[test]
    fn parses_and_renumbers_script() {
        let value = json!({
            "characters": [{"name": " 양하치 ", "description": "cat"}],
            "panels": [
                {"panel": 4, "character": "없음", "description": "d4", "dialogue": "none"},
                {"panel": 1, "character": "양하치", "description": "d1", "dialogue": " 안녕 "},
                {"panel": 2, "character": "생각", "description": "d2", "dialogue": "흠"},
                {"panel": 3, "character": "양하치", "description": "d3", "dialogue": "야"}
            ]
        });
        let script = parse_script_args(value, StoryFormat::Single).unwrap();
        assert_eq!(script.characters[0].name, "양하치");
        assert_eq!(script.panels[0].dialogue, "안녕");
        assert_eq!(script.panels[1].speaker, Speaker::Thought);
        assert_eq!(script.panels[3].speaker, Speaker::Narration);
        let numbers: Vec<u32> = script.panels.iter().map(|panel| panel.panel).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn short_single_script_is_a_validation_error() {
        let value = json!({
            "characters": [{"name": "a", "description": "b"}],
            "panels": [{"panel": 1, "character": "a", "description": "d", "dialogue": "x"}]
        });
        assert!(matches!(
            parse_script_args(value, StoryFormat::Single),
            Err(StudioError::InputValidation(_))
        ));
        assert!(matches!(
            parse_script_args(json!({"panels": 3}), StoryFormat::Single),
            Err(StudioError::ExternalCall(_))
        ));
    }

    #[test]
    fn post_hashtags_are_normalized() {
        let post = parse_post_args(json!({
            "description": " 오늘도 간식 사냥 ",
            "hashtags": ["#고양이", "고양이", "daily comic", ""]
        }))
        .unwrap();
        assert_eq!(post.description, "오늘도 간식 사냥");
        assert_eq!(post.hashtags, vec!["#고양이", "#dailycomic"]);

        let post = parse_post_args(json!({"description": "x", "hashtags": "#a #b"})).unwrap();
        assert_eq!(post.hashtags, vec!["#a", "#b"]);
        assert_eq!(post.to_text(), "x\n\n#a #b");
    }

    #[test]
    fn ideas_are_cleaned_and_capped() {
        let ideas = parse_ideas_args(
            json!({"ideas": ["1. 고양이의 하루", "- 월요병", "월요병", "  ", "3) 다이어트"]}),
            2,
        )
        .unwrap();
        assert_eq!(ideas, vec!["고양이의 하루", "월요병"]);
        assert!(parse_ideas_args(json!({"ideas": []}), 5).is_err());
    }
}
