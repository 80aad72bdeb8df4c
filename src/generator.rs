use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::data::ImageAttachment;
use crate::error::{StudioError, StudioResult};
use crate::prompts::{self, IDEAS_TOOL, POST_TOOL, SCRIPT_TOOL};
use crate::providers::{Provider, ProviderResponse, ProviderUsage, ToolSpec};
use crate::raster;
use crate::script::{Character, ContinuationType, FullScript, InstagramPost, StoryFormat};
use crate::settings::Settings;
use crate::studio::continuation_topic_or_default;

const USER_REQUEST: &str = "Follow the instructions above.";

/// Turns prompts into scripts, posts and pictures through a [`Provider`].
#[derive(Debug, Clone)]
pub struct ComicGenerator<P: Provider> {
    provider: P,
    language: String,
    idea_count: usize,
}

impl<P: Provider> ComicGenerator<P> {
    pub fn new(provider: P, settings: &Settings) -> Self {
        Self {
            provider,
            language: settings.language.clone(),
            idea_count: settings.idea_count,
        }
    }

    pub async fn generate_script(
        &self,
        topic: &str,
        category: &str,
        format: StoryFormat,
    ) -> StudioResult<FullScript> {
        let topic = require("topic", topic)?;
        let prompt = prompts::render_script_prompt(topic, category, format, &self.language)?;
        let response = self
            .call_tool(prompts::script_tool_spec(), prompt, topic.to_string())
            .await?;
        let script = prompts::parse_script_args(response.args, format)?;
        info!(
            topic,
            panels = script.panels.len(),
            characters = script.characters.len(),
            "script generated"
        );
        Ok(script)
    }

    pub async fn generate_continuation_script(
        &self,
        topic: &str,
        script: &FullScript,
        continuation_topic: &str,
        category: &str,
        continuation: ContinuationType,
    ) -> StudioResult<FullScript> {
        let next_topic = continuation_topic_or_default(topic, continuation_topic);
        let prompt = prompts::render_continuation_prompt(
            topic,
            script,
            &next_topic,
            category,
            continuation,
            &self.language,
        )?;
        let response = self
            .call_tool(prompts::script_tool_spec(), prompt, next_topic.clone())
            .await?;
        let next = prompts::parse_script_args(response.args, StoryFormat::Serial)?;
        info!(topic = %next_topic, kind = continuation.as_str(), "continuation generated");
        Ok(next)
    }

    pub async fn generate_instagram_post(
        &self,
        topic: &str,
        script: &FullScript,
    ) -> StudioResult<InstagramPost> {
        let prompt = prompts::render_post_prompt(topic, script, &self.language)?;
        let response = self
            .call_tool(prompts::post_tool_spec(), prompt, topic.to_string())
            .await?;
        prompts::parse_post_args(response.args)
    }

    pub async fn generate_ideas(&self, category: &str) -> StudioResult<Vec<String>> {
        let prompt = prompts::render_ideas_prompt(category, self.idea_count, &self.language)?;
        let response = self
            .call_tool(prompts::ideas_tool_spec(), prompt, category.to_string())
            .await?;
        prompts::parse_ideas_args(response.args, self.idea_count)
    }

    pub async fn generate_character_sheet(
        &self,
        description: &str,
        art_style: &str,
    ) -> StudioResult<Vec<u8>> {
        let description = require("character description", description)?;
        let prompt = prompts::render_character_sheet_prompt(description, art_style)?;
        self.request_image(prompt, Vec::new()).await
    }

    /// Draws one panel, attaching every known portrait as a reference.
    pub async fn generate_image(
        &self,
        panel_description: &str,
        characters: &[Character],
        art_style: &str,
    ) -> StudioResult<Vec<u8>> {
        let description = require("panel description", panel_description)?;
        let mut references = Vec::new();
        for character in characters {
            if let Some(portrait) = &character.portrait {
                let image = ImageAttachment::from_base64(portrait).map_err(|err| {
                    StudioError::validation(format!(
                        "portrait of {} is not a usable image: {:#}",
                        character.name, err
                    ))
                })?;
                references.push(image);
            }
        }
        let prompt = prompts::render_panel_image_prompt(description, characters, art_style)?;
        self.request_image(prompt, references).await
    }

    /// One sheet per character, in order. Fails as a whole on the first error.
    pub async fn generate_character_sheets(
        &self,
        characters: &[Character],
        art_style: &str,
    ) -> StudioResult<Vec<Vec<u8>>> {
        let descriptions = characters
            .iter()
            .map(|character| format!("{}: {}", character.name, character.description))
            .collect::<Vec<_>>();
        try_join_all(
            descriptions
                .iter()
                .map(|description| self.generate_character_sheet(description, art_style)),
        )
        .await
    }

    /// One raw image per panel, in panel order. Fails as a whole on the first error.
    pub async fn generate_panel_images(
        &self,
        script: &FullScript,
        art_style: &str,
    ) -> StudioResult<Vec<Vec<u8>>> {
        try_join_all(script.panels.iter().map(|panel| {
            self.generate_image(&panel.description, &script.characters, art_style)
        }))
        .await
    }

    async fn call_tool(
        &self,
        tool: ToolSpec,
        system_prompt: String,
        user_input: String,
    ) -> StudioResult<ProviderResponse> {
        let tool_name = tool.name.clone();
        let user_input = if user_input.trim().is_empty() {
            USER_REQUEST.to_string()
        } else {
            user_input
        };
        let response = self
            .provider
            .clone()
            .register_tool(tool)
            .append_system_input(system_prompt)
            .append_user_input(user_input)
            .call_tool(&tool_name)
            .await
            .map_err(StudioError::from_external)?;
        log_usage(&tool_name, response.model.as_deref(), response.usage.as_ref());
        Ok(response)
    }

    async fn request_image(
        &self,
        prompt: String,
        references: Vec<ImageAttachment>,
    ) -> StudioResult<Vec<u8>> {
        let mut provider = self.provider.clone().append_user_input(prompt);
        for reference in references {
            provider = provider.append_user_image(reference);
        }
        let response = provider
            .generate_image()
            .await
            .map_err(StudioError::from_external)?;
        log_usage("image", response.model.as_deref(), response.usage.as_ref());
        let bytes = response.image.bytes;
        match raster::image_dimensions(&bytes) {
            Ok((width, height)) => {
                debug!(width, height, "image received");
                Ok(bytes)
            }
            Err(err) => {
                warn!(error = %err, "model returned an undecodable image");
                Err(StudioError::external(format!(
                    "model returned an undecodable image: {:#}",
                    err
                )))
            }
        }
    }
}

fn require<'a>(label: &str, value: &'a str) -> StudioResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StudioError::validation(format!("{} is empty", label)));
    }
    Ok(trimmed)
}

fn log_usage(call: &str, model: Option<&str>, usage: Option<&ProviderUsage>) {
    debug!(
        call,
        model = model.unwrap_or("unknown"),
        prompt_tokens = usage.and_then(|usage| usage.prompt_tokens),
        completion_tokens = usage.and_then(|usage| usage.completion_tokens),
        "model call finished"
    );
}


#[cfg(test)]
mod tests {
    use super::mock::MockProvider;
    use super::*;
    use crate::data::encode_base64;
    use crate::script::sample_script;
    use crate::test_util::solid_png;
    use serde_json::json;

    fn script_answer() -> serde_json::Value {
        json!({
            "characters": [
                {"name": "양하치", "description": "a scruffy cat"},
                {"name": "이제니", "description": "an office worker"}
            ],
            "panels": [
                {"panel": 1, "character": "양하치", "description": "d1", "dialogue": "안녕"},
                {"panel": 2, "character": "이제니", "description": "d2", "dialogue": "또 왔어?"},
                {"panel": 3, "character": "생각", "description": "d3", "dialogue": "간식..."},
                {"panel": 4, "character": "없음", "description": "d4", "dialogue": "none"}
            ]
        })
    }

    fn generator(provider: MockProvider) -> ComicGenerator<MockProvider> {
        ComicGenerator::new(provider, &Settings::default())
    }

    #[tokio::test]
    async fn generates_script_through_forced_tool() {
        let provider = MockProvider::default().with_answer(SCRIPT_TOOL, script_answer());
        let generator = generator(provider.clone());
        let script = generator
            .generate_script("고양이의 하루", "일상", StoryFormat::Single)
            .await
            .unwrap();
        assert_eq!(script.panels.len(), 4);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tools, vec![SCRIPT_TOOL.to_string()]);
        assert!(calls[0].system[0].contains("Topic: 고양이의 하루"));
        assert!(calls[0].system[0].contains("in Korean"));
    }

    #[tokio::test]
    async fn empty_topic_is_rejected_before_calling_out() {
        let provider = MockProvider::default().with_answer(SCRIPT_TOOL, script_answer());
        let err = generator(provider.clone())
            .generate_script("  ", "일상", StoryFormat::Single)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::InputValidation(_)));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_failures_become_external_errors() {
        let err = generator(MockProvider::default())
            .generate_ideas("일상")
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::ExternalCall(_)));
    }

    #[tokio::test]
    async fn panel_images_attach_portraits() {
        let provider = MockProvider::default();
        let mut script = sample_script();
        script.characters[0].portrait = Some(encode_base64(&solid_png(4, 4, [0, 0, 0])));

        let images = generator(provider.clone())
            .generate_panel_images(&script, "명랑만화")
            .await
            .unwrap();
        assert_eq!(images.len(), 4);
        assert_eq!(raster::image_dimensions(&images[0]).unwrap(), (16, 12));

        let calls = provider.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|call| call.images == 1));
        assert!(calls[0].user[0].contains("cat waves at the door"));
    }

    #[tokio::test]
    async fn one_failed_panel_fails_the_batch() {
        let provider = MockProvider::default().failing_images_containing("empty fridge");
        let err = generator(provider)
            .generate_panel_images(&sample_script(), "명랑만화")
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::ExternalCall(_)));
        assert!(err.to_string().contains("image quota exceeded"));
    }

    #[tokio::test]
    async fn character_sheets_follow_character_order() {
        let provider = MockProvider::default();
        let sheets = generator(provider.clone())
            .generate_character_sheets(&sample_script().characters, "명랑만화")
            .await
            .unwrap();
        assert_eq!(sheets.len(), 2);
        let calls = provider.calls();
        assert!(calls[0].user[0].contains("양하치: a scruffy cat in a hoodie"));
        assert!(calls[1].user[0].contains("이제니: a cheerful office worker"));
    }

    #[tokio::test]
    async fn continuation_defaults_its_topic() {
        let provider = MockProvider::default().with_answer(SCRIPT_TOOL, script_answer());
        let next = generator(provider.clone())
            .generate_continuation_script(
                "고양이",
                &sample_script(),
                "",
                "일상",
                ContinuationType::Continue,
            )
            .await
            .unwrap();
        assert_eq!(next.panels.len(), 4);
        assert!(provider.calls()[0].system[0].contains("Next episode: 고양이 (continued)"));
    }

    #[tokio::test]
    async fn post_and_ideas_are_parsed() {
        let provider = MockProvider::default()
            .with_answer(
                POST_TOOL,
                json!({"description": "간식 사냥", "hashtags": ["cat", "#comic"]}),
            )
            .with_answer(IDEAS_TOOL, json!({"ideas": ["월요병", "다이어트"]}));
        let generator = generator(provider);
        let post = generator
            .generate_instagram_post("고양이", &sample_script())
            .await
            .unwrap();
        assert_eq!(post.hashtags, vec!["#cat", "#comic"]);
        let ideas = generator.generate_ideas("일상").await.unwrap();
        assert_eq!(ideas, vec!["월요병", "다이어트"]);
    }
}
