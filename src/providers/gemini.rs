use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ImageFuture, ImageResponse, Message, MessagePart, MessageRole, Provider, ProviderFuture,
    ProviderResponse, ProviderUsage, ToolSpec,
};
use crate::data::ImageAttachment;
use crate::settings::{DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    image_model: String,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl Gemini {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.image_model = model;
        }
        self
    }

    fn find_tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

impl Provider for Gemini {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_image(mut self, image: ImageAttachment) -> Self {
        self.messages.push(Message::user_image(image));
        self
    }

    fn register_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    fn call_tool(self, tool_name: &str) -> ProviderFuture {
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            let tool = self
                .find_tool(&tool_name)
                .cloned()
                .ok_or_else(|| anyhow!("tool '{}' not registered", tool_name))?;
            let body = build_tool_request(self.messages, &tool);
            debug!(model = %self.model, tool = %tool_name, "calling Gemini tool");
            let text = post_generate(&self.key, &self.model, &body).await?;
            extract_tool_response(&text, &tool_name, &self.model)
        })
    }

    fn generate_image(self) -> ImageFuture {
        Box::pin(async move {
            let body = build_image_request(self.messages);
            debug!(model = %self.image_model, "requesting Gemini image");
            let text = post_generate(&self.key, &self.image_model, &body).await?;
            extract_image_response(&text, &self.image_model)
        })
    }
}

async fn post_generate(key: &str, model: &str, body: &Value) -> Result<String> {
    let client = reqwest::Client::new();
    let url = format!("{}/{}:generateContent", BASE_URL, model);
    let response = client
        .post(&url)
        .header("x-goog-api-key", key)
        .json(body)
        .send()
        .await?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        return Ok(text);
    }
    Err(anyhow!(
        "Gemini API error ({}): {}",
        status,
        extract_gemini_error(&text).unwrap_or(text)
    ))
}

fn split_messages(messages: Vec<Message>) -> (Value, Vec<Value>) {
    let (system_inputs, user_inputs): (Vec<Message>, Vec<Message>) = messages
        .into_iter()
        .partition(|message| matches!(message.role, MessageRole::System));

    let system_instruction = system_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .filter_map(|part| match part {
            MessagePart::Text(text) => Some(text),
            MessagePart::Image(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let parts = user_inputs
        .into_iter()
        .flat_map(|message| message.parts)
        .map(|part| match part {
            MessagePart::Text(text) => json!({"text": text}),
            MessagePart::Image(image) => json!({
                "inline_data": {
                    "mime_type": image.mime,
                    "data": image.to_base64()
                }
            }),
        })
        .collect::<Vec<_>>();

    let system_instruction = if system_instruction.trim().is_empty() {
        Value::Null
    } else {
        json!({"parts": [{"text": system_instruction}]})
    };
    (system_instruction, vec![json!({"role": "user", "parts": parts})])
}

fn build_tool_request(messages: Vec<Message>, tool: &ToolSpec) -> Value {
    let (system_instruction, contents) = split_messages(messages);
    json!({
        "contents": contents,
        "systemInstruction": system_instruction,
        "tools": [
            {
                "function_declarations": [
                    {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters
                    }
                ]
            }
        ],
        "tool_config": {
            "function_calling_config": {
                "mode": "ANY",
                "allowed_function_names": [tool.name]
            }
        }
    })
}

fn build_image_request(messages: Vec<Message>) -> Value {
    let (system_instruction, contents) = split_messages(messages);
    json!({
        "contents": contents,
        "systemInstruction": system_instruction,
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"]
        }
    })
}

fn extract_tool_response(
    text: &str,
    tool_name: &str,
    fallback_model: &str,
) -> Result<ProviderResponse> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let candidate = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;

    for part in &candidate.parts {
        if let Some(function_call) = &part.function_call
            && function_call.name == tool_name
        {
            return Ok(ProviderResponse {
                args: function_call.args.clone(),
                model: resolve_model(payload.model_version, fallback_model),
                usage: payload.usage_metadata.map(GeminiUsage::into_usage),
            });
        }
    }

    Err(anyhow!("no tool call returned from Gemini"))
}

fn extract_image_response(text: &str, fallback_model: &str) -> Result<ImageResponse> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let candidate = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;

    let mut notes = Vec::new();
    for part in &candidate.parts {
        if let Some(inline) = &part.inline_data {
            let bytes = BASE64
                .decode(inline.data.trim())
                .map_err(|err| anyhow!("Gemini returned invalid image data: {}", err))?;
            let image = ImageAttachment::from_bytes(bytes)?;
            return Ok(ImageResponse {
                image,
                model: resolve_model(payload.model_version, fallback_model),
                usage: payload.usage_metadata.map(GeminiUsage::into_usage),
            });
        }
        if let Some(text) = &part.text
            && !text.trim().is_empty()
        {
            notes.push(text.trim().to_string());
        }
    }

    if notes.is_empty() {
        Err(anyhow!("no image returned from Gemini"))
    } else {
        Err(anyhow!("no image returned from Gemini: {}", notes.join(" ")))
    }
}

fn resolve_model(version: Option<String>, fallback: &str) -> Option<String> {
    version
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback.to_string()))
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut parts = Vec::new();
    if let Some(message) = error.message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(status) = error.status
        && !status.trim().is_empty()
    {
        parts.push(format!("type: {}", status));
    }
    if let Some(code) = error.code {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        Some("unknown error".to_string())
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

impl GeminiUsage {
    fn into_usage(self) -> ProviderUsage {
        ProviderUsage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct GeminiInlineData {
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PNG_MIME, encode_base64};
    use crate::test_util::solid_png;
    use insta::assert_json_snapshot;

    #[test]
    fn gemini_extract_tool_args_snapshot() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/gemini_tool_response.json"
        ));
        let response = extract_tool_response(payload, "deliver_script", "gemini-2.5-flash").unwrap();
        assert_json_snapshot!(response);
    }

    #[test]
    fn missing_tool_call_is_an_error() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#;
        let err = extract_tool_response(payload, "deliver_script", "m").unwrap_err();
        assert!(err.to_string().contains("no tool call"));
    }

    #[test]
    fn extracts_inline_image() {
        let png = solid_png(8, 8, [1, 2, 3]);
        let payload = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your panel."},
                        {"inlineData": {"mimeType": "image/png", "data": encode_base64(&png)}}
                    ]
                }
            }]
        })
        .to_string();
        let response = extract_image_response(&payload, "image-model").unwrap();
        assert_eq!(response.image.bytes, png);
        assert_eq!(response.image.mime, PNG_MIME);
        assert_eq!(response.model.as_deref(), Some("image-model"));
    }

    #[test]
    fn text_only_image_reply_surfaces_the_text() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"I can't draw that."}]}}]}"#;
        let err = extract_image_response(payload, "image-model").unwrap_err();
        assert!(err.to_string().contains("I can't draw that."));
    }

    #[test]
    fn tool_request_forces_the_tool() {
        let tool = ToolSpec {
            name: "deliver_ideas".to_string(),
            description: "Return ideas".to_string(),
            parameters: json!({"type": "object"}),
        };
        let messages = vec![
            Message::system("be funny".to_string()),
            Message::user("cats".to_string()),
            Message::user_image(ImageAttachment::from_bytes(solid_png(1, 1, [0, 0, 0])).unwrap()),
        ];
        let body = build_tool_request(messages, &tool);
        assert_eq!(body["tool_config"]["function_calling_config"]["mode"], "ANY");
        assert_eq!(
            body["tool_config"]["function_calling_config"]["allowed_function_names"][0],
            "deliver_ideas"
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be funny");
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inline_data"]["mime_type"], PNG_MIME);
    }

    #[test]
    fn image_request_asks_for_image_modality() {
        let body = build_image_request(vec![Message::user("draw a cat".to_string())]);
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
        assert!(body["systemInstruction"].is_null());
    }

    #[test]
    fn api_errors_are_summarized() {
        let body = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(
            extract_gemini_error(body).as_deref(),
            Some("quota | type: RESOURCE_EXHAUSTED | code: 429")
        );
    }
}
