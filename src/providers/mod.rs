use anyhow::{Result, anyhow};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::data::ImageAttachment;

mod gemini;

pub use gemini::Gemini;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub args: serde_json::Value,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub image: ImageAttachment,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Copy)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Image(ImageAttachment),
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user_image(image: ImageAttachment) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Image(image)],
        }
    }
}

pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<ProviderResponse>> + Send>>;
pub type ImageFuture = Pin<Box<dyn Future<Output = Result<ImageResponse>> + Send>>;

/// Conversation builder for one model call. Every call consumes the builder,
/// so clones of a configured provider can run concurrently.
pub trait Provider: Clone + Send + Sync {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn append_user_image(self, image: ImageAttachment) -> Self;
    fn register_tool(self, tool: ToolSpec) -> Self;
    /// Forces a call of `tool_name` and returns its arguments.
    fn call_tool(self, tool_name: &str) -> ProviderFuture;
    /// Asks the image model for a single picture.
    fn generate_image(self) -> ImageFuture;
}

pub fn build_provider(key: String, text_model: &str, image_model: &str) -> Gemini {
    Gemini::new(key)
        .with_model(text_model)
        .with_image_model(image_model)
}

pub fn resolve_key(override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key
        && !key.trim().is_empty()
    {
        return Ok(key.to_string());
    }
    get_env("GEMINI_API_KEY")
        .or_else(|| get_env("GOOGLE_API_KEY"))
        .ok_or_else(|| anyhow!("API key not found (checked --key, GEMINI_API_KEY, GOOGLE_API_KEY)"))
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
