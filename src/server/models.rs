use serde::{Deserialize, Serialize};

use crate::bubble::{BubbleConfig, TextLayout};
use crate::script::{Character, FullScript, PanelScript};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct IdeasRequest {
    pub(crate) category: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct IdeasResponse {
    pub(crate) ideas: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScriptRequest {
    pub(crate) topic: String,
    #[serde(default)]
    pub(crate) category: Option<String>,
    #[serde(default)]
    pub(crate) format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CharacterSheetRequest {
    pub(crate) description: String,
    #[serde(default)]
    pub(crate) art_style: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PanelImageRequest {
    pub(crate) description: String,
    #[serde(default)]
    pub(crate) characters: Vec<Character>,
    #[serde(default)]
    pub(crate) art_style: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostRequest {
    pub(crate) topic: String,
    pub(crate) script: FullScript,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContinuationRequest {
    pub(crate) topic: String,
    pub(crate) script: FullScript,
    #[serde(default)]
    pub(crate) continuation_topic: Option<String>,
    #[serde(default)]
    pub(crate) category: Option<String>,
    #[serde(default)]
    pub(crate) continuation_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ContinuationResponse {
    pub(crate) topic: String,
    pub(crate) script: FullScript,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DefaultBubbleRequest {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) panel: PanelScript,
}

#[derive(Debug, Serialize)]
pub(crate) struct BubbleResponse {
    pub(crate) bubble: BubbleConfig,
    pub(crate) layout: TextLayout,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BubbleRenderRequest {
    pub(crate) image: String,
    pub(crate) panel: PanelScript,
    #[serde(default)]
    pub(crate) bubble: Option<BubbleConfig>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BubbleRenderResponse {
    pub(crate) image: String,
    pub(crate) mime: String,
    pub(crate) bubble: BubbleConfig,
    pub(crate) layout: TextLayout,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FrameRequest {
    pub(crate) image: String,
    pub(crate) panel: PanelScript,
    pub(crate) frame_style: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ComposeRequest {
    pub(crate) images: Vec<Option<String>>,
    #[serde(default)]
    pub(crate) layout: Option<String>,
    #[serde(default)]
    pub(crate) gap: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MergeRequest {
    pub(crate) images: Vec<String>,
    #[serde(default)]
    pub(crate) gap: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ImagePayload {
    pub(crate) image: String,
    pub(crate) mime: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
