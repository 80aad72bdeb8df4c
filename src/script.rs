use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};

pub const PANELS_PER_EPISODE: usize = 4;

const NARRATION_MARKERS: &[&str] = &["none", "없음", "narration", "나레이션"];
const THOUGHT_MARKERS: &[&str] = &["thought", "생각"];
const NO_DIALOGUE_MARKERS: &[&str] = &["none", "없음"];

/// Who speaks in a panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Speaker {
    Named(String),
    Narration,
    Thought,
}

impl Speaker {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_lowercase();
        if trimmed.is_empty() || NARRATION_MARKERS.contains(&lower.as_str()) {
            Speaker::Narration
        } else if THOUGHT_MARKERS.contains(&lower.as_str()) {
            Speaker::Thought
        } else {
            Speaker::Named(trimmed.to_string())
        }
    }

    /// A named speaker whose wire form reads back as the same name.
    pub fn named(name: &str) -> StudioResult<Self> {
        let trimmed = name.trim();
        match Speaker::parse(trimmed) {
            Speaker::Named(name) => Ok(Speaker::Named(name)),
            _ => Err(StudioError::validation(format!(
                "'{}' is reserved for narration or thought and cannot name a character",
                trimmed
            ))),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Speaker::Named(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Speaker::Named(name) => name.as_str(),
            Speaker::Narration => "none",
            Speaker::Thought => "thought",
        }
    }
}

impl From<String> for Speaker {
    fn from(value: String) -> Self {
        Speaker::parse(&value)
    }
}

impl From<Speaker> for String {
    fn from(value: Speaker) -> Self {
        value.as_wire().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelScript {
    pub panel: u32,
    #[serde(alias = "character")]
    pub speaker: Speaker,
    pub description: String,
    #[serde(default)]
    pub dialogue: String,
}

impl PanelScript {
    /// Dialogue to draw, or `None` when the panel is silent.
    pub fn spoken_text(&self) -> Option<&str> {
        let trimmed = self.dialogue.trim();
        if trimmed.is_empty() || NO_DIALOGUE_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Dialogue prefixed with the speaker's name when one is known.
    pub fn attributed_text(&self) -> Option<String> {
        let text = self.spoken_text()?;
        Some(match self.speaker.name() {
            Some(name) if !text.starts_with(&format!("{}:", name)) => format!("{}: {}", name, text),
            _ => text.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub description: String,
    /// Base64 encoded reference portrait.
    #[serde(default, alias = "sheetImage", skip_serializing_if = "Option::is_none")]
    pub portrait: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullScript {
    pub characters: Vec<Character>,
    pub panels: Vec<PanelScript>,
}

/// Caption and hashtags for sharing a finished strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstagramPost {
    pub description: String,
    pub hashtags: Vec<String>,
}

impl InstagramPost {
    pub fn to_text(&self) -> String {
        if self.hashtags.is_empty() {
            return self.description.clone();
        }
        format!("{}\n\n{}", self.description, self.hashtags.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoryFormat {
    #[default]
    Single,
    Serial,
}

impl StoryFormat {
    pub fn parse(raw: &str) -> StudioResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "single" => Ok(StoryFormat::Single),
            "serial" => Ok(StoryFormat::Serial),
            other => Err(StudioError::validation(format!(
                "unknown story format '{}' (expected single or serial)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryFormat::Single => "single",
            StoryFormat::Serial => "serial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContinuationType {
    #[default]
    Continue,
    End,
}

impl ContinuationType {
    pub fn parse(raw: &str) -> StudioResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "continue" => Ok(ContinuationType::Continue),
            "end" => Ok(ContinuationType::End),
            other => Err(StudioError::validation(format!(
                "unknown continuation type '{}' (expected continue or end)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContinuationType::Continue => "continue",
            ContinuationType::End => "end",
        }
    }
}

impl FullScript {
    pub fn validate(&self, format: StoryFormat) -> StudioResult<()> {
        let count = self.panels.len();
        match format {
            StoryFormat::Single if count != PANELS_PER_EPISODE => {
                return Err(StudioError::validation(format!(
                    "expected {} panels for a single strip, got {}",
                    PANELS_PER_EPISODE, count
                )));
            }
            StoryFormat::Serial if count < PANELS_PER_EPISODE => {
                return Err(StudioError::validation(format!(
                    "expected at least {} panels for a serial episode, got {}",
                    PANELS_PER_EPISODE, count
                )));
            }
            _ => {}
        }
        if self.characters.is_empty() {
            return Err(StudioError::validation("script has no characters"));
        }
        Ok(())
    }

    pub fn ensure_character_names(&self) -> StudioResult<()> {
        if self
            .characters
            .iter()
            .any(|character| character.name.trim().is_empty())
        {
            return Err(StudioError::validation("character names cannot be empty"));
        }
        for character in &self.characters {
            Speaker::named(&character.name)?;
        }
        Ok(())
    }

    /// Renames a character and repoints every panel and dialogue mention.
    pub fn rename_character(&self, index: usize, new_name: &str) -> StudioResult<Self> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StudioError::validation("character name cannot be empty"));
        }
        let speaker = Speaker::named(new_name)?;
        let old_name = self
            .characters
            .get(index)
            .map(|character| character.name.clone())
            .ok_or_else(|| StudioError::validation(format!("no character #{}", index + 1)))?;

        let mut next = self.clone();
        next.characters[index].name = new_name.to_string();
        if old_name.trim().is_empty() {
            return Ok(next);
        }
        for panel in &mut next.panels {
            if panel.speaker.name() == Some(old_name.as_str()) {
                panel.speaker = speaker.clone();
            }
            if panel.dialogue.contains(old_name.as_str()) {
                panel.dialogue = panel.dialogue.replace(old_name.as_str(), new_name);
            }
        }
        Ok(next)
    }

    pub fn set_panel_speaker(&self, panel_index: usize, speaker: Speaker) -> StudioResult<Self> {
        self.check_panel(panel_index)?;
        let speaker = match speaker {
            Speaker::Named(name) => Speaker::named(&name)?,
            other => other,
        };
        let mut next = self.clone();
        next.panels[panel_index].speaker = speaker;
        Ok(next)
    }

    pub fn set_dialogue(&self, panel_index: usize, dialogue: &str) -> StudioResult<Self> {
        self.check_panel(panel_index)?;
        let mut next = self.clone();
        next.panels[panel_index].dialogue = dialogue.to_string();
        Ok(next)
    }

    pub fn set_portrait(&self, index: usize, portrait: Option<String>) -> StudioResult<Self> {
        if index >= self.characters.len() {
            return Err(StudioError::validation(format!("no character #{}", index + 1)));
        }
        let mut next = self.clone();
        next.characters[index].portrait = portrait;
        Ok(next)
    }

    /// Carries portraits over from `previous` for characters that kept their name.
    pub fn inherit_portraits(mut self, previous: &FullScript) -> Self {
        for character in &mut self.characters {
            character.portrait = previous
                .characters
                .iter()
                .find(|old| old.name == character.name)
                .and_then(|old| old.portrait.clone());
        }
        self
    }

    pub fn all_portraits_ready(&self) -> bool {
        self.characters
            .iter()
            .all(|character| character.portrait.is_some())
    }

    fn check_panel(&self, panel_index: usize) -> StudioResult<()> {
        if panel_index >= self.panels.len() {
            return Err(StudioError::validation(format!(
                "no panel #{}",
                panel_index + 1
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_script() -> FullScript {
    FullScript {
        characters: vec![
            Character {
                name: "양하치".to_string(),
                description: "a scruffy cat in a hoodie".to_string(),
                portrait: None,
            },
            Character {
                name: "이제니".to_string(),
                description: "a cheerful office worker".to_string(),
                portrait: None,
            },
        ],
        panels: vec![
            PanelScript {
                panel: 1,
                speaker: Speaker::Named("양하치".to_string()),
                description: "cat waves at the door".to_string(),
                dialogue: "양하치: 안녕".to_string(),
            },
            PanelScript {
                panel: 2,
                speaker: Speaker::Named("이제니".to_string()),
                description: "jenny looks up from the laptop".to_string(),
                dialogue: "또 왔어?".to_string(),
            },
            PanelScript {
                panel: 3,
                speaker: Speaker::Thought,
                description: "cat stares at the fridge".to_string(),
                dialogue: "간식은 어디에...".to_string(),
            },
            PanelScript {
                panel: 4,
                speaker: Speaker::Narration,
                description: "empty fridge".to_string(),
                dialogue: "none".to_string(),
            },
        ],
    }
}
