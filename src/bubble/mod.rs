mod fit;
mod geometry;
mod render;

use serde::{Deserialize, Serialize};

use crate::error::{StudioError, StudioResult};

pub use fit::{FitOptions, TextLayout, fit_text};
pub use geometry::{
    MIN_BUBBLE_SIZE, ResizeHandle, clamp_rect, compute_default_bubble, nearest_tail_anchor,
    resize_rect, shape_rect, tail_anchor_point, translate_rect,
};
pub(crate) use geometry::{TailGeometry, default_max_font_size, tail_geometry, text_area};
pub use render::{bubble_text, layout_bubble, render_bubble};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned box in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Same center, each side scaled by `factor`.
    pub fn scaled(&self, factor: f32) -> Rect {
        let width = self.width * factor;
        let height = self.height * factor;
        let center = self.center();
        Rect::new(
            center.x - width * 0.5,
            center.y - height * 0.5,
            width,
            height,
        )
    }

    pub fn within(&self, width: f32, height: f32) -> bool {
        const EPS: f32 = 1e-3;
        self.x >= -EPS
            && self.y >= -EPS
            && self.right() <= width + EPS
            && self.bottom() <= height + EPS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleStyle {
    Speech,
    Thought,
    Shout,
    Narration,
    Caption,
}

impl BubbleStyle {
    pub const ALL: [BubbleStyle; 5] = [
        BubbleStyle::Speech,
        BubbleStyle::Thought,
        BubbleStyle::Shout,
        BubbleStyle::Narration,
        BubbleStyle::Caption,
    ];

    pub fn parse(raw: &str) -> StudioResult<Self> {
        let lower = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str() == lower)
            .ok_or_else(|| StudioError::validation(format!("unknown bubble style '{}'", raw)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BubbleStyle::Speech => "speech",
            BubbleStyle::Thought => "thought",
            BubbleStyle::Shout => "shout",
            BubbleStyle::Narration => "narration",
            BubbleStyle::Caption => "caption",
        }
    }

    /// Speech and thought bubbles name their speaker before the dialogue.
    pub fn prefixes_speaker(&self) -> bool {
        matches!(self, BubbleStyle::Speech | BubbleStyle::Thought)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

/// Edge-relative point the tail grows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TailAnchor {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
    LeftTop,
    LeftCenter,
    LeftBottom,
    RightTop,
    RightCenter,
    RightBottom,
}

impl TailAnchor {
    pub const ALL: [TailAnchor; 12] = [
        TailAnchor::TopLeft,
        TailAnchor::TopCenter,
        TailAnchor::TopRight,
        TailAnchor::BottomLeft,
        TailAnchor::BottomCenter,
        TailAnchor::BottomRight,
        TailAnchor::LeftTop,
        TailAnchor::LeftCenter,
        TailAnchor::LeftBottom,
        TailAnchor::RightTop,
        TailAnchor::RightCenter,
        TailAnchor::RightBottom,
    ];

    pub fn parse(raw: &str) -> StudioResult<Self> {
        let lower = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|anchor| anchor.as_str() == lower)
            .ok_or_else(|| StudioError::validation(format!("unknown tail anchor '{}'", raw)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TailAnchor::TopLeft => "top-left",
            TailAnchor::TopCenter => "top-center",
            TailAnchor::TopRight => "top-right",
            TailAnchor::BottomLeft => "bottom-left",
            TailAnchor::BottomCenter => "bottom-center",
            TailAnchor::BottomRight => "bottom-right",
            TailAnchor::LeftTop => "left-top",
            TailAnchor::LeftCenter => "left-center",
            TailAnchor::LeftBottom => "left-bottom",
            TailAnchor::RightTop => "right-top",
            TailAnchor::RightCenter => "right-center",
            TailAnchor::RightBottom => "right-bottom",
        }
    }

    pub fn edge(&self) -> Edge {
        match self {
            TailAnchor::TopLeft | TailAnchor::TopCenter | TailAnchor::TopRight => Edge::Top,
            TailAnchor::BottomLeft | TailAnchor::BottomCenter | TailAnchor::BottomRight => {
                Edge::Bottom
            }
            TailAnchor::LeftTop | TailAnchor::LeftCenter | TailAnchor::LeftBottom => Edge::Left,
            TailAnchor::RightTop | TailAnchor::RightCenter | TailAnchor::RightBottom => Edge::Right,
        }
    }

    /// Position along the edge, 0 at the top/left end.
    pub fn fraction(&self) -> f32 {
        match self {
            TailAnchor::TopLeft
            | TailAnchor::BottomLeft
            | TailAnchor::LeftTop
            | TailAnchor::RightTop => 0.25,
            TailAnchor::TopCenter
            | TailAnchor::BottomCenter
            | TailAnchor::LeftCenter
            | TailAnchor::RightCenter => 0.5,
            TailAnchor::TopRight
            | TailAnchor::BottomRight
            | TailAnchor::LeftBottom
            | TailAnchor::RightBottom => 0.75,
        }
    }
}

/// Editable state of one panel's speech container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BubbleConfig {
    pub style: BubbleStyle,
    pub rect: Rect,
    pub tail: TailAnchor,
    pub max_font_size: f32,
}

impl BubbleConfig {
    pub fn with_style(mut self, style: BubbleStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_tail(mut self, tail: TailAnchor) -> Self {
        self.tail = tail;
        self
    }

    /// Re-establishes the size and bounds invariants for an image.
    pub fn clamped(mut self, image_width: u32, image_height: u32) -> Self {
        self.rect = clamp_rect(self.rect, image_width as f32, image_height as f32);
        if !self.max_font_size.is_finite() || self.max_font_size <= 0.0 {
            self.max_font_size = default_max_font_size(image_height as f32);
        }
        self
    }
}
