use serde::Serialize;

use crate::font::{FontMetrics, measure_text_width_px};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub min_font_size: f32,
    pub step: f32,
    pub line_height_ratio: f32,
    pub padding_x: f32,
    pub padding_y: f32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            min_font_size: 10.0,
            step: 1.0,
            line_height_ratio: 1.2,
            padding_x: 8.0,
            padding_y: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLayout {
    pub lines: Vec<String>,
    pub font_size: f32,
    pub line_height: f32,
    /// Set when the text overflows even at the minimum font size.
    pub clipped: bool,
}

impl TextLayout {
    pub fn empty(font_size: f32, options: &FitOptions) -> Self {
        Self {
            lines: Vec::new(),
            font_size,
            line_height: font_size * options.line_height_ratio,
            clipped: false,
        }
    }

    pub fn block_height(&self) -> f32 {
        self.lines.len() as f32 * self.line_height
    }
}

/// Wraps `text` into the box, shrinking the font one step at a time until the
/// block fits or the floor is reached.
pub fn fit_text(
    text: &str,
    shape_width: f32,
    shape_height: f32,
    max_font_size: f32,
    metrics: Option<&FontMetrics>,
    options: &FitOptions,
) -> TextLayout {
    let inner_w = (shape_width - options.padding_x * 2.0).max(1.0);
    let inner_h = (shape_height - options.padding_y * 2.0).max(0.0);
    let floor = options.min_font_size.max(1.0);
    let step = options.step.max(0.1);
    let mut font_size = if max_font_size.is_finite() {
        max_font_size.max(floor)
    } else {
        floor
    };

    loop {
        let lines = wrap_text(text, inner_w, font_size, metrics);
        let line_height = font_size * options.line_height_ratio;
        let fits_height = lines.len() as f32 * line_height <= inner_h;
        let fits_width = lines
            .iter()
            .all(|line| measure_text_width_px(line, font_size, metrics) <= inner_w + 1e-3);
        if fits_height && fits_width {
            return TextLayout {
                lines,
                font_size,
                line_height,
                clipped: false,
            };
        }
        if font_size <= floor {
            return TextLayout {
                lines,
                font_size,
                line_height,
                clipped: true,
            };
        }
        font_size = (font_size - step).max(floor);
    }
}

pub(crate) fn wrap_text(
    text: &str,
    max_width: f32,
    font_size: f32,
    metrics: Option<&FontMetrics>,
) -> Vec<String> {
    let measure = |value: &str| measure_text_width_px(value, font_size, metrics);
    let mut result = Vec::new();
    let mut current = String::new();

    for token in tokenize_text(text) {
        if token == "\n" {
            if !current.trim().is_empty() {
                result.push(current.trim_end().to_string());
            }
            current.clear();
            continue;
        }
        if token == " " {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }

        let candidate = format!("{}{}", current, token);
        if measure(candidate.trim_end()) <= max_width {
            current = candidate;
            continue;
        }
        if !current.trim().is_empty() {
            result.push(current.trim_end().to_string());
        }
        current.clear();
        if measure(&token) <= max_width {
            current.push_str(&token);
            continue;
        }
        for ch in token.chars() {
            let mut candidate = current.clone();
            candidate.push(ch);
            if !current.is_empty() && measure(&candidate) > max_width {
                result.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
    }

    if !current.trim().is_empty() {
        result.push(current.trim_end().to_string());
    }
    result
}

fn is_per_char_script(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF
    )
}

fn tokenize_text(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' || ch.is_whitespace() || is_per_char_script(ch) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            let token = if ch == '\n' {
                "\n".to_string()
            } else if ch.is_whitespace() {
                " ".to_string()
            } else {
                ch.to_string()
            };
            tokens.push(token);
            continue;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
