use crate::script::{PanelScript, Speaker};

use super::{BubbleConfig, BubbleStyle, Edge, Point, Rect, TailAnchor};

pub const MIN_BUBBLE_SIZE: f32 = 20.0;

const DEFAULT_WIDTH_RATIO: f32 = 0.4;
const DEFAULT_HEIGHT_RATIO: f32 = 0.22;
const MARGIN_RATIO: f32 = 0.04;
const TAIL_SPREAD: f32 = 0.22;
const TAIL_SKEW: f32 = 0.45;

pub(crate) fn default_max_font_size(image_height: f32) -> f32 {
    (image_height * 0.045).clamp(14.0, 48.0)
}

/// Default bubble for a freshly generated panel image.
///
/// Odd panels put the bubble in the top-left corner and even panels in the
/// top-right corner, so a 2x2 strip reads in zig-zag order. The tail points
/// down because the speaker's position in the art is unknown.
pub fn compute_default_bubble(
    image_width: u32,
    image_height: u32,
    panel: &PanelScript,
) -> BubbleConfig {
    let bounds_w = image_width.max(1) as f32;
    let bounds_h = image_height.max(1) as f32;
    let width = bounds_w * DEFAULT_WIDTH_RATIO;
    let height = bounds_h * DEFAULT_HEIGHT_RATIO;
    let margin_x = bounds_w * MARGIN_RATIO;
    let margin_y = bounds_h * MARGIN_RATIO;

    let x = if panel.panel % 2 == 0 {
        bounds_w - width - margin_x
    } else {
        margin_x
    };
    let style = match panel.speaker {
        Speaker::Thought => BubbleStyle::Thought,
        _ => BubbleStyle::Speech,
    };

    BubbleConfig {
        style,
        rect: clamp_rect(Rect::new(x, margin_y, width, height), bounds_w, bounds_h),
        tail: TailAnchor::BottomCenter,
        max_font_size: default_max_font_size(bounds_h),
    }
}

/// Keeps a rect inside the image and at least the minimum size.
pub fn clamp_rect(rect: Rect, bounds_w: f32, bounds_h: f32) -> Rect {
    let min_w = MIN_BUBBLE_SIZE.min(bounds_w);
    let min_h = MIN_BUBBLE_SIZE.min(bounds_h);
    let width = sanitize(rect.width, min_w).clamp(min_w, bounds_w);
    let height = sanitize(rect.height, min_h).clamp(min_h, bounds_h);
    let x = sanitize(rect.x, 0.0).clamp(0.0, (bounds_w - width).max(0.0));
    let y = sanitize(rect.y, 0.0).clamp(0.0, (bounds_h - height).max(0.0));
    Rect::new(x, y, width, height)
}

fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

pub fn translate_rect(rect: Rect, dx: f32, dy: f32, bounds_w: f32, bounds_h: f32) -> Rect {
    clamp_rect(
        Rect::new(rect.x + dx, rect.y + dy, rect.width, rect.height),
        bounds_w,
        bounds_h,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeHandle {
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
}

impl ResizeHandle {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "top-left" | "nw" => Some(ResizeHandle::TopLeft),
            "top" | "n" => Some(ResizeHandle::Top),
            "top-right" | "ne" => Some(ResizeHandle::TopRight),
            "right" | "e" => Some(ResizeHandle::Right),
            "bottom-right" | "se" => Some(ResizeHandle::BottomRight),
            "bottom" | "s" => Some(ResizeHandle::Bottom),
            "bottom-left" | "sw" => Some(ResizeHandle::BottomLeft),
            "left" | "w" => Some(ResizeHandle::Left),
            _ => None,
        }
    }

    fn moves_left(&self) -> bool {
        matches!(
            self,
            ResizeHandle::TopLeft | ResizeHandle::Left | ResizeHandle::BottomLeft
        )
    }

    fn moves_right(&self) -> bool {
        matches!(
            self,
            ResizeHandle::TopRight | ResizeHandle::Right | ResizeHandle::BottomRight
        )
    }

    fn moves_top(&self) -> bool {
        matches!(
            self,
            ResizeHandle::TopLeft | ResizeHandle::Top | ResizeHandle::TopRight
        )
    }

    fn moves_bottom(&self) -> bool {
        matches!(
            self,
            ResizeHandle::BottomLeft | ResizeHandle::Bottom | ResizeHandle::BottomRight
        )
    }
}

/// Drags one handle by `(dx, dy)`. A drag that would collapse or invert the
/// rect pins it at the minimum size against the opposite edge.
pub fn resize_rect(
    rect: Rect,
    handle: ResizeHandle,
    dx: f32,
    dy: f32,
    bounds_w: f32,
    bounds_h: f32,
) -> Rect {
    let mut left = rect.x;
    let mut right = rect.right();
    let mut top = rect.y;
    let mut bottom = rect.bottom();

    if handle.moves_left() {
        left = (left + dx).max(0.0);
        if right - left < MIN_BUBBLE_SIZE {
            left = right - MIN_BUBBLE_SIZE;
        }
    }
    if handle.moves_right() {
        right = (right + dx).min(bounds_w);
        if right - left < MIN_BUBBLE_SIZE {
            right = left + MIN_BUBBLE_SIZE;
        }
    }
    if handle.moves_top() {
        top = (top + dy).max(0.0);
        if bottom - top < MIN_BUBBLE_SIZE {
            top = bottom - MIN_BUBBLE_SIZE;
        }
    }
    if handle.moves_bottom() {
        bottom = (bottom + dy).min(bounds_h);
        if bottom - top < MIN_BUBBLE_SIZE {
            bottom = top + MIN_BUBBLE_SIZE;
        }
    }

    clamp_rect(
        Rect::new(left, top, right - left, bottom - top),
        bounds_w,
        bounds_h,
    )
}

/// Rect a style actually occupies; narration and caption ignore the bubble's
/// position and pin to the top band and the bottom-center respectively.
pub fn shape_rect(bubble: &BubbleConfig, bounds_w: f32, bounds_h: f32) -> Rect {
    match bubble.style {
        BubbleStyle::Narration => Rect::new(0.0, 0.0, bounds_w, bubble.rect.height.min(bounds_h)),
        BubbleStyle::Caption => {
            let width = bubble.rect.width.min(bounds_w);
            let height = bubble.rect.height.min(bounds_h);
            let margin = bounds_h * MARGIN_RATIO;
            Rect::new(
                (bounds_w - width) * 0.5,
                (bounds_h - height - margin).max(0.0),
                width,
                height,
            )
        }
        _ => bubble.rect,
    }
}

/// Box the text is fitted into: the inscribed area of the drawn shape.
pub(crate) fn text_area(style: BubbleStyle, shape: Rect) -> Rect {
    match style {
        BubbleStyle::Speech | BubbleStyle::Thought => shape.scaled(0.74),
        BubbleStyle::Shout => shape.scaled(0.62),
        BubbleStyle::Narration | BubbleStyle::Caption => shape,
    }
}

pub fn tail_anchor_point(rect: Rect, anchor: TailAnchor) -> Point {
    let t = anchor.fraction();
    match anchor.edge() {
        Edge::Top => Point::new(rect.x + rect.width * t, rect.y),
        Edge::Bottom => Point::new(rect.x + rect.width * t, rect.bottom()),
        Edge::Left => Point::new(rect.x, rect.y + rect.height * t),
        Edge::Right => Point::new(rect.right(), rect.y + rect.height * t),
    }
}

/// Anchor closest to a pointer position; ties go to the earlier anchor.
pub fn nearest_tail_anchor(rect: Rect, x: f32, y: f32) -> TailAnchor {
    let pointer = Point::new(x, y);
    let mut best = TailAnchor::BottomCenter;
    let mut best_distance = f32::INFINITY;
    for anchor in TailAnchor::ALL {
        let distance = tail_anchor_point(rect, anchor).distance(&pointer);
        if distance < best_distance {
            best = anchor;
            best_distance = distance;
        }
    }
    best
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TailGeometry {
    /// Point on the ellipse the tail grows from.
    pub(crate) root: Point,
    pub(crate) base_a: Point,
    pub(crate) base_b: Point,
    pub(crate) tip: Point,
}

/// Tail triangle for an elliptical bubble inscribed in `rect`.
pub(crate) fn tail_geometry(
    rect: Rect,
    anchor: TailAnchor,
    bounds_w: f32,
    bounds_h: f32,
) -> TailGeometry {
    let center = rect.center();
    let rx = (rect.width * 0.5).max(1.0);
    let ry = (rect.height * 0.5).max(1.0);
    let target = tail_anchor_point(rect, anchor);
    let phi = ((target.y - center.y) / ry).atan2((target.x - center.x) / rx);
    let on_ellipse = |angle: f32| Point::new(center.x + rx * angle.cos(), center.y + ry * angle.sin());

    let (normal, tangent) = match anchor.edge() {
        Edge::Top => ((0.0, -1.0), (1.0, 0.0)),
        Edge::Bottom => ((0.0, 1.0), (1.0, 0.0)),
        Edge::Left => ((-1.0, 0.0), (0.0, 1.0)),
        Edge::Right => ((1.0, 0.0), (0.0, 1.0)),
    };
    let skew = (anchor.fraction() - 0.5) * 2.0 * TAIL_SKEW;
    let dir_x = normal.0 + tangent.0 * skew;
    let dir_y = normal.1 + tangent.1 * skew;
    let len = (dir_x * dir_x + dir_y * dir_y).sqrt().max(1e-3);
    let tail_len = rect.width.min(rect.height) * 0.45;

    let root = on_ellipse(phi);
    let tip = Point::new(
        (root.x + dir_x / len * tail_len).clamp(0.0, bounds_w),
        (root.y + dir_y / len * tail_len).clamp(0.0, bounds_h),
    );
    TailGeometry {
        root,
        base_a: on_ellipse(phi - TAIL_SPREAD),
        base_b: on_ellipse(phi + TAIL_SPREAD),
        tip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::sample_script;

    #[test]
    fn default_bubble_stays_inside_image() {
        let script = sample_script();
        for (w, h) in [(1024, 1024), (640, 360), (30, 30), (1, 1), (5, 800)] {
            for panel in &script.panels {
                let config = compute_default_bubble(w, h, panel);
                assert!(
                    config.rect.within(w as f32, h as f32),
                    "{:?} escapes {}x{}",
                    config.rect,
                    w,
                    h
                );
            }
        }
    }

    #[test]
    fn default_bubble_alternates_corners_by_ordinal() {
        let script = sample_script();
        let first = compute_default_bubble(1000, 1000, &script.panels[0]);
        let second = compute_default_bubble(1000, 1000, &script.panels[1]);
        assert!((first.rect.x - 40.0).abs() < 1e-3);
        assert!((first.rect.y - 40.0).abs() < 1e-3);
        assert!((first.rect.width - 400.0).abs() < 1e-3);
        assert!((first.rect.height - 220.0).abs() < 1e-3);
        assert!((second.rect.right() - 960.0).abs() < 1e-3);
        assert_eq!(first.tail, TailAnchor::BottomCenter);
    }

    #[test]
    fn thought_speaker_defaults_to_thought_style() {
        let script = sample_script();
        assert_eq!(
            compute_default_bubble(800, 800, &script.panels[2]).style,
            BubbleStyle::Thought
        );
        assert_eq!(
            compute_default_bubble(800, 800, &script.panels[3]).style,
            BubbleStyle::Speech
        );
    }

    #[test]
    fn inverted_resize_clamps_to_minimum() {
        let rect = Rect::new(100.0, 100.0, 200.0, 100.0);
        let resized = resize_rect(rect, ResizeHandle::BottomRight, -500.0, -500.0, 800.0, 600.0);
        assert_eq!(resized.width, MIN_BUBBLE_SIZE);
        assert_eq!(resized.height, MIN_BUBBLE_SIZE);
        assert_eq!(resized.x, 100.0);

        let resized = resize_rect(rect, ResizeHandle::Left, 400.0, 0.0, 800.0, 600.0);
        assert_eq!(resized.width, MIN_BUBBLE_SIZE);
        assert_eq!(resized.right(), 300.0);
    }

    #[test]
    fn resize_does_not_leave_image() {
        let rect = Rect::new(10.0, 10.0, 50.0, 50.0);
        let resized = resize_rect(rect, ResizeHandle::TopLeft, -100.0, -100.0, 200.0, 200.0);
        assert_eq!(resized, Rect::new(0.0, 0.0, 60.0, 60.0));
    }

    #[test]
    fn translate_clamps_to_bounds() {
        let rect = Rect::new(10.0, 10.0, 50.0, 50.0);
        assert_eq!(
            translate_rect(rect, 500.0, -40.0, 200.0, 100.0),
            Rect::new(150.0, 0.0, 50.0, 50.0)
        );
    }

    #[test]
    fn nearest_anchor_follows_pointer() {
        let rect = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(nearest_tail_anchor(rect, 50.0, 150.0), TailAnchor::BottomCenter);
        assert_eq!(nearest_tail_anchor(rect, -20.0, 75.0), TailAnchor::LeftBottom);
        assert_eq!(nearest_tail_anchor(rect, 80.0, -10.0), TailAnchor::TopRight);
    }

    #[test]
    fn tail_points_away_from_bubble() {
        let rect = Rect::new(100.0, 100.0, 200.0, 100.0);
        let tail = tail_geometry(rect, TailAnchor::BottomCenter, 1000.0, 1000.0);
        assert!(tail.tip.y > rect.bottom());
        assert!((tail.root.y - rect.bottom()).abs() < 1.0);

        let tail = tail_geometry(rect, TailAnchor::LeftTop, 1000.0, 1000.0);
        assert!(tail.tip.x < rect.x);
    }

    #[test]
    fn narration_shape_spans_full_width() {
        let script = sample_script();
        let bubble =
            compute_default_bubble(400, 300, &script.panels[0]).with_style(BubbleStyle::Narration);
        let shape = shape_rect(&bubble, 400.0, 300.0);
        assert_eq!(shape.x, 0.0);
        assert_eq!(shape.y, 0.0);
        assert_eq!(shape.width, 400.0);
    }
}
