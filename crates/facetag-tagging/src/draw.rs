//! Pointer gestures to tag rectangles.
//!
//! Two gesture vocabularies produce a box:
//!
//! * press, drag past [`DRAG_START_THRESHOLD`], release: commits on release
//!   when both sides exceed [`MIN_DRAG_SIZE`];
//! * click, then click again: the first release arms the session and the
//!   second press commits when both sides reach [`MIN_CLICK_SIZE`].
//!
//! A release without movement never commits by itself. Positions arrive in
//! display pixels and leave as percentage-of-image coordinates.

use facetag_core::TagRect;
use std::time::Instant;

/// Movement, in percentage points on either axis, that turns a press into a drag.
pub const DRAG_START_THRESHOLD: f64 = 2.0;
/// A dragged box commits only when width and height are strictly above this.
pub const MIN_DRAG_SIZE: f64 = 2.0;
/// A click-click box commits when width and height are at least this.
pub const MIN_CLICK_SIZE: f64 = 1.0;

/// Slack for pixel-to-percent rounding when comparing against the limits above.
const EPSILON: f64 = 1e-9;

fn at_least(value: f64, limit: f64) -> bool {
    value >= limit - EPSILON
}

fn above(value: f64, limit: f64) -> bool {
    value > limit + EPSILON
}

/// Where the photo is drawn on screen, in display pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl DisplayGeometry {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Map a display point into percentage-of-image coordinates, clamped to
    /// the image. `None` while the photo has no rendered size.
    pub fn to_percent(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        let px = ((x - self.left) * 100.0 / self.width).clamp(0.0, 100.0);
        let py = ((y - self.top) * 100.0 / self.height).clamp(0.0, 100.0);
        Some((px, py))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Move,
    Up,
}

/// What the pointer is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerTarget {
    Image,
    /// Buttons and other interactive chrome layered over the photo.
    Control,
}

/// A raw pointer event in display pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
    pub target: PointerTarget,
    pub at: Instant,
}

impl PointerEvent {
    pub fn new(kind: PointerKind, x: f64, y: f64) -> Self {
        Self {
            kind,
            x,
            y,
            target: PointerTarget::Image,
            at: Instant::now(),
        }
    }

    pub fn down(x: f64, y: f64) -> Self {
        Self::new(PointerKind::Down, x, y)
    }

    pub fn moved(x: f64, y: f64) -> Self {
        Self::new(PointerKind::Move, x, y)
    }

    pub fn up(x: f64, y: f64) -> Self {
        Self::new(PointerKind::Up, x, y)
    }

    pub fn on(mut self, target: PointerTarget) -> Self {
        self.target = target;
        self
    }

    pub fn at(mut self, at: Instant) -> Self {
        self.at = at;
        self
    }
}

/// How the current session is being drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    /// Pressed, not yet moved or released.
    Undetermined,
    /// Released without moving; waiting for the second click.
    ClickClick,
    Drag,
}

/// The in-progress gesture. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawSession {
    pub mode: DrawMode,
    /// First corner, percentage-of-image.
    pub anchor: (f64, f64),
    pub current_rect: TagRect,
    pub started_at: Instant,
    pub has_moved: bool,
}

impl DrawSession {
    fn stretch_to(&mut self, point: (f64, f64)) {
        self.current_rect = TagRect::from_corners(self.anchor, point);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawState {
    Idle,
    Anchored,
    Dragging,
    AwaitingSecondClick,
}

/// Result of feeding one event to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawOutcome {
    /// The event had no effect.
    Ignored,
    Started,
    /// The session advanced or its preview rectangle changed.
    Updated,
    Committed(TagRect),
    /// The session ended without producing a box.
    Abandoned,
}

/// Gesture state machine for one viewer. Holds at most one session.
#[derive(Debug, Default)]
pub struct TagDrawController {
    tagging: bool,
    geometry: Option<DisplayGeometry>,
    session: Option<DrawSession>,
}

impl TagDrawController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tagging(&self) -> bool {
        self.tagging
    }

    /// Turning tagging off discards any session in progress.
    pub fn set_tagging(&mut self, on: bool) {
        self.tagging = on;
        if !on {
            self.reset();
        }
    }

    pub fn set_display_geometry(&mut self, geometry: DisplayGeometry) {
        self.geometry = Some(geometry);
    }

    /// Drop the current session, if any.
    pub fn reset(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("draw session discarded");
        }
    }

    pub fn session(&self) -> Option<&DrawSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> DrawState {
        match self.session.as_ref().map(|s| s.mode) {
            None => DrawState::Idle,
            Some(DrawMode::Undetermined) => DrawState::Anchored,
            Some(DrawMode::Drag) => DrawState::Dragging,
            Some(DrawMode::ClickClick) => DrawState::AwaitingSecondClick,
        }
    }

    pub fn handle(&mut self, event: PointerEvent) -> DrawOutcome {
        if !self.tagging {
            return DrawOutcome::Ignored;
        }
        let Some(point) = self.geometry.and_then(|g| g.to_percent(event.x, event.y)) else {
            return DrawOutcome::Ignored;
        };
        let on_image = event.target == PointerTarget::Image;

        if self.session.is_none() {
            if event.kind != PointerKind::Down || !on_image {
                return DrawOutcome::Ignored;
            }
            self.session = Some(DrawSession {
                mode: DrawMode::Undetermined,
                anchor: point,
                current_rect: TagRect::from_corners(point, point),
                started_at: event.at,
                has_moved: false,
            });
            tracing::debug!(x = point.0, y = point.1, "draw session anchored");
            return DrawOutcome::Started;
        }
        let Some(session) = self.session.as_mut() else {
            return DrawOutcome::Ignored;
        };

        match (session.mode, event.kind) {
            (DrawMode::Undetermined, PointerKind::Move) => {
                let dx = (point.0 - session.anchor.0).abs();
                let dy = (point.1 - session.anchor.1).abs();
                if !at_least(dx, DRAG_START_THRESHOLD) && !at_least(dy, DRAG_START_THRESHOLD) {
                    return DrawOutcome::Ignored;
                }
                session.mode = DrawMode::Drag;
                session.has_moved = true;
                session.stretch_to(point);
                DrawOutcome::Updated
            }
            (DrawMode::Undetermined, PointerKind::Up) => {
                session.mode = DrawMode::ClickClick;
                DrawOutcome::Updated
            }
            (DrawMode::Drag, PointerKind::Move) | (DrawMode::ClickClick, PointerKind::Move) => {
                session.stretch_to(point);
                DrawOutcome::Updated
            }
            (DrawMode::Drag, PointerKind::Up) => {
                session.stretch_to(point);
                let rect = session.current_rect;
                self.finish(rect, above(rect.width, MIN_DRAG_SIZE) && above(rect.height, MIN_DRAG_SIZE))
            }
            (DrawMode::ClickClick, PointerKind::Down) if on_image => {
                session.stretch_to(point);
                let rect = session.current_rect;
                self.finish(rect, at_least(rect.width, MIN_CLICK_SIZE) && at_least(rect.height, MIN_CLICK_SIZE))
            }
            _ => DrawOutcome::Ignored,
        }
    }

    fn finish(&mut self, rect: TagRect, accepted: bool) -> DrawOutcome {
        let mode = self.session.take().map(|s| s.mode);
        if accepted {
            tracing::debug!(?mode, ?rect, "draw session committed");
            DrawOutcome::Committed(rect)
        } else {
            tracing::debug!(?mode, ?rect, "draw session abandoned: box too small");
            DrawOutcome::Abandoned
        }
    }

    /// Cancel the session in progress (Escape).
    pub fn cancel(&mut self) -> DrawOutcome {
        match self.session.take() {
            Some(_) => DrawOutcome::Abandoned,
            None => DrawOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Tagging on, photo drawn at the origin at 100×100 so pixels equal percent.
    fn controller() -> TagDrawController {
        let mut c = TagDrawController::new();
        c.set_tagging(true);
        c.set_display_geometry(DisplayGeometry::new(0.0, 0.0, 100.0, 100.0));
        c
    }

    fn drag(c: &mut TagDrawController, from: (f64, f64), to: (f64, f64)) -> DrawOutcome {
        c.handle(PointerEvent::down(from.0, from.1));
        c.handle(PointerEvent::moved(to.0, to.1));
        c.handle(PointerEvent::up(to.0, to.1))
    }

    #[test]
    fn test_drag_commits_normalized_rect() {
        let mut c = controller();
        assert_eq!(c.handle(PointerEvent::down(10.0, 10.0)), DrawOutcome::Started);
        assert_eq!(c.state(), DrawState::Anchored);
        assert_eq!(c.handle(PointerEvent::moved(25.0, 25.0)), DrawOutcome::Updated);
        assert_eq!(c.state(), DrawState::Dragging);
        assert!(c.session().unwrap().has_moved);
        c.handle(PointerEvent::moved(40.0, 40.0));
        let outcome = c.handle(PointerEvent::up(40.0, 40.0));
        assert_eq!(
            outcome,
            DrawOutcome::Committed(TagRect { x: 10.0, y: 10.0, width: 30.0, height: 30.0 })
        );
        assert_eq!(c.state(), DrawState::Idle);
    }

    #[test]
    fn test_drag_direction_does_not_matter() {
        let mut c = controller();
        let outcome = drag(&mut c, (40.0, 40.0), (10.0, 10.0));
        assert_eq!(
            outcome,
            DrawOutcome::Committed(TagRect { x: 10.0, y: 10.0, width: 30.0, height: 30.0 })
        );
    }

    #[test]
    fn test_small_motion_never_commits() {
        for (dx, dy) in [(0.0, 0.0), (1.9, 1.9), (1.0, 0.5), (0.0, 1.99)] {
            let mut c = controller();
            let outcome = drag(&mut c, (50.0, 50.0), (50.0 + dx, 50.0 + dy));
            assert!(!matches!(outcome, DrawOutcome::Committed(_)), "({dx}, {dy}) committed");
            assert_eq!(c.state(), DrawState::AwaitingSecondClick);
        }
    }

    #[test]
    fn test_drag_commits_iff_both_sides_above_minimum() {
        // Moved far enough on one axis but the other side is too thin.
        let mut c = controller();
        assert_eq!(drag(&mut c, (10.0, 10.0), (30.0, 11.0)), DrawOutcome::Abandoned);
        assert_eq!(c.state(), DrawState::Idle);

        // Exactly 2 on an axis starts a drag but 2 is not above the minimum.
        let mut c = controller();
        assert_eq!(drag(&mut c, (10.0, 10.0), (12.0, 30.0)), DrawOutcome::Abandoned);

        let mut c = controller();
        assert!(matches!(drag(&mut c, (10.0, 10.0), (13.0, 13.0)), DrawOutcome::Committed(_)));
    }

    #[test]
    fn test_click_click_commits_tiny_box() {
        let mut c = controller();
        c.handle(PointerEvent::down(10.0, 10.0));
        assert_eq!(c.handle(PointerEvent::up(10.0, 10.0)), DrawOutcome::Updated);
        assert_eq!(c.state(), DrawState::AwaitingSecondClick);

        let outcome = c.handle(PointerEvent::down(11.0, 11.0));
        assert_eq!(
            outcome,
            DrawOutcome::Committed(TagRect { x: 10.0, y: 10.0, width: 1.0, height: 1.0 })
        );
        assert_eq!(c.state(), DrawState::Idle);
        // Trailing release of the second click does nothing.
        assert_eq!(c.handle(PointerEvent::up(11.0, 11.0)), DrawOutcome::Ignored);
    }

    #[test]
    fn test_limits_hold_on_scaled_display() {
        // 10px on a 1000px display is one point but maps to 0.99999...
        let mut c = TagDrawController::new();
        c.set_tagging(true);
        c.set_display_geometry(DisplayGeometry::new(0.0, 0.0, 1000.0, 1000.0));
        c.handle(PointerEvent::down(636.0, 636.0));
        c.handle(PointerEvent::up(636.0, 636.0));
        assert!(matches!(c.handle(PointerEvent::down(646.0, 646.0)), DrawOutcome::Committed(_)));

        // 20px is the drag threshold.
        c.handle(PointerEvent::down(636.0, 636.0));
        assert_eq!(c.handle(PointerEvent::moved(656.0, 636.0)), DrawOutcome::Updated);
        assert_eq!(c.state(), DrawState::Dragging);
    }

    #[test]
    fn test_click_click_ignores_timing() {
        let mut c = controller();
        let t0 = Instant::now();
        c.handle(PointerEvent::down(10.0, 10.0).at(t0));
        c.handle(PointerEvent::up(10.0, 10.0).at(t0 + Duration::from_millis(30)));
        let outcome = c.handle(PointerEvent::down(60.0, 50.0).at(t0 + Duration::from_secs(20)));
        assert_eq!(
            outcome,
            DrawOutcome::Committed(TagRect { x: 10.0, y: 10.0, width: 50.0, height: 40.0 })
        );
    }

    #[test]
    fn test_click_click_below_one_point_abandons() {
        let mut c = controller();
        c.handle(PointerEvent::down(10.0, 10.0));
        c.handle(PointerEvent::up(10.0, 10.0));
        assert_eq!(c.handle(PointerEvent::down(10.5, 30.0)), DrawOutcome::Abandoned);
        assert_eq!(c.state(), DrawState::Idle);
    }

    #[test]
    fn test_awaiting_second_click_previews_on_move() {
        let mut c = controller();
        c.handle(PointerEvent::down(20.0, 20.0));
        c.handle(PointerEvent::up(20.0, 20.0));
        assert_eq!(c.handle(PointerEvent::moved(5.0, 35.0)), DrawOutcome::Updated);
        let s = c.session().unwrap();
        assert_eq!(s.mode, DrawMode::ClickClick);
        assert!(!s.has_moved);
        assert_eq!(s.current_rect, TagRect { x: 5.0, y: 20.0, width: 15.0, height: 15.0 });
    }

    #[test]
    fn test_controls_never_start_or_advance() {
        let mut c = controller();
        let outcome = c.handle(PointerEvent::down(10.0, 10.0).on(PointerTarget::Control));
        assert_eq!(outcome, DrawOutcome::Ignored);
        assert_eq!(c.state(), DrawState::Idle);

        c.handle(PointerEvent::down(10.0, 10.0));
        c.handle(PointerEvent::up(10.0, 10.0));
        let outcome = c.handle(PointerEvent::down(50.0, 50.0).on(PointerTarget::Control));
        assert_eq!(outcome, DrawOutcome::Ignored);
        assert_eq!(c.state(), DrawState::AwaitingSecondClick);
    }

    #[test]
    fn test_tagging_off_resets_and_blocks() {
        let mut c = controller();
        c.handle(PointerEvent::down(10.0, 10.0));
        c.handle(PointerEvent::moved(30.0, 30.0));
        c.set_tagging(false);
        assert_eq!(c.state(), DrawState::Idle);
        assert_eq!(c.handle(PointerEvent::down(10.0, 10.0)), DrawOutcome::Ignored);
        assert!(c.session().is_none());
    }

    #[test]
    fn test_single_session_second_press_while_dragging_ignored() {
        let mut c = controller();
        c.handle(PointerEvent::down(10.0, 10.0));
        c.handle(PointerEvent::moved(30.0, 30.0));
        assert_eq!(c.handle(PointerEvent::down(70.0, 70.0)), DrawOutcome::Ignored);
        assert_eq!(c.session().unwrap().anchor, (10.0, 10.0));
    }

    #[test]
    fn test_cancel() {
        let mut c = controller();
        assert_eq!(c.cancel(), DrawOutcome::Ignored);
        c.handle(PointerEvent::down(10.0, 10.0));
        assert_eq!(c.cancel(), DrawOutcome::Abandoned);
        assert_eq!(c.state(), DrawState::Idle);
    }

    #[test]
    fn test_display_mapping_to_percent() {
        let mut c = TagDrawController::new();
        c.set_tagging(true);
        // 400×200 photo drawn at (100, 50).
        c.set_display_geometry(DisplayGeometry::new(100.0, 50.0, 400.0, 200.0));
        c.handle(PointerEvent::down(140.0, 70.0));
        c.handle(PointerEvent::moved(300.0, 150.0));
        let outcome = c.handle(PointerEvent::up(300.0, 150.0));
        assert_eq!(
            outcome,
            DrawOutcome::Committed(TagRect { x: 10.0, y: 10.0, width: 40.0, height: 40.0 })
        );
    }

    #[test]
    fn test_points_outside_image_are_clamped() {
        let g = DisplayGeometry::new(0.0, 0.0, 200.0, 100.0);
        assert_eq!(g.to_percent(-50.0, 500.0), Some((0.0, 100.0)));
        assert_eq!(DisplayGeometry::new(0.0, 0.0, 0.0, 10.0).to_percent(1.0, 1.0), None);
    }

    #[test]
    fn test_no_geometry_ignores_events() {
        let mut c = TagDrawController::new();
        c.set_tagging(true);
        assert_eq!(c.handle(PointerEvent::down(10.0, 10.0)), DrawOutcome::Ignored);
    }
}
