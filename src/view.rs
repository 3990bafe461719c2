// view.rs - UI-thread front object, mirrored into the renderer once per frame

use glam::Mat3;

use crate::arcball::ArcballController;
use crate::loader::SourceImage;

/// One-direction copy handed to the renderer strictly before a frame is
/// painted. The renderer never reads the live controller.
pub struct ViewSnapshot {
    pub rotation: Mat3,
    pub scale: f32,
    pub viewport: (u32, u32),
    /// New source image, if one arrived since the previous frame. Taken out
    /// of the view; the renderer owns it from here on.
    pub image: Option<SourceImage>,
}

/// Input-side holder of everything the renderer needs: orientation, scale,
/// viewport and the most recently decoded image awaiting upload.
///
/// Mutations raise `dirty`, which the host uses to decide whether a redraw
/// is worth requesting; `snapshot()` clears it.
pub struct PhotosphereView {
    pub controller: ArcballController,
    pending_image: Option<SourceImage>,
    dirty: bool,
}

impl PhotosphereView {
    pub fn new() -> Self {
        Self {
            controller: ArcballController::new(),
            pending_image: None,
            dirty: true,
        }
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Replaces any not-yet-uploaded image wholesale; the superseded buffer
    /// is dropped here rather than uploaded.
    pub fn set_image(&mut self, image: SourceImage) {
        self.pending_image = Some(image);
        self.dirty = true;
    }

    pub fn on_viewport_resized(&mut self, width: u32, height: u32) {
        self.controller.set_viewport(width, height);
        self.dirty = true;
    }

    pub fn on_drag_start(&mut self, x: f32, y: f32) {
        self.controller.begin_drag(x, y);
    }

    pub fn on_drag_move(&mut self, x: f32, y: f32) {
        if self.controller.dragging() {
            self.controller.update_drag(x, y);
            self.dirty = true;
        }
    }

    pub fn on_drag_end(&mut self) {
        self.controller.end_drag();
    }

    /// Pointer grab lost mid-drag: revert instead of committing.
    pub fn on_drag_cancel(&mut self) {
        if self.controller.dragging() {
            self.controller.cancel_drag();
            self.dirty = true;
        }
    }

    pub fn on_rotate_command(&mut self, degrees: f32) {
        self.controller.rotate_view(degrees);
        self.dirty = true;
    }

    pub fn on_reset_command(&mut self) {
        self.controller.reset_orientation();
        self.dirty = true;
    }

    pub fn set_scale(&mut self, value: f32) {
        self.controller.set_scale(value);
        self.dirty = true;
    }

    /// The per-frame sync point: copies the current state out and takes the
    /// pending image along, clearing the dirty flag.
    pub fn snapshot(&mut self) -> ViewSnapshot {
        self.dirty = false;
        ViewSnapshot {
            rotation: self.controller.rotation(),
            scale: self.controller.scale(),
            viewport: self.controller.viewport(),
            image: self.pending_image.take(),
        }
    }
}

impl Default for PhotosphereView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_image(w: u32, h: u32) -> SourceImage {
        SourceImage {
            path: PathBuf::from("test.png"),
            pixels: image::RgbaImage::new(w, h),
        }
    }

    #[test]
    fn snapshot_clears_dirty_and_takes_the_image() {
        let mut view = PhotosphereView::new();
        view.on_viewport_resized(800, 600);
        view.set_image(test_image(8, 4));
        assert!(view.dirty());

        let snap = view.snapshot();
        assert!(!view.dirty());
        assert_eq!(snap.viewport, (800, 600));
        assert!(snap.image.is_some());

        // Second frame without changes: nothing pending.
        let snap = view.snapshot();
        assert!(snap.image.is_none());
    }

    #[test]
    fn newer_image_replaces_the_pending_one() {
        let mut view = PhotosphereView::new();
        view.set_image(test_image(8, 4));
        view.set_image(test_image(16, 8));
        let snap = view.snapshot();
        assert_eq!(snap.image.unwrap().pixels.dimensions(), (16, 8));
    }

    #[test]
    fn drag_moves_mark_dirty_only_while_dragging() {
        let mut view = PhotosphereView::new();
        view.on_viewport_resized(800, 600);
        view.snapshot();

        view.on_drag_move(10.0, 10.0);
        assert!(!view.dirty());

        view.on_drag_start(10.0, 10.0);
        view.on_drag_move(40.0, 25.0);
        assert!(view.dirty());
        view.on_drag_end();
    }
}
