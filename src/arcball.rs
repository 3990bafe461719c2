// arcball.rs - drag-to-rotate orientation state for the photosphere

use glam::{Mat3, Quat, Vec3};

/// Open drag gesture. Created on press, dropped on release or cancel.
struct DragSession {
    start_vec: Vec3,
    base_rotation: Mat3,
}

/// Accumulated view orientation plus zoom scale.
///
/// All pointer math happens here on the UI thread; the renderer only ever
/// sees a copied snapshot of `rotation` / `scale` / `viewport`.
pub struct ArcballController {
    rotation: Mat3,
    scale: f32,
    viewport: (u32, u32),
    drag: Option<DragSession>,
}

impl ArcballController {
    pub fn new() -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            scale: 1.0,
            viewport: (0, 0),
            drag: None,
        }
    }

    pub fn rotation(&self) -> Mat3 {
        self.rotation
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    /// Scale drives both the projection field of view and drag sensitivity.
    /// Non-positive values are ignored.
    pub fn set_scale(&mut self, value: f32) {
        if value > 0.0 && value.is_finite() {
            self.scale = value;
        }
    }

    /// Opens a drag session at the given pointer position. Does not change
    /// the orientation. No-op while the viewport is still zero-sized.
    pub fn begin_drag(&mut self, x: f32, y: f32) {
        let Some(start_vec) = self.arcball_vector(x, y) else {
            return;
        };
        self.drag = Some(DragSession {
            start_vec,
            base_rotation: self.rotation,
        });
    }

    /// Rotates the view so the arcball vector under the pointer follows the
    /// drag. Called for every pointer-move event while the button is down.
    pub fn update_drag(&mut self, x: f32, y: f32) {
        let Some(current) = self.arcball_vector(x, y) else {
            return;
        };
        let Some(session) = &self.drag else {
            return;
        };

        // Coincident vectors leave a zero-length axis; treat as no rotation
        // instead of normalizing a zero vector into NaN.
        let axis = session.start_vec.cross(current);
        if axis.length_squared() <= f32::EPSILON {
            self.rotation = session.base_rotation;
            return;
        }

        // Clamp before acos: float error can push the dot product of two
        // unit vectors past 1.
        let dot = session.start_vec.dot(current).clamp(-1.0, 1.0);
        let angle = dot.acos() / self.scale;

        let delta = Mat3::from_axis_angle(axis.normalize(), angle);
        self.rotation = renormalize(delta * session.base_rotation);
    }

    /// Commits the drag: the current orientation becomes the new baseline.
    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    /// Abandons the drag (e.g. the window lost the pointer grab), reverting
    /// to the orientation from before `begin_drag`.
    pub fn cancel_drag(&mut self) {
        if let Some(session) = self.drag.take() {
            self.rotation = session.base_rotation;
        }
    }

    pub fn dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Direct rotation about the viewing axis, `degrees / scale`, composed on
    /// the left of the current orientation. Used by the View menu buttons.
    pub fn rotate_view(&mut self, degrees: f32) {
        let angle = degrees.to_radians() / self.scale;
        self.rotation = renormalize(Mat3::from_rotation_z(angle) * self.rotation);
    }

    /// "Look below": drops all accumulated rotation.
    pub fn reset_orientation(&mut self) {
        self.rotation = Mat3::IDENTITY;
        if let Some(session) = &mut self.drag {
            session.base_rotation = Mat3::IDENTITY;
        }
    }

    /// Maps a pointer position to a unit vector for rotation tracking.
    ///
    /// This is deliberately the simplified planar variant: normalize the
    /// pointer to [-1, 1] on both axes, fix z = 1, normalize. It is not a
    /// true arcball projected onto a sphere cap; the drag feel of the viewer
    /// depends on exactly this mapping, so keep it.
    fn arcball_vector(&self, x: f32, y: f32) -> Option<Vec3> {
        let (w, h) = self.viewport;
        if w == 0 || h == 0 {
            return None;
        }
        let v = Vec3::new(
            2.0 * x / w as f32 - 1.0,
            2.0 * y / h as f32 - 1.0,
            1.0,
        );
        Some(v.normalize())
    }
}

impl Default for ArcballController {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds a near-orthonormal matrix back onto a rotation by passing it
/// through a unit quaternion, so long drag sequences cannot accumulate shear
/// or scale.
fn renormalize(m: Mat3) -> Mat3 {
    Mat3::from_quat(Quat::from_mat3(&m).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPS: f32 = 1e-4;

    fn controller(w: u32, h: u32) -> ArcballController {
        let mut c = ArcballController::new();
        c.set_viewport(w, h);
        c
    }

    fn assert_orthonormal(m: &Mat3) {
        assert_relative_eq!(m.determinant(), 1.0, epsilon = EPS);
        for col in [m.x_axis, m.y_axis, m.z_axis] {
            assert_relative_eq!(col.length(), 1.0, epsilon = EPS);
        }
        assert_relative_eq!(m.x_axis.dot(m.y_axis), 0.0, epsilon = EPS);
        assert_relative_eq!(m.y_axis.dot(m.z_axis), 0.0, epsilon = EPS);
        assert_relative_eq!(m.x_axis.dot(m.z_axis), 0.0, epsilon = EPS);
    }

    fn assert_mat_eq(a: &Mat3, b: &Mat3) {
        for (ca, cb) in [
            (a.x_axis, b.x_axis),
            (a.y_axis, b.y_axis),
            (a.z_axis, b.z_axis),
        ] {
            assert_relative_eq!(ca.x, cb.x, epsilon = EPS);
            assert_relative_eq!(ca.y, cb.y, epsilon = EPS);
            assert_relative_eq!(ca.z, cb.z, epsilon = EPS);
        }
    }

    #[test]
    fn center_pointer_maps_to_unit_z() {
        let c = controller(800, 600);
        let v = c.arcball_vector(400.0, 300.0).unwrap();
        assert_relative_eq!(v.x, 0.0, epsilon = EPS);
        assert_relative_eq!(v.y, 0.0, epsilon = EPS);
        assert_relative_eq!(v.z, 1.0, epsilon = EPS);
    }

    #[test]
    fn zero_viewport_is_a_noop() {
        let mut c = ArcballController::new();
        c.begin_drag(10.0, 10.0);
        assert!(!c.dragging());
        c.update_drag(20.0, 20.0);
        assert_mat_eq(&c.rotation(), &Mat3::IDENTITY);
    }

    #[test]
    fn commit_then_begin_is_idempotent() {
        let mut c = controller(800, 400);
        c.begin_drag(100.0, 100.0);
        c.update_drag(300.0, 250.0);
        c.end_drag();
        let committed = c.rotation();

        c.begin_drag(300.0, 250.0);
        assert_mat_eq(&c.rotation(), &committed);
    }

    #[test]
    fn coincident_vectors_yield_no_rotation() {
        let mut c = controller(800, 400);
        c.begin_drag(123.0, 77.0);
        c.update_drag(123.0, 77.0);
        let m = c.rotation();
        assert!(m.is_finite());
        assert_mat_eq(&m, &Mat3::IDENTITY);
    }

    #[test]
    fn horizontal_center_drag_rotates_about_vertical_axis() {
        let mut c = controller(800, 400);
        c.begin_drag(400.0, 200.0);
        c.update_drag(440.0, 200.0);
        let m = c.rotation();
        assert_orthonormal(&m);

        // A pure y-axis rotation keeps the y basis vector fixed.
        assert_relative_eq!(m.y_axis.x, 0.0, epsilon = EPS);
        assert_relative_eq!(m.y_axis.y, 1.0, epsilon = EPS);
        assert_relative_eq!(m.y_axis.z, 0.0, epsilon = EPS);

        // Nonzero rotation, and a longer drag rotates further.
        let angle = m.x_axis.z.asin().abs();
        assert!(angle > 1e-3);

        c.end_drag();
        c.reset_orientation();
        c.begin_drag(400.0, 200.0);
        c.update_drag(480.0, 200.0);
        let longer = c.rotation().x_axis.z.asin().abs();
        assert!(longer > angle);
    }

    #[test]
    fn rotation_stays_orthonormal_under_long_sequences() {
        let mut c = controller(1280, 720);
        for i in 0..200 {
            let x = 100.0 + (i as f32 * 37.0) % 1000.0;
            let y = 50.0 + (i as f32 * 53.0) % 600.0;
            c.begin_drag(x, y);
            c.update_drag(x + 40.0, y + 25.0);
            c.update_drag(x + 90.0, y - 15.0);
            c.end_drag();
            if i % 7 == 0 {
                c.rotate_view(15.0);
            }
        }
        assert_orthonormal(&c.rotation());
        c.reset_orientation();
        assert_mat_eq(&c.rotation(), &Mat3::IDENTITY);
    }

    #[test]
    fn reset_yields_identity() {
        let mut c = controller(640, 480);
        c.rotate_view(37.0);
        c.begin_drag(10.0, 10.0);
        c.update_drag(300.0, 300.0);
        c.reset_orientation();
        assert_mat_eq(&c.rotation(), &Mat3::IDENTITY);
    }

    #[test]
    fn cancel_reverts_to_pre_drag_orientation() {
        let mut c = controller(640, 480);
        c.rotate_view(20.0);
        let before = c.rotation();
        c.begin_drag(100.0, 100.0);
        c.update_drag(400.0, 350.0);
        c.cancel_drag();
        assert_mat_eq(&c.rotation(), &before);
        assert!(!c.dragging());
    }

    #[test]
    fn rotate_view_sensitivity_is_inverse_to_scale() {
        let mut a = controller(640, 480);
        a.set_scale(1.0);
        a.rotate_view(90.0);

        let mut b = controller(640, 480);
        b.set_scale(2.0);
        b.rotate_view(90.0);

        // z rotation by theta puts cos(theta) on the x_axis.x entry.
        let theta_a = a.rotation().x_axis.x.acos();
        let theta_b = b.rotation().x_axis.x.acos();
        assert_relative_eq!(theta_a, 90f32.to_radians(), epsilon = EPS);
        assert_relative_eq!(theta_b, 45f32.to_radians(), epsilon = EPS);
    }

    #[test]
    fn set_scale_rejects_non_positive() {
        let mut c = controller(640, 480);
        c.set_scale(2.5);
        c.set_scale(0.0);
        c.set_scale(-3.0);
        c.set_scale(f32::NAN);
        assert_relative_eq!(c.scale(), 2.5);
    }
}
