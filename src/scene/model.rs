//! Geometry container consumed by the renderer.
//!
//! A model keeps parallel per-vertex arrays: the object-space position, the
//! camera-space position filled by [`Model::project`], and the projected
//! screen position. Faces are vertex-index lists with a front and a back
//! fill, a flat intensity (or the transparent sentinel to request per-vertex
//! lighting) and the normal scale/magnitude pair the polygon projector
//! memoizes on first sight.

use anyhow::ensure;
use anyhow::Result;

use super::camera::Camera;
use crate::render::COLOUR_TRANSPARENT;

pub struct Model {
    pub vertex_x: Vec<i32>,
    pub vertex_y: Vec<i32>,
    pub vertex_z: Vec<i32>,
    pub project_vertex_x: Vec<i32>,
    pub project_vertex_y: Vec<i32>,
    pub project_vertex_z: Vec<i32>,
    pub vertex_view_x: Vec<i32>,
    pub vertex_view_y: Vec<i32>,
    pub vertex_intensity: Vec<i32>,
    pub vertex_ambience: Vec<i32>,

    pub face_vertices: Vec<Vec<usize>>,
    pub face_fill_front: Vec<i32>,
    pub face_fill_back: Vec<i32>,
    pub face_intensity: Vec<i32>,
    pub(crate) normal_scale: Vec<i32>,
    pub(crate) normal_magnitude: Vec<i32>,

    pub light_ambience: i32,
    /// Added to every face depth of this model before sorting.
    pub depth_bias: i32,

    pub visible: bool,
    pub unpickable: bool,
    pub texture_translucent: bool,
    pub transparent: bool,
    /// 0 freezes the model: `project` leaves the previous frame's
    /// projection in place. Any other value requests a full transform.
    pub transform_state: i32,
}

impl Model {
    pub fn new() -> Model {
        Model {
            vertex_x: Vec::new(),
            vertex_y: Vec::new(),
            vertex_z: Vec::new(),
            project_vertex_x: Vec::new(),
            project_vertex_y: Vec::new(),
            project_vertex_z: Vec::new(),
            vertex_view_x: Vec::new(),
            vertex_view_y: Vec::new(),
            vertex_intensity: Vec::new(),
            vertex_ambience: Vec::new(),
            face_vertices: Vec::new(),
            face_fill_front: Vec::new(),
            face_fill_back: Vec::new(),
            face_intensity: Vec::new(),
            normal_scale: Vec::new(),
            normal_magnitude: Vec::new(),
            light_ambience: 0,
            depth_bias: 0,
            visible: true,
            unpickable: false,
            texture_translucent: false,
            transparent: false,
            transform_state: 2,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertex_x.len()
    }

    pub fn num_faces(&self) -> usize {
        self.face_vertices.len()
    }

    /// Append a vertex and return its index.
    pub fn vertex_at(&mut self, x: i32, y: i32, z: i32) -> usize {
        self.vertex_x.push(x);
        self.vertex_y.push(y);
        self.vertex_z.push(z);
        self.project_vertex_x.push(0);
        self.project_vertex_y.push(0);
        self.project_vertex_z.push(0);
        self.vertex_view_x.push(0);
        self.vertex_view_y.push(0);
        self.vertex_intensity.push(0);
        self.vertex_ambience.push(0);
        self.vertex_x.len() - 1
    }

    /// Append a face over existing vertices. Faces rendered through the 3D
    /// path need at least three vertices; two-vertex faces are only valid on
    /// the sprite pseudo-model.
    pub fn add_face(&mut self, vertices: &[usize], fill_front: i32, fill_back: i32) -> Result<usize> {
        ensure!(vertices.len() >= 2, "face needs at least two vertices");
        ensure!(
            vertices.iter().all(|&v| v < self.num_vertices()),
            "face references vertex out of range"
        );

        self.face_vertices.push(vertices.to_vec());
        self.face_fill_front.push(fill_front);
        self.face_fill_back.push(fill_back);
        // Per-vertex lighting until a flat intensity is assigned.
        self.face_intensity.push(COLOUR_TRANSPARENT);
        self.normal_scale.push(-1);
        self.normal_magnitude.push(0);
        Ok(self.face_vertices.len() - 1)
    }

    pub fn set_face_intensity(&mut self, face: usize, intensity: i32) {
        self.face_intensity[face] = intensity;
    }

    pub fn set_vertex_light(&mut self, vertex: usize, intensity: i32, ambience: i32) {
        self.vertex_intensity[vertex] = intensity;
        self.vertex_ambience[vertex] = ambience;
    }

    /// Transform every vertex into camera space and project it to the
    /// screen. Rotation order is roll, yaw, pitch; the perspective divide is
    /// `(coord << view_distance) / z`.
    pub fn project(&mut self, camera: &Camera, view_distance: i32, clip_near: i32) {
        if self.transform_state == 0 {
            return;
        }

        let sin_roll = i64::from(camera.sin(camera.roll));
        let cos_roll = i64::from(camera.cos(camera.roll));
        let sin_yaw = i64::from(camera.sin(camera.yaw));
        let cos_yaw = i64::from(camera.cos(camera.yaw));
        let sin_pitch = i64::from(camera.sin(camera.pitch));
        let cos_pitch = i64::from(camera.cos(camera.pitch));

        let mut any_in_frustum = false;

        for i in 0..self.num_vertices() {
            let mut x = i64::from(self.vertex_x[i] - camera.x);
            let mut y = i64::from(self.vertex_y[i] - camera.y);
            let mut z = i64::from(self.vertex_z[i] - camera.z);

            if camera.roll != 0 {
                let t = (y * sin_roll + x * cos_roll) >> 15;
                y = (y * cos_roll - x * sin_roll) >> 15;
                x = t;
            }
            if camera.yaw != 0 {
                let t = (z * sin_yaw + x * cos_yaw) >> 15;
                z = (z * cos_yaw - x * sin_yaw) >> 15;
                x = t;
            }
            if camera.pitch != 0 {
                let t = (y * cos_pitch - z * sin_pitch) >> 15;
                z = (y * sin_pitch + z * cos_pitch) >> 15;
                y = t;
            }

            self.project_vertex_x[i] = x as i32;
            self.project_vertex_y[i] = y as i32;
            self.project_vertex_z[i] = z as i32;

            if z != 0 {
                self.vertex_view_x[i] = ((x << view_distance) / z) as i32;
                self.vertex_view_y[i] = ((y << view_distance) / z) as i32;
            } else {
                self.vertex_view_x[i] = (x << view_distance) as i32;
                self.vertex_view_y[i] = (y << view_distance) as i32;
            }

            if z > i64::from(clip_near) && z < i64::from(camera.frustum_far) {
                any_in_frustum = true;
            }
        }

        self.visible = any_in_frustum;
    }
}

impl Default for Model {
    fn default() -> Model {
        Model::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_projection_is_a_perspective_divide() {
        let mut model = Model::new();
        let v = model.vertex_at(100, -50, 1000);
        model.add_face(&[v, v, v], 0, 0).unwrap();

        let camera = Camera::new();
        model.project(&camera, 9, 5);

        assert_eq!(model.project_vertex_x[v], 100);
        assert_eq!(model.project_vertex_y[v], -50);
        assert_eq!(model.project_vertex_z[v], 1000);
        assert_eq!(model.vertex_view_x[v], (100 << 9) / 1000);
        assert_eq!(model.vertex_view_y[v], (-50 << 9) / 1000);
        assert!(model.visible);
    }

    #[test]
    fn vertex_behind_camera_marks_model_invisible() {
        let mut model = Model::new();
        model.vertex_at(0, 0, -100);

        let camera = Camera::new();
        model.project(&camera, 9, 5);
        assert!(!model.visible);
    }

    #[test]
    fn quarter_yaw_swaps_x_and_z() {
        let mut model = Model::new();
        let v = model.vertex_at(0, 0, 1000);

        let mut camera = Camera::new();
        camera.set_orientation(512, 0, 0);
        model.project(&camera, 9, 5);

        // A quarter turn of yaw rotates +z onto an axis-aligned +-x.
        assert_eq!(model.project_vertex_z[v], 0);
        assert_eq!(model.project_vertex_x[v].abs(), 1000);
    }

    #[test]
    fn frozen_model_keeps_stale_projection() {
        let mut model = Model::new();
        let v = model.vertex_at(10, 0, 500);
        let camera = Camera::new();

        model.project(&camera, 9, 5);
        let before = model.vertex_view_x[v];

        model.transform_state = 0;
        model.vertex_x[v] = 9999;
        model.project(&camera, 9, 5);
        assert_eq!(model.vertex_view_x[v], before);
    }
}
