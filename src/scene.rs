//! Scene container: models, billboard sprites, fog, and the camera.

pub mod camera;
pub mod model;

pub use camera::Camera;
pub use model::Model;

use crate::render::CLIP_FAR_3D;

/// A 2D billboard anchored in the world. The on-screen size is the entity
/// size scaled by `(1 << view_distance) / z`.
pub struct SpriteEntity {
    pub id: usize,
    pub width: i32,
    pub height: i32,
}

pub struct Scene {
    pub camera: Camera,
    pub models: Vec<Model>,
    /// Pseudo-model holding two vertices per sprite (bottom anchor, top),
    /// projected alongside the real models so sprites ride the same
    /// transform path.
    pub sprite_view: Model,
    pub sprites: Vec<SpriteEntity>,
    pub fog_z_distance: i32,
    pub fog_z_falloff: i32,
}

impl Scene {
    pub fn new() -> Scene {
        let mut sprite_view = Model::new();
        sprite_view.unpickable = true;

        Scene {
            camera: Camera::new(),
            models: Vec::new(),
            sprite_view,
            sprites: Vec::new(),
            fog_z_distance: CLIP_FAR_3D,
            fog_z_falloff: 32,
        }
    }

    pub fn add_model(&mut self, model: Model) -> usize {
        self.models.push(model);
        self.models.len() - 1
    }

    /// Add a billboard sprite standing on `(x, y, z)`. Returns the sprite
    /// face index.
    pub fn add_sprite(&mut self, id: usize, x: i32, y: i32, z: i32, width: i32, height: i32) -> usize {
        let bottom = self.sprite_view.vertex_at(x, y, z);
        let top = self.sprite_view.vertex_at(x, y - height, z);
        // Two-vertex faces are the sprite pseudo-model's native shape; the
        // fills are never consulted.
        let face = self
            .sprite_view
            .add_face(&[bottom, top], 0, 0)
            .unwrap_or_else(|_| unreachable!("sprite face vertices were just added"));
        self.sprites.push(SpriteEntity { id, width, height });
        face
    }
}

impl Default for Scene {
    fn default() -> Scene {
        Scene::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sprite_gets_two_vertices_and_one_face() {
        let mut scene = Scene::new();
        let face = scene.add_sprite(7, 100, 0, 500, 60, 120);

        assert_eq!(face, 0);
        assert_eq!(scene.sprite_view.num_vertices(), 2);
        assert_eq!(scene.sprite_view.vertex_y[0], 0);
        assert_eq!(scene.sprite_view.vertex_y[1], -120);
        assert_eq!(scene.sprites[0].id, 7);
    }
}
