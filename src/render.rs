//! The per-frame rendering pass.
//!
//! A frame is one sequential sweep: camera setup, projection of every model
//! plus the sprite pseudo-model, per-face frustum cull into the polygon
//! pool, depth sort, intersection resolve, then scanline generation and
//! rasterization of each polygon in draw order. Nothing suspends and
//! nothing is allocated after construction; a render call returns only once
//! the destination buffer is fully written.

pub mod gradient;
pub mod picker;
pub mod polygon;
mod raster;
mod scanline;
mod sort;

use tracing::warn;

use crate::scene::Scene;
use crate::surface::PixelSurface;

use self::gradient::GradientCache;
use self::polygon::initialise_polygon_2d;
use self::polygon::initialise_polygon_3d;
use self::polygon::PolySource;
use self::polygon::Polygon;
use self::raster::rasterize_face;
use self::raster::RasterBounds;
use self::raster::SpanFill;
use self::scanline::FaceScratch;
use self::scanline::ScanlineBuffer;
use self::sort::depth_sort;
use self::sort::DepthResolver;

pub use self::picker::MousePicker;

/// Polygon pool capacity; faces culled in past this limit are dropped.
pub const MAX_POLYGONS: usize = 15000;

/// Perspective shift: screen coordinates are `(coord << VIEW_DISTANCE) / z`.
pub const VIEW_DISTANCE: i32 = 9;

/// Near plane depth.
pub const CLIP_NEAR: i32 = 5;

/// Eye height the far plane is derived from.
pub const DEFAULT_CAMERA_HEIGHT: i32 = 550;

/// Far plane for 3D faces.
pub const CLIP_FAR_3D: i32 = 2400 + 2 * DEFAULT_CAMERA_HEIGHT;

/// Far plane for billboard sprites.
pub const CLIP_FAR_2D: i32 = CLIP_FAR_3D;

/// Fill sentinel: skip the face entirely. Also used as a face intensity to
/// request per-vertex lighting.
pub const COLOUR_TRANSPARENT: i32 = 12345678;

/// Fill sentinel: the polygon exists for sorting but is never rasterized.
pub const FILL_INVISIBLE: i32 = -2;

/// Window size of the intersection resolve.
const INTERSECT_STEP: usize = 100;

pub struct SceneRenderer {
    base_x: i32,
    base_y: i32,
    clip_x: i32,
    clip_y: i32,
    width: i32,
    view_distance: i32,
    clip_near: i32,
    clip_far_3d: i32,
    clip_far_2d: i32,

    pool: Vec<Polygon>,
    visible_count: usize,

    scanlines: ScanlineBuffer,
    scratch: FaceScratch,
    resolver: DepthResolver,
    gradients: GradientCache,
    picker: MousePicker,
}

impl SceneRenderer {
    /// Renderer projecting into a `width` x `height` surface, centred, with
    /// the default view distance.
    pub fn new(width: usize, height: usize) -> SceneRenderer {
        let mut renderer = SceneRenderer {
            base_x: width as i32 / 2,
            base_y: height as i32 / 2,
            clip_x: width as i32 / 2,
            clip_y: height as i32 / 2,
            width: width as i32,
            view_distance: VIEW_DISTANCE,
            clip_near: CLIP_NEAR,
            clip_far_3d: CLIP_FAR_3D,
            clip_far_2d: CLIP_FAR_2D,
            pool: vec![Polygon::new(); MAX_POLYGONS],
            visible_count: 0,
            scanlines: ScanlineBuffer::new(),
            scratch: FaceScratch::new(),
            resolver: DepthResolver::new(),
            gradients: GradientCache::new(),
            picker: MousePicker::new(),
        };
        renderer
            .scanlines
            .set_len((renderer.base_y + renderer.clip_y).max(0) as usize);
        renderer
    }

    /// Move the projection centre and clip extents. `clip_x`/`clip_y` are
    /// half-extents around `(base_x, base_y)`. Reallocates the scanline
    /// buffer and resets the mouse picker.
    pub fn set_bounds(
        &mut self,
        base_x: i32,
        base_y: i32,
        clip_x: i32,
        clip_y: i32,
        width: i32,
        view_distance: i32,
    ) {
        self.base_x = base_x;
        self.base_y = base_y;
        self.clip_x = clip_x;
        self.clip_y = clip_y;
        self.width = width;
        self.view_distance = view_distance;
        self.scanlines.set_len((base_y + clip_y).max(0) as usize);
        self.picker.reset();
    }

    pub fn mouse_picker(&self) -> &MousePicker {
        &self.picker
    }

    pub fn mouse_picker_mut(&mut self) -> &mut MousePicker {
        &mut self.picker
    }

    /// Polygons that survived the cull in the last frame.
    pub fn visible_polygon_count(&self) -> usize {
        self.visible_count
    }

    /// Render one frame of `scene` into `surface`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn render(&mut self, scene: &mut Scene, surface: &mut PixelSurface) {
        let clip_x_far = self.clip_x * self.clip_far_3d >> self.view_distance;
        let clip_y_far = self.clip_y * self.clip_far_3d >> self.view_distance;
        scene.camera.prepare_for_rendering(
            self.clip_x,
            self.clip_y,
            self.clip_far_3d,
            clip_x_far,
            clip_y_far,
        );

        for model in scene.models.iter_mut() {
            model.project(&scene.camera, self.view_distance, self.clip_near);
        }
        scene.sprite_view.transform_state = 2;
        scene
            .sprite_view
            .project(&scene.camera, self.view_distance, self.clip_near);

        self.picker.reset();
        self.visible_count = 0;
        self.cull_model_faces(scene);
        self.cull_sprite_faces(scene);
        if self.visible_count == 0 {
            return;
        }

        depth_sort(&mut self.pool[..self.visible_count]);
        self.resolver
            .intersection_sort(&mut self.pool[..self.visible_count], scene, INTERSECT_STEP);

        for i in 0..self.visible_count {
            let poly = self.pool[i].clone();
            self.draw_polygon(&poly, scene, surface);
        }
    }

    /// Frustum-cull every face of every visible model and build pool
    /// records for the survivors.
    fn cull_model_faces(&mut self, scene: &mut Scene) {
        'models: for (model_index, model) in scene.models.iter_mut().enumerate() {
            if !model.visible {
                continue;
            }

            for face in 0..model.num_faces() {
                let vertices = &model.face_vertices[face];
                if vertices.len() < 3 {
                    continue;
                }

                // At least one vertex inside the depth band.
                let in_band = vertices.iter().any(|&v| {
                    let z = model.project_vertex_z[v];
                    z > self.clip_near && z < self.clip_far_3d
                });
                if !in_band {
                    continue;
                }

                // Both half-plane bits on each screen axis.
                let mut mask = 0;
                for &v in vertices {
                    if model.vertex_view_x[v] > -self.clip_x {
                        mask |= 1;
                    }
                    if model.vertex_view_x[v] < self.clip_x {
                        mask |= 2;
                    }
                    if mask == 3 {
                        break;
                    }
                }
                if mask != 3 {
                    continue;
                }
                mask = 0;
                for &v in vertices {
                    if model.vertex_view_y[v] > -self.clip_y {
                        mask |= 1;
                    }
                    if model.vertex_view_y[v] < self.clip_y {
                        mask |= 2;
                    }
                    if mask == 3 {
                        break;
                    }
                }
                if mask != 3 {
                    continue;
                }

                if self.visible_count >= MAX_POLYGONS {
                    warn!("polygon pool saturated, dropping remaining faces");
                    break 'models;
                }

                let poly = &mut self.pool[self.visible_count];
                poly.source = PolySource::Model(model_index);
                poly.face = face;
                initialise_polygon_3d(poly, model);

                let fill = if poly.visibility < 0 {
                    model.face_fill_front[face]
                } else {
                    model.face_fill_back[face]
                };
                if fill == COLOUR_TRANSPARENT {
                    continue;
                }
                poly.face_fill = fill;

                let vertices = &model.face_vertices[face];
                let depth_sum: i64 = vertices
                    .iter()
                    .map(|&v| i64::from(model.project_vertex_z[v]))
                    .sum();
                poly.depth = (depth_sum / vertices.len() as i64) as i32 + model.depth_bias;

                self.visible_count += 1;
            }
        }
    }

    /// Cull the billboard sprites against the 2D far plane and the clip
    /// rectangle.
    fn cull_sprite_faces(&mut self, scene: &Scene) {
        let view = &scene.sprite_view;
        for (face, sprite) in scene.sprites.iter().enumerate() {
            let vertices = &view.face_vertices[face];
            let v0 = vertices[0];
            let z = view.project_vertex_z[v0];
            if z <= self.clip_near || z >= self.clip_far_2d {
                continue;
            }

            let w = ((i64::from(sprite.width) << self.view_distance) / i64::from(z)) as i32;
            let h = ((i64::from(sprite.height) << self.view_distance) / i64::from(z)) as i32;
            let vx = view.vertex_view_x[v0];
            let vy = view.vertex_view_y[v0];
            if vx - w / 2 > self.clip_x
                || vx + w / 2 < -self.clip_x
                || vy - h > self.clip_y
                || vy < -self.clip_y
            {
                continue;
            }

            if self.visible_count >= MAX_POLYGONS {
                warn!("polygon pool saturated, dropping remaining sprites");
                return;
            }

            let poly = &mut self.pool[self.visible_count];
            poly.source = PolySource::Sprite;
            poly.face = face;
            initialise_polygon_2d(poly, view);
            poly.face_fill = 0;
            poly.depth = (view.project_vertex_z[v0] + view.project_vertex_z[vertices[1]]) / 2;
            self.visible_count += 1;
        }
    }

    fn draw_polygon(&mut self, poly: &Polygon, scene: &Scene, surface: &mut PixelSurface) {
        match poly.source {
            PolySource::Sprite => {
                let view = &scene.sprite_view;
                let entity = &scene.sprites[poly.face];
                let v0 = view.face_vertices[poly.face][0];
                let z = view.project_vertex_z[v0];
                if z <= 0 {
                    return;
                }

                let w = ((i64::from(entity.width) << self.view_distance) / i64::from(z)) as i32;
                let h = ((i64::from(entity.height) << self.view_distance) / i64::from(z)) as i32;
                let vx = view.vertex_view_x[v0];
                let vy = view.vertex_view_y[v0];
                surface.sprite_clip(
                    self.base_x + vx - w / 2,
                    self.base_y + vy - h,
                    w,
                    h,
                    entity.id,
                );
            }
            PolySource::Model(model_index) => {
                if poly.face_fill == FILL_INVISIBLE {
                    return;
                }
                let model = &scene.models[model_index];

                let (span_fill, shade_shift) = if poly.face_fill >= 0 {
                    let mut id = poly.face_fill as usize;
                    if surface.texture(id).is_none() {
                        id = 0;
                    }
                    let Some(texture) = surface.texture(id) else {
                        warn!("fill {} has no texture to fall back on", poly.face_fill);
                        return;
                    };
                    let large = texture.large;
                    (
                        SpanFill::Texture {
                            id,
                            large,
                            masked: model.transparent,
                            translucent: model.texture_translucent,
                        },
                        if large { 9 } else { 6 },
                    )
                } else {
                    (
                        SpanFill::Gradient {
                            fill: poly.face_fill,
                            translucent: model.transparent,
                        },
                        0,
                    )
                };

                let front = poly.visibility < 0;
                if !self.scratch.clip_face(
                    model,
                    poly.face,
                    front,
                    scene.fog_z_distance,
                    scene.fog_z_falloff.max(1),
                    self.view_distance,
                    self.clip_near,
                    shade_shift,
                ) {
                    return;
                }
                if !self.scanlines.build(&mut self.scratch, self.base_y) {
                    return;
                }

                let (mouse_x, mouse_y) = self.picker.position();
                if !model.unpickable
                    && mouse_y >= self.scanlines.min_y
                    && mouse_y < self.scanlines.max_y
                {
                    let span = self.scanlines.row(mouse_y);
                    let centred_x = mouse_x - self.base_x;
                    if centred_x >= span.start_x >> 8 && centred_x < span.end_x >> 8 {
                        self.picker.add(model_index, poly.face);
                    }
                }

                let bounds = RasterBounds {
                    base_x: self.base_x,
                    base_y: self.base_y,
                    clip_x: self.clip_x,
                    width: self.width,
                    view_distance: self.view_distance,
                };
                rasterize_face(
                    surface,
                    &mut self.gradients,
                    &self.scanlines,
                    &self.scratch,
                    &bounds,
                    span_fill,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Model;

    fn quad_model(half: i32, z: i32, fill: i32) -> Model {
        let mut model = Model::new();
        let a = model.vertex_at(-half, -half, z);
        let b = model.vertex_at(half, -half, z);
        let c = model.vertex_at(half, half, z);
        let d = model.vertex_at(-half, half, z);
        model.add_face(&[a, b, c, d], fill, fill).unwrap();
        model.set_face_intensity(0, 0);
        model
    }

    fn green_texture_surface(size: usize) -> PixelSurface {
        let mut surface = PixelSurface::new(size, size);
        surface
            .define_texture(0, vec![0x00ff00; 128 * 128], true)
            .unwrap();
        surface
    }

    #[test]
    fn blank_scene_renders_nothing() {
        let mut scene = Scene::new();
        let mut surface = PixelSurface::new(128, 128);
        let mut renderer = SceneRenderer::new(128, 128);

        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 0);
        assert!(surface.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn centred_quad_hits_the_centre_pixel() {
        let mut scene = Scene::new();
        scene.add_model(quad_model(100, 1000, 0));
        let mut surface = green_texture_surface(512);
        let mut renderer = SceneRenderer::new(512, 512);

        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 1);
        // Shade 0: the texel lands unshifted.
        assert_eq!(surface.pixels()[256 * 512 + 256], 0x00ff00);
    }

    #[test]
    fn face_intensity_darkens_by_shift() {
        let mut scene = Scene::new();
        let mut model = quad_model(100, 1000, 0);
        model.set_face_intensity(0, 255);
        scene.add_model(model);
        let mut surface = green_texture_surface(512);
        let mut renderer = SceneRenderer::new(512, 512);

        renderer.render(&mut scene, &mut surface);

        // Darkness 255 resolves to a >> 3 on the large texture path.
        assert_eq!(surface.pixels()[256 * 512 + 256], 0x00ff00 >> 3);
    }

    #[test]
    fn transparent_sentinel_skips_the_face() {
        let mut scene = Scene::new();
        scene.add_model(quad_model(100, 1000, COLOUR_TRANSPARENT));
        let mut surface = green_texture_surface(256);
        let mut renderer = SceneRenderer::new(256, 256);

        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 0);
    }

    #[test]
    fn invisible_fill_sorts_but_never_draws() {
        let mut scene = Scene::new();
        scene.add_model(quad_model(100, 1000, FILL_INVISIBLE));
        let mut surface = green_texture_surface(256);
        let mut renderer = SceneRenderer::new(256, 256);

        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 1);
        assert!(surface.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn near_plane_straddle_still_rasterizes() {
        let mut scene = Scene::new();
        let mut model = Model::new();
        let a = model.vertex_at(-100, 50, 2);
        let b = model.vertex_at(100, 50, 2);
        let c = model.vertex_at(0, -50, 100);
        model.add_face(&[a, b, c], -1 - 0x7fff, -1 - 0x7fff).unwrap();
        model.set_face_intensity(0, 0);
        scene.add_model(model);

        let mut surface = PixelSurface::new(512, 512);
        let mut renderer = SceneRenderer::new(512, 512);
        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 1);
        assert!(surface.pixels().iter().any(|&p| p != 0));
    }

    #[test]
    fn overlapping_quads_resolve_and_terminate() {
        let mut scene = Scene::new();
        for k in 0..3 {
            let mut model = Model::new();
            let a = model.vertex_at(-100, -100, 650 + 40 * k);
            let b = model.vertex_at(100, -100, 810 - 40 * k);
            let c = model.vertex_at(100, 100, 650 + 40 * k);
            let d = model.vertex_at(-100, 100, 810 - 40 * k);
            model.add_face(&[a, b, c, d], -1 - 0x7c00, -1 - 0x1f).unwrap();
            model.set_face_intensity(0, 50);
            scene.add_model(model);
        }

        let mut surface = PixelSurface::new(256, 256);
        let mut renderer = SceneRenderer::new(256, 256);
        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 3);
        assert!(surface.pixels().iter().any(|&p| p != 0));
    }

    #[test]
    fn mouse_pick_reports_only_pickable_cover() {
        let mut scene = Scene::new();
        // Pickable quad in front, unpickable quad behind it.
        scene.add_model(quad_model(100, 800, -1 - 0x7fff));
        let mut behind = quad_model(100, 1200, -1 - 0x7fff);
        behind.unpickable = true;
        scene.add_model(behind);

        let mut surface = PixelSurface::new(512, 512);
        let mut renderer = SceneRenderer::new(512, 512);
        renderer.mouse_picker_mut().set_position(256, 256);

        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.mouse_picker().picked().to_vec(), vec![(0, 0)]);
    }

    #[test]
    fn sprite_is_blitted_at_its_anchor() {
        let mut scene = Scene::new();
        scene.add_sprite(0, 0, 0, 500, 100, 100);

        let mut surface = PixelSurface::new(512, 512);
        surface
            .define_sprite(0, 4, 4, vec![0xaabbcc; 16])
            .unwrap();
        let mut renderer = SceneRenderer::new(512, 512);
        renderer.render(&mut scene, &mut surface);

        assert_eq!(renderer.visible_polygon_count(), 1);
        // On-screen size is (100 << 9) / 500 = 102, bottom-centred on the
        // projected anchor at the surface centre.
        assert_eq!(surface.pixels()[(256 - 50) * 512 + 256], 0xaabbcc);
        // Above the sprite top nothing was written.
        assert_eq!(surface.pixels()[(256 - 110) * 512 + 256], 0);
    }

    #[test]
    fn repeat_render_is_deterministic() {
        let build = || {
            let mut scene = Scene::new();
            scene.add_model(quad_model(100, 1000, -1 - 0x03e0));
            scene
        };

        let mut surface_a = PixelSurface::new(256, 256);
        let mut renderer = SceneRenderer::new(256, 256);
        let mut scene = build();
        renderer.render(&mut scene, &mut surface_a);

        let mut surface_b = PixelSurface::new(256, 256);
        let mut scene = build();
        renderer.render(&mut scene, &mut surface_b);

        assert_eq!(surface_a.pixels(), surface_b.pixels());
    }
}
