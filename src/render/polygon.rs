//! Pooled per-frame polygon records and their projectors.

use crate::scene::Model;

/// Where a polygon's face data lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PolySource {
    /// Index into the scene's model list.
    Model(usize),
    /// Face of the sprite pseudo-model.
    Sprite,
}

/// Scratch record for one visible face. The pool is allocated once and
/// reused every frame.
#[derive(Clone)]
pub struct Polygon {
    pub source: PolySource,
    pub face: usize,
    /// Average projected depth plus the model's depth bias.
    pub depth: i32,
    /// Signed `v0 . N`; the sign tells which side of the face plane the
    /// camera is on, the magnitude feeds the separation tests.
    pub visibility: i32,
    pub normal_x: i32,
    pub normal_y: i32,
    pub normal_z: i32,
    /// Tolerance band for the separating-plane predicate.
    pub normal_magnitude: i32,
    pub min_z: i32,
    pub max_z: i32,
    pub min_plane_x: i32,
    pub max_plane_x: i32,
    pub min_plane_y: i32,
    pub max_plane_y: i32,
    pub face_fill: i32,
    // Intersection-resolver scratch.
    pub skip: bool,
    pub index: i32,
    pub index2: i32,
}

impl Polygon {
    pub fn new() -> Polygon {
        Polygon {
            source: PolySource::Sprite,
            face: 0,
            depth: 0,
            visibility: 0,
            normal_x: 0,
            normal_y: 0,
            normal_z: 0,
            normal_magnitude: 0,
            min_z: 0,
            max_z: 0,
            min_plane_x: 0,
            max_plane_x: 0,
            min_plane_y: 0,
            max_plane_y: 0,
            face_fill: 0,
            skip: false,
            index: 0,
            index2: 0,
        }
    }
}

impl Default for Polygon {
    fn default() -> Polygon {
        Polygon::new()
    }
}

/// Component bound for the scaled face normal; keeps the visibility and
/// plane-test dot products inside 32 bits.
const NORMAL_COMPONENT_LIMIT: i32 = 25000;

/// Multiplier for the memoized plane-test tolerance.
const NORMAL_MAGNITUDE_BASE: i32 = 4;

/// Fill the polygon record for 3D face `poly.face` of `model`: face normal
/// (scaled so every component fits the 15-bit-ish bound, the scale memoized
/// on the face), camera-side visibility scalar, and the screen/depth AABB.
///
/// Overflow in the cross and dot products is legitimate and relied upon;
/// everything wraps.
pub(crate) fn initialise_polygon_3d(poly: &mut Polygon, model: &mut Model) {
    let face = poly.face;
    let vertices = &model.face_vertices[face];

    let x0 = model.project_vertex_x[vertices[0]];
    let y0 = model.project_vertex_y[vertices[0]];
    let z0 = model.project_vertex_z[vertices[0]];
    let dx1 = model.project_vertex_x[vertices[1]].wrapping_sub(x0);
    let dy1 = model.project_vertex_y[vertices[1]].wrapping_sub(y0);
    let dz1 = model.project_vertex_z[vertices[1]].wrapping_sub(z0);
    let dx2 = model.project_vertex_x[vertices[2]].wrapping_sub(x0);
    let dy2 = model.project_vertex_y[vertices[2]].wrapping_sub(y0);
    let dz2 = model.project_vertex_z[vertices[2]].wrapping_sub(z0);

    let mut nx = dy1.wrapping_mul(dz2).wrapping_sub(dz1.wrapping_mul(dy2));
    let mut ny = dz1.wrapping_mul(dx2).wrapping_sub(dx1.wrapping_mul(dz2));
    let mut nz = dx1.wrapping_mul(dy2).wrapping_sub(dy1.wrapping_mul(dx2));

    if model.normal_scale[face] == -1 {
        let mut scale = 0;
        while nx > NORMAL_COMPONENT_LIMIT
            || ny > NORMAL_COMPONENT_LIMIT
            || nz > NORMAL_COMPONENT_LIMIT
            || nx < -NORMAL_COMPONENT_LIMIT
            || ny < -NORMAL_COMPONENT_LIMIT
            || nz < -NORMAL_COMPONENT_LIMIT
        {
            nx >>= 1;
            ny >>= 1;
            nz >>= 1;
            scale += 1;
        }
        model.normal_scale[face] = scale;

        let length_sq =
            i64::from(nx) * i64::from(nx) + i64::from(ny) * i64::from(ny) + i64::from(nz) * i64::from(nz);
        model.normal_magnitude[face] =
            (f64::from(NORMAL_MAGNITUDE_BASE) * (length_sq as f64).sqrt()) as i32;
    } else {
        let scale = model.normal_scale[face];
        nx >>= scale;
        ny >>= scale;
        nz >>= scale;
    }

    poly.visibility = x0
        .wrapping_mul(nx)
        .wrapping_add(y0.wrapping_mul(ny))
        .wrapping_add(z0.wrapping_mul(nz));
    poly.normal_x = nx;
    poly.normal_y = ny;
    poly.normal_z = nz;
    poly.normal_magnitude = model.normal_magnitude[face];

    let mut min_z = i32::MAX;
    let mut max_z = i32::MIN;
    let mut min_px = i32::MAX;
    let mut max_px = i32::MIN;
    let mut min_py = i32::MAX;
    let mut max_py = i32::MIN;
    for &v in vertices {
        min_z = min_z.min(model.project_vertex_z[v]);
        max_z = max_z.max(model.project_vertex_z[v]);
        min_px = min_px.min(model.vertex_view_x[v]);
        max_px = max_px.max(model.vertex_view_x[v]);
        min_py = min_py.min(model.vertex_view_y[v]);
        max_py = max_py.max(model.vertex_view_y[v]);
    }
    poly.min_z = min_z;
    poly.max_z = max_z;
    poly.min_plane_x = min_px;
    poly.max_plane_x = max_px;
    poly.min_plane_y = min_py;
    poly.max_plane_y = max_py;
}

/// Horizontal AABB inflation applied to sprite polygons so the sorter is
/// biased against interleaving billboards with world geometry.
pub(crate) const SPRITE_PLANE_INFLATION: i32 = 20;

/// Fill the polygon record for a two-vertex billboard face of the sprite
/// pseudo-model: screen-facing unit normal, AABB from the anchor and top
/// vertices, inflated horizontally.
pub(crate) fn initialise_polygon_2d(poly: &mut Polygon, view: &Model) {
    let vertices = &view.face_vertices[poly.face];
    let v0 = vertices[0];
    let v1 = vertices[1];

    poly.normal_x = 0;
    poly.normal_y = 0;
    poly.normal_z = 1;
    poly.normal_magnitude = 1;
    poly.visibility = 1;

    let z0 = view.project_vertex_z[v0];
    let z1 = view.project_vertex_z[v1];
    poly.min_z = z0.min(z1);
    poly.max_z = z0.max(z1);

    let x0 = view.vertex_view_x[v0];
    let x1 = view.vertex_view_x[v1];
    poly.min_plane_x = x0.min(x1) - SPRITE_PLANE_INFLATION;
    poly.max_plane_x = x0.max(x1) + SPRITE_PLANE_INFLATION;

    let y0 = view.vertex_view_y[v0];
    let y1 = view.vertex_view_y[v1];
    poly.min_plane_y = y0.min(y1);
    poly.max_plane_y = y0.max(y1);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scene::Camera;

    fn quad_at(z: i32) -> Model {
        let mut model = Model::new();
        let a = model.vertex_at(-100, -100, z);
        let b = model.vertex_at(100, -100, z);
        let c = model.vertex_at(100, 100, z);
        let d = model.vertex_at(-100, 100, z);
        model.add_face(&[a, b, c, d], 0, 0).unwrap();
        model.project(&Camera::new(), 9, 5);
        model
    }

    #[test]
    fn normal_scale_is_memoized_on_first_sight() {
        let mut model = quad_at(1000);
        let mut poly = Polygon::new();
        poly.source = PolySource::Model(0);
        poly.face = 0;

        assert_eq!(model.normal_scale[0], -1);
        initialise_polygon_3d(&mut poly, &mut model);

        let scale = model.normal_scale[0];
        assert!(scale >= 0);
        assert!(poly.normal_x.abs() <= NORMAL_COMPONENT_LIMIT);
        assert!(poly.normal_y.abs() <= NORMAL_COMPONENT_LIMIT);
        assert!(poly.normal_z.abs() <= NORMAL_COMPONENT_LIMIT);
        assert!(model.normal_magnitude[0] > 0);

        // Second sight must reuse the cached scale and produce the same
        // normal.
        let n = (poly.normal_x, poly.normal_y, poly.normal_z);
        initialise_polygon_3d(&mut poly, &mut model);
        assert_eq!(model.normal_scale[0], scale);
        assert_eq!((poly.normal_x, poly.normal_y, poly.normal_z), n);
    }

    #[test]
    fn aabb_is_ordered() {
        let mut model = quad_at(800);
        let mut poly = Polygon::new();
        poly.source = PolySource::Model(0);
        initialise_polygon_3d(&mut poly, &mut model);

        assert!(poly.min_plane_x <= poly.max_plane_x);
        assert!(poly.min_plane_y <= poly.max_plane_y);
        assert!(poly.min_z <= poly.max_z);
        assert_eq!(poly.min_z, 800);
        assert_eq!(poly.max_z, 800);
    }

    #[test]
    fn sprite_aabb_is_inflated() {
        let mut view = Model::new();
        let bottom = view.vertex_at(50, 0, 600);
        let top = view.vertex_at(50, -120, 600);
        view.add_face(&[bottom, top], 0, 0).unwrap();
        view.project(&Camera::new(), 9, 5);

        let mut poly = Polygon::new();
        poly.face = 0;
        initialise_polygon_2d(&mut poly, &view);

        let vx = view.vertex_view_x[bottom];
        assert_eq!(poly.min_plane_x, vx - SPRITE_PLANE_INFLATION);
        assert_eq!(poly.max_plane_x, vx + SPRITE_PLANE_INFLATION);
        assert_eq!(poly.normal_z, 1);
        assert_eq!(poly.normal_magnitude, 1);
    }
}
