//! Per-row span generation.
//!
//! For each polygon the generator first clips the face against the near
//! plane, emitting synthesized vertices where edges cross it, computes a
//! per-vertex shade (flat or per-vertex lighting, plus fog), and then walks
//! the edges in 24.8 fixed point to fill one `Scanline` record per screen
//! row the polygon covers.

use tracing::warn;

use crate::render::COLOUR_TRANSPARENT;
use crate::scene::Model;

/// Size of the per-polygon vertex scratch.
pub(crate) const VERTEX_SCRATCH: usize = 40;

/// Row-span init sentinels (24.8): any real span narrows them.
const SPAN_START_SENTINEL: i32 = 640000;
const SPAN_END_SENTINEL: i32 = -655360;

/// One row's span. `start_x`/`end_x` are screen columns `<< 8` relative to
/// the projection centre; the shades pair with their ends.
#[derive(Clone, Copy, Default)]
pub struct Scanline {
    pub start_x: i32,
    pub end_x: i32,
    pub start_shade: i32,
    pub end_shade: i32,
}

/// Near-plane-clipped face: screen coordinates, shades, and the camera-space
/// positions the rasterizer derives its plane equations from.
pub(crate) struct FaceScratch {
    pub plane_x: [i32; VERTEX_SCRATCH],
    pub plane_y: [i32; VERTEX_SCRATCH],
    pub shade: [i32; VERTEX_SCRATCH],
    pub cam_x: [i32; VERTEX_SCRATCH],
    pub cam_y: [i32; VERTEX_SCRATCH],
    pub cam_z: [i32; VERTEX_SCRATCH],
    pub plane: usize,
}

impl FaceScratch {
    pub fn new() -> FaceScratch {
        FaceScratch {
            plane_x: [0; VERTEX_SCRATCH],
            plane_y: [0; VERTEX_SCRATCH],
            shade: [0; VERTEX_SCRATCH],
            cam_x: [0; VERTEX_SCRATCH],
            cam_y: [0; VERTEX_SCRATCH],
            cam_z: [0; VERTEX_SCRATCH],
            plane: 0,
        }
    }

    /// Build the clipped vertex ring for `face`. Vertices in front of the
    /// near plane pass through; a vertex behind it contributes up to two
    /// synthesized vertices on the near plane, one per neighbour still in
    /// front. Returns false when fewer than three vertices survive.
    #[allow(clippy::too_many_arguments)]
    pub fn clip_face(
        &mut self,
        model: &Model,
        face: usize,
        front: bool,
        fog_z_distance: i32,
        fog_z_falloff: i32,
        view_distance: i32,
        clip_near: i32,
        shade_shift: i32,
    ) -> bool {
        let vertices = &model.face_vertices[face];
        let n = vertices.len();
        if n * 2 > VERTEX_SCRATCH {
            warn!("face {} has too many vertices ({})", face, n);
            return false;
        }

        let mut vertex_shades = [0i32; VERTEX_SCRATCH];
        for (i, &v) in vertices.iter().enumerate() {
            vertex_shades[i] = vertex_shade(
                model,
                face,
                v,
                front,
                fog_z_distance,
                fog_z_falloff,
                shade_shift,
            );
        }

        self.plane = 0;
        for i in 0..n {
            let v = vertices[i];
            if model.project_vertex_z[v] >= clip_near {
                self.push(
                    model.vertex_view_x[v],
                    model.vertex_view_y[v],
                    vertex_shades[i],
                    model.project_vertex_x[v],
                    model.project_vertex_y[v],
                    model.project_vertex_z[v],
                );
            } else {
                let prev = (i + n - 1) % n;
                if model.project_vertex_z[vertices[prev]] >= clip_near {
                    self.push_clipped(
                        model,
                        v,
                        vertices[prev],
                        vertex_shades[i],
                        vertex_shades[prev],
                        view_distance,
                        clip_near,
                    );
                }
                let next = (i + 1) % n;
                if model.project_vertex_z[vertices[next]] >= clip_near {
                    self.push_clipped(
                        model,
                        v,
                        vertices[next],
                        vertex_shades[i],
                        vertex_shades[next],
                        view_distance,
                        clip_near,
                    );
                }
            }
        }

        self.plane >= 3
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push(&mut self, x: i32, y: i32, shade: i32, cam_x: i32, cam_y: i32, cam_z: i32) {
        self.plane_x[self.plane] = x;
        self.plane_y[self.plane] = y;
        self.shade[self.plane] = shade;
        self.cam_x[self.plane] = cam_x;
        self.cam_y[self.plane] = cam_y;
        self.cam_z[self.plane] = cam_z;
        self.plane += 1;
    }

    /// Synthesize the crossing of edge `behind -> ahead` with the near
    /// plane.
    #[allow(clippy::too_many_arguments)]
    fn push_clipped(
        &mut self,
        model: &Model,
        behind: usize,
        ahead: usize,
        shade_behind: i32,
        shade_ahead: i32,
        view_distance: i32,
        clip_near: i32,
    ) {
        let zb = i64::from(model.project_vertex_z[behind]);
        let za = i64::from(model.project_vertex_z[ahead]);
        let num = i64::from(clip_near) - zb;
        let den = za - zb;

        let xb = i64::from(model.project_vertex_x[behind]);
        let xa = i64::from(model.project_vertex_x[ahead]);
        let yb = i64::from(model.project_vertex_y[behind]);
        let ya = i64::from(model.project_vertex_y[ahead]);

        let cx = xb + (xa - xb) * num / den;
        let cy = yb + (ya - yb) * num / den;
        let sx = (cx << view_distance) / i64::from(clip_near);
        let sy = (cy << view_distance) / i64::from(clip_near);
        let shade = i64::from(shade_behind)
            + (i64::from(shade_ahead) - i64::from(shade_behind)) * num / den;

        self.push(
            clamp_coord(sx),
            clamp_coord(sy),
            shade as i32,
            cx as i32,
            cy as i32,
            clip_near,
        );
    }
}

/// Keep synthesized screen coordinates representable through the `<< 8`
/// edge math.
fn clamp_coord(v: i64) -> i32 {
    v.clamp(-0x40_0000, 0x40_0000) as i32
}

fn vertex_shade(
    model: &Model,
    face: usize,
    vertex: usize,
    front: bool,
    fog_z_distance: i32,
    fog_z_falloff: i32,
    shade_shift: i32,
) -> i32 {
    let mut shade = if model.face_intensity[face] == COLOUR_TRANSPARENT {
        // Per-vertex lighting; back faces take the intensity negated.
        let sign = if front { 1 } else { -1 };
        model.light_ambience
            + sign * model.vertex_intensity[vertex]
            + sign * model.vertex_ambience[vertex]
    } else {
        model.face_intensity[face]
    };

    let z = model.project_vertex_z[vertex];
    if z > fog_z_distance {
        shade += (z - fog_z_distance) / fog_z_falloff;
    }

    shade.clamp(0, 255) << shade_shift
}

/// Per-row spans for the polygon currently being rasterized, indexed by
/// absolute screen row. Reused across polygons; only `[min_y, max_y)` is
/// valid at any time.
pub(crate) struct ScanlineBuffer {
    rows: Vec<Scanline>,
    pub min_y: i32,
    pub max_y: i32,
}

impl ScanlineBuffer {
    pub fn new() -> ScanlineBuffer {
        ScanlineBuffer {
            rows: Vec::new(),
            min_y: 0,
            max_y: 0,
        }
    }

    pub fn set_len(&mut self, len: usize) {
        self.rows.clear();
        self.rows.resize(len, Scanline::default());
    }

    pub fn row(&self, y: i32) -> &Scanline {
        &self.rows[y as usize]
    }

    /// Populate the rows covered by the clipped face in `scratch`. Screen
    /// rows are `plane_y + base_y`, trimmed to the buffer; the edge ring is
    /// walked with 24.8 x/shade accumulators. Returns false when no row
    /// survives trimming.
    pub fn build(&mut self, scratch: &mut FaceScratch, base_y: i32) -> bool {
        let limit = self.rows.len() as i32;
        let plane = scratch.plane;

        let mut min_y = i32::MAX;
        let mut max_y = i32::MIN;
        for k in 0..plane {
            scratch.plane_y[k] += base_y;
            min_y = min_y.min(scratch.plane_y[k]);
            max_y = max_y.max(scratch.plane_y[k]);
        }
        let min_y = min_y.max(0);
        let max_y = max_y.min(limit);
        if min_y >= max_y {
            self.min_y = 0;
            self.max_y = 0;
            return false;
        }

        for row in &mut self.rows[min_y as usize..max_y as usize] {
            row.start_x = SPAN_START_SENTINEL;
            row.end_x = SPAN_END_SENTINEL;
            row.start_shade = 0;
            row.end_shade = 0;
        }

        match plane {
            3 => {
                self.edge(scratch, 0, 1);
                self.edge(scratch, 1, 2);
                self.edge(scratch, 2, 0);
            }
            4 => {
                self.edge(scratch, 0, 1);
                self.edge(scratch, 1, 2);
                self.edge(scratch, 2, 3);
                self.edge(scratch, 3, 0);
            }
            n => {
                // Long edge closing the ring, then the consecutive edges.
                self.edge(scratch, 0, n - 1);
                for k in 0..n - 1 {
                    self.edge(scratch, k, k + 1);
                }
            }
        }

        self.min_y = min_y;
        self.max_y = max_y;
        true
    }

    fn edge(&mut self, scratch: &FaceScratch, i: usize, j: usize) {
        let limit = self.rows.len() as i32;
        let (mut x0, mut y0, mut s0) = (scratch.plane_x[i], scratch.plane_y[i], scratch.shade[i]);
        let (mut x1, mut y1, mut s1) = (scratch.plane_x[j], scratch.plane_y[j], scratch.shade[j]);

        if y0 == y1 {
            if y0 >= 0 && y0 < limit {
                self.update(y0, i64::from(x0) << 8, i64::from(s0) << 8);
                self.update(y0, i64::from(x1) << 8, i64::from(s1) << 8);
            }
            return;
        }
        if y0 > y1 {
            std::mem::swap(&mut x0, &mut x1);
            std::mem::swap(&mut y0, &mut y1);
            std::mem::swap(&mut s0, &mut s1);
        }

        let dy = i64::from(y1 - y0);
        let dx = (i64::from(x1 - x0) << 8) / dy;
        let ds = (i64::from(s1 - s0) << 8) / dy;

        let mut x = i64::from(x0) << 8;
        let mut shade = i64::from(s0) << 8;
        let mut y = y0;
        if y < 0 {
            x += dx * i64::from(-y);
            shade += ds * i64::from(-y);
            y = 0;
        }

        // Rows cover [y0, y1): the bottom vertex row belongs to the next
        // edge down.
        let y_end = y1.min(limit);
        while y < y_end {
            self.update(y, x, shade);
            x += dx;
            shade += ds;
            y += 1;
        }
    }

    fn update(&mut self, y: i32, x: i64, shade: i64) {
        let x = x.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        let shade = shade.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        let row = &mut self.rows[y as usize];
        if x < row.start_x {
            row.start_x = x;
            row.start_shade = shade;
        }
        if x > row.end_x {
            row.end_x = x;
            row.end_shade = shade;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;

    fn scratch_triangle(points: [(i32, i32, i32); 3]) -> FaceScratch {
        let mut scratch = FaceScratch::new();
        for (x, y, shade) in points {
            scratch.push(x, y, shade, 0, 0, 0);
        }
        scratch
    }

    #[test]
    fn triangle_spans_cover_each_row_once() {
        let mut buffer = ScanlineBuffer::new();
        buffer.set_len(64);

        // Flat-bottom triangle, apex at (0, 0).
        let mut scratch = scratch_triangle([(0, 0, 0), (10, 10, 0), (-10, 10, 0)]);
        assert!(buffer.build(&mut scratch, 16));

        assert_eq!(buffer.min_y, 16);
        assert_eq!(buffer.max_y, 26);

        // The apex row is a single point.
        assert_eq!(buffer.row(16).start_x >> 8, 0);
        assert_eq!(buffer.row(16).end_x >> 8, 0);
        // Lower rows widen symmetrically.
        let row = buffer.row(21);
        assert_eq!(row.start_x >> 8, -5);
        assert_eq!(row.end_x >> 8, 5);
    }

    #[test]
    fn rows_are_trimmed_to_the_buffer() {
        let mut buffer = ScanlineBuffer::new();
        buffer.set_len(32);

        let mut scratch = scratch_triangle([(0, -100, 0), (50, 100, 0), (-50, 100, 0)]);
        assert!(buffer.build(&mut scratch, 0));
        assert_eq!(buffer.min_y, 0);
        assert_eq!(buffer.max_y, 32);
        // Rows at the top of the buffer carry interpolated, not apex,
        // extents.
        assert!(buffer.row(0).start_x >> 8 > -50);
        assert!(buffer.row(0).end_x >> 8 < 50);
    }

    #[test]
    fn shade_interpolates_along_edges() {
        let mut buffer = ScanlineBuffer::new();
        buffer.set_len(64);

        let mut scratch = scratch_triangle([(0, 0, 0), (16, 16, 160), (-16, 16, 160)]);
        assert!(buffer.build(&mut scratch, 0));

        let row = buffer.row(8);
        assert_eq!(row.start_shade >> 8, 80);
        assert_eq!(row.end_shade >> 8, 80);
    }

    #[test]
    fn near_plane_straddle_synthesizes_vertices() {
        let mut model = Model::new();
        let a = model.vertex_at(-100, 50, 2);
        let b = model.vertex_at(100, 50, 2);
        let c = model.vertex_at(0, -50, 100);
        model.add_face(&[a, b, c], 0, 0).unwrap();
        model.set_face_intensity(0, 100);
        model.project(&Camera::new(), 9, 5);

        let mut scratch = FaceScratch::new();
        let kept = scratch.clip_face(&model, 0, true, i32::MAX, 32, 9, 5, 0);
        assert!(kept);
        // The two behind-plane vertices each synthesize one crossing toward
        // c, and c itself passes through.
        assert_eq!(scratch.plane, 3);
        let on_plane = (0..scratch.plane)
            .filter(|&k| scratch.cam_z[k] == 5)
            .count();
        assert_eq!(on_plane, 2);
    }

    #[test]
    fn fully_behind_face_is_rejected() {
        let mut model = Model::new();
        let a = model.vertex_at(-10, 0, 2);
        let b = model.vertex_at(10, 0, 2);
        let c = model.vertex_at(0, 10, 3);
        model.add_face(&[a, b, c], 0, 0).unwrap();
        model.project(&Camera::new(), 9, 5);

        let mut scratch = FaceScratch::new();
        assert!(!scratch.clip_face(&model, 0, true, i32::MAX, 32, 9, 5, 0));
    }
}
