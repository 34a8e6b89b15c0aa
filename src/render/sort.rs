//! Draw-order resolution.
//!
//! Two phases: an in-place quicksort on average depth (descending, so the
//! list is back-to-front), then a bounded-window resolve that detects pairs
//! whose painter order is provably wrong and re-inserts the offender
//! earlier via adjacent swaps. The tests are Newell-style: depth bands,
//! screen AABBs, separating planes with a per-face tolerance, and finally a
//! row walk over the two projected hulls.

use crate::render::polygon::Polygon;
use crate::render::polygon::PolySource;
use crate::render::polygon::SPRITE_PLANE_INFLATION;
use crate::render::scanline::VERTEX_SCRATCH;
use crate::scene::Model;
use crate::scene::Scene;

/// Quicksort `pool` by depth, farthest first. The middle element is swapped
/// to the low end as the pivot; partitioning is Hoare's.
pub(crate) fn depth_sort(pool: &mut [Polygon]) {
    if pool.len() > 1 {
        quicksort(pool, 0, pool.len() - 1);
    }
}

fn quicksort(pool: &mut [Polygon], low: usize, high: usize) {
    if low >= high {
        return;
    }

    let mid = low + (high - low) / 2;
    pool.swap(low, mid);
    let pivot = pool[low].depth;

    let mut i = low;
    let mut j = high;
    loop {
        while pool[i].depth > pivot {
            i += 1;
        }
        while pool[j].depth < pivot {
            j -= 1;
        }
        if i >= j {
            break;
        }
        pool.swap(i, j);
        i += 1;
        j -= 1;
    }

    quicksort(pool, low, j);
    quicksort(pool, j + 1, high);
}

fn face_of<'a>(scene: &'a Scene, poly: &Polygon) -> (&'a Model, usize) {
    match poly.source {
        PolySource::Model(i) => (&scene.models[i], poly.face),
        PolySource::Sprite => (&scene.sprite_view, poly.face),
    }
}

/// True when `a` may be drawn before `b`: no vertex of `a` lies decisively
/// on the camera's side of b's plane. The tolerance band is b's memoized
/// normal magnitude; products wrap like the rest of the plane math.
pub(crate) fn heuristic_polygon(scene: &Scene, a: &Polygon, b: &Polygon) -> bool {
    let (b_model, b_face) = face_of(scene, b);
    let b0 = b_model.face_vertices[b_face][0];
    let bx0 = b_model.project_vertex_x[b0];
    let by0 = b_model.project_vertex_y[b0];
    let bz0 = b_model.project_vertex_z[b0];

    let (a_model, a_face) = face_of(scene, a);
    let magnitude = b.normal_magnitude;

    for &v in &a_model.face_vertices[a_face] {
        let d = (bx0.wrapping_sub(a_model.project_vertex_x[v])).wrapping_mul(b.normal_x)
            .wrapping_add((by0.wrapping_sub(a_model.project_vertex_y[v])).wrapping_mul(b.normal_y))
            .wrapping_add((bz0.wrapping_sub(a_model.project_vertex_z[v])).wrapping_mul(b.normal_z));
        if (b.visibility > 0 && d > magnitude) || (b.visibility < 0 && d < -magnitude) {
            return false;
        }
    }
    true
}

/// True when every vertex of `subject` sits on the camera's side of
/// `plane`'s plane (within tolerance), i.e. drawing `subject` after `plane`
/// is right.
fn in_front_of_plane(scene: &Scene, subject: &Polygon, plane: &Polygon) -> bool {
    let (p_model, p_face) = face_of(scene, plane);
    let p0 = p_model.face_vertices[p_face][0];
    let px0 = p_model.project_vertex_x[p0];
    let py0 = p_model.project_vertex_y[p0];
    let pz0 = p_model.project_vertex_z[p0];

    let (s_model, s_face) = face_of(scene, subject);
    let magnitude = plane.normal_magnitude;

    for &v in &s_model.face_vertices[s_face] {
        let d = (px0.wrapping_sub(s_model.project_vertex_x[v])).wrapping_mul(plane.normal_x)
            .wrapping_add((py0.wrapping_sub(s_model.project_vertex_y[v])).wrapping_mul(plane.normal_y))
            .wrapping_add((pz0.wrapping_sub(s_model.project_vertex_z[v])).wrapping_mul(plane.normal_z));
        if (plane.visibility > 0 && d < -magnitude) || (plane.visibility < 0 && d > magnitude) {
            return false;
        }
    }
    true
}

/// Bounded-window intersection resolver. Owns the scratch the 2D hull test
/// needs so the steady-state frame allocates nothing.
pub(crate) struct DepthResolver {
    new_start: usize,
    /// Upper bound of the subrange a reorder left unexamined. Recorded for
    /// parity with `new_start`; the current caller re-walks its own window.
    #[allow(dead_code)]
    new_end: usize,
    ax: [i32; VERTEX_SCRATCH],
    ay: [i32; VERTEX_SCRATCH],
    bx: [i32; VERTEX_SCRATCH],
    by: [i32; VERTEX_SCRATCH],
}

impl DepthResolver {
    pub fn new() -> DepthResolver {
        DepthResolver {
            new_start: 0,
            new_end: 0,
            ax: [0; VERTEX_SCRATCH],
            ay: [0; VERTEX_SCRATCH],
            bx: [0; VERTEX_SCRATCH],
            by: [0; VERTEX_SCRATCH],
        }
    }

    /// Walk the sorted pool and, within a sliding window of `step`
    /// polygons, re-insert any polygon that provably must be drawn before
    /// the one currently ahead of it. `index`/`index2` break ping-pong
    /// cycles between the same pair.
    pub fn intersection_sort(&mut self, pool: &mut [Polygon], scene: &Scene, step: usize) {
        let count = pool.len();
        if count == 0 {
            return;
        }
        for (i, poly) in pool.iter_mut().enumerate() {
            poly.skip = false;
            poly.index = i as i32;
            poly.index2 = -1;
        }

        let mut l = 0;
        while l < count {
            if pool[l].skip {
                l += 1;
                continue;
            }
            pool[l].skip = true;
            let current = pool[l].clone();

            let end = (l + step).min(count - 1);
            let mut k = end;
            while k > l {
                let other = &pool[k];
                if current.min_plane_x < other.max_plane_x
                    && other.min_plane_x < current.max_plane_x
                    && current.min_plane_y < other.max_plane_y
                    && other.min_plane_y < current.max_plane_y
                    && current.index != other.index2
                {
                    let other_index = other.index;
                    let other = other.clone();
                    if !self.are_polygons_separate(scene, &current, &other)
                        && heuristic_polygon(scene, &other, &current)
                    {
                        self.polygons_order(pool, scene, l, k);
                        if pool[k].index != other_index {
                            // The window shifted under us; re-examine this
                            // slot.
                            k += 1;
                        }
                        pool[self.new_start].index2 = current.index;
                    }
                }
                k -= 1;
            }
            // A shift may have landed an unprocessed polygon in slot l; the
            // loop head re-checks before advancing.
        }
    }

    /// Bubble the polygon at `end` toward `start` while it must be drawn
    /// before its predecessor. Each recursion step shrinks the window by
    /// one, so the depth is bounded by the window size. `new_start` is left
    /// at the slot the polygon settled in, `new_end` at the upper bound of
    /// the range still worth examining. Returns whether the order changed.
    fn polygons_order(
        &mut self,
        pool: &mut [Polygon],
        scene: &Scene,
        start: usize,
        end: usize,
    ) -> bool {
        if start < end && self.must_precede(pool, scene, end) {
            pool.swap(end - 1, end);
            self.polygons_order(pool, scene, start, end - 1);
            self.new_end = end;
            true
        } else {
            self.new_start = end;
            self.new_end = if end > start { end - 1 } else { end };
            false
        }
    }

    /// The moving polygon at `end` must be drawn before the one at
    /// `end - 1`.
    fn must_precede(&mut self, pool: &[Polygon], scene: &Scene, end: usize) -> bool {
        let moving = pool[end].clone();
        let ahead = pool[end - 1].clone();
        !self.are_polygons_separate(scene, &ahead, &moving)
            && heuristic_polygon(scene, &moving, &ahead)
    }

    /// True when drawing `a` before `b` is provably fine. Note the z-band
    /// asymmetry: `a` at-or-beyond b's far depth is already correct, while
    /// `b` strictly farther than `a` is a definite violation and fails
    /// immediately.
    pub(crate) fn are_polygons_separate(
        &mut self,
        scene: &Scene,
        a: &Polygon,
        b: &Polygon,
    ) -> bool {
        if a.min_z >= b.max_z {
            return true;
        }
        if b.min_z > a.max_z {
            return false;
        }

        if a.min_plane_x >= b.max_plane_x || b.min_plane_x >= a.max_plane_x {
            return true;
        }
        if a.min_plane_y >= b.max_plane_y || b.min_plane_y >= a.max_plane_y {
            return true;
        }

        // a wholly behind b's plane, or b wholly on the camera side of a's.
        if heuristic_polygon(scene, a, b) {
            return true;
        }
        if in_front_of_plane(scene, b, a) {
            return true;
        }

        !self.hulls_intersect(scene, a, b)
    }

    fn hulls_intersect(&mut self, scene: &Scene, a: &Polygon, b: &Polygon) -> bool {
        let na = load_hull(scene, a, &mut self.ax, &mut self.ay);
        let nb = load_hull(scene, b, &mut self.bx, &mut self.by);
        intersect(&self.ax[..na], &self.ay[..na], &self.bx[..nb], &self.by[..nb])
    }
}

/// Copy a polygon's projected screen hull into scratch. Two-vertex sprite
/// faces become a rectangle inflated horizontally, like their sort AABB.
fn load_hull(
    scene: &Scene,
    poly: &Polygon,
    xs: &mut [i32; VERTEX_SCRATCH],
    ys: &mut [i32; VERTEX_SCRATCH],
) -> usize {
    let (model, face) = face_of(scene, poly);
    let vertices = &model.face_vertices[face];

    if vertices.len() == 2 {
        let x0 = model.vertex_view_x[vertices[0]];
        let x1 = model.vertex_view_x[vertices[1]];
        let y0 = model.vertex_view_y[vertices[0]];
        let y1 = model.vertex_view_y[vertices[1]];
        let left = x0.min(x1) - SPRITE_PLANE_INFLATION;
        let right = x0.max(x1) + SPRITE_PLANE_INFLATION;
        let top = y0.min(y1);
        let bottom = y0.max(y1);

        xs[0] = left;
        ys[0] = top;
        xs[1] = right;
        ys[1] = top;
        xs[2] = right;
        ys[2] = bottom;
        xs[3] = left;
        ys[3] = bottom;
        return 4;
    }

    let n = vertices.len().min(VERTEX_SCRATCH);
    for (k, &v) in vertices.iter().take(n).enumerate() {
        xs[k] = model.vertex_view_x[v];
        ys[k] = model.vertex_view_y[v];
    }
    n
}

/// Walks one convex hull row by row: a forward index and a backward index
/// both start from the top vertex and descend their side of the ring.
struct HullWalker<'a> {
    xs: &'a [i32],
    ys: &'a [i32],
    down: usize,
    up: usize,
    steps_down: usize,
    steps_up: usize,
    top: i32,
    bottom: i32,
}

impl<'a> HullWalker<'a> {
    fn new(xs: &'a [i32], ys: &'a [i32]) -> HullWalker<'a> {
        let mut top_index = 0;
        for (i, &y) in ys.iter().enumerate() {
            if y < ys[top_index] {
                top_index = i;
            }
        }
        HullWalker {
            xs,
            ys,
            down: top_index,
            up: top_index,
            steps_down: 0,
            steps_up: 0,
            top: ys[top_index],
            bottom: *ys.iter().max().unwrap_or(&0),
        }
    }

    fn chord(&mut self, y: i32) -> (i32, i32) {
        let n = self.ys.len();

        while self.steps_down < n {
            let next = (self.down + 1) % n;
            if self.ys[next] >= y {
                break;
            }
            self.down = next;
            self.steps_down += 1;
        }
        while self.steps_up < n {
            let next = (self.up + n - 1) % n;
            if self.ys[next] >= y {
                break;
            }
            self.up = next;
            self.steps_up += 1;
        }

        let a = self.edge_x(self.down, (self.down + 1) % n, y);
        let b = self.edge_x(self.up, (self.up + n - 1) % n, y);
        (a.min(b), a.max(b))
    }

    fn edge_x(&self, i: usize, j: usize, y: i32) -> i32 {
        if self.ys[j] == self.ys[i] {
            return self.xs[j];
        }
        let t = i64::from(self.xs[j] - self.xs[i]) * i64::from(y - self.ys[i])
            / i64::from(self.ys[j] - self.ys[i]);
        (i64::from(self.xs[i]) + t).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}

fn chord_left_of(a: (i32, i32), b: (i32, i32)) -> bool {
    a.1 <= b.0
}

fn chord_right_of(a: (i32, i32), b: (i32, i32)) -> bool {
    a.0 >= b.1
}

/// Row-walk overlap test on two projected hulls. Both walkers descend from
/// their top vertex; at every shared row the interpolated chords are
/// compared.
fn intersect(ax: &[i32], ay: &[i32], bx: &[i32], by: &[i32]) -> bool {
    if ax.is_empty() || bx.is_empty() {
        return false;
    }
    let mut walker_a = HullWalker::new(ax, ay);
    let mut walker_b = HullWalker::new(bx, by);

    let y0 = walker_a.top.max(walker_b.top);
    let y1 = walker_a.bottom.min(walker_b.bottom);
    for y in y0..=y1 {
        let a = walker_a.chord(y);
        let b = walker_b.chord(y);
        if !chord_left_of(a, b) && !chord_right_of(a, b) {
            return true;
        }
    }
    false
}
