//! Per-polygon span dispatch.
//!
//! For textured fills the three perspective plane sums are derived from the
//! clipped face's camera-space vertices `p0`, `p1` and `p[n-1]`: with
//! `d1 = p1 - p0`, `d2 = p[n-1] - p0` and a pixel ray
//! `r = (sx, sy, 1 << view_distance)`,
//!
//! ```text
//! u = ((d2 x p0) . r) / ((d1 x d2) . r)
//! v = ((p0 x d1) . r) / ((d1 x d2) . r)
//! ```
//!
//! The u/v numerator vectors are pre-scaled by the texel count (`<< 7`
//! large, `<< 6` small) so the kernels' divisions land directly on texel
//! coordinates, and all three vectors are jointly right-shifted until every
//! dot product stays inside 32 bits (a common shift cancels in the ratios).

use tracing::trace;
use tracing::warn;

use crate::render::gradient::GradientCache;
use crate::render::scanline::FaceScratch;
use crate::render::scanline::ScanlineBuffer;
use crate::surface::PixelSurface;

/// Projection frame for span emission.
pub(crate) struct RasterBounds {
    pub base_x: i32,
    pub base_y: i32,
    pub clip_x: i32,
    pub width: i32,
    pub view_distance: i32,
}

/// Resolved fill for one polygon.
pub(crate) enum SpanFill {
    Texture {
        id: usize,
        large: bool,
        masked: bool,
        translucent: bool,
    },
    Gradient {
        fill: i32,
        translucent: bool,
    },
}

/// Largest plane-vector component magnitude kept after normalization;
/// bounds every per-pixel dot product well inside `i32`.
const PLANE_COMPONENT_LIMIT: i64 = 1 << 18;

fn cross(u: [i64; 3], v: [i64; 3]) -> [i64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

/// Build the three plane vectors for the clipped face, pre-scaled by
/// `tex_scale` (texel span, log2) on the u/v numerators.
fn plane_vectors(scratch: &FaceScratch, tex_scale: u32) -> [[i32; 3]; 3] {
    let n = scratch.plane;
    let p0 = [
        i64::from(scratch.cam_x[0]),
        i64::from(scratch.cam_y[0]),
        i64::from(scratch.cam_z[0]),
    ];
    let d1 = [
        i64::from(scratch.cam_x[1]) - p0[0],
        i64::from(scratch.cam_y[1]) - p0[1],
        i64::from(scratch.cam_z[1]) - p0[2],
    ];
    let d2 = [
        i64::from(scratch.cam_x[n - 1]) - p0[0],
        i64::from(scratch.cam_y[n - 1]) - p0[1],
        i64::from(scratch.cam_z[n - 1]) - p0[2],
    ];

    let mut va = cross(d2, p0).map(|c| c << tex_scale);
    let mut vb = cross(p0, d1).map(|c| c << tex_scale);
    let mut vc = cross(d1, d2);

    loop {
        let widest = va
            .iter()
            .chain(vb.iter())
            .chain(vc.iter())
            .map(|c| c.abs())
            .max()
            .unwrap_or(0);
        if widest < PLANE_COMPONENT_LIMIT {
            break;
        }
        for c in va.iter_mut().chain(vb.iter_mut()).chain(vc.iter_mut()) {
            *c >>= 1;
        }
    }

    [va.map(|c| c as i32), vb.map(|c| c as i32), vc.map(|c| c as i32)]
}

/// One row's span after horizontal clipping.
struct RowSpan {
    start_x: i32,
    len: i32,
    shade: i32,
    d_shade: i32,
    dst: usize,
}

/// Fetch and clip row `row`'s span. Untouched rows (the init sentinels) and
/// spans that clip away entirely resolve to None.
fn clip_row_span(
    scanlines: &ScanlineBuffer,
    bounds: &RasterBounds,
    row: i32,
    left_limit: i32,
    right_limit: i32,
) -> Option<RowSpan> {
    let span = *scanlines.row(row);
    let mut start_x = span.start_x >> 8;
    let mut end_x = span.end_x >> 8;
    if start_x > end_x {
        return None;
    }

    let mut shade = span.start_shade;
    let raw_len = end_x - start_x;
    let d_shade = if raw_len > 0 {
        (span.end_shade - span.start_shade) / raw_len
    } else {
        0
    };

    if start_x < left_limit {
        shade += d_shade * (left_limit - start_x);
        start_x = left_limit;
    }
    end_x = end_x.min(right_limit);
    let len = end_x - start_x;
    if len <= 0 {
        trace!("span on row {} fully clipped", row);
        return None;
    }

    Some(RowSpan {
        start_x,
        len,
        shade,
        d_shade,
        dst: (row * bounds.width + bounds.base_x + start_x) as usize,
    })
}

/// Emit every row of the current polygon. Spans are clipped to the
/// horizontal clip extent and the surface; degenerate rows are skipped.
pub(crate) fn rasterize_face(
    surface: &mut PixelSurface,
    gradients: &mut GradientCache,
    scanlines: &ScanlineBuffer,
    scratch: &FaceScratch,
    bounds: &RasterBounds,
    fill: SpanFill,
) {
    let left_limit = (-bounds.clip_x).max(-bounds.base_x);
    let right_limit = bounds.clip_x.min(bounds.width - bounds.base_x);

    match fill {
        SpanFill::Gradient { fill, translucent } => {
            let ramp = gradients.ramp_for(fill);
            for row in scanlines.min_y..scanlines.max_y {
                if row >= surface.height() as i32 {
                    warn!("scanline rows run past the surface at row {}", row);
                    break;
                }
                let Some(span) = clip_row_span(scanlines, bounds, row, left_limit, right_limit)
                else {
                    continue;
                };

                if translucent {
                    surface.scanline_gradient_translucent(
                        span.len,
                        span.dst,
                        ramp,
                        span.shade,
                        span.d_shade << 2,
                    );
                } else {
                    surface.scanline_gradient(
                        span.len,
                        span.dst,
                        ramp,
                        span.shade,
                        span.d_shade << 2,
                    );
                }
            }
        }
        SpanFill::Texture {
            id,
            large,
            masked,
            translucent,
        } => {
            let [va, vb, vc] = plane_vectors(scratch, if large { 7 } else { 6 });
            for row in scanlines.min_y..scanlines.max_y {
                if row >= surface.height() as i32 {
                    warn!("scanline rows run past the surface at row {}", row);
                    break;
                }
                let Some(span) = clip_row_span(scanlines, bounds, row, left_limit, right_limit)
                else {
                    continue;
                };

                let sy = row - bounds.base_y;
                let a = va[0] * span.start_x + va[1] * sy + (va[2] << bounds.view_distance);
                let b = vb[0] * span.start_x + vb[1] * sy + (vb[2] << bounds.view_distance);
                let c = vc[0] * span.start_x + vc[1] * sy + (vc[2] << bounds.view_distance);
                let d_a = va[0] << 2;
                let d_b = vb[0] << 2;
                let d_c = vc[0] << 2;

                match (large, translucent, masked) {
                    (true, true, _) => surface.scanline_large_texture_translucent(
                        id,
                        a,
                        b,
                        c,
                        d_a,
                        d_b,
                        d_c,
                        span.len,
                        span.dst,
                        span.shade,
                        span.d_shade << 2,
                    ),
                    (true, false, true) => surface.scanline_large_texture_masked(
                        id,
                        a,
                        b,
                        c,
                        d_a,
                        d_b,
                        d_c,
                        span.len,
                        span.dst,
                        span.shade,
                        span.d_shade,
                    ),
                    (true, false, false) => surface.scanline_large_texture(
                        id,
                        a,
                        b,
                        c,
                        d_a,
                        d_b,
                        d_c,
                        span.len,
                        span.dst,
                        span.shade,
                        span.d_shade << 2,
                    ),
                    (false, true, _) => surface.scanline_small_texture_translucent(
                        id,
                        a,
                        b,
                        c,
                        d_a,
                        d_b,
                        d_c,
                        span.len,
                        span.dst,
                        span.shade,
                        span.d_shade << 2,
                    ),
                    (false, false, true) => surface.scanline_small_texture_masked(
                        id,
                        a,
                        b,
                        c,
                        d_a,
                        d_b,
                        d_c,
                        span.len,
                        span.dst,
                        span.shade,
                        span.d_shade,
                    ),
                    (false, false, false) => surface.scanline_small_texture(
                        id,
                        a,
                        b,
                        c,
                        d_a,
                        d_b,
                        d_c,
                        span.len,
                        span.dst,
                        span.shade,
                        span.d_shade << 2,
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen_quad_scratch(half: i32, z: i32) -> FaceScratch {
        // A screen-facing quad; camera-space coordinates are chosen so the
        // projected corners land exactly on +-half.
        let mut scratch = FaceScratch::new();
        let world = half * z >> 9;
        for (sx, sy, wx, wy) in [
            (-half, -half, -world, -world),
            (half, -half, world, -world),
            (half, half, world, world),
            (-half, half, -world, world),
        ] {
            scratch.push(sx, sy, 0, wx, wy, z);
        }
        scratch
    }

    #[test]
    fn gradient_fill_paints_the_span() {
        let mut surface = PixelSurface::new(64, 64);
        let mut gradients = GradientCache::new();
        let mut scanlines = ScanlineBuffer::new();
        scanlines.set_len(64);

        let mut scratch = screen_quad_scratch(8, 512);
        assert!(scanlines.build(&mut scratch, 32));

        let bounds = RasterBounds {
            base_x: 32,
            base_y: 32,
            clip_x: 32,
            width: 64,
            view_distance: 9,
        };
        let fill = -1 - 0x7fff;
        rasterize_face(
            &mut surface,
            &mut gradients,
            &scanlines,
            &scratch,
            &bounds,
            SpanFill::Gradient {
                fill,
                translucent: false,
            },
        );

        let expected = gradients.ramp_for(fill)[0];
        // Centre of the quad.
        assert_eq!(surface.pixels[32 * 64 + 32], expected);
        // Outside the quad nothing was touched.
        assert_eq!(surface.pixels[32 * 64 + 32 + 12], 0);
    }

    #[test]
    fn textured_fill_is_clipped_to_the_surface() {
        let mut surface = PixelSurface::new(32, 32);
        surface
            .define_texture(0, vec![0x00ff00; 128 * 128], true)
            .unwrap();
        let mut gradients = GradientCache::new();
        let mut scanlines = ScanlineBuffer::new();
        scanlines.set_len(32);

        // Quad wider than the clip window.
        let mut scratch = screen_quad_scratch(40, 512);
        assert!(scanlines.build(&mut scratch, 16));

        let bounds = RasterBounds {
            base_x: 16,
            base_y: 16,
            clip_x: 16,
            width: 32,
            view_distance: 9,
        };
        rasterize_face(
            &mut surface,
            &mut gradients,
            &scanlines,
            &scratch,
            &bounds,
            SpanFill::Texture {
                id: 0,
                large: true,
                masked: false,
                translucent: false,
            },
        );

        // Every surface pixel inside the quad rows is painted with the
        // uniform texture; the writes never escaped the buffer (no panic)
        // and the centre pixel is lit.
        assert_eq!(surface.pixels[16 * 32 + 16], 0x00ff00);
    }
}
