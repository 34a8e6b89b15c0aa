//! Destination pixel buffer and its scanline primitives.
//!
//! The surface owns a packed `0xRRGGBB` pixel buffer plus the texture and
//! sprite registries, and exposes the span-filling kernels the rasterizer
//! dispatches to: perspective-correct textured spans in two texture size
//! classes (opaque, colour-0 masked, translucent), flat gradient spans, and
//! scaled/unscaled sprite blits.
//!
//! All span kernels work in fixed point and re-divide the perspective (or
//! re-sample the gradient ramp) once every four pixels, which is the cadence
//! the whole pipeline's shade scaling is built around.

use anyhow::anyhow;
use anyhow::Result;

/// Texel addressing for one texture size class.
#[derive(Clone, Copy)]
struct TexLayout {
    row_mask: i32,
    col_shift: u32,
    coord_clamp: i32,
    shade_shift: u32,
}

/// 128x128 texels; texture coordinates span `[0, 16256]` (127 << 7).
const LARGE: TexLayout = TexLayout {
    row_mask: 0x3f80,
    col_shift: 7,
    coord_clamp: 16256,
    shade_shift: 23,
};

/// 64x64 texels; texture coordinates span `[0, 4032]` (63 << 6).
const SMALL: TexLayout = TexLayout {
    row_mask: 0xfc0,
    col_shift: 6,
    coord_clamp: 4032,
    shade_shift: 20,
};

#[derive(Clone, Copy)]
enum TexelMode {
    Opaque,
    /// Colour index 0 lets the destination pixel through.
    Masked,
    /// `texel + (dst >> 1 & 0x7F7F7F)`.
    Translucent,
}

pub struct Texture {
    pub pixels: Vec<i32>,
    pub large: bool,
}

pub struct Sprite {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<i32>,
}

pub struct PixelSurface {
    width: usize,
    height: usize,
    pub pixels: Vec<i32>,
    textures: Vec<Option<Texture>>,
    sprites: Vec<Option<Sprite>>,
}

impl PixelSurface {
    pub fn new(width: usize, height: usize) -> PixelSurface {
        PixelSurface {
            width,
            height,
            pixels: vec![0; width * height],
            textures: Vec::new(),
            sprites: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[i32] {
        &self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Register texture `id`. Large textures are 128x128, small ones 64x64;
    /// the pixel count must match the declared class.
    pub fn define_texture(&mut self, id: usize, pixels: Vec<i32>, large: bool) -> Result<()> {
        let expected = if large { 128 * 128 } else { 64 * 64 };
        if pixels.len() != expected {
            return Err(anyhow!(
                "invalid texture length {}, expected {}",
                pixels.len(),
                expected
            ));
        }

        if id >= self.textures.len() {
            self.textures.resize_with(id + 1, || None);
        }
        self.textures[id] = Some(Texture { pixels, large });

        Ok(())
    }

    pub fn define_sprite(&mut self, id: usize, width: i32, height: i32, pixels: Vec<i32>) -> Result<()> {
        if width <= 0 || height <= 0 || pixels.len() != (width * height) as usize {
            return Err(anyhow!(
                "invalid sprite dimensions {}x{} for {} pixels",
                width,
                height,
                pixels.len()
            ));
        }

        if id >= self.sprites.len() {
            self.sprites.resize_with(id + 1, || None);
        }
        self.sprites[id] = Some(Sprite {
            width,
            height,
            pixels,
        });

        Ok(())
    }

    pub(crate) fn texture(&self, id: usize) -> Option<&Texture> {
        self.textures.get(id).and_then(|t| t.as_ref())
    }

    /// Blit sprite `id` 1:1 at `(x, y)`. Colour 0 is transparent.
    pub fn draw_sprite(&mut self, x: i32, y: i32, id: usize) {
        let Some(sprite) = self.sprites.get(id).and_then(|s| s.as_ref()) else {
            tracing::warn!("draw_sprite: no sprite {}", id);
            return;
        };

        let x0 = x.max(0);
        let x1 = (x + sprite.width).min(self.width as i32);
        let y0 = y.max(0);
        let y1 = (y + sprite.height).min(self.height as i32);

        for py in y0..y1 {
            let src_row = ((py - y) * sprite.width) as usize;
            let dst_row = py as usize * self.width;
            for px in x0..x1 {
                let colour = sprite.pixels[src_row + (px - x) as usize];
                if colour != 0 {
                    self.pixels[dst_row + px as usize] = colour;
                }
            }
        }
    }

    /// Blit sprite `id` scaled to `w`x`h` at `(x, y)`, clipped to the
    /// surface. Nearest sampling with 16.16 source stepping; colour 0 is
    /// transparent.
    pub fn sprite_clip(&mut self, x: i32, y: i32, w: i32, h: i32, id: usize) {
        let Some(sprite) = self.sprites.get(id).and_then(|s| s.as_ref()) else {
            tracing::warn!("sprite_clip: no sprite {}", id);
            return;
        };
        if w <= 0 || h <= 0 {
            return;
        }

        let x_step = (sprite.width << 16) / w;
        let y_step = (sprite.height << 16) / h;

        let dx0 = (-x).max(0);
        let dx1 = (self.width as i32 - x).min(w);
        let dy0 = (-y).max(0);
        let dy1 = (self.height as i32 - y).min(h);
        if dx0 >= dx1 || dy0 >= dy1 {
            return;
        }

        let mut sy = dy0 * y_step;
        for dy in dy0..dy1 {
            let src_row = ((sy >> 16) * sprite.width) as usize;
            let dst_row = (y + dy) as usize * self.width + (x + dx0) as usize;
            let mut sx = dx0 * x_step;
            for dx in 0..(dx1 - dx0) as usize {
                let colour = sprite.pixels[src_row + (sx >> 16) as usize];
                if colour != 0 {
                    self.pixels[dst_row + dx] = colour;
                }
                sx += x_step;
            }
            sy += y_step;
        }
    }

    // Textured span kernels. `a`/`b`/`c` are the perspective plane sums at
    // the span start, `d_*` their per-four-pixel steps. The shade register
    // carries a darkening amount; the opaque and translucent kernels expect
    // `d_shade` pre-scaled by 4 and advance it once per block, the masked
    // kernels take the raw step and advance it every pixel.

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scanline_large_texture(
        &mut self,
        id: usize,
        a: i32,
        b: i32,
        c: i32,
        d_a: i32,
        d_b: i32,
        d_c: i32,
        len: i32,
        dst: usize,
        shade: i32,
        d_shade: i32,
    ) {
        let Some(tex) = self.textures.get(id).and_then(|t| t.as_ref()) else {
            return;
        };
        texture_span(
            &mut self.pixels,
            &tex.pixels,
            LARGE,
            TexelMode::Opaque,
            [a, b, c],
            [d_a, d_b, d_c],
            len,
            dst,
            shade,
            d_shade,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scanline_large_texture_masked(
        &mut self,
        id: usize,
        a: i32,
        b: i32,
        c: i32,
        d_a: i32,
        d_b: i32,
        d_c: i32,
        len: i32,
        dst: usize,
        shade: i32,
        d_shade: i32,
    ) {
        let Some(tex) = self.textures.get(id).and_then(|t| t.as_ref()) else {
            return;
        };
        texture_span(
            &mut self.pixels,
            &tex.pixels,
            LARGE,
            TexelMode::Masked,
            [a, b, c],
            [d_a, d_b, d_c],
            len,
            dst,
            shade,
            d_shade,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scanline_large_texture_translucent(
        &mut self,
        id: usize,
        a: i32,
        b: i32,
        c: i32,
        d_a: i32,
        d_b: i32,
        d_c: i32,
        len: i32,
        dst: usize,
        shade: i32,
        d_shade: i32,
    ) {
        let Some(tex) = self.textures.get(id).and_then(|t| t.as_ref()) else {
            return;
        };
        texture_span(
            &mut self.pixels,
            &tex.pixels,
            LARGE,
            TexelMode::Translucent,
            [a, b, c],
            [d_a, d_b, d_c],
            len,
            dst,
            shade,
            d_shade,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scanline_small_texture(
        &mut self,
        id: usize,
        a: i32,
        b: i32,
        c: i32,
        d_a: i32,
        d_b: i32,
        d_c: i32,
        len: i32,
        dst: usize,
        shade: i32,
        d_shade: i32,
    ) {
        let Some(tex) = self.textures.get(id).and_then(|t| t.as_ref()) else {
            return;
        };
        texture_span(
            &mut self.pixels,
            &tex.pixels,
            SMALL,
            TexelMode::Opaque,
            [a, b, c],
            [d_a, d_b, d_c],
            len,
            dst,
            shade,
            d_shade,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scanline_small_texture_masked(
        &mut self,
        id: usize,
        a: i32,
        b: i32,
        c: i32,
        d_a: i32,
        d_b: i32,
        d_c: i32,
        len: i32,
        dst: usize,
        shade: i32,
        d_shade: i32,
    ) {
        let Some(tex) = self.textures.get(id).and_then(|t| t.as_ref()) else {
            return;
        };
        texture_span(
            &mut self.pixels,
            &tex.pixels,
            SMALL,
            TexelMode::Masked,
            [a, b, c],
            [d_a, d_b, d_c],
            len,
            dst,
            shade,
            d_shade,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scanline_small_texture_translucent(
        &mut self,
        id: usize,
        a: i32,
        b: i32,
        c: i32,
        d_a: i32,
        d_b: i32,
        d_c: i32,
        len: i32,
        dst: usize,
        shade: i32,
        d_shade: i32,
    ) {
        let Some(tex) = self.textures.get(id).and_then(|t| t.as_ref()) else {
            return;
        };
        texture_span(
            &mut self.pixels,
            &tex.pixels,
            SMALL,
            TexelMode::Translucent,
            [a, b, c],
            [d_a, d_b, d_c],
            len,
            dst,
            shade,
            d_shade,
        );
    }

    /// Flat gradient span. The ramp index is `(shade >> 8) & 0xFF`; the ramp
    /// colour is re-sampled once every four pixels, so `d_shade` arrives
    /// pre-scaled by 4.
    pub(crate) fn scanline_gradient(
        &mut self,
        len: i32,
        dst: usize,
        ramp: &[i32; 256],
        shade: i32,
        d_shade: i32,
    ) {
        gradient_span(&mut self.pixels, ramp, len, dst, shade, d_shade, false);
    }

    /// Gradient span blended 50/50 with the destination.
    pub(crate) fn scanline_gradient_translucent(
        &mut self,
        len: i32,
        dst: usize,
        ramp: &[i32; 256],
        shade: i32,
        d_shade: i32,
    ) {
        gradient_span(&mut self.pixels, ramp, len, dst, shade, d_shade, true);
    }
}

#[allow(clippy::too_many_arguments)]
fn texture_span(
    pixels: &mut [i32],
    tex: &[i32],
    layout: TexLayout,
    mode: TexelMode,
    abc: [i32; 3],
    d_abc: [i32; 3],
    len: i32,
    dst: usize,
    mut shade: i32,
    d_shade: i32,
) {
    if len <= 0 || dst >= pixels.len() {
        return;
    }
    let [mut a, mut b, mut c] = abc;
    let [d_a, d_b, d_c] = d_abc;

    // Divide, clamp to the texel range, then shift up into interpolation
    // fixed point.
    let sample = |num: i32, den: i32| {
        (num / den).clamp(0, layout.coord_clamp >> layout.col_shift) << layout.col_shift
    };
    let (mut u, mut v) = if c != 0 { (sample(a, c), sample(b, c)) } else { (0, 0) };

    let mut dst = dst;
    let mut remaining = len.min((pixels.len() - dst) as i32);
    while remaining > 0 {
        // Re-divide the perspective four pixels ahead and interpolate
        // linearly in between.
        a += d_a;
        b += d_b;
        c += d_c;
        let (u_next, v_next) = if c != 0 { (sample(a, c), sample(b, c)) } else { (u, v) };
        let du = (u_next - u) >> 2;
        let dv = (v_next - v) >> 2;

        let run = remaining.min(4);
        let shift = shade >> layout.shade_shift;
        for _ in 0..run {
            let texel = tex[((v & layout.row_mask) + (u >> layout.col_shift)) as usize];
            match mode {
                TexelMode::Opaque => pixels[dst] = texel >> shift,
                TexelMode::Masked => {
                    if texel != 0 {
                        pixels[dst] = texel >> (shade >> layout.shade_shift);
                    }
                    shade += d_shade;
                }
                TexelMode::Translucent => {
                    pixels[dst] = (texel >> shift).wrapping_add(pixels[dst] >> 1 & 0x7f7f7f);
                }
            }
            dst += 1;
            u += du;
            v += dv;
        }
        u = u_next;
        v = v_next;
        if !matches!(mode, TexelMode::Masked) {
            shade += d_shade;
        }
        remaining -= run;
    }
}

fn gradient_span(
    pixels: &mut [i32],
    ramp: &[i32; 256],
    len: i32,
    dst: usize,
    mut shade: i32,
    d_shade: i32,
    translucent: bool,
) {
    if len <= 0 || dst >= pixels.len() {
        return;
    }

    let mut dst = dst;
    let mut remaining = len.min((pixels.len() - dst) as i32);
    while remaining > 0 {
        let colour = ramp[((shade >> 8) & 0xff) as usize];
        shade += d_shade;

        let run = remaining.min(4);
        for _ in 0..run {
            if translucent {
                pixels[dst] = (colour >> 1 & 0x7f7f7f).wrapping_add(pixels[dst] >> 1 & 0x7f7f7f);
            } else {
                pixels[dst] = colour;
            }
            dst += 1;
        }
        remaining -= run;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_texture(colour: i32, large: bool) -> Vec<i32> {
        vec![colour; if large { 128 * 128 } else { 64 * 64 }]
    }

    #[test]
    fn define_texture_checks_length() {
        let mut surface = PixelSurface::new(8, 8);
        assert!(surface.define_texture(0, vec![0; 10], true).is_err());
        assert!(surface
            .define_texture(0, flat_texture(0xff0000, true), true)
            .is_ok());
    }

    #[test]
    fn opaque_span_applies_shade_shift() {
        let mut surface = PixelSurface::new(16, 1);
        surface
            .define_texture(0, flat_texture(0x00ff00, true), true)
            .unwrap();

        // Darkness 255 on the large path arrives as 255 << 17; the kernel
        // recovers 255 >> 6 = 3.
        surface.scanline_large_texture(0, 0, 0, 1, 0, 0, 0, 16, 0, 255 << 17, 0);
        for x in 0..16 {
            assert_eq!(surface.pixels[x], 0x00ff00 >> 3);
        }
    }

    #[test]
    fn masked_span_preserves_background() {
        let mut surface = PixelSurface::new(8, 1);
        let mut pixels = flat_texture(0x123456, false);
        pixels[0] = 0; // texel (0,0)
        surface.define_texture(0, pixels, false).unwrap();
        surface.pixels.fill(0x654321);

        // c stays 0 so the sampled texel is always (0, 0).
        surface.scanline_small_texture_masked(0, 0, 0, 0, 0, 0, 0, 8, 0, 0, 0);
        for x in 0..8 {
            assert_eq!(surface.pixels[x], 0x654321);
        }
    }

    #[test]
    fn translucent_span_blends_destination() {
        let mut surface = PixelSurface::new(4, 1);
        surface
            .define_texture(0, flat_texture(0x202020, true), true)
            .unwrap();
        surface.pixels.fill(0x404040);

        surface.scanline_large_texture_translucent(0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0);
        for x in 0..4 {
            assert_eq!(surface.pixels[x], 0x202020 + (0x404040 >> 1 & 0x7f7f7f));
        }
    }

    #[test]
    fn gradient_span_indexes_ramp_by_high_shade_bits() {
        let mut surface = PixelSurface::new(8, 1);
        let mut ramp = [0i32; 256];
        ramp[5] = 0xabcdef;

        surface.scanline_gradient(8, 0, &ramp, 5 << 8, 0);
        for x in 0..8 {
            assert_eq!(surface.pixels[x], 0xabcdef);
        }
    }

    #[test]
    fn sprite_clip_scales_and_clips() {
        let mut surface = PixelSurface::new(8, 8);
        surface
            .define_sprite(3, 2, 2, vec![0x111111, 0, 0, 0x222222])
            .unwrap();

        // Scale 2x2 -> 4x4, partially off the left edge.
        surface.sprite_clip(-2, 0, 4, 4, 3);

        // Only the right half of the sprite is on screen; its top-right
        // quadrant is colour 0 and must leave the background alone.
        assert_eq!(surface.pixels[0], 0);
        assert_eq!(surface.pixels[8], 0);
        assert_eq!(surface.pixels[2 * 8], 0x222222);
        assert_eq!(surface.pixels[2 * 8 + 1], 0x222222);
    }

    #[test]
    fn draw_sprite_skips_colour_zero() {
        let mut surface = PixelSurface::new(4, 4);
        surface.pixels.fill(0x777777);
        surface
            .define_sprite(0, 2, 1, vec![0, 0x00ff00])
            .unwrap();

        surface.draw_sprite(1, 1, 0);
        assert_eq!(surface.pixels[4 + 1], 0x777777);
        assert_eq!(surface.pixels[4 + 2], 0x00ff00);
    }
}
