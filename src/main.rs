use std::time::Instant;

use clap::Parser;
use tracing::info;

use softscene::scene::Model;
use softscene::PixelSurface;
use softscene::Scene;
use softscene::SceneRenderer;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Surface width in pixels
    #[arg(long, default_value_t = 512)]
    width: usize,
    /// Surface height in pixels
    #[arg(long, default_value_t = 512)]
    height: usize,
    /// Number of frames to render (the camera orbits the scene)
    #[arg(short, long, default_value_t = 32)]
    frames: u32,
    /// Write the last frame as a PNG to this path
    #[cfg(feature = "png-dump")]
    #[arg(short, long, value_name = "FILE")]
    output: Option<String>,
}

/// A cube scaled to `size`, gradient-filled with `colour15` (15-bit RGB),
/// standing on the ground plane at `(x, z)`.
fn cube(x: i32, z: i32, size: i32, colour15: i32) -> anyhow::Result<Model> {
    let fill = -1 - colour15;
    let mut model = Model::new();
    let mut corners = [0usize; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        let cx = x + if i & 1 != 0 { size } else { -size };
        let cy = if i & 2 != 0 { 0 } else { -2 * size };
        let cz = z + if i & 4 != 0 { size } else { -size };
        *corner = model.vertex_at(cx, cy, cz);
    }
    let [a, b, c, d, e, f, g, h] = corners;
    for quad in [
        [a, b, d, c],
        [e, g, h, f],
        [a, c, g, e],
        [b, f, h, d],
        [a, e, f, b],
        [c, d, h, g],
    ] {
        let face = model.add_face(&quad, fill, fill)?;
        model.set_face_intensity(face, 40 + 20 * (face as i32 % 3));
    }
    Ok(model)
}

/// Checkerboard floor texture.
fn checker_texture() -> Vec<i32> {
    let mut pixels = vec![0; 128 * 128];
    for y in 0..128 {
        for x in 0..128 {
            pixels[y * 128 + x] = if (x / 16 + y / 16) % 2 == 0 {
                0x406040
            } else {
                0x202820
            };
        }
    }
    pixels
}

/// 16x16 two-tone marker used as the billboard sprite.
fn marker_sprite() -> Vec<i32> {
    let mut pixels = vec![0; 16 * 16];
    for y in 0..16i32 {
        for x in 0..16i32 {
            let dx = x - 8;
            let dy = y - 8;
            if dx * dx + dy * dy < 49 {
                pixels[(y * 16 + x) as usize] = if (x + y) % 2 == 0 { 0xd0d0ff } else { 0x8080ff };
            }
        }
    }
    pixels
}

fn build_scene() -> anyhow::Result<Scene> {
    let mut scene = Scene::new();

    let mut floor = Model::new();
    let half = 1200;
    let a = floor.vertex_at(-half, 0, -half);
    let b = floor.vertex_at(half, 0, -half);
    let c = floor.vertex_at(half, 0, half);
    let d = floor.vertex_at(-half, 0, half);
    let face = floor.add_face(&[a, b, c, d], 0, 0)?;
    floor.set_face_intensity(face, 60);
    scene.add_model(floor);

    scene.add_model(cube(-400, 200, 120, 0x7c00)?);
    scene.add_model(cube(350, -150, 160, 0x03e0)?);
    scene.add_model(cube(0, 450, 90, 0x001f)?);
    scene.add_sprite(0, 150, 0, 0, 120, 260);

    Ok(scene)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut scene = build_scene()?;
    let mut surface = PixelSurface::new(cli.width, cli.height);
    surface.define_texture(0, checker_texture(), true)?;
    surface.define_sprite(0, 16, 16, marker_sprite())?;

    let mut renderer = SceneRenderer::new(cli.width, cli.height);

    let start = Instant::now();
    for frame in 0..cli.frames {
        let angle = (frame as i32 * 2048 / cli.frames.max(1) as i32) & 0x7ff;
        scene.camera.set_position(-900, -350, -900);
        scene.camera.set_orientation(angle, 96, 0);

        surface.clear();
        let frame_start = Instant::now();
        renderer.render(&mut scene, &mut surface);
        info!(
            frame,
            polygons = renderer.visible_polygon_count(),
            elapsed_us = frame_start.elapsed().as_micros() as u64,
            "frame rendered"
        );
    }
    info!(
        frames = cli.frames,
        total_ms = start.elapsed().as_millis() as u64,
        "done"
    );

    #[cfg(feature = "png-dump")]
    if let Some(path) = cli.output {
        let mut rgb = Vec::with_capacity(cli.width * cli.height * 3);
        for &pixel in surface.pixels() {
            rgb.push((pixel >> 16) as u8);
            rgb.push((pixel >> 8) as u8);
            rgb.push(pixel as u8);
        }
        image::RgbImage::from_raw(cli.width as u32, cli.height as u32, rgb)
            .ok_or_else(|| anyhow::anyhow!("frame buffer does not match surface dimensions"))?
            .save(&path)?;
        info!(path = %path, "frame written");
    }

    Ok(())
}
