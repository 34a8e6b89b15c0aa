//! CPU-only 3D scene rasterizer.
//!
//! Projects 3D models and 2D billboard sprites through an integer camera,
//! resolves draw order with a depth sort plus a cyclic-overlap resolve, and
//! fills a packed-RGB pixel buffer with perspective-correct fixed-point
//! textured, gradient and sprite spans. Everything runs on one thread with
//! zero steady-state allocation; windowing, input and presentation are the
//! caller's business.

pub mod render;
pub mod scene;
pub mod surface;

pub use render::MousePicker;
pub use render::SceneRenderer;
pub use render::COLOUR_TRANSPARENT;
pub use scene::Camera;
pub use scene::Model;
pub use scene::Scene;
pub use surface::PixelSurface;
