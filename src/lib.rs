//! clshade - run OpenCL kernels over a pixel buffer and stream it to a texture
//!
//! [`ComputeContext`] picks the fastest-looking OpenCL device and builds a
//! program from source files. [`ShaderTexture`] keeps a BGRA pixel buffer
//! in sync with that device, runs one kernel work item per pixel and copies
//! the result into a [`Surface`] for presentation.
//!
//! ```no_run
//! use clshade::{ComputeContext, MemorySurface, ShaderTexture};
//!
//! let ctx = ComputeContext::new(&["kernels/plasma.cl"])?;
//! let mut texture = ShaderTexture::new(&ctx, MemorySurface::new(320, 240), 320, 240)?;
//! texture.set_shader("plasma")?;
//! for frame in 0..60i32 {
//!     texture.set_arg(3, &frame)?;
//!     texture.shade()?;
//!     texture.update()?;
//! }
//! # Ok::<(), clshade::Error>(())
//! ```

pub mod error;
pub mod opencl;
pub mod texture;

pub use error::{Error, Result};
pub use opencl::{ComputeContext, DeviceCandidate, DeviceSelection};
#[cfg(feature = "image")]
pub use texture::ImageSurface;
pub use texture::{BlendMode, MemorySurface, Rect, ShaderTexture, Surface};

/// Kernels shipped with the crate: `plasma`, `fade` and `clear`, each taking
/// `int frame` as argument 3.
pub const DEMO_KERNELS: &str = include_str!("../kernels/plasma.cl");
