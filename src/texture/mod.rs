//! Shader-backed textures
//!
//! A [`ShaderTexture`] owns a CPU pixel buffer, a GPU buffer mirroring it
//! and an output [`Surface`]. Calling [`ShaderTexture::shade`] runs the
//! bound kernel once per pixel; [`ShaderTexture::update`] copies the result
//! to the surface.

mod kernel;
mod surface;

pub use kernel::{
    BoundArg, FIRST_USER_ARG, ImplicitArgs, ImplicitValue, KernelScalar, ShaderKernel,
};
#[cfg(feature = "image")]
pub use surface::ImageSurface;
#[cfg(feature = "sdl")]
pub use surface::streaming_texture;
pub use surface::{BlendMode, MemorySurface, Surface, bgra_to_rgba};

use std::ptr;

use opencl3::memory::{Buffer, CL_MEM_READ_WRITE};
use opencl3::types::{CL_BLOCKING, cl_int};

use crate::error::{ClResultExt, Error, Result};
use crate::opencl::ComputeContext;

/// Bytes per pixel, stored B, G, R, A.
pub const BYTES_PER_PIXEL: usize = 4;

/// Placement and size of a texture. `x` and `y` are a display offset the
/// caller may change freely; `width` and `height` are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn byte_len(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }

    pub fn pitch(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Byte offset of pixel (`x`, `y`), or `None` outside the texture.
    pub fn pixel_offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.pitch() + x as usize * BYTES_PER_PIXEL)
    }
}

fn checked_rect(width: u32, height: u32) -> Result<Rect> {
    let max = cl_int::MAX as u32;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(Error::InvalidSize { width, height });
    }
    Ok(Rect {
        x: 0,
        y: 0,
        width,
        height,
    })
}

/// A fixed-size BGRA texture whose contents are produced by an OpenCL
/// kernel.
///
/// Nothing tracks ordering: bind a shader before [`Self::shade`], and
/// shade before [`Self::update`] if the surface should show the result.
pub struct ShaderTexture<'ctx, S: Surface> {
    rect: Rect,
    pixels: Vec<u8>,
    shader: Option<ShaderKernel>,
    pixel_buffer: Buffer<u8>,
    surface: S,
    ctx: &'ctx ComputeContext,
}

impl<'ctx, S: Surface> ShaderTexture<'ctx, S> {
    /// Allocates a zeroed pixel buffer and its device mirror, then pushes
    /// the blank frame to `surface`.
    pub fn new(ctx: &'ctx ComputeContext, surface: S, width: u32, height: u32) -> Result<Self> {
        let rect = checked_rect(width, height)?;
        let pixels = vec![0u8; rect.byte_len()];
        let pixel_buffer = unsafe {
            Buffer::<u8>::create(ctx.context(), CL_MEM_READ_WRITE, pixels.len(), ptr::null_mut())
        }
        .cl_op("clCreateBuffer")?;
        log::debug!("Created {}x{} shader texture ({} bytes)", width, height, pixels.len());

        let mut texture = Self {
            rect,
            pixels,
            shader: None,
            pixel_buffer,
            surface,
            ctx,
        };
        texture.update()?;
        Ok(texture)
    }

    /// Zeroes the CPU pixel buffer. The device buffer and the surface are
    /// left alone until the next `shade` or `update`.
    ///
    /// This is slow; clearing inside a kernel is much faster.
    pub fn blank(&mut self) {
        self.pixels.fill(0);
    }

    /// Binds the kernel `name` as the active shader and sets its implicit
    /// pixel/width/height arguments.
    ///
    /// The previous shader is dropped first, so on error no shader is bound.
    pub fn set_shader(&mut self, name: &str) -> Result<()> {
        self.shader = None;
        let implicit = ImplicitArgs {
            width: self.rect.width as cl_int,
            height: self.rect.height as cl_int,
        };
        self.shader = Some(ShaderKernel::bind(
            self.ctx,
            name,
            &self.pixel_buffer,
            implicit,
        )?);
        Ok(())
    }

    /// Sets an extra kernel argument at `index` (3 or above) on the bound
    /// shader.
    pub fn set_arg<T: KernelScalar>(&mut self, index: u32, value: &T) -> Result<()> {
        self.shader_mut()?.set_arg(index, value)
    }

    /// Sets a device buffer argument at `index` (3 or above).
    pub fn set_buffer_arg<T>(&mut self, index: u32, buffer: &Buffer<T>) -> Result<()> {
        self.shader_mut()?.set_buffer_arg(index, buffer)
    }

    /// Replaces any argument, implicit slots included.
    pub fn set_implicit_override<T: KernelScalar>(&mut self, index: u32, value: &T) -> Result<()> {
        self.shader_mut()?.override_arg(index, value)
    }

    /// Runs the bound shader once per pixel.
    ///
    /// Writes the whole CPU buffer to the device, dispatches
    /// `width * height` work items, waits for the queue to drain and reads
    /// the buffer back. Every step blocks.
    pub fn shade(&mut self) -> Result<()> {
        let global_work_size = [self.rect.pixel_count()];
        let shader = self.shader.as_ref().ok_or(Error::NoShader)?;
        let queue = self.ctx.queue();

        unsafe {
            queue.enqueue_write_buffer(&mut self.pixel_buffer, CL_BLOCKING, 0, &self.pixels, &[])
        }
        .cl_op("clEnqueueWriteBuffer")?;
        log::trace!("Wrote {} bytes for '{}'", self.pixels.len(), shader.name());

        unsafe {
            queue.enqueue_nd_range_kernel(
                shader.kernel().get(),
                1,
                ptr::null(),
                global_work_size.as_ptr(),
                ptr::null(),
                &[],
            )
        }
        .cl_op("clEnqueueNDRangeKernel")?;
        self.ctx.finish()?;

        unsafe {
            queue.enqueue_read_buffer(&self.pixel_buffer, CL_BLOCKING, 0, &mut self.pixels, &[])
        }
        .cl_op("clEnqueueReadBuffer")?;
        log::trace!("Read back {} bytes for '{}'", self.pixels.len(), shader.name());
        Ok(())
    }

    /// Copies the CPU pixel buffer to the surface.
    pub fn update(&mut self) -> Result<()> {
        self.surface.upload(&self.pixels, self.rect.pitch())
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        self.surface.apply_blend_mode(mode)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn set_position(&mut self, x: i32, y: i32) {
        self.rect.x = x;
        self.rect.y = y;
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable view of the pixel bytes. The length cannot change.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// BGRA value of pixel (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = self.rect.pixel_offset(x, y)?;
        let mut bgra = [0u8; 4];
        bgra.copy_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
        Some(bgra)
    }

    /// Writes a BGRA value; returns `false` if (`x`, `y`) is outside the
    /// texture.
    pub fn set_pixel(&mut self, x: u32, y: u32, bgra: [u8; 4]) -> bool {
        match self.rect.pixel_offset(x, y) {
            Some(offset) => {
                self.pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&bgra);
                true
            }
            None => false,
        }
    }

    pub fn shader(&self) -> Option<&ShaderKernel> {
        self.shader.as_ref()
    }

    pub fn shader_name(&self) -> Option<&str> {
        self.shader.as_ref().map(ShaderKernel::name)
    }

    pub fn pixel_buffer(&self) -> &Buffer<u8> {
        &self.pixel_buffer
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    fn shader_mut(&mut self) -> Result<&mut ShaderKernel> {
        self.shader.as_mut().ok_or(Error::NoShader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNELS: &str = r#"
__kernel void fill(__global uchar* pixels, int width, int height) {
    int i = get_global_id(0);
    pixels[i * 4 + 0] = 0xFF;
    pixels[i * 4 + 1] = 0xFF;
    pixels[i * 4 + 2] = 0xFF;
    pixels[i * 4 + 3] = 0xFF;
}

__kernel void gradient(__global uchar* pixels, int width, int height, uchar alpha) {
    int i = get_global_id(0);
    int x = i % width;
    int y = i / width;
    pixels[i * 4 + 0] = (uchar)x;
    pixels[i * 4 + 1] = (uchar)y;
    pixels[i * 4 + 2] = pixels[i * 4 + 2] + 1;
    pixels[i * 4 + 3] = alpha;
}
"#;

    fn context() -> Option<ComputeContext> {
        match ComputeContext::from_sources(&[KERNELS]) {
            Ok(ctx) => Some(ctx),
            Err(Error::NoDevice) => {
                eprintln!("skipping: no OpenCL device available");
                None
            }
            Err(e) => panic!("failed to build test kernels: {}", e),
        }
    }

    #[test]
    fn rect_addressing() {
        let rect = checked_rect(3, 2).unwrap();
        assert_eq!(rect.byte_len(), 24);
        assert_eq!(rect.pitch(), 12);
        assert_eq!(rect.pixel_offset(0, 0), Some(0));
        assert_eq!(rect.pixel_offset(2, 1), Some(20));
        assert_eq!(rect.pixel_offset(3, 0), None);
        assert_eq!(rect.pixel_offset(0, 2), None);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(matches!(
            checked_rect(0, 10),
            Err(Error::InvalidSize { width: 0, height: 10 })
        ));
        assert!(checked_rect(10, 0).is_err());
        assert!(checked_rect(u32::MAX, 1).is_err());
    }

    #[test]
    fn new_texture_is_zeroed_and_pushed() {
        let Some(ctx) = context() else { return };
        let tex = ShaderTexture::new(&ctx, MemorySurface::new(5, 3), 5, 3).unwrap();
        assert_eq!(tex.pixels().len(), 5 * 3 * 4);
        assert!(tex.pixels().iter().all(|&b| b == 0));
        assert_eq!(tex.surface().uploads(), 1);
        assert!(tex.shader_name().is_none());
    }

    #[test]
    fn set_shader_binds_implicit_args_in_order() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(4, 2), 4, 2).unwrap();
        tex.set_shader("fill").unwrap();
        let bound: Vec<_> = tex.shader().unwrap().bound_args().collect();
        assert_eq!(
            bound,
            vec![
                (0, BoundArg::PixelBuffer),
                (1, BoundArg::Width(4)),
                (2, BoundArg::Height(2)),
            ]
        );
    }

    #[test]
    fn shade_runs_kernel_over_every_pixel() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(8, 8), 8, 8).unwrap();
        tex.set_shader("fill").unwrap();
        tex.shade().unwrap();
        assert!(tex.pixels().iter().all(|&b| b == 0xFF));
        // Surface only changes on update.
        assert!(tex.surface().frame().iter().all(|&b| b == 0));
        tex.update().unwrap();
        assert!(tex.surface().frame().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn kernel_sees_prior_contents_and_user_args() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(3, 2), 3, 2).unwrap();
        tex.set_shader("gradient").unwrap();
        assert!(matches!(
            tex.set_arg(2, &7u8),
            Err(Error::ReservedArgument { index: 2 })
        ));
        tex.set_arg(3, &200u8).unwrap();
        tex.shade().unwrap();
        tex.shade().unwrap();
        assert_eq!(tex.pixel(2, 1), Some([2, 1, 2, 200]));
        assert_eq!(tex.pixel(0, 0), Some([0, 0, 2, 200]));
    }

    #[test]
    fn blank_only_clears_cpu_buffer() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(2, 2), 2, 2).unwrap();
        tex.set_shader("fill").unwrap();
        tex.shade().unwrap();
        tex.update().unwrap();
        tex.blank();
        assert!(tex.pixels().iter().all(|&b| b == 0));
        assert!(tex.surface().frame().iter().all(|&b| b == 0xFF));

        let mut device = vec![0u8; tex.pixels().len()];
        unsafe {
            ctx.queue()
                .enqueue_read_buffer(tex.pixel_buffer(), CL_BLOCKING, 0, &mut device, &[])
                .unwrap();
        }
        assert!(device.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn rebinding_discards_user_args() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(2, 2), 2, 2).unwrap();
        tex.set_shader("gradient").unwrap();
        tex.set_arg(3, &9u8).unwrap();
        let bound: Vec<_> = tex.shader().unwrap().bound_args().collect();
        assert_eq!(bound.len(), 4);
        assert_eq!(bound[3], (3, BoundArg::Value { size: 1 }));

        tex.set_shader("fill").unwrap();
        let bound: Vec<_> = tex.shader().unwrap().bound_args().collect();
        assert_eq!(
            bound,
            vec![
                (0, BoundArg::PixelBuffer),
                (1, BoundArg::Width(2)),
                (2, BoundArg::Height(2)),
            ]
        );
    }

    #[test]
    fn blend_mode_leaves_pixels() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(2, 1), 2, 1).unwrap();
        assert!(tex.set_pixel(1, 0, [1, 2, 3, 4]));
        assert!(!tex.set_pixel(2, 0, [1, 2, 3, 4]));
        let before = tex.pixels().to_vec();
        tex.set_blend_mode(BlendMode::Mod).unwrap();
        assert_eq!(tex.pixels(), &before[..]);
        assert_eq!(tex.surface().blend_mode(), BlendMode::Mod);
    }

    #[test]
    fn shade_without_shader_fails() {
        let Some(ctx) = context() else { return };
        let mut tex = ShaderTexture::new(&ctx, MemorySurface::new(1, 1), 1, 1).unwrap();
        assert!(matches!(tex.shade(), Err(Error::NoShader)));
        assert!(matches!(tex.set_shader("missing"), Err(Error::KernelNotFound { .. })));
        assert!(tex.shader_name().is_none());
        tex.set_shader("fill").unwrap();
        assert_eq!(tex.shader_name(), Some("fill"));
    }
}
