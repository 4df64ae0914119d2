use crate::error::{Error, Result};

/// How the presented texture is combined with what is already on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    None,
    /// Alpha blending, for ordinary rendering.
    Blend,
    /// Additive, for lighting.
    Add,
    /// Color modulate, for lighting.
    Mod,
    Mul,
}

/// Destination for the CPU pixel buffer of a shader texture.
///
/// `pixels` is tightly packed BGRA with `pitch` bytes per row.
pub trait Surface {
    fn upload(&mut self, pixels: &[u8], pitch: usize) -> Result<()>;
    fn apply_blend_mode(&mut self, mode: BlendMode) -> Result<()>;
}

impl<T> Surface for &mut T
where
    T: Surface + ?Sized,
{
    fn upload(&mut self, pixels: &[u8], pitch: usize) -> Result<()> {
        (**self).upload(pixels, pitch)
    }

    fn apply_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        (**self).apply_blend_mode(mode)
    }
}

impl<T> Surface for Box<T>
where
    T: Surface + ?Sized,
{
    fn upload(&mut self, pixels: &[u8], pitch: usize) -> Result<()> {
        (**self).upload(pixels, pitch)
    }

    fn apply_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        (**self).apply_blend_mode(mode)
    }
}

fn check_frame(width: u32, height: u32, pixels: &[u8], pitch: usize) -> Result<()> {
    let row = width as usize * 4;
    if pitch != row || pixels.len() != row * height as usize {
        return Err(Error::Surface(format!(
            "frame of {} bytes with pitch {} does not fit a {}x{} surface",
            pixels.len(),
            pitch,
            width,
            height
        )));
    }
    Ok(())
}

/// Headless surface that keeps a copy of the last uploaded frame.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    width: u32,
    height: u32,
    frame: Vec<u8>,
    blend_mode: BlendMode,
    uploads: usize,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: vec![0; width as usize * height as usize * 4],
            blend_mode: BlendMode::default(),
            uploads: 0,
        }
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    /// Number of frames uploaded so far.
    pub fn uploads(&self) -> usize {
        self.uploads
    }
}

impl Surface for MemorySurface {
    fn upload(&mut self, pixels: &[u8], pitch: usize) -> Result<()> {
        check_frame(self.width, self.height, pixels, pitch)?;
        self.frame.copy_from_slice(pixels);
        self.uploads += 1;
        log::trace!("MemorySurface upload #{} ({} bytes)", self.uploads, pixels.len());
        Ok(())
    }

    fn apply_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        self.blend_mode = mode;
        Ok(())
    }
}

/// Swaps the B and R channels of a packed 4-byte-per-pixel buffer.
pub fn bgra_to_rgba(pixels: &[u8]) -> Vec<u8> {
    pixels
        .chunks_exact(4)
        .flat_map(|px| [px[2], px[1], px[0], px[3]])
        .collect()
}

#[cfg(feature = "image")]
mod image_surface {
    use std::path::Path;

    use image::RgbaImage;

    use super::{BlendMode, Surface, bgra_to_rgba, check_frame};
    use crate::error::{Error, Result};

    /// Headless surface that converts each frame to an RGBA image.
    pub struct ImageSurface {
        image: RgbaImage,
        blend_mode: BlendMode,
    }

    impl ImageSurface {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                image: RgbaImage::new(width, height),
                blend_mode: BlendMode::default(),
            }
        }

        pub fn image(&self) -> &RgbaImage {
            &self.image
        }

        pub fn blend_mode(&self) -> BlendMode {
            self.blend_mode
        }

        /// Writes the last uploaded frame; the format follows the extension.
        pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
            let path = path.as_ref();
            self.image
                .save(path)
                .map_err(|e| Error::Surface(format!("failed to save {}: {}", path.display(), e)))?;
            log::info!("Saved frame to {}", path.display());
            Ok(())
        }
    }

    impl Surface for ImageSurface {
        fn upload(&mut self, pixels: &[u8], pitch: usize) -> Result<()> {
            check_frame(self.image.width(), self.image.height(), pixels, pitch)?;
            let (width, height) = self.image.dimensions();
            self.image = RgbaImage::from_raw(width, height, bgra_to_rgba(pixels))
                .ok_or_else(|| Error::Surface("frame size mismatch".to_string()))?;
            Ok(())
        }

        fn apply_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
            self.blend_mode = mode;
            Ok(())
        }
    }
}

#[cfg(feature = "image")]
pub use image_surface::ImageSurface;

#[cfg(feature = "sdl")]
mod sdl_surface {
    use sdl2::pixels::PixelFormatEnum;
    use sdl2::render::{Texture, TextureCreator};

    use super::{BlendMode, Surface};
    use crate::error::{Error, Result};

    /// Creates a streaming texture whose byte layout is B,G,R,A on
    /// little-endian hosts.
    pub fn streaming_texture<T>(
        creator: &TextureCreator<T>,
        width: u32,
        height: u32,
    ) -> Result<Texture<'_>> {
        creator
            .create_texture_streaming(PixelFormatEnum::ARGB8888, width, height)
            .map_err(|e| Error::Surface(e.to_string()))
    }

    impl From<BlendMode> for sdl2::render::BlendMode {
        fn from(mode: BlendMode) -> Self {
            match mode {
                BlendMode::None => sdl2::render::BlendMode::None,
                BlendMode::Blend => sdl2::render::BlendMode::Blend,
                BlendMode::Add => sdl2::render::BlendMode::Add,
                BlendMode::Mod => sdl2::render::BlendMode::Mod,
                BlendMode::Mul => sdl2::render::BlendMode::Mul,
            }
        }
    }

    impl Surface for Texture<'_> {
        fn upload(&mut self, pixels: &[u8], pitch: usize) -> Result<()> {
            Texture::update(self, None, pixels, pitch).map_err(|e| Error::Surface(e.to_string()))
        }

        fn apply_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
            Texture::set_blend_mode(self, mode.into());
            Ok(())
        }
    }
}

#[cfg(feature = "sdl")]
pub use sdl_surface::streaming_texture;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_surface_keeps_last_frame() {
        let mut surface = MemorySurface::new(2, 1);
        let frame = [1, 2, 3, 4, 5, 6, 7, 8];
        surface.upload(&frame, 8).unwrap();
        assert_eq!(surface.frame(), &frame);
        assert_eq!(surface.uploads(), 1);
    }

    #[test]
    fn memory_surface_rejects_wrong_geometry() {
        let mut surface = MemorySurface::new(2, 2);
        assert!(matches!(surface.upload(&[0; 8], 8), Err(Error::Surface(_))));
        assert!(matches!(surface.upload(&[0; 16], 4), Err(Error::Surface(_))));
        assert_eq!(surface.uploads(), 0);
    }

    #[test]
    fn blend_mode_does_not_touch_frame() {
        let mut surface = MemorySurface::new(1, 1);
        surface.upload(&[9, 8, 7, 6], 4).unwrap();
        surface.apply_blend_mode(BlendMode::Add).unwrap();
        assert_eq!(surface.blend_mode(), BlendMode::Add);
        assert_eq!(surface.frame(), &[9, 8, 7, 6]);
    }

    #[test]
    fn boxed_surfaces_forward() {
        let mut boxed: Box<dyn Surface> = Box::new(MemorySurface::new(1, 1));
        boxed.upload(&[0, 0, 0, 0], 4).unwrap();
        boxed.apply_blend_mode(BlendMode::Blend).unwrap();
    }

    #[test]
    fn bgra_swizzle() {
        assert_eq!(bgra_to_rgba(&[10, 20, 30, 40, 1, 2, 3, 4]), vec![30, 20, 10, 40, 3, 2, 1, 4]);
    }

    #[cfg(feature = "image")]
    #[test]
    fn image_surface_converts_and_saves() {
        let mut surface = ImageSurface::new(1, 2);
        surface.upload(&[255, 0, 0, 255, 0, 0, 255, 128], 4).unwrap();
        assert_eq!(surface.image().get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(surface.image().get_pixel(0, 1).0, [255, 0, 0, 128]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        surface.save(&path).unwrap();
        assert!(path.exists());
    }
}
