//! clshade - drive an OpenCL shader texture from the command line
//!
//! Builds the given kernel sources on the best OpenCL device (or the one
//! picked with `--platform`/`--device`), runs a shader over a BGRA pixel
//! buffer and either saves the last frame or shows it in an SDL window.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use clshade::opencl::{DeviceSelection, list_devices, read_sources};
use clshade::{ComputeContext, DEMO_KERNELS, ShaderTexture, Surface};

/// Command line arguments for clshade
#[derive(Parser, Debug)]
#[clap(
    name = "clshade",
    about = "Run an OpenCL kernel over a pixel buffer and present the result.",
    version
)]
struct Args {
    /// OpenCL source file; may be repeated. Uses the built-in demo kernels if omitted.
    #[clap(short, long = "kernel-file")]
    kernel_file: Vec<PathBuf>,

    /// Kernel entry point to bind as the shader
    #[clap(short, long, default_value = "plasma")]
    shader: String,

    /// Texture size as WIDTHxHEIGHT (e.g., 640x480)
    #[clap(long, value_parser = parse_resolution, default_value = "640x480")]
    size: (u32, u32),

    /// Number of shade passes to run (headless default 1; a window runs until closed)
    #[clap(short, long)]
    frames: Option<u64>,

    /// Argument index that receives the frame counter (defaults to 3 for the demo kernels)
    #[clap(long)]
    frame_arg: Option<u32>,

    /// Options passed to the OpenCL compiler
    #[clap(long, default_value = "")]
    build_options: String,

    /// Where the last frame is written in headless mode
    #[clap(short, long, default_value = "frame.png")]
    output: PathBuf,

    /// OpenCL platform index; with --device, picks a device instead of the best-scoring one
    #[clap(short, long)]
    platform: Option<usize>,

    /// Device index within the platform (platform defaults to 0)
    #[clap(short, long)]
    device: Option<usize>,

    /// Show the texture in a window instead of saving it
    #[clap(short, long)]
    window: bool,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// List available OpenCL platforms and devices and exit
    #[clap(long)]
    list_devices: bool,
}

impl Args {
    fn selection(&self) -> DeviceSelection {
        match (self.platform, self.device) {
            (None, None) => DeviceSelection::Best,
            (platform, Some(device)) => DeviceSelection::Index {
                platform: platform.unwrap_or(0),
                device,
            },
            (Some(platform), None) => DeviceSelection::Index { platform, device: 0 },
        }
    }

    fn frame_arg(&self) -> Option<u32> {
        self.frame_arg
            .or_else(|| self.kernel_file.is_empty().then_some(3))
    }
}

/// Parses a resolution string such as "640x480".
pub(crate) fn parse_resolution(size_str: &str) -> Result<(u32, u32)> {
    let size_str = size_str.trim().to_lowercase();
    let Some((w, h)) = size_str.split_once('x') else {
        bail!("Invalid size '{}'. Use WIDTHxHEIGHT.", size_str);
    };

    let width: u32 = w.trim().parse().context("Invalid width")?;
    let height: u32 = h.trim().parse().context("Invalid height")?;
    if width == 0 || height == 0 {
        bail!("Width and height must be greater than zero");
    }
    Ok((width, height))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    if args.list_devices {
        return list_devices().context("Failed to list OpenCL devices");
    }

    let sources = if args.kernel_file.is_empty() {
        log::info!("No kernel files given, using the built-in demo kernels");
        vec![DEMO_KERNELS.to_string()]
    } else {
        read_sources(&args.kernel_file).context("Failed to load kernel sources")?
    };

    let ctx = ComputeContext::with_build_options(args.selection(), &sources, &args.build_options)
        .context("Failed to set up OpenCL")?;
    log::info!("Compiled kernels: {:?}", ctx.kernel_names()?);

    if args.window {
        return run_window(&ctx, &args);
    }
    run_headless(&ctx, &args)
}

/// Runs `frames` shade passes, feeding the frame counter if requested.
fn run_passes<S: Surface>(texture: &mut ShaderTexture<'_, S>, args: &Args, frames: u64) -> Result<()> {
    let frame_arg = args.frame_arg();
    let start = Instant::now();
    for frame in 0..frames {
        if let Some(index) = frame_arg {
            texture.set_arg(index, &(frame as i32))?;
        }
        texture.shade().context("Shader pass failed")?;
    }
    let elapsed = start.elapsed();
    if frames > 0 {
        log::info!(
            "Ran {} pass(es) of '{}' in {:.2?} ({:.2?} per pass)",
            frames,
            args.shader,
            elapsed,
            per_pass(elapsed, frames)
        );
    }
    Ok(())
}

fn per_pass(elapsed: Duration, frames: u64) -> Duration {
    if frames == 0 {
        return Duration::ZERO;
    }
    elapsed.div_f64(frames as f64)
}

#[cfg(feature = "image")]
fn run_headless(ctx: &ComputeContext, args: &Args) -> Result<()> {
    use clshade::ImageSurface;

    let (width, height) = args.size;
    let mut texture = ShaderTexture::new(ctx, ImageSurface::new(width, height), width, height)?;
    texture.set_shader(&args.shader)?;
    run_passes(&mut texture, args, args.frames.unwrap_or(1).max(1))?;
    texture.update()?;
    texture.surface().save(&args.output)?;
    Ok(())
}

#[cfg(not(feature = "image"))]
fn run_headless(ctx: &ComputeContext, args: &Args) -> Result<()> {
    use clshade::MemorySurface;

    let (width, height) = args.size;
    let mut texture = ShaderTexture::new(ctx, MemorySurface::new(width, height), width, height)?;
    texture.set_shader(&args.shader)?;
    run_passes(&mut texture, args, args.frames.unwrap_or(1).max(1))?;
    texture.update()?;
    let sum: u64 = texture.surface().frame().iter().map(|&b| u64::from(b)).sum();
    log::warn!(
        "Built without image support, not writing {} (frame byte sum {})",
        args.output.display(),
        sum
    );
    Ok(())
}

#[cfg(feature = "sdl")]
fn run_window(ctx: &ComputeContext, args: &Args) -> Result<()> {
    use clshade::BlendMode;
    use clshade::texture::streaming_texture;
    use sdl2::event::Event;
    use sdl2::keyboard::Scancode;

    let (width, height) = args.size;
    let sdl = sdl2::init().map_err(anyhow::Error::msg)?;
    let video = sdl.video().map_err(anyhow::Error::msg)?;
    let window = video
        .window("clshade", width, height)
        .position_centered()
        .build()
        .context("Failed to create window")?;
    let mut canvas = window
        .into_canvas()
        .accelerated()
        .present_vsync()
        .build()
        .context("Failed to create renderer")?;
    let creator = canvas.texture_creator();

    let surface = streaming_texture(&creator, width, height)?;
    let mut texture = ShaderTexture::new(ctx, surface, width, height)?;
    texture.set_shader(&args.shader)?;
    texture.set_blend_mode(BlendMode::Blend)?;

    let mut events = sdl.event_pump().map_err(anyhow::Error::msg)?;
    let frame_arg = args.frame_arg();
    let mut frame: u64 = 0;
    'running: loop {
        for event in events.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    scancode: Some(Scancode::Escape),
                    ..
                } => break 'running,
                _ => {}
            }
        }

        if let Some(index) = frame_arg {
            texture.set_arg(index, &(frame as i32))?;
        }
        texture.shade().context("Shader pass failed")?;
        texture.update()?;

        let rect = texture.rect();
        canvas.clear();
        canvas
            .copy(
                texture.surface(),
                None,
                sdl2::rect::Rect::new(rect.x, rect.y, rect.width, rect.height),
            )
            .map_err(anyhow::Error::msg)?;
        canvas.present();

        frame += 1;
        if args.frames.is_some_and(|limit| frame >= limit) {
            break;
        }
    }
    log::info!("Presented {} frame(s)", frame);
    Ok(())
}

#[cfg(not(feature = "sdl"))]
fn run_window(_ctx: &ComputeContext, _args: &Args) -> Result<()> {
    bail!("clshade was built without the `sdl` feature; rebuild with --features sdl for --window")
}
