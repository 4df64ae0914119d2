use std::path::{Path, PathBuf};

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::Device;
use opencl3::kernel::Kernel;
use opencl3::program::Program;

use super::device::{DeviceCandidate, DeviceSelection, select_device};
use crate::error::{ClResultExt, Error, Result};

/// The device, command queue and compiled program shared by every
/// [`ShaderTexture`](crate::texture::ShaderTexture).
///
/// Fields drop in declaration order, so the program and queue are released
/// before the context they were created from.
pub struct ComputeContext {
    program: Program,
    queue: CommandQueue,
    context: Context,
    device: Device,
    device_info: DeviceCandidate,
}

impl ComputeContext {
    /// Reads every file in `kernel_files` and builds them as one program on
    /// the best available device.
    pub fn new<P: AsRef<Path>>(kernel_files: &[P]) -> Result<Self> {
        let sources = read_sources(kernel_files)?;
        Self::from_sources(&sources)
    }

    /// Builds `sources` as one compilation unit on the best available device.
    pub fn from_sources<S: AsRef<str>>(sources: &[S]) -> Result<Self> {
        Self::with_build_options(DeviceSelection::Best, sources, "")
    }

    pub fn with_selection<S: AsRef<str>>(selection: DeviceSelection, sources: &[S]) -> Result<Self> {
        Self::with_build_options(selection, sources, "")
    }

    /// Like [`Self::with_selection`], passing `options` to the OpenCL
    /// compiler (e.g. `-D SCALE=2 -cl-fast-relaxed-math`).
    pub fn with_build_options<S: AsRef<str>>(
        selection: DeviceSelection,
        sources: &[S],
        options: &str,
    ) -> Result<Self> {
        let device_info = select_device(selection)?;
        log::info!(
            "Using OpenCL device '{}' on platform '{}' (score {})",
            device_info.name,
            device_info.platform_name,
            device_info.score()
        );

        let device = device_info.device();
        let context = Context::from_device(&device).cl_op("clCreateContext")?;
        let queue = CommandQueue::create_default(&context, 0).cl_op("clCreateCommandQueue")?;

        let sources: Vec<&str> = sources.iter().map(AsRef::as_ref).collect();
        let mut program =
            Program::create_from_sources(&context, &sources).cl_op("clCreateProgramWithSource")?;

        log::debug!(
            "Building {} source(s), {} bytes total, options '{}'",
            sources.len(),
            sources.iter().map(|s| s.len()).sum::<usize>(),
            options
        );
        if let Err(e) = program.build(&[device.id()], options) {
            let log = program
                .get_build_log(device.id())
                .unwrap_or_else(|log_err| format!("{} (build log unavailable: {})", e, log_err));
            log::error!("Error building program: {}", log);
            return Err(Error::Build { log });
        }
        log::info!("Program built successfully");

        Ok(Self {
            program,
            queue,
            context,
            device,
            device_info,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_info.name
    }

    pub fn device_info(&self) -> &DeviceCandidate {
        &self.device_info
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Entry points exported by the built program.
    pub fn kernel_names(&self) -> Result<Vec<String>> {
        let names = self
            .program
            .get_kernel_names()
            .cl_op("clGetProgramInfo(CL_PROGRAM_KERNEL_NAMES)")?;
        Ok(split_kernel_names(&names))
    }

    /// Resolves the kernel entry point `name`.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        Kernel::create(&self.program, name).map_err(|source| Error::KernelNotFound {
            name: name.to_string(),
            source,
        })
    }

    /// Blocks until every command queued so far has completed.
    pub fn finish(&self) -> Result<()> {
        self.queue.finish().cl_op("clFinish")
    }
}

/// Reads each kernel file fully, in order.
pub fn read_sources<P: AsRef<Path>>(kernel_files: &[P]) -> Result<Vec<String>> {
    kernel_files
        .iter()
        .map(|path| {
            let path = path.as_ref();
            log::debug!("Loading kernel source {}", path.display());
            std::fs::read_to_string(path).map_err(|source| Error::Io {
                path: PathBuf::from(path),
                source,
            })
        })
        .collect()
}

fn split_kernel_names(names: &str) -> Vec<String> {
    names
        .split(';')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_sources_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.cl");
        let b = dir.path().join("b.cl");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(b"int helper(int x) { return x * 2; }\n")
            .unwrap();
        std::fs::File::create(&b)
            .unwrap()
            .write_all(b"__kernel void k(__global uchar* p, int w, int h) {}\n")
            .unwrap();

        let sources = read_sources(&[&a, &b]).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].starts_with("int helper"));
        assert!(sources[1].contains("__kernel void k"));
    }

    #[test]
    fn missing_source_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.cl");
        match read_sources(&[&missing]) {
            Err(Error::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected Io error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn no_sources_is_empty() {
        let none: [&str; 0] = [];
        assert!(read_sources(&none).unwrap().is_empty());
    }

    #[test]
    fn kernel_name_list_is_split() {
        assert_eq!(split_kernel_names("fill;clear; fade"), vec!["fill", "clear", "fade"]);
        assert!(split_kernel_names("").is_empty());
    }

    #[test]
    fn invalid_source_returns_build_log() {
        let src = "__kernel void broken(__global uchar* p, int w, int h) { this is not C }";
        match ComputeContext::from_sources(&[src]) {
            Err(Error::NoDevice) => eprintln!("skipping: no OpenCL device available"),
            Err(Error::Build { log }) => assert!(!log.is_empty()),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("broken source must not build"),
        }
    }

    #[test]
    fn unknown_kernel_is_reported() {
        let src = "__kernel void present(__global uchar* p, int w, int h) {}";
        let ctx = match ComputeContext::from_sources(&[src]) {
            Err(Error::NoDevice) => {
                eprintln!("skipping: no OpenCL device available");
                return;
            }
            other => other.unwrap(),
        };
        assert_eq!(ctx.kernel_names().unwrap(), vec!["present"]);
        assert!(ctx.create_kernel("present").is_ok());
        match ctx.create_kernel("absent") {
            Err(Error::KernelNotFound { name, .. }) => assert_eq!(name, "absent"),
            _ => panic!("expected KernelNotFound"),
        }
    }
}
