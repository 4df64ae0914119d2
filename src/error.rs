use std::path::PathBuf;

use opencl3::error_codes::ClError;

/// Errors surfaced by the compute context and shader textures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no OpenCL device with a non-zero score was found")]
    NoDevice,

    #[error("failed to read kernel source '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The program failed to compile. `log` is the full build log reported
    /// by the device compiler.
    #[error("error building program:\n{log}")]
    Build { log: String },

    #[error("kernel '{name}' not found in program: {source}")]
    KernelNotFound {
        name: String,
        #[source]
        source: ClError,
    },

    #[error("invalid texture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("kernel argument {index} is reserved for the implicit pixel/width/height arguments")]
    ReservedArgument { index: u32 },

    #[error("no shader kernel is bound to this texture")]
    NoShader,

    #[error("OpenCL call failed during {op}: {source}")]
    Cl {
        op: &'static str,
        #[source]
        source: ClError,
    },

    #[error("surface error: {0}")]
    Surface(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tags a raw OpenCL error with the operation that produced it.
pub(crate) trait ClResultExt<T> {
    fn cl_op(self, op: &'static str) -> Result<T>;
}

impl<T> ClResultExt<T> for std::result::Result<T, ClError> {
    fn cl_op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| Error::Cl { op, source })
    }
}
