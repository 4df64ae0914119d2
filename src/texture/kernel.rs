//! Kernel binding with the implicit pixel/width/height argument convention.

use std::collections::BTreeMap;

use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem};
use opencl3::types::{
    cl_char, cl_double, cl_float, cl_int, cl_long, cl_short, cl_uchar, cl_uint, cl_ulong, cl_ushort,
};

use crate::error::{ClResultExt, Error, Result};
use crate::opencl::ComputeContext;

/// First argument index available to callers; 0..3 hold the implicit
/// arguments.
pub const FIRST_USER_ARG: u32 = 3;

/// What a kernel argument slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundArg {
    /// The texture's GPU pixel buffer.
    PixelBuffer,
    Width(cl_int),
    Height(cl_int),
    /// A caller supplied scalar of `size` bytes.
    Value { size: usize },
    /// A caller supplied memory object.
    Buffer,
}

/// Value held by one of the implicit slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitValue {
    PixelBuffer,
    Width(cl_int),
    Height(cl_int),
}

impl From<ImplicitValue> for BoundArg {
    fn from(value: ImplicitValue) -> Self {
        match value {
            ImplicitValue::PixelBuffer => BoundArg::PixelBuffer,
            ImplicitValue::Width(w) => BoundArg::Width(w),
            ImplicitValue::Height(h) => BoundArg::Height(h),
        }
    }
}

/// The three leading arguments every shader kernel receives:
///
/// ```c
/// __kernel void shader(__global uchar* pixels, int width, int height, ...)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplicitArgs {
    pub width: cl_int,
    pub height: cl_int,
}

impl ImplicitArgs {
    pub const PIXELS: u32 = 0;
    pub const WIDTH: u32 = 1;
    pub const HEIGHT: u32 = 2;

    /// Slots in binding order.
    pub fn slots(&self) -> [(u32, ImplicitValue); 3] {
        [
            (Self::PIXELS, ImplicitValue::PixelBuffer),
            (Self::WIDTH, ImplicitValue::Width(self.width)),
            (Self::HEIGHT, ImplicitValue::Height(self.height)),
        ]
    }
}

/// Plain values that can be passed by value as kernel arguments.
///
/// # Safety
///
/// Implementors must be `Copy` types whose in-memory layout matches the
/// corresponding OpenCL C type. Arrays stand in for the vector types, so
/// only lengths 2, 4, 8 and 16 qualify; a 3-vector occupies 4 elements.
pub unsafe trait KernelScalar: Copy {}

macro_rules! kernel_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl KernelScalar for $t {}
            unsafe impl KernelScalar for [$t; 2] {}
            unsafe impl KernelScalar for [$t; 4] {}
            unsafe impl KernelScalar for [$t; 8] {}
            unsafe impl KernelScalar for [$t; 16] {}
        )*
    };
}

kernel_scalar!(
    cl_char, cl_uchar, cl_short, cl_ushort, cl_int, cl_uint, cl_long, cl_ulong, cl_float,
    cl_double
);

/// A kernel resolved from the program with its implicit arguments bound.
pub struct ShaderKernel {
    name: String,
    kernel: Kernel,
    bound: BTreeMap<u32, BoundArg>,
}

impl ShaderKernel {
    pub(crate) fn bind(
        ctx: &ComputeContext,
        name: &str,
        pixels: &Buffer<u8>,
        implicit: ImplicitArgs,
    ) -> Result<Self> {
        let kernel = ctx.create_kernel(name)?;
        let mut shader = Self {
            name: name.to_string(),
            kernel,
            bound: BTreeMap::new(),
        };
        let pixels = pixels.get();
        for (index, value) in implicit.slots() {
            match value {
                ImplicitValue::PixelBuffer => shader.set_raw(index, &pixels, value.into())?,
                ImplicitValue::Width(v) | ImplicitValue::Height(v) => {
                    shader.set_raw(index, &v, value.into())?
                }
            }
        }
        log::debug!("Bound shader '{}' ({}x{})", name, implicit.width, implicit.height);
        Ok(shader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Argument slots set so far, in index order.
    pub fn bound_args(&self) -> impl Iterator<Item = (u32, BoundArg)> + '_ {
        self.bound.iter().map(|(i, a)| (*i, *a))
    }

    /// Sets a caller argument at `index`, which must be at least
    /// [`FIRST_USER_ARG`]. The value persists until the kernel is rebound.
    pub fn set_arg<T: KernelScalar>(&mut self, index: u32, value: &T) -> Result<()> {
        check_user_index(index)?;
        self.set_raw(index, value, BoundArg::Value { size: size_of::<T>() })
    }

    /// Binds a device buffer at `index` (at least [`FIRST_USER_ARG`]).
    pub fn set_buffer_arg<T>(&mut self, index: u32, buffer: &Buffer<T>) -> Result<()> {
        check_user_index(index)?;
        self.set_raw(index, &buffer.get(), BoundArg::Buffer)
    }

    /// Overwrites any slot, including the implicit ones.
    pub fn override_arg<T: KernelScalar>(&mut self, index: u32, value: &T) -> Result<()> {
        self.set_raw(index, value, BoundArg::Value { size: size_of::<T>() })
    }

    fn set_raw<T>(&mut self, index: u32, value: &T, record: BoundArg) -> Result<()> {
        // T is either a KernelScalar or a cl_mem handle.
        unsafe { self.kernel.set_arg(index, value) }.cl_op("clSetKernelArg")?;
        self.bound.insert(index, record);
        Ok(())
    }
}

fn check_user_index(index: u32) -> Result<()> {
    if index < FIRST_USER_ARG {
        return Err(Error::ReservedArgument { index });
    }
    Ok(())
}
