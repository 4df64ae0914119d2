//! OpenCL module for device selection and program management
//!
//! This module handles interaction with the compute device via OpenCL,
//! including picking a device, building the program and resolving kernels.

mod context;
mod device;

pub use context::{ComputeContext, read_sources};
pub use device::{
    DeviceCandidate, DeviceSelection, enumerate_devices, list_devices, select_best, select_device,
};
