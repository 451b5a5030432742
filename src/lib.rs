//! Launches compiled compute kernels on a Vulkan device.
//!
//! ```no_run
//! use vklaunch::{ComputeApp, Launch, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let x = vec![1.0f32, 2.0, 3.0];
//! let launch = Launch::new("sscal.spv")
//!     .named("x", &x)
//!     .push_constant(2.0f32)
//!     .dims([x.len() as u32, 1, 1])
//!     .workgroup([64, 1, 1]);
//! let app = ComputeApp::new(launch, &LaunchConfig::default())?;
//! assert_eq!(app.map::<f32>("x")?, &[2.0, 4.0, 6.0]);
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod launch;
pub mod num;

pub use device::{Context, ContextConfig, ContextError, VulkanError};
pub use launch::{
    Buffer, BufferRef, ComputeApp, KernelSource, Launch, LaunchConfig, LaunchError, LaunchState,
    binding::BindingScheme,
    push::{PushConstant, PushConstants},
};
pub use num::{DataType, Scalar};
pub use vklaunch_derive::PushConstants;
