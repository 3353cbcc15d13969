//! # lightbaker
//!
//! Light-probe baking over interchangeable compute backends.
//!
//! The same bake code runs against a synchronous reference context, a
//! rayon-backed job context and (with the `gpu` feature) a wgpu device. Probe
//! radiance is integrated into L2 spherical harmonics, then convolved to
//! irradiance and converted to the engine's normalized layout.
//!
//! ## Modules
//!
//! - [`util`] - errors, outcome reporting, math helpers
//! - [`config`] - device and bake settings
//! - [`device`] - [`DeviceContext`], buffer and event handles
//! - [`progress`] - shared progress/cancel state and reporter thread
//! - [`world`] - scene acceleration structure and [`World`]
//! - [`integrator`] - [`ProbeIntegrator`] and the kernel seam
//! - [`postprocess`] - [`ProbePostProcessor`]
//! - [`bake`] - [`populate_world`](bake::populate_world), [`bake`](bake::bake), IPC codec
//!
//! ## Example
//!
//! ```ignore
//! use lightbaker::prelude::*;
//!
//! let input = BakeInput::load("scene.json")?;
//! let progress = Arc::new(BakeProgressState::new());
//! let output = bake(&input, &DeviceSettings::default(), &progress)?;
//! println!("{} probes", output.irradiance.len());
//! ```

pub mod util;
pub mod config;
pub mod device;
pub mod progress;
pub mod world;
pub mod integrator;
pub mod postprocess;
pub mod bake;

pub use sh_l2::SphericalHarmonicsL2;

// Re-export commonly used types
pub use util::{BakeResult, Error, Result, ResultKind};
pub use config::{BakeSettings, DeviceSettings};
pub use device::{Backend, BufferId, BufferSlice, DeviceContext, EventId};
pub use integrator::ProbeIntegrator;
pub use postprocess::ProbePostProcessor;
pub use world::World;

/// Build date stamped by build.rs.
pub const BUILD_DATE: &str = env!("LIGHTBAKER_BUILD_DATE");
/// Build time stamped by build.rs.
pub const BUILD_TIME: &str = env!("LIGHTBAKER_BUILD_TIME");

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::bake::{bake, bake_to_report, populate_world, BakeInput, ProbeBakeOutput};
    pub use crate::config::{BakeSettings, DeviceSettings};
    pub use crate::device::{Backend, BufferId, BufferSlice, DeviceContext, EventId};
    pub use crate::integrator::{ProbeIntegrator, ProbeKernel, SceneKernel};
    pub use crate::postprocess::ProbePostProcessor;
    pub use crate::progress::BakeProgressState;
    pub use crate::util::{BakeResult, Error, Result, ResultKind, Vec3};
    pub use crate::world::World;
    pub use crate::SphericalHarmonicsL2;
}
