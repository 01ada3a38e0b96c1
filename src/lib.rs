//! # Spincube
//!
//! **A colored cube spinning about a diagonal axis, drawn through a GL-style pipeline.**
//!
//! The crate is split into three layers:
//!
//! - Pure data and math: [`AffineMat4`], [`Vector3`] and the [`CubeGeometry`] tables.
//! - A narrow GL-shaped context trait, [`GpuBackend`], with two implementations:
//!   [`WgpuBackend`] for a real window and [`HeadlessBackend`] for tests and
//!   offline runs.
//! - The pipeline itself: one-time setup ([`initialize`] / [`PipelineBuilder`])
//!   and the per-frame driver ([`CubePipeline::tick`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! fn main() -> Result<(), spincube::AppError> {
//!     spincube::init_logging(Default::default());
//!     spincube::run()
//! }
//! ```
//!
//! ## Without a window
//!
//! ```
//! use spincube::{HeadlessBackend, initialize};
//!
//! let mut ctx = HeadlessBackend::new(800, 600);
//! let mut cube = initialize(&mut ctx).unwrap();
//!
//! for frame in 1..=3 {
//!     cube.tick(&mut ctx, frame as f64 * 16.0).unwrap();
//! }
//! assert!((cube.rotation_angle() - 0.048).abs() < 1e-5);
//! ```

mod app;
mod backend;
mod config;
mod frame;
mod geometry;
mod gpu;
mod headless;
mod logging;
mod math;
mod pipeline;
mod shader;
mod wgpu_backend;

pub use app::{AppError, run, run_with_config};
pub use backend::{
    AttribPointer, BufferTarget, BufferUsage, Capability, ClearMask, ContextError, DepthFunc,
    GpuBackend, IndexType, Primitive, ShaderStage,
};
pub use config::{AppConfig, SceneConfig};
pub use frame::{Animation, FrameError};
pub use geometry::{CubeGeometry, GeometryError, narrow_indices};
pub use gpu::{GpuContext, GpuInitError};
pub use headless::{BufferId, Command, HeadlessBackend, ProgramId, ShaderId, UniformLoc};
pub use logging::{LoggingConfig, init_logging};
pub use math::{AffineMat4, Vector3};
pub use pipeline::{
    BindingKind, Bindings, COLOR_ATTRIBUTE, CubePipeline, MODEL_VIEW_UNIFORM, POSITION_ATTRIBUTE,
    PROJECTION_UNIFORM, PipelineBuilder, STARTUP_CLEAR_COLOR, SetupError, SetupStage, StaticBuffers,
    compile_shader,
    initialize, initialize_with, link_program, resolve_bindings, upload_static_buffers,
};
pub use shader::{FRAGMENT_SHADER, ShaderSources, VERTEX_SHADER};
pub use wgpu_backend::{WgpuBackend, WgpuBuffer, WgpuProgram, WgpuShader, WgpuUniform};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec3, Vec4};
