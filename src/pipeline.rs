//! One-time pipeline setup: shaders, program, bindings and static buffers.
//!
//! Setup is a one-way state machine that runs exactly once per process:
//!
//! ```text
//! Uncompiled → ShadersCompiled → ProgramLinked → BindingsResolved → BuffersUploaded → Ready
//! ```
//!
//! Any failure aborts setup with a [`SetupError`]. Nothing is retried: a broken
//! shader or a missing uniform will not fix itself on a second attempt.
//!
//! # Example
//!
//! ```
//! use spincube::{HeadlessBackend, PipelineBuilder, SceneConfig};
//!
//! let mut ctx = HeadlessBackend::new(800, 600);
//! let cube = PipelineBuilder::new()
//!     .scene(SceneConfig::new().velocity(0.002))
//!     .build(&mut ctx)
//!     .unwrap();
//!
//! assert_eq!(cube.rotation_angle(), 0.0);
//! ```

use thiserror::Error;

use crate::backend::{
    BufferTarget, BufferUsage, ClearMask, ContextError, GpuBackend, ShaderStage,
};
use crate::config::SceneConfig;
use crate::frame::Animation;
use crate::geometry::CubeGeometry;
use crate::math::{AffineMat4, Vector3};
use crate::shader::ShaderSources;

pub const POSITION_ATTRIBUTE: &str = "aVertexPosition";
pub const COLOR_ATTRIBUTE: &str = "aVertexColor";
pub const PROJECTION_UNIFORM: &str = "uProjectionMatrix";
pub const MODEL_VIEW_UNIFORM: &str = "uModelViewMatrix";

/// Color the target is cleared to once, right after setup, before the first tick.
pub const STARTUP_CLEAR_COLOR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

/// What kind of program input a binding lookup was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Attribute,
    Uniform,
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingKind::Attribute => write!(f, "attribute"),
            BindingKind::Uniform => write!(f, "uniform"),
        }
    }
}

/// Fatal setup failures.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to compile {stage} shader:\n{log}")]
    ShaderCompilation { stage: ShaderStage, log: String },
    #[error("failed to link program:\n{log}")]
    ProgramLink { log: String },
    #[error("{kind} `{name}` not found in the linked program")]
    BindingNotFound { kind: BindingKind, name: &'static str },
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Progress through pipeline setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetupStage {
    Uncompiled,
    ShadersCompiled,
    ProgramLinked,
    BindingsResolved,
    BuffersUploaded,
    Ready,
}

/// Resolved attribute and uniform locations of the cube program.
pub struct Bindings<B: GpuBackend> {
    pub position: u32,
    pub color: u32,
    pub projection: B::UniformLocation,
    pub model_view: B::UniformLocation,
}

/// GPU buffers holding the cube, immutable after upload.
pub struct StaticBuffers<B: GpuBackend> {
    pub vertex: B::Buffer,
    pub color: B::Buffer,
    pub index: B::Buffer,
    pub index_count: u32,
}

/// Creates, compiles and checks one shader object.
///
/// On failure the shader object is deleted and its info log returned in the error.
pub fn compile_shader<B: GpuBackend>(
    ctx: &mut B,
    source: &str,
    stage: ShaderStage,
) -> Result<B::Shader, SetupError> {
    let shader = ctx.create_shader(stage)?;
    ctx.shader_source(&shader, source)?;
    ctx.compile_shader(&shader)?;

    if !ctx.shader_compile_status(&shader)? {
        let log = ctx.shader_info_log(&shader)?;
        ctx.delete_shader(shader)?;
        log::error!("{stage} shader failed to compile:\n{log}");
        return Err(SetupError::ShaderCompilation { stage, log });
    }

    Ok(shader)
}

/// Creates a program from two compiled shaders and links it.
///
/// A program that fails to link is left alive; the caller deletes the shaders
/// after a successful link.
pub fn link_program<B: GpuBackend>(
    ctx: &mut B,
    vertex: &B::Shader,
    fragment: &B::Shader,
) -> Result<B::Program, SetupError> {
    let program = ctx.create_program()?;
    ctx.attach_shader(&program, vertex)?;
    ctx.attach_shader(&program, fragment)?;
    ctx.link_program(&program)?;

    if !ctx.program_link_status(&program)? {
        let log = ctx.program_info_log(&program)?;
        log::error!("program failed to link:\n{log}");
        return Err(SetupError::ProgramLink { log });
    }

    Ok(program)
}

/// Looks up the four named inputs of the cube program. Any missing name is fatal.
pub fn resolve_bindings<B: GpuBackend>(
    ctx: &B,
    program: &B::Program,
) -> Result<Bindings<B>, SetupError> {
    let attribute = |name: &'static str| -> Result<u32, SetupError> {
        ctx.attrib_location(program, name)?
            .ok_or(SetupError::BindingNotFound {
                kind: BindingKind::Attribute,
                name,
            })
    };
    let uniform = |name: &'static str| -> Result<B::UniformLocation, SetupError> {
        ctx.uniform_location(program, name)?
            .ok_or(SetupError::BindingNotFound {
                kind: BindingKind::Uniform,
                name,
            })
    };

    Ok(Bindings {
        position: attribute(POSITION_ATTRIBUTE)?,
        color: attribute(COLOR_ATTRIBUTE)?,
        projection: uniform(PROJECTION_UNIFORM)?,
        model_view: uniform(MODEL_VIEW_UNIFORM)?,
    })
}

/// Uploads positions, colors and indices into three static buffers, then
/// leaves both bind points empty.
pub fn upload_static_buffers<B: GpuBackend>(
    ctx: &mut B,
    geometry: &CubeGeometry,
) -> Result<StaticBuffers<B>, SetupError> {
    let mut upload = |target: BufferTarget, bytes: &[u8]| -> Result<B::Buffer, SetupError> {
        let buffer = ctx.create_buffer()?;
        ctx.bind_buffer(target, Some(&buffer))?;
        ctx.buffer_data(target, bytes, BufferUsage::StaticDraw)?;
        Ok(buffer)
    };

    let vertex = upload(BufferTarget::Array, geometry.position_bytes())?;
    let color = upload(BufferTarget::Array, geometry.color_bytes())?;
    let index = upload(BufferTarget::ElementArray, geometry.index_bytes())?;

    ctx.bind_buffer(BufferTarget::Array, None)?;
    ctx.bind_buffer(BufferTarget::ElementArray, None)?;

    Ok(StaticBuffers {
        vertex,
        color,
        index,
        index_count: geometry.indices.len() as u32,
    })
}

/// Runs setup with the built-in shaders and the default scene.
pub fn initialize<B: GpuBackend>(ctx: &mut B) -> Result<CubePipeline<B>, SetupError> {
    PipelineBuilder::new().build(ctx)
}

/// Runs setup with explicit shader sources and scene parameters.
pub fn initialize_with<B: GpuBackend>(
    ctx: &mut B,
    sources: &ShaderSources<'_>,
    scene: SceneConfig,
) -> Result<CubePipeline<B>, SetupError> {
    PipelineBuilder::new().shaders(*sources).scene(scene).build(ctx)
}

/// Configures and runs pipeline setup.
#[derive(Clone, Copy, Debug)]
pub struct PipelineBuilder<'a> {
    sources: ShaderSources<'a>,
    scene: SceneConfig,
    geometry: CubeGeometry,
}

impl Default for PipelineBuilder<'static> {
    fn default() -> Self {
        Self {
            sources: ShaderSources::default(),
            scene: SceneConfig::default(),
            geometry: CubeGeometry::cube(),
        }
    }
}

impl PipelineBuilder<'static> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a> PipelineBuilder<'a> {
    /// Replaces the built-in shader sources.
    pub fn shaders<'b>(self, sources: ShaderSources<'b>) -> PipelineBuilder<'b> {
        PipelineBuilder {
            sources,
            scene: self.scene,
            geometry: self.geometry,
        }
    }

    pub fn scene(mut self, scene: SceneConfig) -> Self {
        self.scene = scene;
        self
    }

    /// Runs the setup state machine against `ctx`.
    pub fn build<B: GpuBackend>(self, ctx: &mut B) -> Result<CubePipeline<B>, SetupError> {
        let mut stage = SetupStage::Uncompiled;

        let vertex = compile_shader(ctx, self.sources.vertex, ShaderStage::Vertex)?;
        let fragment = compile_shader(ctx, self.sources.fragment, ShaderStage::Fragment)?;
        advance(&mut stage, SetupStage::ShadersCompiled);

        let program = link_program(ctx, &vertex, &fragment)?;
        ctx.delete_shader(vertex)?;
        ctx.delete_shader(fragment)?;
        advance(&mut stage, SetupStage::ProgramLinked);

        let bindings = resolve_bindings(ctx, &program)?;
        advance(&mut stage, SetupStage::BindingsResolved);

        let buffers = upload_static_buffers(ctx, &self.geometry)?;
        advance(&mut stage, SetupStage::BuffersUploaded);

        match clear_startup_frame(ctx) {
            Err(ContextError::SurfaceTimeout) => log::warn!("startup clear skipped"),
            other => other?,
        }

        let mut model_view = AffineMat4::new();
        model_view.translate(self.scene.translation);
        advance(&mut stage, SetupStage::Ready);

        log::info!(
            "cube pipeline ready ({} indices, attributes at {} and {})",
            buffers.index_count,
            bindings.position,
            bindings.color
        );

        Ok(CubePipeline {
            program,
            bindings,
            buffers,
            axis: self.scene.rotation_axis(),
            scene: self.scene,
            animation: Animation::default(),
            projection: AffineMat4::new(),
            model_view,
        })
    }
}

/// Presents one frame that only clears the color target.
fn clear_startup_frame<B: GpuBackend>(ctx: &mut B) -> Result<(), ContextError> {
    ctx.begin_frame()?;
    let cleared = ctx
        .clear_color(STARTUP_CLEAR_COLOR)
        .and_then(|()| ctx.clear(ClearMask::COLOR));
    match cleared {
        Ok(()) => ctx.end_frame(),
        Err(err) => {
            ctx.discard_frame();
            Err(err)
        }
    }
}

fn advance(stage: &mut SetupStage, next: SetupStage) {
    debug_assert!(next > *stage);
    log::debug!("pipeline setup: {stage:?} -> {next:?}");
    *stage = next;
}

/// A ready-to-drive cube pipeline.
///
/// Owns the program and the three static buffers for the lifetime of the
/// process. Advance and render it with [`tick`](CubePipeline::tick).
pub struct CubePipeline<B: GpuBackend> {
    pub(crate) program: B::Program,
    pub(crate) bindings: Bindings<B>,
    pub(crate) buffers: StaticBuffers<B>,
    pub(crate) scene: SceneConfig,
    pub(crate) axis: Vector3,
    pub(crate) animation: Animation,
    pub(crate) projection: AffineMat4,
    pub(crate) model_view: AffineMat4,
}

impl<B: GpuBackend> CubePipeline<B> {
    pub fn program(&self) -> &B::Program {
        &self.program
    }

    pub fn bindings(&self) -> &Bindings<B> {
        &self.bindings
    }

    pub fn buffers(&self) -> &StaticBuffers<B> {
        &self.buffers
    }

    pub fn scene(&self) -> &SceneConfig {
        &self.scene
    }

    pub fn animation(&self) -> Animation {
        self.animation
    }

    /// Current absolute rotation in radians.
    pub fn rotation_angle(&self) -> f32 {
        self.animation.rotation_angle()
    }

    pub fn projection(&self) -> &AffineMat4 {
        &self.projection
    }

    pub fn model_view(&self) -> &AffineMat4 {
        &self.model_view
    }
}
