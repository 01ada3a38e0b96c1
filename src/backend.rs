//! The GL-shaped GPU capability set the cube pipeline is written against.
//!
//! [`GpuBackend`] is deliberately narrow: it offers exactly the calls the setup
//! state machine and the frame loop issue, in the vocabulary of a WebGL-style
//! context (shader objects, programs, bind points, attribute pointers). Any
//! backend that can express these calls can drive the cube:
//!
//! - [`HeadlessBackend`](crate::HeadlessBackend) keeps everything in memory and
//!   records a trace, which is what the tests drive.
//! - [`WgpuBackend`](crate::WgpuBackend) maps the calls onto wgpu and a window surface.
//!
//! Calls are strictly sequential. Each one completes before the next is issued,
//! and the order in which they are made is part of the contract.

use thiserror::Error;

/// Programmable pipeline stage of a shader object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Buffer bind point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Per-vertex attribute data.
    Array,
    /// Triangle indices.
    ElementArray,
}

/// Upload usage hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Written once, drawn many times.
    StaticDraw,
}

/// Depth comparison function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFunc {
    /// The GL default.
    Less,
    LessEqual,
}

/// Toggleable fixed-function state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    DepthTest,
}

/// Which attachments [`GpuBackend::clear`] resets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: Self = Self {
        color: true,
        depth: false,
    };
    pub const ALL: Self = Self {
        color: true,
        depth: true,
    };
}

/// Primitive assembly mode for draw calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
}

/// Element type of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            IndexType::U16 => 2,
        }
    }
}

/// Component layout of one vertex attribute, always 32-bit floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttribPointer {
    /// Floats per vertex (1–4).
    pub components: u32,
    /// Bytes between consecutive vertices; 0 means tightly packed.
    pub stride: u32,
    /// Byte offset of the first element in the bound buffer.
    pub offset: u64,
}

impl AttribPointer {
    pub fn packed(components: u32) -> Self {
        Self {
            components,
            stride: 0,
            offset: 0,
        }
    }

    /// Stride with the "tightly packed" shorthand resolved.
    pub fn effective_stride(&self) -> u64 {
        if self.stride == 0 {
            self.components as u64 * 4
        } else {
            self.stride as u64
        }
    }
}

/// Failures reported by a backend.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("{kind} handle {id} is not live")]
    InvalidHandle { kind: &'static str, id: u32 },
    #[error("no program is in use")]
    NoProgram,
    #[error("program has not been linked successfully")]
    ProgramNotLinked,
    #[error("no buffer is bound to {0:?}")]
    NothingBound(BufferTarget),
    #[error("vertex attribute {location} is enabled without a buffer")]
    MissingAttributeBuffer { location: u32 },
    #[error("vertex attribute {location} is read by the program but not enabled")]
    AttributeNotEnabled { location: u32 },
    #[error("vertex attribute {location} reads {needed} bytes but its buffer holds {available}")]
    AttributeOutOfRange {
        location: u32,
        needed: u64,
        available: u64,
    },
    #[error("no element array buffer is bound")]
    NoElementBuffer,
    #[error("draw reads {needed} bytes of indices but the element buffer holds {available}")]
    IndexOutOfRange { needed: u64, available: u64 },
    #[error("no frame is in progress")]
    NoActiveFrame,
    /// The next surface texture did not become available in time.
    #[error("timed out acquiring the next surface texture")]
    SurfaceTimeout,
    #[error("surface error: {0}")]
    Surface(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// A GL-style GPU context.
///
/// Handle types are owned values. A backend never hands out the same handle
/// twice, and `delete_*` consumes the handle.
pub trait GpuBackend {
    type Shader;
    type Program;
    type Buffer;
    type UniformLocation;

    // --- shaders -------------------------------------------------------------

    fn create_shader(&mut self, stage: ShaderStage) -> Result<Self::Shader, ContextError>;
    fn shader_source(&mut self, shader: &Self::Shader, source: &str) -> Result<(), ContextError>;
    fn compile_shader(&mut self, shader: &Self::Shader) -> Result<(), ContextError>;
    fn shader_compile_status(&self, shader: &Self::Shader) -> Result<bool, ContextError>;
    fn shader_info_log(&self, shader: &Self::Shader) -> Result<String, ContextError>;
    fn delete_shader(&mut self, shader: Self::Shader) -> Result<(), ContextError>;

    // --- programs ------------------------------------------------------------

    fn create_program(&mut self) -> Result<Self::Program, ContextError>;
    fn attach_shader(
        &mut self,
        program: &Self::Program,
        shader: &Self::Shader,
    ) -> Result<(), ContextError>;
    fn link_program(&mut self, program: &Self::Program) -> Result<(), ContextError>;
    fn program_link_status(&self, program: &Self::Program) -> Result<bool, ContextError>;
    fn program_info_log(&self, program: &Self::Program) -> Result<String, ContextError>;

    /// Location of a vertex input, or `None` when the program has no input by that name.
    fn attrib_location(
        &self,
        program: &Self::Program,
        name: &str,
    ) -> Result<Option<u32>, ContextError>;

    /// Location of a uniform, or `None` when the program has no uniform by that name.
    fn uniform_location(
        &self,
        program: &Self::Program,
        name: &str,
    ) -> Result<Option<Self::UniformLocation>, ContextError>;

    fn use_program(&mut self, program: &Self::Program) -> Result<(), ContextError>;

    /// Uploads a column-major 4×4 matrix to a uniform of the current program.
    fn uniform_matrix4(
        &mut self,
        location: &Self::UniformLocation,
        value: &[f32; 16],
    ) -> Result<(), ContextError>;

    // --- buffers -------------------------------------------------------------

    fn create_buffer(&mut self) -> Result<Self::Buffer, ContextError>;

    /// Binds `buffer` to `target`; `None` unbinds.
    fn bind_buffer(
        &mut self,
        target: BufferTarget,
        buffer: Option<&Self::Buffer>,
    ) -> Result<(), ContextError>;

    /// Replaces the contents of the buffer currently bound to `target`.
    fn buffer_data(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<(), ContextError>;

    fn enable_vertex_attrib_array(&mut self, location: u32) -> Result<(), ContextError>;

    /// Points `location` at the buffer currently bound to [`BufferTarget::Array`].
    fn vertex_attrib_pointer(
        &mut self,
        location: u32,
        pointer: AttribPointer,
    ) -> Result<(), ContextError>;

    // --- fixed function and drawing ------------------------------------------

    fn clear_color(&mut self, rgba: [f32; 4]) -> Result<(), ContextError>;
    fn clear_depth(&mut self, depth: f32) -> Result<(), ContextError>;
    fn depth_func(&mut self, func: DepthFunc) -> Result<(), ContextError>;
    fn enable(&mut self, capability: Capability) -> Result<(), ContextError>;
    fn clear(&mut self, mask: ClearMask) -> Result<(), ContextError>;
    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<(), ContextError>;
    fn draw_elements(
        &mut self,
        mode: Primitive,
        count: u32,
        index_type: IndexType,
        offset: u64,
    ) -> Result<(), ContextError>;

    /// Current pixel size of the render target as `(width, height)`.
    fn drawable_size(&self) -> (u32, u32);

    /// Opens a batch of calls that together produce one frame.
    fn begin_frame(&mut self) -> Result<(), ContextError> {
        Ok(())
    }

    /// Closes the batch opened by [`begin_frame`](Self::begin_frame) and presents it.
    fn end_frame(&mut self) -> Result<(), ContextError> {
        Ok(())
    }

    /// Drops a batch opened by [`begin_frame`](Self::begin_frame) without
    /// presenting it. Does nothing when no frame is open.
    fn discard_frame(&mut self) {}
}
