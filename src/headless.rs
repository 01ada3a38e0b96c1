//! An in-memory [`GpuBackend`] that records every call.
//!
//! [`HeadlessBackend`] needs no GPU and no window. Shaders go through the same
//! naga compile/link path as the wgpu backend, buffers keep their bytes, and
//! every state-changing call is appended to a [`Command`] trace. Draw calls
//! are checked the way a strict GL driver would check them: a linked program
//! must be current, every attribute it reads must be enabled and backed by a
//! buffer large enough for the indices, and the index range must fit the
//! bound element buffer.
//!
//! # Example
//!
//! ```
//! use spincube::{Command, HeadlessBackend, initialize};
//!
//! let mut ctx = HeadlessBackend::new(640, 480);
//! let mut cube = initialize(&mut ctx).unwrap();
//! cube.tick(&mut ctx, 16.0).unwrap();
//!
//! assert_eq!(ctx.draw_count(), 1);
//! assert!(ctx.commands().iter().any(|c| matches!(c, Command::DrawElements { count: 36, .. })));
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::backend::{
    AttribPointer, BufferTarget, BufferUsage, Capability, ClearMask, ContextError, DepthFunc,
    GpuBackend, IndexType, Primitive, ShaderStage,
};
use crate::shader::{ProgramObject, ShaderObject};

/// Handle to a headless shader object.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(u32);

/// Handle to a headless program object.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(u32);

/// Handle to a headless buffer object.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

macro_rules! impl_id {
    ($($ty:ty),*) => {$(
        impl $ty {
            pub fn id(&self) -> u32 {
                self.0
            }
        }
    )*};
}

impl_id!(ShaderId, ProgramId, BufferId);

/// A uniform slot of one program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformLoc {
    program: u32,
    name: String,
}

impl UniformLoc {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateShader { id: u32, stage: ShaderStage },
    ShaderSource { id: u32 },
    CompileShader { id: u32, success: bool },
    DeleteShader { id: u32 },
    CreateProgram { id: u32 },
    AttachShader { program: u32, shader: u32 },
    LinkProgram { id: u32, success: bool },
    UseProgram { id: u32 },
    UniformMatrix4 { name: String, value: [f32; 16] },
    CreateBuffer { id: u32 },
    BindBuffer { target: BufferTarget, id: Option<u32> },
    BufferData { target: BufferTarget, id: u32, len: usize, usage: BufferUsage },
    EnableVertexAttribArray { location: u32 },
    VertexAttribPointer { location: u32, buffer: u32, pointer: AttribPointer },
    ClearColor([f32; 4]),
    ClearDepth(f32),
    DepthFunc(DepthFunc),
    Enable(Capability),
    Clear(ClearMask),
    Viewport { x: i32, y: i32, width: u32, height: u32 },
    DrawElements { mode: Primitive, count: u32, index_type: IndexType, offset: u64 },
    BeginFrame,
    EndFrame,
    DiscardFrame,
}

#[derive(Debug, Default)]
struct BufferObject {
    data: Vec<u8>,
    usage: Option<BufferUsage>,
}

#[derive(Clone, Copy, Debug, Default)]
struct AttribState {
    enabled: bool,
    source: Option<(u32, AttribPointer)>,
}

/// A recording, GPU-free backend.
#[derive(Debug)]
pub struct HeadlessBackend {
    size: (u32, u32),
    next_id: u32,
    shaders: HashMap<u32, ShaderObject>,
    programs: HashMap<u32, ProgramObject>,
    buffers: HashMap<u32, BufferObject>,
    bindings: HashMap<BufferTarget, u32>,
    attributes: BTreeMap<u32, AttribState>,
    current_program: Option<u32>,
    depth_test: bool,
    commands: Vec<Command>,
    in_frame: bool,
    frames: u32,
    draws: u32,
}

impl HeadlessBackend {
    /// Creates a backend whose drawable area is `width × height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            bindings: HashMap::new(),
            attributes: BTreeMap::new(),
            current_program: None,
            depth_test: false,
            commands: Vec::new(),
            in_frame: false,
            frames: 0,
            draws: 0,
        }
    }

    /// Simulates a resize of the render target.
    pub fn set_drawable_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    /// Every recorded call, oldest first.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drains the trace.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// The value most recently uploaded to the uniform called `name`.
    pub fn last_uniform(&self, name: &str) -> Option<[f32; 16]> {
        self.commands.iter().rev().find_map(|c| match c {
            Command::UniformMatrix4 { name: n, value } if n == name => Some(*value),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> u32 {
        self.draws
    }

    pub fn frame_count(&self) -> u32 {
        self.frames
    }

    pub fn live_shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Id of the buffer bound to `target`, if any.
    pub fn bound_buffer(&self, target: BufferTarget) -> Option<u32> {
        self.bindings.get(&target).copied()
    }

    /// Contents of a buffer by id.
    pub fn buffer_contents(&self, id: u32) -> Option<&[u8]> {
        self.buffers.get(&id).map(|b| b.data.as_slice())
    }

    /// Usage hint of the last upload into a buffer.
    pub fn buffer_usage(&self, id: u32) -> Option<BufferUsage> {
        self.buffers.get(&id)?.usage
    }

    pub fn depth_test_enabled(&self) -> bool {
        self.depth_test
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn shader(&self, id: u32) -> Result<&ShaderObject, ContextError> {
        self.shaders
            .get(&id)
            .ok_or(ContextError::InvalidHandle { kind: "shader", id })
    }

    fn program(&self, id: u32) -> Result<&ProgramObject, ContextError> {
        self.programs
            .get(&id)
            .ok_or(ContextError::InvalidHandle { kind: "program", id })
    }

    fn validate_draw(&self, count: u32, index_type: IndexType, offset: u64) -> Result<(), ContextError> {
        let program_id = self.current_program.ok_or(ContextError::NoProgram)?;
        let linked = self
            .program(program_id)?
            .linked()
            .ok_or(ContextError::ProgramNotLinked)?;

        let element = self
            .bound_buffer(BufferTarget::ElementArray)
            .ok_or(ContextError::NoElementBuffer)?;
        let indices = &self.buffers[&element].data;

        let index_size = index_type.size() as u64;
        let needed = offset + count as u64 * index_size;
        if needed > indices.len() as u64 {
            return Err(ContextError::IndexOutOfRange {
                needed,
                available: indices.len() as u64,
            });
        }

        let range = &indices[offset as usize..needed as usize];
        let max_index = match index_type {
            IndexType::U16 => range
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]) as u64)
                .max(),
        };

        for &location in linked.attributes.values() {
            let state = self.attributes.get(&location).copied().unwrap_or_default();
            if !state.enabled {
                return Err(ContextError::AttributeNotEnabled { location });
            }
            let (buffer, pointer) = state
                .source
                .ok_or(ContextError::MissingAttributeBuffer { location })?;
            let available = self
                .buffers
                .get(&buffer)
                .ok_or(ContextError::InvalidHandle { kind: "buffer", id: buffer })?
                .data
                .len() as u64;

            if let Some(max_index) = max_index {
                let needed =
                    pointer.offset + max_index * pointer.effective_stride() + pointer.components as u64 * 4;
                if needed > available {
                    return Err(ContextError::AttributeOutOfRange {
                        location,
                        needed,
                        available,
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl GpuBackend for HeadlessBackend {
    type Shader = ShaderId;
    type Program = ProgramId;
    type Buffer = BufferId;
    type UniformLocation = UniformLoc;

    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderId, ContextError> {
        let id = self.alloc_id();
        self.shaders.insert(id, ShaderObject::new(stage));
        self.commands.push(Command::CreateShader { id, stage });
        Ok(ShaderId(id))
    }

    fn shader_source(&mut self, shader: &ShaderId, source: &str) -> Result<(), ContextError> {
        self.shaders
            .get_mut(&shader.0)
            .ok_or(ContextError::InvalidHandle { kind: "shader", id: shader.0 })?
            .set_source(source);
        self.commands.push(Command::ShaderSource { id: shader.0 });
        Ok(())
    }

    fn compile_shader(&mut self, shader: &ShaderId) -> Result<(), ContextError> {
        let object = self
            .shaders
            .get_mut(&shader.0)
            .ok_or(ContextError::InvalidHandle { kind: "shader", id: shader.0 })?;
        object.compile();
        let success = object.compile_status();
        self.commands.push(Command::CompileShader { id: shader.0, success });
        Ok(())
    }

    fn shader_compile_status(&self, shader: &ShaderId) -> Result<bool, ContextError> {
        Ok(self.shader(shader.0)?.compile_status())
    }

    fn shader_info_log(&self, shader: &ShaderId) -> Result<String, ContextError> {
        Ok(self.shader(shader.0)?.info_log())
    }

    fn delete_shader(&mut self, shader: ShaderId) -> Result<(), ContextError> {
        self.shaders
            .remove(&shader.0)
            .ok_or(ContextError::InvalidHandle { kind: "shader", id: shader.0 })?;
        self.commands.push(Command::DeleteShader { id: shader.0 });
        Ok(())
    }

    fn create_program(&mut self) -> Result<ProgramId, ContextError> {
        let id = self.alloc_id();
        self.programs.insert(id, ProgramObject::default());
        self.commands.push(Command::CreateProgram { id });
        Ok(ProgramId(id))
    }

    fn attach_shader(&mut self, program: &ProgramId, shader: &ShaderId) -> Result<(), ContextError> {
        self.shader(shader.0)?;
        self.programs
            .get_mut(&program.0)
            .ok_or(ContextError::InvalidHandle { kind: "program", id: program.0 })?
            .attach(shader.0);
        self.commands.push(Command::AttachShader {
            program: program.0,
            shader: shader.0,
        });
        Ok(())
    }

    fn link_program(&mut self, program: &ProgramId) -> Result<(), ContextError> {
        let object = self
            .programs
            .get_mut(&program.0)
            .ok_or(ContextError::InvalidHandle { kind: "program", id: program.0 })?;
        let shaders = &self.shaders;
        let attached = object.attached.clone();
        object.link(attached.iter().filter_map(|id| shaders.get(id)));
        let success = object.link_status();
        self.commands.push(Command::LinkProgram { id: program.0, success });
        Ok(())
    }

    fn program_link_status(&self, program: &ProgramId) -> Result<bool, ContextError> {
        Ok(self.program(program.0)?.link_status())
    }

    fn program_info_log(&self, program: &ProgramId) -> Result<String, ContextError> {
        Ok(self.program(program.0)?.info_log())
    }

    fn attrib_location(&self, program: &ProgramId, name: &str) -> Result<Option<u32>, ContextError> {
        let linked = self
            .program(program.0)?
            .linked()
            .ok_or(ContextError::ProgramNotLinked)?;
        Ok(linked.attribute(name))
    }

    fn uniform_location(
        &self,
        program: &ProgramId,
        name: &str,
    ) -> Result<Option<UniformLoc>, ContextError> {
        let linked = self
            .program(program.0)?
            .linked()
            .ok_or(ContextError::ProgramNotLinked)?;
        Ok(linked.uniform(name).map(|u| UniformLoc {
            program: program.0,
            name: u.name.clone(),
        }))
    }

    fn use_program(&mut self, program: &ProgramId) -> Result<(), ContextError> {
        if !self.program(program.0)?.link_status() {
            return Err(ContextError::ProgramNotLinked);
        }
        self.current_program = Some(program.0);
        self.commands.push(Command::UseProgram { id: program.0 });
        Ok(())
    }

    fn uniform_matrix4(&mut self, location: &UniformLoc, value: &[f32; 16]) -> Result<(), ContextError> {
        match self.current_program {
            None => return Err(ContextError::NoProgram),
            Some(current) if current != location.program => {
                return Err(ContextError::Validation(format!(
                    "uniform `{}` belongs to program {}, but program {} is in use",
                    location.name, location.program, current
                )));
            }
            Some(_) => {}
        }
        self.commands.push(Command::UniformMatrix4 {
            name: location.name.clone(),
            value: *value,
        });
        Ok(())
    }

    fn create_buffer(&mut self) -> Result<BufferId, ContextError> {
        let id = self.alloc_id();
        self.buffers.insert(id, BufferObject::default());
        self.commands.push(Command::CreateBuffer { id });
        Ok(BufferId(id))
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<&BufferId>) -> Result<(), ContextError> {
        match buffer {
            Some(buffer) => {
                if !self.buffers.contains_key(&buffer.0) {
                    return Err(ContextError::InvalidHandle { kind: "buffer", id: buffer.0 });
                }
                self.bindings.insert(target, buffer.0);
            }
            None => {
                self.bindings.remove(&target);
            }
        }
        self.commands.push(Command::BindBuffer {
            target,
            id: buffer.map(|b| b.0),
        });
        Ok(())
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage) -> Result<(), ContextError> {
        let id = self
            .bound_buffer(target)
            .ok_or(ContextError::NothingBound(target))?;
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or(ContextError::InvalidHandle { kind: "buffer", id })?;
        buffer.data = data.to_vec();
        buffer.usage = Some(usage);
        self.commands.push(Command::BufferData {
            target,
            id,
            len: data.len(),
            usage,
        });
        Ok(())
    }

    fn enable_vertex_attrib_array(&mut self, location: u32) -> Result<(), ContextError> {
        self.attributes.entry(location).or_default().enabled = true;
        self.commands.push(Command::EnableVertexAttribArray { location });
        Ok(())
    }

    fn vertex_attrib_pointer(&mut self, location: u32, pointer: AttribPointer) -> Result<(), ContextError> {
        if !(1..=4).contains(&pointer.components) {
            return Err(ContextError::Unsupported(format!(
                "{} components per attribute",
                pointer.components
            )));
        }
        let buffer = self
            .bound_buffer(BufferTarget::Array)
            .ok_or(ContextError::NothingBound(BufferTarget::Array))?;
        self.attributes.entry(location).or_default().source = Some((buffer, pointer));
        self.commands.push(Command::VertexAttribPointer {
            location,
            buffer,
            pointer,
        });
        Ok(())
    }

    fn clear_color(&mut self, rgba: [f32; 4]) -> Result<(), ContextError> {
        self.commands.push(Command::ClearColor(rgba));
        Ok(())
    }

    fn clear_depth(&mut self, depth: f32) -> Result<(), ContextError> {
        self.commands.push(Command::ClearDepth(depth));
        Ok(())
    }

    fn depth_func(&mut self, func: DepthFunc) -> Result<(), ContextError> {
        self.commands.push(Command::DepthFunc(func));
        Ok(())
    }

    fn enable(&mut self, capability: Capability) -> Result<(), ContextError> {
        match capability {
            Capability::DepthTest => self.depth_test = true,
        }
        self.commands.push(Command::Enable(capability));
        Ok(())
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), ContextError> {
        self.commands.push(Command::Clear(mask));
        Ok(())
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<(), ContextError> {
        self.commands.push(Command::Viewport { x, y, width, height });
        Ok(())
    }

    fn draw_elements(
        &mut self,
        mode: Primitive,
        count: u32,
        index_type: IndexType,
        offset: u64,
    ) -> Result<(), ContextError> {
        self.validate_draw(count, index_type, offset)?;
        self.draws += 1;
        self.commands.push(Command::DrawElements {
            mode,
            count,
            index_type,
            offset,
        });
        Ok(())
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn begin_frame(&mut self) -> Result<(), ContextError> {
        if self.in_frame {
            return Err(ContextError::Validation(
                "begin_frame called while a frame is in progress".into(),
            ));
        }
        self.in_frame = true;
        self.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), ContextError> {
        if !self.in_frame {
            return Err(ContextError::NoActiveFrame);
        }
        self.in_frame = false;
        self.frames += 1;
        self.commands.push(Command::EndFrame);
        Ok(())
    }

    fn discard_frame(&mut self) {
        if self.in_frame {
            self.in_frame = false;
            self.commands.push(Command::DiscardFrame);
        }
    }
}
