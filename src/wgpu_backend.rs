//! [`GpuBackend`] on top of wgpu and a window surface.
//!
//! wgpu has no mutable global state, so this backend keeps the GL state
//! (current program, bind points, attribute pointers, clear values, depth
//! test) itself and turns it into wgpu objects when a draw happens:
//!
//! - Linking a program creates its shader modules, one uniform buffer per
//!   `var<uniform>`, the bind groups and the pipeline layout.
//! - Render pipelines are built lazily per vertex layout and depth state, then
//!   cached on the program.
//! - `clear` is deferred and becomes the load op of the next render pass.
//! - `begin_frame` acquires the surface texture; `end_frame` submits and presents.
//!
//! Uniform values are written with `Queue::write_buffer`, which lands before
//! the frame's submission. A program therefore sees the last value written in
//! the frame, not the value current at each draw.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use wgpu::util::DeviceExt;

use crate::backend::{
    AttribPointer, BufferTarget, BufferUsage, Capability, ClearMask, ContextError, DepthFunc,
    GpuBackend, IndexType, Primitive, ShaderStage,
};
use crate::gpu::{DEPTH_FORMAT, GpuContext};
use crate::shader::{LinkedProgram, ProgramObject, ShaderObject, UniformVar};

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct WgpuShader(u32);

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct WgpuProgram(u32);

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct WgpuBuffer(u32);

/// A uniform slot, addressed by its `@group`/`@binding` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WgpuUniform {
    program: u32,
    name: String,
    group: u32,
    binding: u32,
    size: u32,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    len: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct AttribState {
    enabled: bool,
    source: Option<(u32, AttribPointer)>,
}

#[derive(Clone, Copy, Debug)]
struct VertexSlot {
    location: u32,
    buffer: u32,
    pointer: AttribPointer,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    /// `(location, components, stride)` per vertex buffer slot.
    attributes: Vec<(u32, u32, u64)>,
    /// `None` when depth testing is off.
    depth: Option<DepthFunc>,
}

struct ProgramResources {
    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    layout: wgpu::PipelineLayout,
    uniforms: HashMap<(u32, u32), wgpu::Buffer>,
    bind_groups: Vec<wgpu::BindGroup>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

struct ProgramSlot {
    object: ProgramObject,
    resources: Option<ProgramResources>,
}

#[derive(Clone, Copy, Debug, Default)]
struct PendingClear {
    color: Option<wgpu::Color>,
    depth: Option<f32>,
}

impl PendingClear {
    fn is_empty(&self) -> bool {
        self.color.is_none() && self.depth.is_none()
    }
}

struct ActiveFrame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    clear: PendingClear,
}

/// A GL-style context drawing into a window through wgpu.
pub struct WgpuBackend {
    gpu: GpuContext,
    next_id: u32,
    shaders: HashMap<u32, ShaderObject>,
    programs: HashMap<u32, ProgramSlot>,
    buffers: HashMap<u32, Option<GpuBuffer>>,
    bindings: HashMap<BufferTarget, u32>,
    attributes: BTreeMap<u32, AttribState>,
    current_program: Option<u32>,
    clear_color: wgpu::Color,
    clear_depth: f32,
    depth_func: DepthFunc,
    depth_test: bool,
    viewport: Option<(i32, i32, u32, u32)>,
    frame: Option<ActiveFrame>,
}

impl WgpuBackend {
    /// Wraps a GPU context. All GL state starts at its GL defaults.
    pub fn new(gpu: GpuContext) -> Self {
        Self {
            gpu,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            bindings: HashMap::new(),
            attributes: BTreeMap::new(),
            current_program: None,
            clear_color: wgpu::Color::TRANSPARENT,
            clear_depth: 1.0,
            depth_func: DepthFunc::Less,
            depth_test: false,
            viewport: None,
            frame: None,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Forwards a window resize to the surface and depth buffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
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

    fn program(&self, id: u32) -> Result<&ProgramSlot, ContextError> {
        self.programs
            .get(&id)
            .ok_or(ContextError::InvalidHandle { kind: "program", id })
    }

    fn bound_buffer(&self, target: BufferTarget) -> Option<u32> {
        self.bindings.get(&target).copied()
    }

    /// Collects the vertex buffer slots the current program reads.
    fn vertex_slots(&self, linked: &LinkedProgram) -> Result<Vec<VertexSlot>, ContextError> {
        let mut slots = Vec::with_capacity(linked.attributes.len());
        for &location in linked.attributes.values() {
            let state = self.attributes.get(&location).copied().unwrap_or_default();
            if !state.enabled {
                return Err(ContextError::AttributeNotEnabled { location });
            }
            let (buffer, pointer) = state
                .source
                .ok_or(ContextError::MissingAttributeBuffer { location })?;
            let available = live_buffer(&self.buffers, buffer)?.len;
            if pointer.offset >= available {
                return Err(ContextError::AttributeOutOfRange {
                    location,
                    needed: pointer.offset + pointer.components as u64 * 4,
                    available,
                });
            }
            slots.push(VertexSlot {
                location,
                buffer,
                pointer,
            });
        }
        slots.sort_by_key(|slot| slot.location);
        Ok(slots)
    }
}

fn live_buffer(buffers: &HashMap<u32, Option<GpuBuffer>>, id: u32) -> Result<&GpuBuffer, ContextError> {
    buffers
        .get(&id)
        .ok_or(ContextError::InvalidHandle { kind: "buffer", id })?
        .as_ref()
        .ok_or_else(|| ContextError::Validation(format!("buffer {id} has no data store")))
}

/// Runs `f` inside a validation error scope and turns a captured error into
/// [`ContextError::Validation`].
fn validated<T>(device: &wgpu::Device, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, ContextError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f(device);
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(ContextError::Validation(err.to_string())),
        None => Ok(value),
    }
}

fn create_program_resources(device: &wgpu::Device, linked: &LinkedProgram) -> ProgramResources {
    let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Vertex Shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&linked.vertex.source)),
    });
    let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Fragment Shader"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&linked.fragment.source)),
    });

    // Bind group layouts must cover every group index up to the highest one used
    let group_count = linked
        .uniforms
        .values()
        .map(|u| u.group + 1)
        .max()
        .unwrap_or(0);

    let mut uniforms = HashMap::new();
    let mut group_layouts = Vec::new();
    let mut bind_groups = Vec::new();

    for group in 0..group_count {
        let members: Vec<&UniformVar> = linked
            .uniforms
            .values()
            .filter(|u| u.group == group)
            .collect();

        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = members
            .iter()
            .map(|u| wgpu::BindGroupLayoutEntry {
                binding: u.binding,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Uniform Bind Group Layout"),
            entries: &layout_entries,
        });

        for u in &members {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&u.name),
                size: (u.size as u64).next_multiple_of(16).max(16),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            uniforms.insert((group, u.binding), buffer);
        }

        let entries: Vec<wgpu::BindGroupEntry> = members
            .iter()
            .filter_map(|u| {
                Some(wgpu::BindGroupEntry {
                    binding: u.binding,
                    resource: uniforms.get(&(group, u.binding))?.as_entire_binding(),
                })
            })
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Bind Group"),
            layout: &layout,
            entries: &entries,
        });

        group_layouts.push(layout);
        bind_groups.push(bind_group);
    }

    let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Program Pipeline Layout"),
        bind_group_layouts: &layout_refs,
        push_constant_ranges: &[],
    });

    ProgramResources {
        vertex_module,
        fragment_module,
        vertex_entry: linked.vertex.entry_point.clone(),
        fragment_entry: linked.fragment.entry_point.clone(),
        layout,
        uniforms,
        bind_groups,
        pipelines: HashMap::new(),
    }
}

fn float_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn compare_function(func: DepthFunc) -> wgpu::CompareFunction {
    match func {
        DepthFunc::Less => wgpu::CompareFunction::Less,
        DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    resources: &ProgramResources,
    key: &PipelineKey,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
        .attributes
        .iter()
        .map(|&(location, components, _)| {
            [wgpu::VertexAttribute {
                format: float_format(components),
                offset: 0,
                shader_location: location,
            }]
        })
        .collect();

    let buffers: Vec<wgpu::VertexBufferLayout> = key
        .attributes
        .iter()
        .zip(&attributes)
        .map(|(&(_, _, stride), attribute)| wgpu::VertexBufferLayout {
            array_stride: stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: attribute,
        })
        .collect();

    // GL skips depth writes entirely while the test is disabled
    let depth_stencil = match key.depth {
        Some(func) => wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: compare_function(func),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        },
        None => wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        },
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Program Pipeline"),
        layout: Some(&resources.layout),
        vertex: wgpu::VertexState {
            module: &resources.vertex_module,
            entry_point: Some(&resources.vertex_entry),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &resources.fragment_module,
            entry_point: Some(&resources.fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(depth_stencil),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Converts a bottom-left-origin GL viewport into wgpu's top-left origin,
/// clipped to the target. Returns `None` when nothing of it is visible.
fn flip_viewport(
    (x, y, width, height): (i32, i32, u32, u32),
    (target_width, target_height): (u32, u32),
) -> Option<[f32; 4]> {
    let left = (x as i64).clamp(0, target_width as i64);
    let right = (x as i64 + width as i64).clamp(0, target_width as i64);
    let bottom = (y as i64).clamp(0, target_height as i64);
    let top = (y as i64 + height as i64).clamp(0, target_height as i64);

    if right <= left || top <= bottom {
        return None;
    }

    Some([
        left as f32,
        (target_height as i64 - top) as f32,
        (right - left) as f32,
        (top - bottom) as f32,
    ])
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    depth_view: &wgpu::TextureView,
    clear: PendingClear,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Frame Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: clear.color.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: depth_view,
            depth_ops: Some(wgpu::Operations {
                load: clear.depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

impl GpuBackend for WgpuBackend {
    type Shader = WgpuShader;
    type Program = WgpuProgram;
    type Buffer = WgpuBuffer;
    type UniformLocation = WgpuUniform;

    fn create_shader(&mut self, stage: ShaderStage) -> Result<WgpuShader, ContextError> {
        let id = self.alloc_id();
        self.shaders.insert(id, ShaderObject::new(stage));
        Ok(WgpuShader(id))
    }

    fn shader_source(&mut self, shader: &WgpuShader, source: &str) -> Result<(), ContextError> {
        self.shaders
            .get_mut(&shader.0)
            .ok_or(ContextError::InvalidHandle { kind: "shader", id: shader.0 })?
            .set_source(source);
        Ok(())
    }

    fn compile_shader(&mut self, shader: &WgpuShader) -> Result<(), ContextError> {
        self.shaders
            .get_mut(&shader.0)
            .ok_or(ContextError::InvalidHandle { kind: "shader", id: shader.0 })?
            .compile();
        Ok(())
    }

    fn shader_compile_status(&self, shader: &WgpuShader) -> Result<bool, ContextError> {
        Ok(self.shader(shader.0)?.compile_status())
    }

    fn shader_info_log(&self, shader: &WgpuShader) -> Result<String, ContextError> {
        Ok(self.shader(shader.0)?.info_log())
    }

    fn delete_shader(&mut self, shader: WgpuShader) -> Result<(), ContextError> {
        self.shaders
            .remove(&shader.0)
            .map(|_| ())
            .ok_or(ContextError::InvalidHandle { kind: "shader", id: shader.0 })
    }

    fn create_program(&mut self) -> Result<WgpuProgram, ContextError> {
        let id = self.alloc_id();
        self.programs.insert(
            id,
            ProgramSlot {
                object: ProgramObject::default(),
                resources: None,
            },
        );
        Ok(WgpuProgram(id))
    }

    fn attach_shader(&mut self, program: &WgpuProgram, shader: &WgpuShader) -> Result<(), ContextError> {
        self.shader(shader.0)?;
        self.programs
            .get_mut(&program.0)
            .ok_or(ContextError::InvalidHandle { kind: "program", id: program.0 })?
            .object
            .attach(shader.0);
        Ok(())
    }

    fn link_program(&mut self, program: &WgpuProgram) -> Result<(), ContextError> {
        let slot = self
            .programs
            .get_mut(&program.0)
            .ok_or(ContextError::InvalidHandle { kind: "program", id: program.0 })?;
        let shaders = &self.shaders;
        let attached = slot.object.attached.clone();
        slot.object.link(attached.iter().filter_map(|id| shaders.get(id)));

        slot.resources = None;
        if let Some(linked) = slot.object.linked() {
            let resources = validated(&self.gpu.device, |device| {
                create_program_resources(device, linked)
            })?;
            log::debug!(
                "program {} linked with {} uniform group(s)",
                program.0,
                resources.bind_groups.len()
            );
            slot.resources = Some(resources);
        }
        Ok(())
    }

    fn program_link_status(&self, program: &WgpuProgram) -> Result<bool, ContextError> {
        Ok(self.program(program.0)?.object.link_status())
    }

    fn program_info_log(&self, program: &WgpuProgram) -> Result<String, ContextError> {
        Ok(self.program(program.0)?.object.info_log())
    }

    fn attrib_location(&self, program: &WgpuProgram, name: &str) -> Result<Option<u32>, ContextError> {
        let linked = self
            .program(program.0)?
            .object
            .linked()
            .ok_or(ContextError::ProgramNotLinked)?;
        Ok(linked.attribute(name))
    }

    fn uniform_location(
        &self,
        program: &WgpuProgram,
        name: &str,
    ) -> Result<Option<WgpuUniform>, ContextError> {
        let linked = self
            .program(program.0)?
            .object
            .linked()
            .ok_or(ContextError::ProgramNotLinked)?;
        Ok(linked.uniform(name).map(|u| WgpuUniform {
            program: program.0,
            name: u.name.clone(),
            group: u.group,
            binding: u.binding,
            size: u.size,
        }))
    }

    fn use_program(&mut self, program: &WgpuProgram) -> Result<(), ContextError> {
        if !self.program(program.0)?.object.link_status() {
            return Err(ContextError::ProgramNotLinked);
        }
        self.current_program = Some(program.0);
        Ok(())
    }

    fn uniform_matrix4(&mut self, location: &WgpuUniform, value: &[f32; 16]) -> Result<(), ContextError> {
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

        let bytes: &[u8] = bytemuck::cast_slice(value);
        if (location.size as usize) < bytes.len() {
            return Err(ContextError::Validation(format!(
                "uniform `{}` holds {} bytes, a 4x4 matrix needs {}",
                location.name,
                location.size,
                bytes.len()
            )));
        }

        let buffer = self
            .program(location.program)?
            .resources
            .as_ref()
            .and_then(|r| r.uniforms.get(&(location.group, location.binding)))
            .ok_or(ContextError::ProgramNotLinked)?;
        self.gpu.queue.write_buffer(buffer, 0, bytes);
        Ok(())
    }

    fn create_buffer(&mut self) -> Result<WgpuBuffer, ContextError> {
        let id = self.alloc_id();
        self.buffers.insert(id, None);
        Ok(WgpuBuffer(id))
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<&WgpuBuffer>) -> Result<(), ContextError> {
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
        Ok(())
    }

    fn buffer_data(&mut self, target: BufferTarget, data: &[u8], _usage: BufferUsage) -> Result<(), ContextError> {
        let id = self
            .bound_buffer(target)
            .ok_or(ContextError::NothingBound(target))?;
        let slot = self
            .buffers
            .get_mut(&id)
            .ok_or(ContextError::InvalidHandle { kind: "buffer", id })?;

        let label = match target {
            BufferTarget::Array => "Vertex Attribute Buffer",
            BufferTarget::ElementArray => "Element Buffer",
        };
        // GL buffers may be rebound to either target later
        let buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::INDEX
                    | wgpu::BufferUsages::COPY_DST,
            });

        *slot = Some(GpuBuffer {
            buffer,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn enable_vertex_attrib_array(&mut self, location: u32) -> Result<(), ContextError> {
        self.attributes.entry(location).or_default().enabled = true;
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
        Ok(())
    }

    fn clear_color(&mut self, [r, g, b, a]: [f32; 4]) -> Result<(), ContextError> {
        self.clear_color = wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        };
        Ok(())
    }

    fn clear_depth(&mut self, depth: f32) -> Result<(), ContextError> {
        self.clear_depth = depth.clamp(0.0, 1.0);
        Ok(())
    }

    fn depth_func(&mut self, func: DepthFunc) -> Result<(), ContextError> {
        self.depth_func = func;
        Ok(())
    }

    fn enable(&mut self, capability: Capability) -> Result<(), ContextError> {
        match capability {
            Capability::DepthTest => self.depth_test = true,
        }
        Ok(())
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), ContextError> {
        let frame = self.frame.as_mut().ok_or(ContextError::NoActiveFrame)?;
        if mask.color {
            frame.clear.color = Some(self.clear_color);
        }
        if mask.depth {
            frame.clear.depth = Some(self.clear_depth);
        }
        Ok(())
    }

    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<(), ContextError> {
        self.viewport = Some((x, y, width, height));
        Ok(())
    }

    fn draw_elements(
        &mut self,
        mode: Primitive,
        count: u32,
        index_type: IndexType,
        offset: u64,
    ) -> Result<(), ContextError> {
        let Primitive::Triangles = mode;
        if self.frame.is_none() {
            return Err(ContextError::NoActiveFrame);
        }

        let program_id = self.current_program.ok_or(ContextError::NoProgram)?;
        let linked = self
            .program(program_id)?
            .object
            .linked()
            .ok_or(ContextError::ProgramNotLinked)?;

        let element = self
            .bound_buffer(BufferTarget::ElementArray)
            .ok_or(ContextError::NoElementBuffer)?;
        let index_len = live_buffer(&self.buffers, element)?.len;
        let index_size = index_type.size() as u64;
        if offset % index_size != 0 {
            return Err(ContextError::Validation(format!(
                "index offset {offset} is not a multiple of {index_size}"
            )));
        }
        let needed = offset + count as u64 * index_size;
        if needed > index_len {
            return Err(ContextError::IndexOutOfRange {
                needed,
                available: index_len,
            });
        }

        let slots = self.vertex_slots(linked)?;
        if count == 0 {
            return Ok(());
        }

        let key = PipelineKey {
            attributes: slots
                .iter()
                .map(|s| (s.location, s.pointer.components, s.pointer.effective_stride()))
                .collect(),
            depth: self.depth_test.then_some(self.depth_func),
        };

        let format = self.gpu.format();
        let device = &self.gpu.device;
        let resources = self
            .programs
            .get_mut(&program_id)
            .and_then(|slot| slot.resources.as_mut())
            .ok_or(ContextError::ProgramNotLinked)?;
        if !resources.pipelines.contains_key(&key) {
            let pipeline = validated(device, |device| build_pipeline(device, resources, &key, format))?;
            log::debug!(
                "built pipeline for program {program_id}: {:?}, depth {:?}",
                key.attributes,
                key.depth
            );
            resources.pipelines.insert(key.clone(), pipeline);
        }
        let resources = &*resources;
        let pipeline = resources
            .pipelines
            .get(&key)
            .ok_or_else(|| ContextError::Validation("pipeline cache miss".into()))?;

        let ActiveFrame {
            output,
            view,
            encoder,
            clear,
        } = self.frame.as_mut().ok_or(ContextError::NoActiveFrame)?;

        let target = (output.texture.width(), output.texture.height());
        let viewport = self.viewport.unwrap_or((0, 0, target.0, target.1));
        let Some([vx, vy, vw, vh]) = flip_viewport(viewport, target) else {
            return Ok(());
        };

        let mut pass = begin_pass(encoder, view, self.gpu.depth_view(), std::mem::take(clear));
        pass.set_viewport(vx, vy, vw, vh, 0.0, 1.0);
        pass.set_pipeline(pipeline);
        for (group, bind_group) in resources.bind_groups.iter().enumerate() {
            pass.set_bind_group(group as u32, bind_group, &[]);
        }
        for (index, slot) in slots.iter().enumerate() {
            let source = live_buffer(&self.buffers, slot.buffer)?;
            pass.set_vertex_buffer(index as u32, source.buffer.slice(slot.pointer.offset..source.len));
        }

        let indices = live_buffer(&self.buffers, element)?;
        let format = match index_type {
            IndexType::U16 => wgpu::IndexFormat::Uint16,
        };
        pass.set_index_buffer(indices.buffer.slice(..indices.len), format);

        let first = (offset / index_size) as u32;
        pass.draw_indexed(first..first + count, 0, 0..1);
        Ok(())
    }

    fn drawable_size(&self) -> (u32, u32) {
        (self.gpu.width(), self.gpu.height())
    }

    fn begin_frame(&mut self) -> Result<(), ContextError> {
        if self.frame.is_some() {
            return Err(ContextError::Validation(
                "begin_frame called while a frame is in progress".into(),
            ));
        }

        let output = match self.gpu.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost or outdated, reconfiguring");
                self.gpu.reconfigure();
                self.gpu
                    .surface
                    .get_current_texture()
                    .map_err(surface_error)?
            }
            Err(e) => return Err(surface_error(e)),
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        self.frame = Some(ActiveFrame {
            output,
            view,
            encoder,
            clear: PendingClear::default(),
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), ContextError> {
        let ActiveFrame {
            output,
            view,
            mut encoder,
            clear,
        } = self.frame.take().ok_or(ContextError::NoActiveFrame)?;

        // A clear with no draw after it still has to reach the target
        if !clear.is_empty() {
            drop(begin_pass(&mut encoder, &view, self.gpu.depth_view(), clear));
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn discard_frame(&mut self) {
        if self.frame.take().is_some() {
            log::warn!("discarding an unfinished frame");
        }
    }
}

fn surface_error(err: wgpu::SurfaceError) -> ContextError {
    match err {
        wgpu::SurfaceError::Timeout => {
            log::warn!("surface acquire timed out, skipping frame");
            ContextError::SurfaceTimeout
        }
        other => ContextError::Surface(other.to_string()),
    }
}
