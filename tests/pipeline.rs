use spincube::{
    AttribPointer, BindingKind, BufferId, BufferTarget, BufferUsage, Capability, ClearMask,
    Command, ContextError, DepthFunc, FrameError, GpuBackend, HeadlessBackend, IndexType, Mat4,
    Primitive, ProgramId, STARTUP_CLEAR_COLOR, SceneConfig, SetupError, ShaderId, ShaderSources,
    ShaderStage, UniformLoc, FRAGMENT_SHADER, VERTEX_SHADER, initialize, initialize_with,
};

const NO_MODEL_VIEW_VERTEX: &str = r#"
@group(0) @binding(0) var<uniform> uProjectionMatrix: mat4x4<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) vVertexColor: vec4<f32>,
};

@vertex
fn vs_main(
    @location(0) aVertexPosition: vec3<f32>,
    @location(1) aVertexColor: vec4<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    out.position = uProjectionMatrix * vec4<f32>(aVertexPosition, 1.0);
    out.vVertexColor = aVertexColor;
    return out;
}
"#;

const LOCATION_3_FRAGMENT: &str = r#"
@fragment
fn fs_main(@location(3) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color;
}
"#;

fn approx_eq(a: &[f32; 16], b: &[f32; 16]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
}

#[test]
fn initialize_resolves_all_bindings() {
    let mut ctx = HeadlessBackend::new(800, 600);
    let cube = initialize(&mut ctx).unwrap();

    let bindings = cube.bindings();
    assert_eq!(bindings.position, 0);
    assert_eq!(bindings.color, 1);
    assert_eq!(bindings.projection.name(), "uProjectionMatrix");
    assert_eq!(bindings.model_view.name(), "uModelViewMatrix");

    assert_eq!(cube.buffers().index_count, 36);
    assert_eq!(cube.rotation_angle(), 0.0);
    assert_eq!(ctx.live_buffer_count(), 3);
}

#[test]
fn broken_vertex_shader_fails_setup() {
    let mut ctx = HeadlessBackend::default();
    let sources = ShaderSources {
        vertex: "this is not a shader",
        fragment: FRAGMENT_SHADER,
    };

    let err = initialize_with(&mut ctx, &sources, SceneConfig::default())
        .err()
        .unwrap();

    match err {
        SetupError::ShaderCompilation { stage, log } => {
            assert_eq!(stage, ShaderStage::Vertex);
            assert!(!log.is_empty());
        }
        other => panic!("expected a compile error, got {other:?}"),
    }

    // The failed shader is deleted and setup stops before any program exists
    assert_eq!(ctx.live_shader_count(), 0);
    assert!(
        !ctx.commands()
            .iter()
            .any(|c| matches!(c, Command::CreateProgram { .. }))
    );
}

#[test]
fn mismatched_stages_fail_to_link() {
    let mut ctx = HeadlessBackend::default();
    let sources = ShaderSources {
        vertex: VERTEX_SHADER,
        fragment: LOCATION_3_FRAGMENT,
    };

    let err = initialize_with(&mut ctx, &sources, SceneConfig::default())
        .err()
        .unwrap();
    match err {
        SetupError::ProgramLink { log } => assert!(log.contains("location 3")),
        other => panic!("expected a link error, got {other:?}"),
    }
}

#[test]
fn missing_uniform_is_fatal() {
    let mut ctx = HeadlessBackend::default();
    let sources = ShaderSources {
        vertex: NO_MODEL_VIEW_VERTEX,
        fragment: FRAGMENT_SHADER,
    };

    let err = initialize_with(&mut ctx, &sources, SceneConfig::default())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SetupError::BindingNotFound {
            kind: BindingKind::Uniform,
            name: "uModelViewMatrix"
        }
    ));
    assert_eq!(ctx.live_buffer_count(), 0);
}

#[test]
fn setup_deletes_shaders_then_uploads_and_unbinds() {
    let mut ctx = HeadlessBackend::default();
    let cube = initialize(&mut ctx).unwrap();
    let commands = ctx.commands();

    let linked = commands
        .iter()
        .position(|c| matches!(c, Command::LinkProgram { success: true, .. }))
        .unwrap();
    let last_delete = commands
        .iter()
        .rposition(|c| matches!(c, Command::DeleteShader { .. }))
        .unwrap();
    let first_buffer = commands
        .iter()
        .position(|c| matches!(c, Command::CreateBuffer { .. }))
        .unwrap();

    assert!(linked < last_delete);
    assert!(last_delete < first_buffer);
    assert_eq!(ctx.live_shader_count(), 0);

    assert_eq!(ctx.bound_buffer(BufferTarget::Array), None);
    assert_eq!(ctx.bound_buffer(BufferTarget::ElementArray), None);

    let buffers = cube.buffers();
    for (id, len) in [
        (buffers.vertex.id(), 24 * 3 * 4),
        (buffers.color.id(), 24 * 4 * 4),
        (buffers.index.id(), 36 * 2),
    ] {
        assert_eq!(ctx.buffer_contents(id).map(<[u8]>::len), Some(len));
        assert_eq!(ctx.buffer_usage(id), Some(BufferUsage::StaticDraw));
    }
}

#[test]
fn ticks_advance_the_rotation() {
    let mut ctx = HeadlessBackend::new(800, 600);
    let mut cube = initialize(&mut ctx).unwrap();

    cube.tick(&mut ctx, 0.0).unwrap();
    let first = ctx.last_uniform("uModelViewMatrix").unwrap();
    assert_eq!(cube.rotation_angle(), 0.0);
    assert!(approx_eq(
        &first,
        &Mat4::from_translation(spincube::Vec3::new(0.0, 0.0, -3.0)).to_cols_array()
    ));

    cube.tick(&mut ctx, 16.0).unwrap();
    let second = ctx.last_uniform("uModelViewMatrix").unwrap();
    assert!((cube.rotation_angle() - 0.016).abs() < 1e-6);
    assert_ne!(first, second);

    // Translation column survives the rotation
    assert_eq!(&second[12..], &[0.0, 0.0, -3.0, 1.0]);
    // Two ticks on top of the startup clear
    assert_eq!(ctx.draw_count(), 2);
    assert_eq!(ctx.frame_count(), 3);
}

#[test]
fn zero_height_skips_the_frame() {
    let mut ctx = HeadlessBackend::new(800, 0);
    let mut cube = initialize(&mut ctx).unwrap();

    let err = cube.tick(&mut ctx, 16.0).unwrap_err();
    assert!(matches!(
        err,
        FrameError::EmptyDrawable {
            width: 800,
            height: 0
        }
    ));
    assert_eq!(ctx.draw_count(), 0);
    assert!(
        !ctx.commands()
            .iter()
            .any(|c| matches!(c, Command::DrawElements { .. }))
    );
}

#[test]
fn frame_issues_calls_in_order() {
    let mut ctx = HeadlessBackend::new(800, 600);
    let mut cube = initialize(&mut ctx).unwrap();
    ctx.take_commands();

    cube.tick(&mut ctx, 16.0).unwrap();

    let program = cube.program().id();
    let buffers = cube.buffers();
    let expected = vec![
        Command::BeginFrame,
        Command::UseProgram { id: program },
        Command::UniformMatrix4 {
            name: "uProjectionMatrix".into(),
            value: cube.projection().to_array(),
        },
        Command::UniformMatrix4 {
            name: "uModelViewMatrix".into(),
            value: cube.model_view().to_array(),
        },
        Command::BindBuffer {
            target: BufferTarget::Array,
            id: Some(buffers.vertex.id()),
        },
        Command::EnableVertexAttribArray { location: 0 },
        Command::VertexAttribPointer {
            location: 0,
            buffer: buffers.vertex.id(),
            pointer: AttribPointer::packed(3),
        },
        Command::BindBuffer {
            target: BufferTarget::Array,
            id: Some(buffers.color.id()),
        },
        Command::EnableVertexAttribArray { location: 1 },
        Command::VertexAttribPointer {
            location: 1,
            buffer: buffers.color.id(),
            pointer: AttribPointer::packed(4),
        },
        Command::BindBuffer {
            target: BufferTarget::ElementArray,
            id: Some(buffers.index.id()),
        },
        Command::ClearColor([0.0, 0.0, 1.0, 1.0]),
        Command::ClearDepth(1.0),
        Command::DepthFunc(DepthFunc::LessEqual),
        Command::Enable(Capability::DepthTest),
        Command::Clear(ClearMask::ALL),
        Command::Viewport {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        },
        Command::DrawElements {
            mode: Primitive::Triangles,
            count: 36,
            index_type: IndexType::U16,
            offset: 0,
        },
        Command::EndFrame,
    ];

    assert_eq!(ctx.commands(), expected.as_slice());
    assert!(ctx.depth_test_enabled());
}

#[test]
fn projection_follows_the_drawable() {
    let mut ctx = HeadlessBackend::new(800, 600);
    let mut cube = initialize(&mut ctx).unwrap();

    cube.tick(&mut ctx, 16.0).unwrap();
    let expected = Mat4::perspective_rh_gl(45f32.to_radians(), 800.0 / 600.0, 0.1, 100.0);
    assert!(approx_eq(
        &ctx.last_uniform("uProjectionMatrix").unwrap(),
        &expected.to_cols_array()
    ));

    ctx.set_drawable_size(1024, 256);
    cube.tick(&mut ctx, 32.0).unwrap();
    let expected = Mat4::perspective_rh_gl(45f32.to_radians(), 4.0, 0.1, 100.0);
    assert!(approx_eq(
        &ctx.last_uniform("uProjectionMatrix").unwrap(),
        &expected.to_cols_array()
    ));
    assert!(ctx.commands().contains(&Command::Viewport {
        x: 0,
        y: 0,
        width: 1024,
        height: 256
    }));
}

#[test]
fn scene_config_changes_speed_and_background() {
    let mut ctx = HeadlessBackend::default();
    let scene = SceneConfig::new()
        .velocity(0.002)
        .clear_color([0.1, 0.2, 0.3, 1.0]);
    let mut cube = initialize_with(&mut ctx, &ShaderSources::default(), scene).unwrap();

    cube.tick(&mut ctx, 100.0).unwrap();
    assert!((cube.rotation_angle() - 0.2).abs() < 1e-6);
    assert!(ctx.commands().contains(&Command::ClearColor([0.1, 0.2, 0.3, 1.0])));
}

/// Delegates to a [`HeadlessBackend`] but fails chosen calls.
#[derive(Default)]
struct FailingBackend {
    inner: HeadlessBackend,
    fail_buffer_creation: bool,
    failing_draws: u32,
}

impl GpuBackend for FailingBackend {
    type Shader = ShaderId;
    type Program = ProgramId;
    type Buffer = BufferId;
    type UniformLocation = UniformLoc;

    fn create_shader(&mut self, stage: ShaderStage) -> Result<ShaderId, ContextError> {
        self.inner.create_shader(stage)
    }
    fn shader_source(&mut self, shader: &ShaderId, source: &str) -> Result<(), ContextError> {
        self.inner.shader_source(shader, source)
    }
    fn compile_shader(&mut self, shader: &ShaderId) -> Result<(), ContextError> {
        self.inner.compile_shader(shader)
    }
    fn shader_compile_status(&self, shader: &ShaderId) -> Result<bool, ContextError> {
        self.inner.shader_compile_status(shader)
    }
    fn shader_info_log(&self, shader: &ShaderId) -> Result<String, ContextError> {
        self.inner.shader_info_log(shader)
    }
    fn delete_shader(&mut self, shader: ShaderId) -> Result<(), ContextError> {
        self.inner.delete_shader(shader)
    }
    fn create_program(&mut self) -> Result<ProgramId, ContextError> {
        self.inner.create_program()
    }
    fn attach_shader(&mut self, program: &ProgramId, shader: &ShaderId) -> Result<(), ContextError> {
        self.inner.attach_shader(program, shader)
    }
    fn link_program(&mut self, program: &ProgramId) -> Result<(), ContextError> {
        self.inner.link_program(program)
    }
    fn program_link_status(&self, program: &ProgramId) -> Result<bool, ContextError> {
        self.inner.program_link_status(program)
    }
    fn program_info_log(&self, program: &ProgramId) -> Result<String, ContextError> {
        self.inner.program_info_log(program)
    }
    fn attrib_location(&self, program: &ProgramId, name: &str) -> Result<Option<u32>, ContextError> {
        self.inner.attrib_location(program, name)
    }
    fn uniform_location(
        &self,
        program: &ProgramId,
        name: &str,
    ) -> Result<Option<UniformLoc>, ContextError> {
        self.inner.uniform_location(program, name)
    }
    fn use_program(&mut self, program: &ProgramId) -> Result<(), ContextError> {
        self.inner.use_program(program)
    }
    fn uniform_matrix4(&mut self, location: &UniformLoc, value: &[f32; 16]) -> Result<(), ContextError> {
        self.inner.uniform_matrix4(location, value)
    }
    fn create_buffer(&mut self) -> Result<BufferId, ContextError> {
        if self.fail_buffer_creation {
            return Err(ContextError::Validation("out of memory".into()));
        }
        self.inner.create_buffer()
    }
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<&BufferId>) -> Result<(), ContextError> {
        self.inner.bind_buffer(target, buffer)
    }
    fn buffer_data(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<(), ContextError> {
        self.inner.buffer_data(target, data, usage)
    }
    fn enable_vertex_attrib_array(&mut self, location: u32) -> Result<(), ContextError> {
        self.inner.enable_vertex_attrib_array(location)
    }
    fn vertex_attrib_pointer(&mut self, location: u32, pointer: AttribPointer) -> Result<(), ContextError> {
        self.inner.vertex_attrib_pointer(location, pointer)
    }
    fn clear_color(&mut self, rgba: [f32; 4]) -> Result<(), ContextError> {
        self.inner.clear_color(rgba)
    }
    fn clear_depth(&mut self, depth: f32) -> Result<(), ContextError> {
        self.inner.clear_depth(depth)
    }
    fn depth_func(&mut self, func: DepthFunc) -> Result<(), ContextError> {
        self.inner.depth_func(func)
    }
    fn enable(&mut self, capability: Capability) -> Result<(), ContextError> {
        self.inner.enable(capability)
    }
    fn clear(&mut self, mask: ClearMask) -> Result<(), ContextError> {
        self.inner.clear(mask)
    }
    fn viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<(), ContextError> {
        self.inner.viewport(x, y, width, height)
    }
    fn draw_elements(
        &mut self,
        mode: Primitive,
        count: u32,
        index_type: IndexType,
        offset: u64,
    ) -> Result<(), ContextError> {
        if self.failing_draws > 0 {
            self.failing_draws -= 1;
            return Err(ContextError::Validation("device lost".into()));
        }
        self.inner.draw_elements(mode, count, index_type, offset)
    }
    fn drawable_size(&self) -> (u32, u32) {
        self.inner.drawable_size()
    }
    fn begin_frame(&mut self) -> Result<(), ContextError> {
        self.inner.begin_frame()
    }
    fn end_frame(&mut self) -> Result<(), ContextError> {
        self.inner.end_frame()
    }
    fn discard_frame(&mut self) {
        self.inner.discard_frame()
    }
}

#[test]
fn setup_clears_to_red_once() {
    let mut ctx = HeadlessBackend::default();
    initialize(&mut ctx).unwrap();

    let commands = ctx.commands();
    assert_eq!(
        &commands[commands.len() - 4..],
        &[
            Command::BeginFrame,
            Command::ClearColor(STARTUP_CLEAR_COLOR),
            Command::Clear(ClearMask::COLOR),
            Command::EndFrame,
        ]
    );
    assert_eq!(STARTUP_CLEAR_COLOR, [1.0, 0.0, 0.0, 1.0]);
    assert_eq!(ctx.frame_count(), 1);
    assert_eq!(ctx.draw_count(), 0);
}

#[test]
fn buffer_failure_aborts_setup() {
    let mut ctx = FailingBackend {
        fail_buffer_creation: true,
        ..Default::default()
    };

    let err = initialize(&mut ctx).err().unwrap();
    match err {
        SetupError::Context(ContextError::Validation(msg)) => assert_eq!(msg, "out of memory"),
        other => panic!("expected a context error, got {other:?}"),
    }
    assert_eq!(ctx.inner.live_buffer_count(), 0);
}

#[test]
fn draw_failure_is_fatal_and_discards_the_frame() {
    let mut ctx = FailingBackend::default();
    let mut cube = initialize(&mut ctx).unwrap();
    ctx.inner.take_commands();
    ctx.failing_draws = 1;

    let err = cube.tick(&mut ctx, 16.0).unwrap_err();
    assert!(matches!(err, FrameError::Context(ContextError::Validation(_))));
    assert!(!err.is_recoverable());
    assert_eq!(ctx.inner.commands().last(), Some(&Command::DiscardFrame));
    assert!(!ctx.inner.commands().contains(&Command::EndFrame));

    // The backend is usable again on the next tick
    cube.tick(&mut ctx, 32.0).unwrap();
    assert_eq!(ctx.inner.draw_count(), 1);
    assert_eq!(ctx.inner.commands().last(), Some(&Command::EndFrame));
}
