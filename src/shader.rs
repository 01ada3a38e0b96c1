//! Shader sources, compilation and program linking.
//!
//! Shader objects hold WGSL text. "Compiling" parses and validates it with
//! [`naga`] and reflects the stage interface: `@location` inputs and outputs
//! and `var<uniform>` globals, all by name. "Linking" checks that every
//! fragment input is fed by a vertex output of the same type and merges the
//! uniform tables. Failures carry a human-readable log, just like a GL info log.
//!
//! Both backends share [`ShaderObject`] and [`ProgramObject`], so a shader that
//! fails in the headless backend fails the same way on the GPU.

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, Handle, Module, Type, TypeInner};

use crate::backend::ShaderStage;

/// Built-in transform-and-pass-through vertex stage.
pub const VERTEX_SHADER: &str = include_str!("shaders/cube.vert.wgsl");

/// Built-in flat-color fragment stage.
pub const FRAGMENT_SHADER: &str = include_str!("shaders/cube.frag.wgsl");

/// The pair of sources a cube program is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderSources<'a> {
    pub vertex: &'a str,
    pub fragment: &'a str,
}

impl Default for ShaderSources<'static> {
    fn default() -> Self {
        Self {
            vertex: VERTEX_SHADER,
            fragment: FRAGMENT_SHADER,
        }
    }
}

/// A `@location` slot in a stage interface.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceVar {
    pub name: Option<String>,
    pub location: u32,
    pub ty: TypeInner,
}

/// A `var<uniform>` global.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformVar {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    /// Size in bytes of the uniform's type.
    pub size: u32,
}

/// A validated single stage and its reflected interface.
#[derive(Clone, Debug)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub inputs: Vec<InterfaceVar>,
    pub outputs: Vec<InterfaceVar>,
    pub uniforms: Vec<UniformVar>,
    /// The WGSL text the module was parsed from.
    pub source: String,
}

/// Parses, validates and reflects one WGSL stage.
///
/// On failure returns the diagnostic log.
pub fn compile(source: &str, stage: ShaderStage) -> Result<CompiledShader, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| error_chain(&e))?;

    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == wanted)
        .ok_or_else(|| format!("error: no @{stage} entry point in module"))?;

    let mut inputs = Vec::new();
    for arg in &entry.function.arguments {
        collect_interface(
            &module,
            arg.name.as_deref(),
            arg.ty,
            arg.binding.as_ref(),
            &mut inputs,
        );
    }

    let mut outputs = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_interface(&module, None, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let uniforms = module
        .global_variables
        .iter()
        .filter(|(_, var)| var.space == AddressSpace::Uniform)
        .filter_map(|(_, var)| {
            let name = var.name.clone()?;
            let binding = var.binding.as_ref()?;
            Some(UniformVar {
                name,
                group: binding.group,
                binding: binding.binding,
                size: module.types[var.ty].inner.size(module.to_ctx()),
            })
        })
        .collect();

    Ok(CompiledShader {
        stage,
        entry_point: entry.name.clone(),
        inputs,
        outputs,
        uniforms,
        source: source.to_owned(),
    })
}

fn collect_interface(
    module: &Module,
    name: Option<&str>,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<InterfaceVar>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(InterfaceVar {
            name: name.map(str::to_owned),
            location: *location,
            ty: module.types[ty].inner.clone(),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_interface(
                        module,
                        member.name.as_deref(),
                        member.ty,
                        member.binding.as_ref(),
                        out,
                    );
                }
            }
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut log = format!("error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        log.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    log
}

/// A vertex + fragment pair whose interfaces agree.
#[derive(Clone, Debug)]
pub struct LinkedProgram {
    pub vertex: CompiledShader,
    pub fragment: CompiledShader,
    /// Vertex inputs by name.
    pub attributes: BTreeMap<String, u32>,
    /// Uniforms from both stages by name.
    pub uniforms: BTreeMap<String, UniformVar>,
}

impl LinkedProgram {
    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes.get(name).copied()
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformVar> {
        self.uniforms.get(name)
    }
}

/// Checks stage interfaces and merges uniforms. On failure returns the link log.
pub fn link(vertex: &CompiledShader, fragment: &CompiledShader) -> Result<LinkedProgram, String> {
    if vertex.stage != ShaderStage::Vertex || fragment.stage != ShaderStage::Fragment {
        return Err("error: a program needs exactly one vertex and one fragment shader".into());
    }

    let mut problems = Vec::new();

    for input in &fragment.inputs {
        let label = input.name.as_deref().unwrap_or("<unnamed>");
        match vertex.outputs.iter().find(|o| o.location == input.location) {
            None => problems.push(format!(
                "error: fragment input `{label}` at location {} is not written by the vertex stage",
                input.location
            )),
            Some(output) if output.ty != input.ty => problems.push(format!(
                "error: fragment input `{label}` at location {} has type {:?} but the vertex stage writes {:?}",
                input.location, input.ty, output.ty
            )),
            Some(_) => {}
        }
    }

    let mut uniforms: BTreeMap<String, UniformVar> = BTreeMap::new();
    for uniform in vertex.uniforms.iter().chain(&fragment.uniforms) {
        if let Some(existing) = uniforms.get(&uniform.name) {
            if existing != uniform {
                problems.push(format!(
                    "error: uniform `{}` is declared differently in the two stages",
                    uniform.name
                ));
            }
            continue;
        }
        if let Some(clash) = uniforms
            .values()
            .find(|u| u.group == uniform.group && u.binding == uniform.binding)
        {
            problems.push(format!(
                "error: uniforms `{}` and `{}` share @group({}) @binding({})",
                clash.name, uniform.name, uniform.group, uniform.binding
            ));
            continue;
        }
        uniforms.insert(uniform.name.clone(), uniform.clone());
    }

    if !problems.is_empty() {
        return Err(problems.join("\n"));
    }

    let attributes = vertex
        .inputs
        .iter()
        .filter_map(|i| Some((i.name.clone()?, i.location)))
        .collect();

    Ok(LinkedProgram {
        vertex: vertex.clone(),
        fragment: fragment.clone(),
        attributes,
        uniforms,
    })
}

/// GL-style shader object state: source text plus the outcome of the last compile.
#[derive(Debug)]
pub struct ShaderObject {
    pub stage: ShaderStage,
    source: String,
    compiled: Option<Result<CompiledShader, String>>,
}

impl ShaderObject {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            source: String::new(),
            compiled: None,
        }
    }

    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_owned();
    }

    pub fn compile(&mut self) {
        self.compiled = Some(compile(&self.source, self.stage));
    }

    pub fn compile_status(&self) -> bool {
        matches!(self.compiled, Some(Ok(_)))
    }

    pub fn info_log(&self) -> String {
        match &self.compiled {
            Some(Err(log)) => log.clone(),
            _ => String::new(),
        }
    }

    pub fn compiled(&self) -> Option<&CompiledShader> {
        self.compiled.as_ref()?.as_ref().ok()
    }
}

/// GL-style program object state.
#[derive(Debug, Default)]
pub struct ProgramObject {
    pub attached: Vec<u32>,
    linked: Option<Result<LinkedProgram, String>>,
}

impl ProgramObject {
    pub fn attach(&mut self, shader_id: u32) {
        if !self.attached.contains(&shader_id) {
            self.attached.push(shader_id);
        }
    }

    /// Links the given attached shaders. The program keeps its own copy of the
    /// compiled stages, so the shader objects may be deleted afterwards.
    pub fn link<'a>(&mut self, shaders: impl IntoIterator<Item = &'a ShaderObject>) {
        self.linked = Some(Self::try_link(shaders));
    }

    fn try_link<'a>(
        shaders: impl IntoIterator<Item = &'a ShaderObject>,
    ) -> Result<LinkedProgram, String> {
        let mut vertex = None;
        let mut fragment = None;

        for shader in shaders {
            let compiled = shader
                .compiled()
                .ok_or_else(|| format!("error: attached {} shader is not compiled", shader.stage))?;
            let slot = match shader.stage {
                ShaderStage::Vertex => &mut vertex,
                ShaderStage::Fragment => &mut fragment,
            };
            if slot.replace(compiled).is_some() {
                return Err(format!("error: more than one {} shader attached", shader.stage));
            }
        }

        match (vertex, fragment) {
            (Some(v), Some(f)) => link(v, f),
            (None, _) => Err("error: no vertex shader attached".into()),
            (_, None) => Err("error: no fragment shader attached".into()),
        }
    }

    pub fn link_status(&self) -> bool {
        matches!(self.linked, Some(Ok(_)))
    }

    pub fn info_log(&self) -> String {
        match &self.linked {
            Some(Err(log)) => log.clone(),
            _ => String::new(),
        }
    }

    pub fn linked(&self) -> Option<&LinkedProgram> {
        self.linked.as_ref()?.as_ref().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_vertex_stage_reflects_names() {
        let vs = compile(VERTEX_SHADER, ShaderStage::Vertex).unwrap();
        assert_eq!(vs.entry_point, "vs_main");

        let names: Vec<_> = vs.inputs.iter().map(|i| (i.name.as_deref(), i.location)).collect();
        assert_eq!(
            names,
            vec![(Some("aVertexPosition"), 0), (Some("aVertexColor"), 1)]
        );

        let uniforms: Vec<_> = vs.uniforms.iter().map(|u| (u.name.as_str(), u.binding, u.size)).collect();
        assert!(uniforms.contains(&("uProjectionMatrix", 0, 64)));
        assert!(uniforms.contains(&("uModelViewMatrix", 1, 64)));

        // Only the color is a location output; the position is a builtin
        assert_eq!(vs.outputs.len(), 1);
        assert_eq!(vs.outputs[0].location, 0);
    }

    #[test]
    fn builtin_program_links() {
        let vs = compile(VERTEX_SHADER, ShaderStage::Vertex).unwrap();
        let fs = compile(FRAGMENT_SHADER, ShaderStage::Fragment).unwrap();
        let program = link(&vs, &fs).unwrap();

        assert_eq!(program.attribute("aVertexPosition"), Some(0));
        assert_eq!(program.attribute("aVertexColor"), Some(1));
        assert_eq!(program.attribute("aVertexNormal"), None);
        assert_eq!(program.uniform("uModelViewMatrix").map(|u| u.binding), Some(1));
        assert_eq!(
            program.uniform("uProjectionMatrix").map(|u| (u.group, u.binding)),
            Some((0, 0))
        );
    }

    #[test]
    fn syntax_error_produces_log() {
        let log = compile("fn vs_main( -> {", ShaderStage::Vertex).unwrap_err();
        assert!(!log.is_empty());
    }

    #[test]
    fn wrong_stage_is_a_compile_error() {
        let log = compile(FRAGMENT_SHADER, ShaderStage::Vertex).unwrap_err();
        assert!(log.contains("vertex"));
    }

    #[test]
    fn mismatched_interface_fails_to_link() {
        let vs = compile(VERTEX_SHADER, ShaderStage::Vertex).unwrap();
        let fs = compile(
            "@fragment fn fs_main(@location(3) c: vec4<f32>) -> @location(0) vec4<f32> { return c; }",
            ShaderStage::Fragment,
        )
        .unwrap();

        let log = link(&vs, &fs).unwrap_err();
        assert!(log.contains("location 3"));
    }

    #[test]
    fn shader_object_tracks_status_and_log() {
        let mut shader = ShaderObject::new(ShaderStage::Fragment);
        assert!(!shader.compile_status());

        shader.set_source("@fragment fn fs_main() -> @location(0) vec4<f32> { return 1.0; }");
        shader.compile();
        assert!(!shader.compile_status());
        assert!(!shader.info_log().is_empty());

        shader.set_source(FRAGMENT_SHADER);
        shader.compile();
        assert!(shader.compile_status());
        assert!(shader.info_log().is_empty());
    }

    #[test]
    fn program_object_needs_both_stages() {
        let mut vs = ShaderObject::new(ShaderStage::Vertex);
        vs.set_source(VERTEX_SHADER);
        vs.compile();

        let mut program = ProgramObject::default();
        program.link([&vs]);
        assert!(!program.link_status());
        assert!(program.info_log().contains("fragment"));
    }
}
