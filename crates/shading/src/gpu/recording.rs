use std::collections::{BTreeMap, HashMap};

use image::RgbaImage;
use serde::Serialize;
use tracing::debug;

use super::{
    BufferId, BufferLayout, Capability, GpuBackend, ProgramId, TextureId, UniformKind,
    UniformLocation, UniformValue, NEUTRAL_EMISSION,
};
use crate::error::{Result, ShadingError};
use crate::types::{Topology, Vertex};

/// Texture units a [`RecordingBackend`] exposes unless configured otherwise.
pub const DEFAULT_TEXTURE_UNITS: u32 = 16;

/// One recorded pipeline call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Clear { rgba: [f32; 4] },
    CreateTexture { texture: TextureId, width: u32, height: u32 },
    UpdateTexture { texture: TextureId, width: u32, height: u32 },
    DeleteTexture { texture: TextureId },
    BindTexture { unit: u32, texture: Option<TextureId> },
    CompileProgram { program: ProgramId, uniforms: usize },
    DeleteProgram { program: ProgramId },
    UseProgram { program: Option<ProgramId> },
    SetUniform { program: ProgramId, name: String, value: UniformValue },
    CreateBuffer { buffer: BufferId, bytes: usize },
    DeleteBuffer { buffer: BufferId },
    BindVertexBuffer { location: u32, buffer: Option<BufferId>, layout: BufferLayout },
    Enable { capability: Capability },
    Disable { capability: Capability },
    SetColor { rgba: [f32; 4] },
    SetEmission { rgba: [f32; 4] },
    DrawVertices { topology: Topology, count: usize },
    DrawArrays { topology: Topology, count: usize },
    SetFixedCamera { projection: [f32; 16], view: [f32; 16] },
    PushTransform { matrix: [f32; 16] },
    PopTransform,
}

struct UniformSlot {
    name: String,
    kind: UniformKind,
}

struct ProgramRecord {
    slots: Vec<UniformSlot>,
    lookup: HashMap<String, u32>,
    values: HashMap<u32, UniformValue>,
}

impl ProgramRecord {
    fn parse(vertex: &str, fragment: &str) -> Result<Self> {
        let mut record = ProgramRecord {
            slots: Vec::new(),
            lookup: HashMap::new(),
            values: HashMap::new(),
        };
        let mut defines = HashMap::new();
        for line in vertex.lines().chain(fragment.lines()) {
            let line = line.split("//").next().unwrap_or_default().trim();
            if let Some(define) = line.strip_prefix("#define") {
                let mut parts = define.split_whitespace();
                if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                    defines.insert(name.to_string(), value.to_string());
                }
                continue;
            }
            record.declare(line, &defines)?;
        }
        Ok(record)
    }

    /// Registers every name declared by a `uniform TYPE a[, b[N]];` line.
    /// Array lengths may be integer literals or `#define`d constants.
    fn declare(&mut self, line: &str, defines: &HashMap<String, String>) -> Result<()> {
        let line = match line.strip_prefix("layout") {
            Some(rest) => match rest.find(')') {
                Some(end) => rest[end + 1..].trim_start(),
                None => return Ok(()),
            },
            None => line,
        };
        let Some(rest) = line.strip_prefix("uniform ") else {
            return Ok(());
        };
        let rest = rest.trim_end_matches(';');
        let mut tokens = rest.split_whitespace().peekable();
        while matches!(tokens.peek(), Some(&("highp" | "mediump" | "lowp"))) {
            tokens.next();
        }
        let Some(kind) = tokens.next().and_then(UniformKind::from_glsl) else {
            return Ok(());
        };
        let names: String = tokens.collect::<Vec<_>>().join("");
        for declarator in names.split(',').filter(|d| !d.is_empty()) {
            match declarator.split_once('[') {
                Some((name, len)) => {
                    let len = len.trim_end_matches(']');
                    let resolved = defines.get(len).map(String::as_str).unwrap_or(len);
                    let len: u32 = resolved.parse().map_err(|_| {
                        ShadingError::Compile(format!(
                            "array length `{len}` of uniform `{name}` is not an integer constant"
                        ))
                    })?;
                    for element in 0..len {
                        let index = self.push(format!("{name}[{element}]"), kind);
                        if element == 0 {
                            self.lookup.insert(name.to_string(), index);
                        }
                    }
                }
                None => {
                    self.push(declarator.to_string(), kind);
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, name: String, kind: UniformKind) -> u32 {
        if let Some(existing) = self.lookup.get(&name) {
            return *existing;
        }
        let index = self.slots.len() as u32;
        self.lookup.insert(name.clone(), index);
        self.slots.push(UniformSlot { name, kind });
        index
    }
}

/// Headless [`GpuBackend`] that validates and records every call.
///
/// Besides the command log it tracks the bound program, texture units,
/// vertex buffer bindings, enabled capabilities, emission and the last
/// value written to every uniform, so callers can read state back.
pub struct RecordingBackend {
    max_units: u32,
    next_handle: u32,
    textures: BTreeMap<TextureId, (u32, u32)>,
    units: BTreeMap<u32, TextureId>,
    programs: BTreeMap<ProgramId, ProgramRecord>,
    bound: Option<ProgramId>,
    buffers: BTreeMap<BufferId, usize>,
    attributes: BTreeMap<u32, BufferId>,
    enabled: Vec<Capability>,
    color: [f32; 4],
    emission: [f32; 4],
    clear_color: [f32; 4],
    fixed_camera: Option<([f32; 16], [f32; 16])>,
    transform_depth: usize,
    draw_calls: usize,
    commands: Vec<Command>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_texture_units(DEFAULT_TEXTURE_UNITS)
    }

    pub fn with_texture_units(max_units: u32) -> Self {
        Self {
            max_units,
            next_handle: 1,
            textures: BTreeMap::new(),
            units: BTreeMap::new(),
            programs: BTreeMap::new(),
            bound: None,
            buffers: BTreeMap::new(),
            attributes: BTreeMap::new(),
            enabled: Vec::new(),
            color: [1.0; 4],
            emission: NEUTRAL_EMISSION,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fixed_camera: None,
            transform_depth: 0,
            draw_calls: 0,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drains the command log. State tracked alongside it is kept.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Projection and view last loaded by [`GpuBackend::set_fixed_camera`].
    pub fn fixed_camera(&self) -> Option<([f32; 16], [f32; 16])> {
        self.fixed_camera
    }

    pub fn enabled_capabilities(&self) -> &[Capability] {
        &self.enabled
    }

    pub fn emission(&self) -> [f32; 4] {
        self.emission
    }

    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(&unit).copied()
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).copied()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn transform_depth(&self) -> usize {
        self.transform_depth
    }

    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    /// Last value written to `name` in `program`, if any.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let record = self.programs.get(&program)?;
        let index = record.lookup.get(name)?;
        record.values.get(index).copied()
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&mut self, command: Command) {
        self.commands.push(command);
    }
}

impl GpuBackend for RecordingBackend {
    fn max_texture_units(&self) -> u32 {
        self.max_units
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
        self.record(Command::Clear { rgba });
    }

    fn create_texture(&mut self, image: &RgbaImage) -> Result<TextureId> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ShadingError::Backend("cannot create an empty texture".into()));
        }
        let texture = TextureId(self.next_handle());
        self.textures.insert(texture, (width, height));
        self.record(Command::CreateTexture { texture, width, height });
        Ok(texture)
    }

    fn update_texture(&mut self, texture: TextureId, image: &RgbaImage) -> Result<()> {
        let (width, height) = image.dimensions();
        let Some(size) = self.textures.get_mut(&texture) else {
            return Err(ShadingError::Backend(format!("unknown texture {}", texture.0)));
        };
        *size = (width, height);
        self.record(Command::UpdateTexture { texture, width, height });
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.units.retain(|_, bound| *bound != texture);
            self.record(Command::DeleteTexture { texture });
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> Result<()> {
        if unit >= self.max_units {
            return Err(ShadingError::Backend(format!(
                "texture unit {unit} exceeds the {} available units",
                self.max_units
            )));
        }
        match texture {
            Some(id) if !self.textures.contains_key(&id) => {
                return Err(ShadingError::Backend(format!("unknown texture {}", id.0)));
            }
            Some(id) => {
                self.units.insert(unit, id);
            }
            None => {
                self.units.remove(&unit);
            }
        }
        self.record(Command::BindTexture { unit, texture });
        Ok(())
    }

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramId> {
        for (stage, source) in [("vertex", vertex), ("fragment", fragment)] {
            if !source.contains("void main") {
                return Err(ShadingError::Compile(format!(
                    "{stage} shader has no entry point `void main`"
                )));
            }
        }
        let record = ProgramRecord::parse(vertex, fragment)?;
        let program = ProgramId(self.next_handle());
        let uniforms = record.slots.len();
        debug!(program = program.0, uniforms, "compiled program");
        self.programs.insert(program, record);
        self.record(Command::CompileProgram { program, uniforms });
        Ok(program)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            if self.bound == Some(program) {
                self.bound = None;
            }
            self.record(Command::DeleteProgram { program });
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.bound = program.filter(|id| self.programs.contains_key(id));
        self.record(Command::UseProgram { program: self.bound });
    }

    fn bound_program(&self) -> Option<ProgramId> {
        self.bound
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let record = self.programs.get(&program)?;
        record
            .lookup
            .get(name)
            .map(|index| UniformLocation { program, index: *index })
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<()> {
        if self.bound != Some(location.program) {
            return Err(ShadingError::Backend(format!(
                "uniform written to program {} while it is not bound",
                location.program.0
            )));
        }
        let Some(record) = self.programs.get_mut(&location.program) else {
            return Err(ShadingError::Backend(format!(
                "unknown program {}",
                location.program.0
            )));
        };
        let Some(slot) = record.slots.get(location.index as usize) else {
            return Err(ShadingError::Backend(format!(
                "uniform location {} out of range",
                location.index
            )));
        };
        if !slot.kind.accepts(value) {
            return Err(ShadingError::Backend(format!(
                "uniform '{}' is declared {:?} and cannot take {value:?}",
                slot.name, slot.kind
            )));
        }
        let name = slot.name.clone();
        record.values.insert(location.index, *value);
        self.record(Command::SetUniform {
            program: location.program,
            name,
            value: *value,
        });
        Ok(())
    }

    fn create_buffer(&mut self, bytes: &[u8]) -> Result<BufferId> {
        if bytes.is_empty() {
            return Err(ShadingError::Backend("cannot create an empty vertex buffer".into()));
        }
        let buffer = BufferId(self.next_handle());
        self.buffers.insert(buffer, bytes.len());
        self.record(Command::CreateBuffer {
            buffer,
            bytes: bytes.len(),
        });
        Ok(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            self.attributes.retain(|_, bound| *bound != buffer);
            self.record(Command::DeleteBuffer { buffer });
        }
    }

    fn bind_vertex_buffer(
        &mut self,
        location: u32,
        buffer: Option<BufferId>,
        layout: BufferLayout,
    ) -> Result<()> {
        match buffer {
            Some(id) if !self.buffers.contains_key(&id) => {
                return Err(ShadingError::Backend(format!("unknown buffer {}", id.0)));
            }
            Some(id) => {
                self.attributes.insert(location, id);
            }
            None => {
                self.attributes.remove(&location);
            }
        }
        self.record(Command::BindVertexBuffer {
            location,
            buffer,
            layout,
        });
        Ok(())
    }

    fn enable(&mut self, capability: Capability) {
        if !self.enabled.contains(&capability) {
            self.enabled.push(capability);
        }
        self.record(Command::Enable { capability });
    }

    fn disable(&mut self, capability: Capability) {
        self.enabled.retain(|enabled| *enabled != capability);
        self.record(Command::Disable { capability });
    }

    fn set_color(&mut self, rgba: [f32; 4]) {
        self.color = rgba;
        self.record(Command::SetColor { rgba });
    }

    fn set_emission(&mut self, rgba: [f32; 4]) {
        self.emission = rgba;
        self.record(Command::SetEmission { rgba });
    }

    fn draw_vertices(&mut self, topology: Topology, vertices: &[Vertex]) -> Result<()> {
        self.draw_calls += 1;
        self.record(Command::DrawVertices {
            topology,
            count: vertices.len(),
        });
        Ok(())
    }

    fn draw_arrays(&mut self, topology: Topology, count: usize) -> Result<()> {
        if !self.attributes.contains_key(&0) {
            return Err(ShadingError::Backend(
                "draw_arrays without a vertex buffer at location 0".into(),
            ));
        }
        self.draw_calls += 1;
        self.record(Command::DrawArrays { topology, count });
        Ok(())
    }

    fn set_fixed_camera(&mut self, projection: [f32; 16], view: [f32; 16]) {
        self.fixed_camera = Some((projection, view));
        self.record(Command::SetFixedCamera { projection, view });
    }

    fn push_transform(&mut self, matrix: [f32; 16]) {
        self.transform_depth += 1;
        self.record(Command::PushTransform { matrix });
    }

    fn pop_transform(&mut self) {
        self.transform_depth = self.transform_depth.saturating_sub(1);
        self.record(Command::PopTransform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "uniform mat4 model_mat;\nvoid main() {}\n";
    const FS: &str = "uniform highp vec3 light_pos[2];\n\
                      uniform sampler2D base_color, normal_map;\n\
                      void main() {}\n";

    #[test]
    fn parses_uniform_declarations() {
        let mut gpu = RecordingBackend::new();
        let program = gpu.compile_program(VS, FS).unwrap();
        for name in ["model_mat", "light_pos", "light_pos[1]", "base_color", "normal_map"] {
            assert!(gpu.uniform_location(program, name).is_some(), "{name}");
        }
        assert_eq!(
            gpu.uniform_location(program, "light_pos"),
            gpu.uniform_location(program, "light_pos[0]")
        );
        assert!(gpu.uniform_location(program, "light_pos[2]").is_none());
    }

    #[test]
    fn array_lengths_resolve_defines() {
        let mut gpu = RecordingBackend::new();
        let fragment = "#define SLOTS 3\nuniform float weights[SLOTS];\nvoid main() {}\n";
        let program = gpu.compile_program(VS, fragment).unwrap();
        assert!(gpu.uniform_location(program, "weights[2]").is_some());
        assert!(gpu.uniform_location(program, "weights[3]").is_none());

        let unresolved = "uniform float weights[COUNT];\nvoid main() {}\n";
        let err = gpu.compile_program(VS, unresolved).unwrap_err();
        assert!(matches!(err, ShadingError::Compile(message) if message.contains("COUNT")));
        assert_eq!(gpu.live_programs(), 1);
    }

    #[test]
    fn missing_entry_point_fails_to_compile() {
        let mut gpu = RecordingBackend::new();
        let err = gpu.compile_program("void main() {}", "uniform float x;").unwrap_err();
        assert!(matches!(err, ShadingError::Compile(_)));
    }

    #[test]
    fn uniform_writes_require_bound_program_and_matching_type() {
        let mut gpu = RecordingBackend::new();
        let program = gpu.compile_program(VS, FS).unwrap();
        let location = gpu.uniform_location(program, "light_pos[1]").unwrap();
        let value = UniformValue::Vec3([1.0, 2.0, 3.0]);
        assert!(gpu.set_uniform(location, &value).is_err());

        gpu.use_program(Some(program));
        gpu.set_uniform(location, &value).unwrap();
        assert_eq!(gpu.uniform_value(program, "light_pos[1]"), Some(value));
        assert!(gpu.set_uniform(location, &UniformValue::Float(1.0)).is_err());
    }

    #[test]
    fn texture_units_are_bounded() {
        let mut gpu = RecordingBackend::with_texture_units(2);
        let texture = gpu.create_texture(&RgbaImage::new(1, 1)).unwrap();
        gpu.bind_texture(1, Some(texture)).unwrap();
        assert!(gpu.bind_texture(2, Some(texture)).is_err());
        gpu.delete_texture(texture);
        assert_eq!(gpu.bound_texture(1), None);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn clear_and_fixed_camera_are_tracked() {
        let mut gpu = RecordingBackend::new();
        let projection = glam::Mat4::orthographic_rh_gl(0.0, 4.0, 2.0, 0.0, -1.0, 1.0);
        gpu.clear([0.1, 0.2, 0.3, 1.0]);
        gpu.set_fixed_camera(projection.to_cols_array(), glam::Mat4::IDENTITY.to_cols_array());
        assert_eq!(gpu.clear_color(), [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(
            gpu.fixed_camera(),
            Some((projection.to_cols_array(), glam::Mat4::IDENTITY.to_cols_array()))
        );
        let drained = gpu.take_commands();
        assert!(matches!(drained[0], Command::Clear { .. }));
        assert!(gpu.commands().is_empty());
        assert_eq!(gpu.clear_color(), [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn command_log_serializes() {
        let mut gpu = RecordingBackend::new();
        gpu.enable(Capability::Texture2d);
        gpu.push_transform(glam::Mat4::IDENTITY.to_cols_array());
        gpu.pop_transform();
        let json = serde_json::to_string(gpu.commands()).unwrap();
        assert!(json.contains("\"op\":\"enable\""));
        assert!(json.contains("\"capability\":\"texture2d\""));
        assert_eq!(gpu.transform_depth(), 0);
    }
}
