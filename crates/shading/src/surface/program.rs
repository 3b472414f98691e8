use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, warn};

use super::{with_program, write_uniform, Surface, UploadedMap};
use crate::bsdf::MapSource;
use crate::error::{Result, ShadingError};
use crate::gpu::{BufferId, BufferLayout, GpuBackend, ProgramId, UniformValue};
use crate::hash::{soft_update, ContentHash, HashBuilder};
use crate::queue::UpdateQueue;
use crate::types::{AttributeBuffer, Capabilities, ScalarType, SurfaceId, Topology, VertexData};

/// A sampler input staged through [`ShaderProgram::uniform_tex`].
struct SamplerBinding {
    source: MapSource,
    map: UploadedMap,
}

type SamplerTable = Rc<RefCell<BTreeMap<u32, SamplerBinding>>>;

/// Surface around hand-written vertex and fragment source.
///
/// Each face supplies one attribute buffer per declared scalar type; buffer
/// `i` binds to attribute location `i`. Uniform writes are staged and applied
/// at the next queue flush.
pub struct ShaderProgram {
    id: SurfaceId,
    queue: UpdateQueue,
    program: ProgramId,
    declared: Vec<ScalarType>,
    alive: Rc<Cell<bool>>,
    samplers: SamplerTable,
    buffers: HashMap<ContentHash, Vec<BufferId>>,
    drawn: HashSet<ContentHash>,
}

impl ShaderProgram {
    pub fn new(
        vertex: &str,
        fragment: &str,
        declared: Vec<ScalarType>,
        queue: &UpdateQueue,
        gpu: &mut dyn GpuBackend,
    ) -> Result<Self> {
        if declared.is_empty() {
            return Err(ShadingError::invalid(
                "a shader program needs at least one declared vertex buffer",
            ));
        }
        let program = gpu.compile_program(vertex, fragment)?;
        let surface = Self {
            id: SurfaceId::next(),
            queue: queue.clone(),
            program,
            declared,
            alive: Rc::new(Cell::new(true)),
            samplers: Rc::new(RefCell::new(BTreeMap::new())),
            buffers: HashMap::new(),
            drawn: HashSet::new(),
        };
        debug!(
            surface = %surface.id,
            program = program.0,
            buffers = surface.declared.len(),
            "compiled shader program surface"
        );
        Ok(surface)
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn declared(&self) -> &[ScalarType] {
        &self.declared
    }

    /// Stages a 1-4 component uniform of the given scalar type.
    pub fn uniform(&self, name: &str, scalar: ScalarType, values: &[f64]) -> Result<()> {
        let value = UniformValue::from_parts(scalar, values)?;
        self.uniform_value(name, value);
        Ok(())
    }

    /// Stages an already typed uniform value.
    pub fn uniform_value(&self, name: &str, value: UniformValue) {
        let program = self.program;
        let alive = Rc::clone(&self.alive);
        let name = name.to_string();
        self.queue.push("shader_program.uniform", move |gpu| {
            if !alive.get() {
                return Ok(());
            }
            with_program(gpu, program, |gpu| {
                write_uniform(gpu, program, &name, value).map(|_| ())
            })
        });
    }

    /// Stages a sampler: at flush the map is uploaded, assigned to `unit`
    /// and `name` is pointed at that unit. Units beyond the backend limit
    /// are reported and skipped.
    pub fn uniform_tex(&self, name: &str, source: impl Into<MapSource>, unit: u32) {
        let program = self.program;
        let alive = Rc::clone(&self.alive);
        let samplers = Rc::clone(&self.samplers);
        let source = source.into();
        let name = name.to_string();
        self.queue.push("shader_program.uniform_tex", move |gpu| {
            if !alive.get() {
                return Ok(());
            }
            let limit = gpu.max_texture_units();
            if unit >= limit {
                warn!(
                    program = program.0,
                    uniform = %name,
                    unit,
                    limit,
                    "texture unit exhausted, skipping sampler"
                );
                return Ok(());
            }
            if gpu.uniform_location(program, &name).is_none() {
                warn!(
                    program = program.0,
                    uniform = %name,
                    "uniform not found in program, skipping"
                );
                return Ok(());
            }
            let mut samplers = samplers.borrow_mut();
            let binding = samplers.entry(unit).or_insert_with(|| SamplerBinding {
                source: source.clone(),
                map: UploadedMap::default(),
            });
            binding.source = source;
            soft_update(binding.source.node());
            let source = &binding.source;
            binding.map.sync(gpu, source.hash(), || source.to_rgba8())?;
            drop(samplers);
            with_program(gpu, program, |gpu| {
                write_uniform(gpu, program, &name, UniformValue::Int(unit as i32)).map(|_| ())
            })
        });
    }

    fn ensure_live(&self) -> Result<()> {
        if self.alive.get() {
            Ok(())
        } else {
            Err(ShadingError::Released(self.id))
        }
    }

    fn attribute_buffers(
        &mut self,
        gpu: &mut dyn GpuBackend,
        buffers: &[AttributeBuffer],
    ) -> Result<Vec<BufferId>> {
        let key = buffers
            .iter()
            .fold(HashBuilder::new("attributes"), |builder, buffer| {
                builder
                    .u8(buffer.scalar_type() as u8)
                    .u32(buffer.components())
                    .bytes(buffer.data().as_bytes())
            })
            .finish();
        self.drawn.insert(key);
        if let Some(ids) = self.buffers.get(&key) {
            return Ok(ids.clone());
        }
        let mut ids = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            match gpu.create_buffer(buffer.data().as_bytes()) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in ids {
                        gpu.delete_buffer(id);
                    }
                    return Err(err);
                }
            }
        }
        self.buffers.insert(key, ids.clone());
        Ok(ids)
    }
}

impl Surface for ShaderProgram {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "shader_program"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn validate_vertices(&self, vertices: &VertexData) -> Result<()> {
        let VertexData::Attributes(buffers) = vertices else {
            return Err(ShadingError::invalid(
                "shader program surfaces draw attribute buffers, not meshes",
            ));
        };
        if buffers.len() != self.declared.len() {
            return Err(ShadingError::invalid(format!(
                "expected {} vertex buffers, got {}",
                self.declared.len(),
                buffers.len()
            )));
        }
        for (index, (buffer, declared)) in buffers.iter().zip(&self.declared).enumerate() {
            if buffer.scalar_type() != *declared {
                return Err(ShadingError::invalid(format!(
                    "vertex buffer {index} holds {:?} values but {declared:?} was declared",
                    buffer.scalar_type()
                )));
            }
        }
        let count = vertices.vertex_count();
        if let Some(ragged) = buffers.iter().position(|b| b.vertex_count() != count) {
            return Err(ShadingError::invalid(format!(
                "vertex buffer {ragged} has {} vertices, buffer 0 has {count}",
                buffers[ragged].vertex_count()
            )));
        }
        Ok(())
    }

    fn bind(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        self.ensure_live()?;
        gpu.use_program(Some(self.program));
        let mut samplers = self.samplers.borrow_mut();
        for (unit, binding) in samplers.iter_mut() {
            soft_update(binding.source.node());
            let source = &binding.source;
            let texture = binding.map.sync(gpu, source.hash(), || source.to_rgba8())?;
            gpu.bind_texture(*unit, Some(texture))?;
        }
        Ok(())
    }

    fn render(
        &mut self,
        gpu: &mut dyn GpuBackend,
        topology: Topology,
        vertices: &VertexData,
    ) -> Result<()> {
        self.ensure_live()?;
        self.validate_vertices(vertices)?;
        let VertexData::Attributes(buffers) = vertices else {
            return Ok(());
        };
        let count = vertices.vertex_count();
        if count == 0 {
            return Ok(());
        }
        let ids = self.attribute_buffers(gpu, buffers)?;
        for (location, (id, buffer)) in ids.iter().zip(buffers).enumerate() {
            let layout = BufferLayout::packed(buffer.components(), buffer.scalar_type());
            gpu.bind_vertex_buffer(location as u32, Some(*id), layout)?;
        }
        gpu.draw_arrays(topology, count)
    }

    fn unbind(&mut self, gpu: &mut dyn GpuBackend) {
        for unit in self.samplers.borrow().keys() {
            if let Err(err) = gpu.bind_texture(*unit, None) {
                warn!(surface = %self.id, unit, error = %err, "failed to unbind texture unit");
            }
        }
        for (location, scalar) in self.declared.iter().enumerate() {
            let layout = BufferLayout::packed(1, *scalar);
            if let Err(err) = gpu.bind_vertex_buffer(location as u32, None, layout) {
                warn!(surface = %self.id, location, error = %err, "failed to unbind vertex buffer");
            }
        }
        if gpu.bound_program() == Some(self.program) {
            gpu.use_program(None);
        }
    }

    fn end_frame(&mut self, gpu: &mut dyn GpuBackend) {
        let drawn = std::mem::take(&mut self.drawn);
        self.buffers.retain(|key, ids| {
            let keep = drawn.contains(key);
            if !keep {
                for id in ids.iter() {
                    gpu.delete_buffer(*id);
                }
            }
            keep
        });
    }

    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if !self.alive.get() {
            return;
        }
        self.alive.set(false);
        self.drawn.clear();
        for (_, mut binding) in std::mem::take(&mut *self.samplers.borrow_mut()) {
            binding.map.release(gpu);
        }
        for (_, ids) in self.buffers.drain() {
            for id in ids {
                gpu.delete_buffer(id);
            }
        }
        gpu.delete_program(self.program);
        debug!(surface = %self.id, "released shader program surface");
    }

    fn is_released(&self) -> bool {
        !self.alive.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;
    use crate::mix::MixChannel;
    use crate::types::AttributeData;

    const VS: &str = "layout(location = 0) in vec2 a_pos;\nuniform vec4 tint;\nvoid main() {}\n";
    const FS: &str = "uniform sampler2D pattern;\nuniform float strength;\nvoid main() {}\n";

    fn program(gpu: &mut RecordingBackend, queue: &UpdateQueue) -> ShaderProgram {
        ShaderProgram::new(VS, FS, vec![ScalarType::Float, ScalarType::Int], queue, gpu).unwrap()
    }

    fn attributes() -> VertexData {
        VertexData::Attributes(vec![
            AttributeBuffer::floats(2, vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0]).unwrap(),
            AttributeBuffer::new(1, AttributeData::Int(vec![1, 2, 3])).unwrap(),
        ])
    }

    #[test]
    fn uniforms_apply_only_at_flush_and_restore_binding() {
        let mut gpu = RecordingBackend::new();
        let queue = UpdateQueue::new();
        let surface = program(&mut gpu, &queue);
        surface.uniform("strength", ScalarType::Float, &[0.25]).unwrap();
        surface.uniform("strength", ScalarType::Float, &[0.75]).unwrap();
        assert_eq!(gpu.uniform_value(surface.program(), "strength"), None);

        queue.flush(&mut gpu).unwrap();
        assert_eq!(
            gpu.uniform_value(surface.program(), "strength"),
            Some(UniformValue::Float(0.75))
        );
        assert_eq!(gpu.bound_program(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn unknown_uniform_is_skipped_without_failure() {
        let mut gpu = RecordingBackend::new();
        let queue = UpdateQueue::new();
        let surface = program(&mut gpu, &queue);
        surface.uniform_value("missing", UniformValue::Float(1.0));
        let report = queue.flush(&mut gpu).unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.executed, 1);
    }

    #[test]
    fn sampler_beyond_unit_limit_is_skipped() {
        let mut gpu = RecordingBackend::with_texture_units(4);
        let queue = UpdateQueue::new();
        let mut surface = program(&mut gpu, &queue);
        let map = MixChannel::solid([1.0, 1.0, 1.0, 1.0]).unwrap();
        surface.uniform_tex("pattern", map.clone(), 9);
        queue.flush(&mut gpu).unwrap();
        assert_eq!(gpu.live_textures(), 0);

        surface.uniform_tex("pattern", map, 2);
        queue.flush(&mut gpu).unwrap();
        assert_eq!(
            gpu.uniform_value(surface.program(), "pattern"),
            Some(UniformValue::Int(2))
        );
        surface.bind(&mut gpu).unwrap();
        assert!(gpu.bound_texture(2).is_some());
    }

    #[test]
    fn vertex_buffers_bind_to_sequential_locations() {
        let mut gpu = RecordingBackend::new();
        let queue = UpdateQueue::new();
        let mut surface = program(&mut gpu, &queue);
        surface.bind(&mut gpu).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &attributes()).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &attributes()).unwrap();
        assert_eq!(gpu.live_buffers(), 2);
        assert_eq!(gpu.draw_calls(), 2);
    }

    #[test]
    fn buffers_for_geometry_no_longer_drawn_are_freed() {
        let mut gpu = RecordingBackend::new();
        let queue = UpdateQueue::new();
        let mut surface = program(&mut gpu, &queue);
        let moved = VertexData::Attributes(vec![
            AttributeBuffer::floats(2, vec![5.0, 5.0, 6.0, 5.0, 5.0, 6.0]).unwrap(),
            AttributeBuffer::new(1, AttributeData::Int(vec![1, 2, 3])).unwrap(),
        ]);
        surface.bind(&mut gpu).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &attributes()).unwrap();
        surface.end_frame(&mut gpu);
        assert_eq!(gpu.live_buffers(), 2);

        surface.bind(&mut gpu).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &moved).unwrap();
        surface.end_frame(&mut gpu);
        surface.unbind(&mut gpu);
        assert_eq!(gpu.live_buffers(), 2);
        let deleted = gpu
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::gpu::Command::DeleteBuffer { .. }))
            .count();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn mismatched_vertex_data_is_rejected() {
        let mut gpu = RecordingBackend::new();
        let queue = UpdateQueue::new();
        let surface = program(&mut gpu, &queue);
        let wrong_type = VertexData::Attributes(vec![
            AttributeBuffer::floats(2, vec![0.0; 6]).unwrap(),
            AttributeBuffer::floats(1, vec![0.0; 3]).unwrap(),
        ]);
        let ragged = VertexData::Attributes(vec![
            AttributeBuffer::floats(2, vec![0.0; 6]).unwrap(),
            AttributeBuffer::new(1, AttributeData::Int(vec![1, 2])).unwrap(),
        ]);
        let positions = AttributeBuffer::floats(2, vec![0.0; 6]).unwrap();
        let too_few = VertexData::Attributes(vec![positions]);
        for data in [wrong_type, ragged, too_few, VertexData::Mesh(Vec::new())] {
            assert!(matches!(
                surface.validate_vertices(&data),
                Err(ShadingError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn release_then_render_fails() {
        let mut gpu = RecordingBackend::new();
        let queue = UpdateQueue::new();
        let mut surface = program(&mut gpu, &queue);
        surface.bind(&mut gpu).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &attributes()).unwrap();
        surface.release(&mut gpu);
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_programs(), 0);
        assert!(matches!(
            surface.render(&mut gpu, Topology::Triangles, &attributes()),
            Err(ShadingError::Released(_))
        ));
    }
}
