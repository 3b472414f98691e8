use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use glam::Mat4;
use image::{GrayImage, RgbaImage};
use tracing::{debug, warn};

use super::{
    with_program, write_uniform, LightBinding, LightingSurface, Surface, TransformSurface,
    UploadedMap,
};
use crate::bsdf::{band_to_rgba, Bsdf};
use crate::compile::{self, light_uniform};
use crate::error::{Result, ShadingError};
use crate::gpu::{BufferId, BufferLayout, GpuBackend, ProgramId, UniformValue};
use crate::hash::{soft_update, Cacheable, ContentHash, HashBuilder};
use crate::light::{Light, MAX_LIGHTS};
use crate::mix::ScalarSource;
use crate::queue::UpdateQueue;
use crate::types::{
    Capabilities, ScalarType, SurfaceId, Topology, Vertex, VertexData, BASE_COLOR_UNIT,
    EMISSION_UNIT, NORMAL_UNIT, SMOOTHNESS_UNIT,
};

const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// Surface driven by a generated lighting program compiled from a [`Bsdf`].
///
/// Matrix, light and ambient setters do not touch the GPU: they stage a
/// deferred action on the scene's update queue, applied at the next flush.
pub struct AutoSp {
    id: SurfaceId,
    bsdf: Bsdf,
    queue: UpdateQueue,
    program: ProgramId,
    alive: Rc<Cell<bool>>,
    base_color: UploadedMap,
    normal: UploadedMap,
    smoothness: UploadedMap,
    emission: UploadedMap,
    meshes: HashMap<ContentHash, BufferId>,
    drawn_meshes: HashSet<ContentHash>,
    bound_units: Vec<u32>,
    exhausted_units: Vec<u32>,
    model_mat: Mat4,
    view_mat: Mat4,
    projection_mat: Mat4,
    lights: Vec<Light>,
    ambient: [f32; 3],
}

impl AutoSp {
    /// Compiles the generated program and fixes its sampler units.
    pub fn new(bsdf: Bsdf, queue: &UpdateQueue, gpu: &mut dyn GpuBackend) -> Result<Self> {
        let program =
            gpu.compile_program(&compile::auto_vertex_source(), &compile::auto_fragment_source())?;
        let initialized = with_program(gpu, program, |gpu| {
            for (sampler, unit) in compile::SAMPLERS {
                write_uniform(gpu, program, sampler, UniformValue::Int(unit as i32))?;
            }
            for name in [compile::MODEL_MAT, compile::VIEW_MAT, compile::PROJECTION_MAT] {
                write_uniform(gpu, program, name, Mat4::IDENTITY.into())?;
            }
            write_uniform(gpu, program, compile::AMBIENT, UniformValue::Vec3([0.0; 3]))?;
            write_light_slots(gpu, program, &[])
        });
        if let Err(err) = initialized {
            gpu.delete_program(program);
            return Err(err);
        }
        let surface = Self {
            id: SurfaceId::next(),
            bsdf,
            queue: queue.clone(),
            program,
            alive: Rc::new(Cell::new(true)),
            base_color: UploadedMap::default(),
            normal: UploadedMap::default(),
            smoothness: UploadedMap::default(),
            emission: UploadedMap::default(),
            meshes: HashMap::new(),
            drawn_meshes: HashSet::new(),
            bound_units: Vec::new(),
            exhausted_units: Vec::new(),
            model_mat: Mat4::IDENTITY,
            view_mat: Mat4::IDENTITY,
            projection_mat: Mat4::IDENTITY,
            lights: Vec::new(),
            ambient: [0.0; 3],
        };
        debug!(surface = %surface.id, program = program.0, "compiled auto shader surface");
        Ok(surface)
    }

    pub fn bsdf(&self) -> &Bsdf {
        &self.bsdf
    }

    /// Mutable access for [`Bsdf::reset`]; changed maps upload at next bind.
    pub fn bsdf_mut(&mut self) -> &mut Bsdf {
        &mut self.bsdf
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn model_mat(&self) -> Mat4 {
        self.model_mat
    }

    pub fn view_mat(&self) -> Mat4 {
        self.view_mat
    }

    pub fn projection_mat(&self) -> Mat4 {
        self.projection_mat
    }

    /// The lights bound by the last [`LightingSurface::set_light`].
    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn ambient(&self) -> [f32; 3] {
        self.ambient
    }

    fn ensure_live(&self) -> Result<()> {
        if self.alive.get() {
            Ok(())
        } else {
            Err(ShadingError::Released(self.id))
        }
    }

    /// Stages one uniform write against this surface's program.
    fn stage(&self, label: &'static str, name: &'static str, value: UniformValue) {
        let program = self.program;
        let alive = Rc::clone(&self.alive);
        self.queue.push(label, move |gpu| {
            if !alive.get() {
                return Ok(());
            }
            with_program(gpu, program, |gpu| {
                write_uniform(gpu, program, name, value).map(|_| ())
            })
        });
    }

    /// Reports a sampler unit the backend cannot provide, once per unit.
    fn unit_available(&mut self, sampler: &str, unit: u32, limit: u32) -> bool {
        if unit < limit {
            return true;
        }
        if !self.exhausted_units.contains(&unit) {
            self.exhausted_units.push(unit);
            warn!(
                surface = %self.id,
                sampler,
                unit,
                limit,
                "texture unit exhausted, sampling a constant instead"
            );
        }
        false
    }

    /// Uploads changed maps and binds them. A map whose unit exceeds the
    /// backend limit is flattened to its mean value and its flag cleared, so
    /// the program never samples an unbound unit.
    fn sync_maps(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        soft_update(&self.bsdf);
        let limit = gpu.max_texture_units();
        let program = self.program;

        if self.unit_available("base_color_map", BASE_COLOR_UNIT, limit) {
            let bsdf = &self.bsdf;
            let texture = self
                .base_color
                .sync(gpu, bsdf.base_color().hash(), || bsdf.base_color_image())?;
            gpu.bind_texture(BASE_COLOR_UNIT, Some(texture))?;
            self.bound_units.push(BASE_COLOR_UNIT);
            write_uniform(gpu, program, compile::BASE_COLOR_FROM_MAP, UniformValue::Int(1))?;
        } else {
            let color = self
                .bsdf
                .base_color()
                .constant_color()
                .unwrap_or_else(|| mean_rgba(&self.bsdf.base_color_image()));
            write_uniform(gpu, program, compile::BASE_COLOR_VALUE, UniformValue::Vec4(color))?;
            write_uniform(gpu, program, compile::BASE_COLOR_FROM_MAP, UniformValue::Int(0))?;
        }

        let normal_from_map = self.unit_available("normal_map", NORMAL_UNIT, limit);
        if normal_from_map {
            let bsdf = &self.bsdf;
            let texture = self
                .normal
                .sync(gpu, bsdf.normal().hash(), || bsdf.normal_image())?;
            gpu.bind_texture(NORMAL_UNIT, Some(texture))?;
            self.bound_units.push(NORMAL_UNIT);
        }
        write_uniform(
            gpu,
            program,
            compile::NORMAL_FROM_MAP,
            UniformValue::Int(normal_from_map as i32),
        )?;

        let scalars = [
            (
                self.bsdf.smoothness().clone(),
                "smoothness_map",
                SMOOTHNESS_UNIT,
                compile::SMOOTHNESS_VALUE,
                compile::SMOOTHNESS_FROM_MAP,
            ),
            (
                self.bsdf.emission().clone(),
                "emission_map",
                EMISSION_UNIT,
                compile::EMISSION_VALUE,
                compile::EMISSION_FROM_MAP,
            ),
        ];
        for (source, sampler, unit, value_name, flag_name) in scalars {
            let channel = match source {
                ScalarSource::Channel(channel) if self.unit_available(sampler, unit, limit) => {
                    channel
                }
                ScalarSource::Channel(channel) => {
                    let value = mean_band(&channel.band(None));
                    write_uniform(gpu, program, value_name, UniformValue::Float(value))?;
                    write_uniform(gpu, program, flag_name, UniformValue::Int(0))?;
                    continue;
                }
                ScalarSource::Constant(value) => {
                    write_uniform(gpu, program, value_name, UniformValue::Float(value))?;
                    write_uniform(gpu, program, flag_name, UniformValue::Int(0))?;
                    continue;
                }
            };
            let map = if unit == SMOOTHNESS_UNIT {
                &mut self.smoothness
            } else {
                &mut self.emission
            };
            let texture = map.sync(gpu, channel.get_hash(), || band_to_rgba(&channel.band(None)))?;
            gpu.bind_texture(unit, Some(texture))?;
            self.bound_units.push(unit);
            write_uniform(gpu, program, flag_name, UniformValue::Int(1))?;
        }
        Ok(())
    }

    fn mesh_buffer(&mut self, gpu: &mut dyn GpuBackend, vertices: &[Vertex]) -> Result<BufferId> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let key = HashBuilder::new("mesh").bytes(bytes).finish();
        self.drawn_meshes.insert(key);
        if let Some(buffer) = self.meshes.get(&key) {
            return Ok(*buffer);
        }
        let buffer = gpu.create_buffer(bytes)?;
        self.meshes.insert(key, buffer);
        Ok(buffer)
    }
}

fn mean_rgba(image: &RgbaImage) -> [f32; 4] {
    let count = (image.width() as f32 * image.height() as f32).max(1.0);
    let mut sum = [0.0f32; 4];
    for pixel in image.pixels() {
        for (total, value) in sum.iter_mut().zip(pixel.0) {
            *total += f32::from(value);
        }
    }
    sum.map(|total| total / count / 255.0)
}

fn mean_band(band: &GrayImage) -> f32 {
    let count = (band.width() as f32 * band.height() as f32).max(1.0);
    let total: f32 = band.pixels().map(|pixel| f32::from(pixel.0[0])).sum();
    total / count / 255.0
}

/// Uploads `lights` into the slot arrays and clears every unused slot.
fn write_light_slots(gpu: &mut dyn GpuBackend, program: ProgramId, lights: &[Light]) -> Result<()> {
    for slot in 0..MAX_LIGHTS {
        let (kind, position, direction, color, attenuation, cutoff) = match lights.get(slot) {
            Some(light) => (
                if light.is_directional() {
                    compile::LIGHT_DIRECTIONAL
                } else {
                    compile::LIGHT_POINT
                },
                light.position().to_array(),
                light.direction().to_array(),
                light.color(),
                light.attenuation(),
                light.cutoff(),
            ),
            None => (compile::LIGHT_UNUSED, [0.0; 3], [0.0; 3], [0.0; 3], 0.0, 0.0),
        };
        let writes = [
            (compile::LIGHT_TYPE, UniformValue::Int(kind)),
            (compile::LIGHT_POSITION, UniformValue::Vec3(position)),
            (compile::LIGHT_DIRECTION, UniformValue::Vec3(direction)),
            (compile::LIGHT_COLOR, UniformValue::Vec3(color)),
            (compile::LIGHT_ATTENUATION, UniformValue::Float(attenuation)),
            (compile::LIGHT_CUTOFF, UniformValue::Float(cutoff)),
        ];
        for (array, value) in writes {
            write_uniform(gpu, program, &light_uniform(array, slot), value)?;
        }
    }
    write_uniform(
        gpu,
        program,
        compile::LIGHT_COUNT,
        UniformValue::Int(lights.len().min(MAX_LIGHTS) as i32),
    )?;
    Ok(())
}

impl Surface for AutoSp {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "auto_sp"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_transform: true,
            supports_lighting: true,
        }
    }

    fn validate_vertices(&self, vertices: &VertexData) -> Result<()> {
        match vertices {
            VertexData::Mesh(_) => Ok(()),
            VertexData::Attributes(_) => Err(ShadingError::invalid(
                "auto shader surfaces draw position/uv/normal vertices, not attribute buffers",
            )),
        }
    }

    fn bind(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        self.ensure_live()?;
        gpu.use_program(Some(self.program));
        self.bound_units.clear();
        self.sync_maps(gpu)
    }

    fn render(
        &mut self,
        gpu: &mut dyn GpuBackend,
        topology: Topology,
        vertices: &VertexData,
    ) -> Result<()> {
        self.ensure_live()?;
        self.validate_vertices(vertices)?;
        let VertexData::Mesh(vertices) = vertices else {
            return Ok(());
        };
        if vertices.is_empty() {
            return Ok(());
        }
        let buffer = self.mesh_buffer(gpu, vertices)?;
        let attributes = [(0, 3, 0), (1, 2, 12), (2, 3, 20)];
        for (location, components, offset) in attributes {
            let layout = BufferLayout {
                components,
                scalar: ScalarType::Float,
                stride: VERTEX_STRIDE,
                offset,
            };
            gpu.bind_vertex_buffer(location, Some(buffer), layout)?;
        }
        gpu.draw_arrays(topology, vertices.len())
    }

    fn unbind(&mut self, gpu: &mut dyn GpuBackend) {
        for unit in self.bound_units.drain(..) {
            if let Err(err) = gpu.bind_texture(unit, None) {
                warn!(surface = %self.id, unit, error = %err, "failed to unbind texture unit");
            }
        }
        for location in 0..3 {
            let layout = BufferLayout::packed(1, ScalarType::Float);
            if let Err(err) = gpu.bind_vertex_buffer(location, None, layout) {
                warn!(surface = %self.id, location, error = %err, "failed to unbind vertex buffer");
            }
        }
        if gpu.bound_program() == Some(self.program) {
            gpu.use_program(None);
        }
    }

    fn end_frame(&mut self, gpu: &mut dyn GpuBackend) {
        let drawn = std::mem::take(&mut self.drawn_meshes);
        let before = self.meshes.len();
        self.meshes.retain(|key, buffer| {
            let keep = drawn.contains(key);
            if !keep {
                gpu.delete_buffer(*buffer);
            }
            keep
        });
        if self.meshes.len() < before {
            let evicted = before - self.meshes.len();
            debug!(surface = %self.id, evicted, "evicted stale meshes");
        }
    }

    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if !self.alive.get() {
            return;
        }
        self.alive.set(false);
        self.drawn_meshes.clear();
        for map in [
            &mut self.base_color,
            &mut self.normal,
            &mut self.smoothness,
            &mut self.emission,
        ] {
            map.release(gpu);
        }
        for (_, buffer) in self.meshes.drain() {
            gpu.delete_buffer(buffer);
        }
        gpu.delete_program(self.program);
        debug!(surface = %self.id, "released auto shader surface");
    }

    fn is_released(&self) -> bool {
        !self.alive.get()
    }

    fn as_transform_mut(&mut self) -> Option<&mut dyn TransformSurface> {
        Some(self)
    }

    fn as_lighting_mut(&mut self) -> Option<&mut dyn LightingSurface> {
        Some(self)
    }
}

impl TransformSurface for AutoSp {
    fn set_model_mat(&mut self, matrix: Mat4) {
        self.model_mat = matrix;
        self.stage("auto_sp.model_mat", compile::MODEL_MAT, matrix.into());
    }

    fn set_view_mat(&mut self, matrix: Mat4) {
        self.view_mat = matrix;
        self.stage("auto_sp.view_mat", compile::VIEW_MAT, matrix.into());
    }

    fn set_projection_mat(&mut self, matrix: Mat4) {
        self.projection_mat = matrix;
        self.stage("auto_sp.projection_mat", compile::PROJECTION_MAT, matrix.into());
    }
}

impl LightingSurface for AutoSp {
    fn set_light(&mut self, lights: &[Light]) -> LightBinding {
        let bound = lights.len().min(MAX_LIGHTS);
        let binding = LightBinding {
            bound,
            truncated: lights.len() - bound,
        };
        if binding.truncated > 0 {
            warn!(
                surface = %self.id,
                requested = lights.len(),
                bound,
                truncated = binding.truncated,
                "light slots exhausted, extra lights ignored"
            );
        }
        self.lights = lights[..bound].to_vec();

        let snapshot = self.lights.clone();
        let program = self.program;
        let alive = Rc::clone(&self.alive);
        self.queue.push("auto_sp.lights", move |gpu| {
            if !alive.get() {
                return Ok(());
            }
            with_program(gpu, program, |gpu| write_light_slots(gpu, program, &snapshot))
        });
        binding
    }

    fn set_ambient(&mut self, ambient: [f32; 3]) {
        self.ambient = ambient;
        self.stage("auto_sp.ambient", compile::AMBIENT, UniformValue::Vec3(ambient));
    }
}
