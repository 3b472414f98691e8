use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sceneconfig::{
    AttributeConfig, FaceConfig, LightConfig, LightKindConfig, MaterialConfig, MaterialKind,
    ModelConfig, OverlayConfig, ScalarConfig, ScalarKind, SceneConfig, Visibility,
};
use shading::{
    share, to_mermaid, AttributeBuffer, AttributeData, AutoSp, Bsdf, Camera, Channel, Face, Fpl,
    GpuBackend, Light, MapSource, MixChannel, Model, ModelId, Projection, ScalarSource,
    ScalarType, Scene, ShaderProgram, Shape, SharedShape, SharedSurface, Texture, Vertex,
    VertexData,
};

/// A material built from the scene file, with its graph rendered up front.
pub struct Material {
    pub kind: MaterialKind,
    pub surface: SharedSurface,
    pub graph: String,
    /// Base color map, kept for overlay shapes. Programs have none.
    pub base: Option<MapSource>,
    /// Declared attribute types of a program material.
    pub attributes: Vec<ScalarType>,
}

pub struct LoadedScene {
    pub scene: Scene,
    pub materials: BTreeMap<String, Material>,
    pub models: Vec<(String, ModelId)>,
    pub overlay: Vec<(SharedShape, [f32; 2])>,
}

impl LoadedScene {
    /// Queues every overlay shape for the next frame.
    pub fn paint_overlay(&mut self) {
        for (shape, [x, y]) in &self.overlay {
            self.scene.paint_ui(shape, *x, *y);
        }
    }

    /// Removes every model and releases every material surface and overlay shape.
    pub fn release(mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        for (name, id) in self.models.drain(..) {
            self.scene
                .remove(id, gpu)
                .with_context(|| format!("failed to remove model '{name}'"))?;
        }
        for material in self.materials.values() {
            material.surface.borrow_mut().release(gpu);
        }
        for (shape, _) in &self.overlay {
            shape.borrow_mut().release(gpu);
        }
        Ok(())
    }
}

/// Decoded images keyed by path, so channels of one file share a texture.
#[derive(Default)]
struct Textures {
    open: HashMap<PathBuf, Texture>,
}

impl Textures {
    fn get(&mut self, path: &Path) -> Result<Texture> {
        if let Some(texture) = self.open.get(path) {
            return Ok(texture.clone());
        }
        let texture = Texture::open(path)?;
        tracing::debug!(path = %path.display(), size = ?texture.size(), "decoded texture");
        self.open.insert(path.to_path_buf(), texture.clone());
        Ok(texture)
    }
}

pub fn build_scene(config: &SceneConfig, gpu: &mut dyn GpuBackend) -> Result<LoadedScene> {
    let mut scene = Scene::new();
    scene
        .set_projection(Projection {
            fov: config.display.fov,
            width: config.display.width as f32,
            height: config.display.height as f32,
            near: config.display.near,
            far: config.display.far,
        })
        .context("invalid display settings")?;
    scene.set_camera(Camera {
        position: config.camera.position,
        yaw: config.camera.yaw,
        pitch: config.camera.pitch,
        roll: config.camera.roll,
    });
    scene
        .set_background(config.background)
        .context("invalid background color")?;

    scene
        .lights_mut()
        .set_ambient(config.ambient)
        .context("invalid ambient light")?;
    for (index, light) in config.lights.iter().enumerate() {
        let light = build_light(light).with_context(|| format!("invalid light {index}"))?;
        scene.lights_mut().add(light);
    }

    let mut textures = Textures::default();
    let mut materials = BTreeMap::new();
    for (name, material) in &config.materials {
        let built = build_material(material, &scene, &mut textures, gpu)
            .with_context(|| format!("failed to build material '{name}'"))?;
        tracing::debug!(material = %name, kind = ?material.kind, "built material");
        materials.insert(name.clone(), built);
    }

    let mut models = Vec::new();
    for model in &config.models {
        let built = build_model(model, &materials)
            .with_context(|| format!("failed to build model '{}'", model.name))?;
        let id = scene.add_model(built);
        match model.visibility {
            Visibility::Shown => scene.show(id)?,
            Visibility::Painted => scene.paint(id)?,
            Visibility::Hidden => {}
        }
        models.push((model.name.clone(), id));
    }

    let overlay = config
        .overlay
        .iter()
        .enumerate()
        .map(|(index, shape)| {
            build_shape(shape, &materials).with_context(|| format!("overlay shape {index}"))
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(
        materials = materials.len(),
        models = models.len(),
        lights = scene.lights().len(),
        overlay = overlay.len(),
        "scene loaded"
    );
    Ok(LoadedScene {
        scene,
        materials,
        models,
        overlay,
    })
}

fn build_light(light: &LightConfig) -> shading::Result<Light> {
    match light.kind {
        LightKindConfig::Point => Light::point(
            light.position,
            light.toward,
            light.color,
            light.attenuation,
            light.angle,
        ),
        LightKindConfig::Directional => Light::directional(light.toward, light.color),
    }
}

fn scalar(source: &ScalarConfig, textures: &mut Textures) -> Result<ScalarSource> {
    Ok(match source {
        ScalarConfig::Constant(value) => ScalarSource::Constant(*value),
        ScalarConfig::Channel { texture, channel } => {
            let texture = textures.get(texture)?;
            Channel::from_index(&texture, channel.index())?.into()
        }
    })
}

fn base_color(material: &MaterialConfig, textures: &mut Textures) -> Result<MapSource> {
    if let Some(color) = material.color {
        return Ok(MixChannel::solid(color)?.into());
    }
    if let Some(path) = &material.texture {
        return Ok(textures.get(path)?.into());
    }
    let Some(mix) = &material.mix else {
        anyhow::bail!("material has no color, texture or mix");
    };
    let [width, height] = mix.size;
    let composite = MixChannel::new(
        (width, height),
        scalar(&mix.red, textures)?,
        scalar(&mix.green, textures)?,
        scalar(&mix.blue, textures)?,
        scalar(&mix.alpha, textures)?,
    )?;
    Ok(composite.into())
}

fn scalar_type(kind: ScalarKind) -> ScalarType {
    match kind {
        ScalarKind::Float => ScalarType::Float,
        ScalarKind::Int => ScalarType::Int,
        ScalarKind::UInt => ScalarType::UInt,
    }
}

fn read_shader(path: Option<&PathBuf>, stage: &str) -> Result<String> {
    let path = path.with_context(|| format!("no {stage} shader file"))?;
    fs::read_to_string(path)
        .with_context(|| format!("failed to read {stage} shader {}", path.display()))
}

fn build_material(
    material: &MaterialConfig,
    scene: &Scene,
    textures: &mut Textures,
    gpu: &mut dyn GpuBackend,
) -> Result<Material> {
    if material.kind == MaterialKind::Program {
        return build_program(material, scene, textures, gpu);
    }
    let base_color = base_color(material, textures)?;
    let (surface, graph) = match material.kind {
        MaterialKind::Fixed => {
            let emission = material
                .emission
                .as_constant()
                .context("fixed materials take a constant emission")?;
            let graph = to_mermaid(&base_color);
            (share(Fpl::new(base_color.clone(), emission)?), graph)
        }
        _ => {
            let normal = match &material.normal {
                Some(path) => Some(MapSource::from(textures.get(path)?)),
                None => None,
            };
            let bsdf = Bsdf::new(
                base_color.clone(),
                scalar(&material.smoothness, textures)?,
                normal,
                scalar(&material.emission, textures)?,
            )?;
            let graph = to_mermaid(&bsdf);
            (share(AutoSp::new(bsdf, scene.queue(), gpu)?), graph)
        }
    };
    Ok(Material {
        kind: material.kind,
        surface,
        graph,
        base: Some(base_color),
        attributes: Vec::new(),
    })
}

fn build_program(
    material: &MaterialConfig,
    scene: &Scene,
    textures: &mut Textures,
    gpu: &mut dyn GpuBackend,
) -> Result<Material> {
    let vertex = read_shader(material.vertex.as_ref(), "vertex")?;
    let fragment = read_shader(material.fragment.as_ref(), "fragment")?;
    let attributes: Vec<ScalarType> =
        material.attributes.iter().copied().map(scalar_type).collect();
    let program = ShaderProgram::new(&vertex, &fragment, attributes.clone(), scene.queue(), gpu)?;

    for uniform in &material.uniforms {
        program
            .uniform(&uniform.name, scalar_type(uniform.kind), &uniform.values)
            .with_context(|| format!("invalid uniform '{}'", uniform.name))?;
    }
    let mut graph = String::new();
    for sampler in &material.samplers {
        let map = MapSource::from(textures.get(&sampler.texture)?);
        graph.push_str(&format!("%% sampler {} on unit {}\n", sampler.name, sampler.unit));
        graph.push_str(&to_mermaid(&map));
        program.uniform_tex(&sampler.name, map, sampler.unit);
    }
    tracing::debug!(
        uniforms = material.uniforms.len(),
        samplers = material.samplers.len(),
        "staged program inputs"
    );

    Ok(Material {
        kind: material.kind,
        surface: share(program),
        graph,
        base: None,
        attributes,
    })
}

fn build_model(model: &ModelConfig, materials: &BTreeMap<String, Material>) -> Result<Model> {
    let faces = model
        .faces
        .iter()
        .enumerate()
        .map(|(index, face)| {
            build_face(face, materials).with_context(|| format!("face {index}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut built = Model::new(model.position, faces);
    let [yaw, pitch, roll] = model.rotation;
    built.turn(yaw, pitch, roll);
    let [width, height, length] = model.scale;
    built.size(width, height, length);
    Ok(built)
}

fn build_face(face: &FaceConfig, materials: &BTreeMap<String, Material>) -> Result<Face> {
    let material = materials
        .get(&face.material)
        .with_context(|| format!("unknown material '{}'", face.material))?;
    let data = if material.kind == MaterialKind::Program {
        let buffers = face
            .attributes
            .iter()
            .zip(&material.attributes)
            .map(|(buffer, scalar)| attribute_buffer(buffer, *scalar))
            .collect::<Result<Vec<_>>>()?;
        VertexData::Attributes(buffers)
    } else {
        let vertices = face
            .vertices
            .iter()
            .map(|v| match v.as_slice() {
                [x, y, z, u, w] => Ok(Vertex::new([*x, *y, *z], [*u, *w])),
                [x, y, z, u, w, nx, ny, nz] => {
                    Ok(Vertex::new([*x, *y, *z], [*u, *w]).with_normal([*nx, *ny, *nz]))
                }
                other => anyhow::bail!("vertex has {} components; expected 5 or 8", other.len()),
            })
            .collect::<Result<Vec<_>>>()?;
        VertexData::Mesh(vertices)
    };
    Ok(Face::from_tag(&face.topology, &material.surface, data)?)
}

fn attribute_buffer(buffer: &AttributeConfig, scalar: ScalarType) -> Result<AttributeBuffer> {
    let values = &buffer.values;
    let data = match scalar {
        ScalarType::Float => AttributeData::Float(values.iter().map(|v| *v as f32).collect()),
        ScalarType::Int => AttributeData::Int(values.iter().map(|v| *v as i32).collect()),
        ScalarType::UInt => AttributeData::UInt(values.iter().map(|v| *v as u32).collect()),
    };
    Ok(AttributeBuffer::new(buffer.components, data)?)
}

fn build_shape(
    shape: &OverlayConfig,
    materials: &BTreeMap<String, Material>,
) -> Result<(SharedShape, [f32; 2])> {
    let fill = materials
        .get(&shape.material)
        .and_then(|material| material.base.clone())
        .with_context(|| format!("material '{}' has no base color", shape.material))?;
    let built = Shape::from_tag(&shape.topology, fill, &shape.vertices)?;
    Ok((built.share(), shape.position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shading::gpu::{Command, UniformValue};
    use shading::RecordingBackend;

    const SCENE: &str = r#"
version = 1

[materials.red]
kind = "fixed"
color = [1, 0, 0, 1]

[materials.lit]
kind = "auto"
color = [0.5, 0.5, 0.5, 1]

[[lights]]
kind = "directional"
toward = [0, -90, 0]

[[models]]
name = "pair"
position = [0, 0, -4]

[[models.faces]]
topology = "triangle_b"
material = "red"
vertices = [[0, 0, 0, 0, 0], [1, 0, 0, 1, 0], [0, 1, 0, 0, 1]]

[[models.faces]]
topology = "triangle_b"
material = "lit"
vertices = [[0, 0, 0, 0, 0], [1, 0, 0, 1, 0], [0, 1, 0, 0, 1]]

[[models]]
name = "ghost"
visibility = "hidden"
"#;

    #[test]
    fn builds_and_renders_config_scene() {
        let config = SceneConfig::from_toml_str(SCENE).unwrap();
        let mut gpu = RecordingBackend::new();
        let mut loaded = build_scene(&config, &mut gpu).unwrap();
        assert_eq!(loaded.materials.len(), 2);
        assert_eq!(loaded.models.len(), 2);
        assert!(loaded.materials["lit"].graph.contains("Bsdf"));

        let report = loaded.scene.frame(&mut gpu).unwrap();
        assert_eq!(report.models, 1);
        assert_eq!(report.faces, 2);
        assert_eq!(report.surface_binds, 2);

        loaded.release(&mut gpu).unwrap();
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_textures(), 0);
    }

    const COMPOSED: &str = r#"
version = 1
background = [0.1, 0.2, 0.3]

[materials.panel]
kind = "auto"
normal = "paint.png"
smoothness = { texture = "paint.png", channel = "g" }

[materials.panel.mix]
size = [2, 1]
red = { texture = "paint.png", channel = "r" }
green = 0.4
blue = { texture = "paint.png", channel = "b" }

[materials.wave]
kind = "program"
vertex = "wave.vert"
fragment = "wave.frag"
attributes = ["float", "uint"]
uniforms = [{ name = "amplitude", type = "float", values = [0.25] }]
samplers = [{ name = "ramp", unit = 0, texture = "paint.png" }]

[[models]]
name = "sea"

[[models.faces]]
topology = "triangle_b"
material = "wave"
attributes = [
    { components = 3, values = [0, 0, 0, 1, 0, 0, 0, 1, 0] },
    { components = 1, values = [0, 1, 2] },
]

[[overlay]]
material = "panel"
topology = "triangle_l"
position = [16, 16]
vertices = [[0, 0, 0, 0], [64, 0, 1, 0], [64, 32, 1, 1], [0, 32, 0, 1]]
"#;

    fn composed_scene(dir: &Path) -> SceneConfig {
        let paint = image::RgbImage::from_raw(2, 1, vec![204, 50, 0, 102, 60, 255]).unwrap();
        paint.save(dir.join("paint.png")).unwrap();
        fs::write(dir.join("wave.vert"), "uniform mat4 model_mat;\nvoid main() {}\n").unwrap();
        fs::write(
            dir.join("wave.frag"),
            "uniform float amplitude;\nuniform sampler2D ramp;\nvoid main() {}\n",
        )
        .unwrap();
        let path = dir.join("scene.toml");
        fs::write(&path, COMPOSED).unwrap();
        SceneConfig::load(&path).unwrap()
    }

    #[test]
    fn builds_composites_programs_and_overlay_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = composed_scene(dir.path());
        let mut gpu = RecordingBackend::new();
        let mut loaded = build_scene(&config, &mut gpu).unwrap();

        let graph = &loaded.materials["panel"].graph;
        assert!(graph.contains("[\"MixChannel 2x1\"]"), "{graph}");
        assert!(graph.contains("[\"Channel G\"]"), "{graph}");
        assert_eq!(graph.matches("[\"Texture 2x1 Rgb8\"]").count(), 1, "{graph}");
        assert!(loaded.materials["wave"].graph.contains("%% sampler ramp on unit 0"));
        assert!(loaded.materials["wave"].base.is_none());
        assert_eq!(loaded.overlay.len(), 1);
        assert_eq!(loaded.scene.background(), [0.1, 0.2, 0.3]);

        loaded.paint_overlay();
        let report = loaded.scene.frame(&mut gpu).unwrap();
        assert_eq!(report.faces, 1);
        assert_eq!(report.shapes, 1);
        assert!(gpu.commands().iter().any(|command| matches!(
            command,
            Command::SetUniform { name, value: UniformValue::Float(v), .. }
                if name == "amplitude" && *v == 0.25
        )));

        // overlay shapes are painted per frame
        assert_eq!(loaded.scene.frame(&mut gpu).unwrap().shapes, 0);

        loaded.release(&mut gpu).unwrap();
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn missing_shader_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = composed_scene(dir.path());
        if let Some(wave) = config.materials.get_mut("wave") {
            wave.fragment = Some(dir.path().join("absent.frag"));
        }
        let mut gpu = RecordingBackend::new();
        let err = build_scene(&config, &mut gpu).err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("wave") && message.contains("absent.frag"), "{message}");
    }

    #[test]
    fn missing_texture_is_reported_with_material_name() {
        let config = SceneConfig::from_toml_str(
            "version = 1\n[materials.wood]\nkind = \"fixed\"\ntexture = \"/nonexistent/wood.png\"\n",
        )
        .unwrap();
        let mut gpu = RecordingBackend::new();
        let err = build_scene(&config, &mut gpu).err().unwrap();
        assert!(format!("{err:#}").contains("wood"));
    }
}
