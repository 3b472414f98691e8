use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const TOPOLOGY_TAGS: [&str; 6] = [
    "line_b",
    "line_s",
    "line_l",
    "triangle_b",
    "triangle_s",
    "triangle_l",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    pub version: u32,
    #[serde(default = "default_ambient")]
    pub ambient: [f32; 3],
    /// Color every frame is cleared to.
    #[serde(default)]
    pub background: [f32; 3],
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub materials: BTreeMap<String, MaterialConfig>,
    #[serde(default)]
    pub lights: Vec<LightConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Screen-space shapes drawn over the scene every frame.
    #[serde(default)]
    pub overlay: Vec<OverlayConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fov: default_fov(),
            near: default_near(),
            far: default_far(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub roll: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialKind {
    /// Fixed-pipeline flat color or texture.
    Fixed,
    /// Generated lit program.
    Auto,
    /// Hand-written vertex and fragment shaders.
    Program,
}

/// A texture band selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
    R,
    G,
    B,
    A,
}

impl ChannelName {
    pub fn index(self) -> u32 {
        match self {
            ChannelName::R => 0,
            ChannelName::G => 1,
            ChannelName::B => 2,
            ChannelName::A => 3,
        }
    }
}

/// A scalar input: a constant in `[0, 1]` or one band of an image file,
/// written `{ texture = "rough.png", channel = "r" }`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScalarConfig {
    Constant(f32),
    Channel { texture: PathBuf, channel: ChannelName },
}

impl ScalarConfig {
    pub fn as_constant(&self) -> Option<f32> {
        match self {
            ScalarConfig::Constant(value) => Some(*value),
            ScalarConfig::Channel { .. } => None,
        }
    }

    fn texture_mut(&mut self) -> Option<&mut PathBuf> {
        match self {
            ScalarConfig::Constant(_) => None,
            ScalarConfig::Channel { texture, .. } => Some(texture),
        }
    }

    fn validate(&self, what: &str) -> Result<(), ConfigError> {
        match self {
            ScalarConfig::Constant(value) => check_unit_values(what, &[*value]),
            ScalarConfig::Channel { texture, .. } => check_path(what, texture),
        }
    }
}

/// A per-band RGBA composite at a fixed resolution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MixConfig {
    pub size: [u32; 2],
    pub red: ScalarConfig,
    pub green: ScalarConfig,
    pub blue: ScalarConfig,
    #[serde(default = "default_alpha")]
    pub alpha: ScalarConfig,
}

impl MixConfig {
    pub fn slots(&self) -> [(&'static str, &ScalarConfig); 4] {
        [
            ("red", &self.red),
            ("green", &self.green),
            ("blue", &self.blue),
            ("alpha", &self.alpha),
        ]
    }

    fn slots_mut(&mut self) -> [&mut ScalarConfig; 4] {
        [
            &mut self.red,
            &mut self.green,
            &mut self.blue,
            &mut self.alpha,
        ]
    }
}

/// Scalar type of a shader program attribute or uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Float,
    Int,
    UInt,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniformConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarKind,
    /// One to four components.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    pub name: String,
    pub unit: u32,
    pub texture: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterialConfig {
    pub kind: MaterialKind,
    /// Constant RGBA base color.
    #[serde(default)]
    pub color: Option<[f32; 4]>,
    /// Image file used as the base color; relative paths here and in every
    /// other path field resolve against the scene file's directory when
    /// loaded with [`SceneConfig::load`].
    #[serde(default)]
    pub texture: Option<PathBuf>,
    /// Base color composed band by band.
    #[serde(default)]
    pub mix: Option<MixConfig>,
    /// Tangent-space normal map for `auto` materials.
    #[serde(default)]
    pub normal: Option<PathBuf>,
    #[serde(default = "default_emission")]
    pub emission: ScalarConfig,
    #[serde(default = "default_smoothness")]
    pub smoothness: ScalarConfig,
    /// Vertex shader source file for `program` materials.
    #[serde(default)]
    pub vertex: Option<PathBuf>,
    /// Fragment shader source file for `program` materials.
    #[serde(default)]
    pub fragment: Option<PathBuf>,
    /// Attribute buffer types, bound to locations 0, 1, ...
    #[serde(default)]
    pub attributes: Vec<ScalarKind>,
    #[serde(default)]
    pub uniforms: Vec<UniformConfig>,
    #[serde(default)]
    pub samplers: Vec<SamplerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKindConfig {
    Point,
    Directional,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LightConfig {
    pub kind: LightKindConfig,
    #[serde(default)]
    pub position: [f32; 3],
    /// Yaw, pitch and roll in degrees.
    #[serde(default)]
    pub toward: [f32; 3],
    #[serde(default = "default_light_color")]
    pub color: [f32; 3],
    #[serde(default)]
    pub attenuation: f32,
    /// Full cone angle in degrees for point lights.
    #[serde(default = "default_light_angle")]
    pub angle: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Drawn every frame.
    #[default]
    Shown,
    /// Drawn in the first frame only.
    Painted,
    Hidden,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub position: [f32; 3],
    /// Yaw, pitch and roll in degrees.
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: [f32; 3],
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub faces: Vec<FaceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FaceConfig {
    /// One of `line_b`, `line_s`, `line_l`, `triangle_b`, `triangle_s`, `triangle_l`.
    pub topology: String,
    pub material: String,
    /// `[x, y, z, u, v]` or `[x, y, z, u, v, nx, ny, nz]` per vertex, for
    /// `fixed` and `auto` materials.
    #[serde(default)]
    pub vertices: Vec<Vec<f32>>,
    /// One buffer per declared attribute, for `program` materials.
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttributeConfig {
    /// Components per vertex, 1 to 4.
    pub components: u32,
    pub values: Vec<f64>,
}

impl AttributeConfig {
    pub fn vertex_count(&self) -> usize {
        self.values.len() / self.components.max(1) as usize
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    /// A `fixed` or `auto` material whose base color fills the shape.
    pub material: String,
    pub topology: String,
    /// Pixel offset from the top-left corner of the viewport.
    #[serde(default)]
    pub position: [f32; 2],
    /// `[x, y, u, v]` per vertex, in pixels relative to `position`.
    pub vertices: Vec<[f32; 4]>,
}

fn default_ambient() -> [f32; 3] {
    [0.2, 0.2, 0.2]
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_fov() -> f32 {
    45.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    1024.0
}

fn default_smoothness() -> ScalarConfig {
    ScalarConfig::Constant(0.5)
}

fn default_emission() -> ScalarConfig {
    ScalarConfig::Constant(0.0)
}

fn default_alpha() -> ScalarConfig {
    ScalarConfig::Constant(1.0)
}

fn default_light_color() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_light_angle() -> f32 {
    180.0
}

fn default_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

impl SceneConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SceneConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a scene file, resolving image and shader paths
    /// against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&input)?;
        if let Some(base) = path.parent() {
            for material in config.materials.values_mut() {
                for file in material.paths_mut() {
                    if file.is_relative() {
                        *file = base.join(&*file);
                    }
                }
            }
        }
        Ok(config)
    }

    pub fn material(&self, name: &str) -> Option<&MaterialConfig> {
        self.materials.get(name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        check_unit_values("ambient", &self.ambient)?;
        check_unit_values("background", &self.background)?;
        self.display.validate()?;

        for (name, material) in &self.materials {
            material.validate(name)?;
        }

        for (index, light) in self.lights.iter().enumerate() {
            light.validate(index)?;
        }

        let mut names = Vec::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(ConfigError::Invalid("model name may not be empty".into()));
            }
            if names.contains(&model.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "model '{}' is defined more than once",
                    model.name
                )));
            }
            names.push(model.name.as_str());

            for (index, face) in model.faces.iter().enumerate() {
                self.validate_face(&model.name, index, face)?;
            }
        }

        for (index, shape) in self.overlay.iter().enumerate() {
            self.validate_overlay(index, shape)?;
        }

        Ok(())
    }

    fn validate_overlay(&self, index: usize, shape: &OverlayConfig) -> Result<(), ConfigError> {
        let context = format!("overlay shape {index}");
        let minimum = check_topology(&context, &shape.topology)?;
        match self.materials.get(&shape.material) {
            None => {
                return Err(ConfigError::Invalid(format!(
                    "{context} references unknown material '{}'",
                    shape.material
                )));
            }
            Some(material) if material.kind == MaterialKind::Program => {
                return Err(ConfigError::Invalid(format!(
                    "{context} cannot be filled by program material '{}'",
                    shape.material
                )));
            }
            Some(_) => {}
        }
        if shape.vertices.len() < minimum {
            return Err(ConfigError::Invalid(format!(
                "{context} needs at least {minimum} vertices, got {}",
                shape.vertices.len()
            )));
        }
        Ok(())
    }

    fn validate_face(
        &self,
        model: &str,
        index: usize,
        face: &FaceConfig,
    ) -> Result<(), ConfigError> {
        let context = format!("model '{model}' face {index}");
        let minimum = check_topology(&context, &face.topology)?;
        let Some(material) = self.materials.get(&face.material) else {
            return Err(ConfigError::Invalid(format!(
                "{context} references unknown material '{}'",
                face.material
            )));
        };
        if material.kind == MaterialKind::Program {
            return validate_attribute_face(&context, minimum, material, face);
        }
        if !face.attributes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{context} uses attribute buffers, which only program materials draw"
            )));
        }
        if face.vertices.len() < minimum {
            return Err(ConfigError::Invalid(format!(
                "{context} needs at least {minimum} vertices, got {}",
                face.vertices.len()
            )));
        }
        if let Some(bad) = face.vertices.iter().find(|v| v.len() != 5 && v.len() != 8) {
            return Err(ConfigError::Invalid(format!(
                "{context} has a vertex with {} components; expected 5 or 8",
                bad.len()
            )));
        }
        Ok(())
    }
}

fn validate_attribute_face(
    context: &str,
    minimum: usize,
    material: &MaterialConfig,
    face: &FaceConfig,
) -> Result<(), ConfigError> {
    if !face.vertices.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{context} draws with a program material and takes attributes, not vertices"
        )));
    }
    if face.attributes.len() != material.attributes.len() {
        return Err(ConfigError::Invalid(format!(
            "{context} supplies {} attribute buffers; material '{}' declares {}",
            face.attributes.len(),
            face.material,
            material.attributes.len()
        )));
    }
    for (slot, buffer) in face.attributes.iter().enumerate() {
        if !(1..=4).contains(&buffer.components) {
            return Err(ConfigError::Invalid(format!(
                "{context} attribute {slot} must have 1 to 4 components"
            )));
        }
        if buffer.values.len() % buffer.components as usize != 0 {
            return Err(ConfigError::Invalid(format!(
                "{context} attribute {slot} has {} values, not a multiple of {}",
                buffer.values.len(),
                buffer.components
            )));
        }
    }
    let counts: Vec<usize> = face.attributes.iter().map(AttributeConfig::vertex_count).collect();
    if counts.windows(2).any(|pair| pair[0] != pair[1]) {
        return Err(ConfigError::Invalid(format!(
            "{context} attribute buffers disagree on the vertex count: {counts:?}"
        )));
    }
    let count = counts.first().copied().unwrap_or(0);
    if count < minimum {
        return Err(ConfigError::Invalid(format!(
            "{context} needs at least {minimum} vertices, got {count}"
        )));
    }
    Ok(())
}

/// Checks a topology tag and returns the minimum vertex count it needs.
fn check_topology(context: &str, topology: &str) -> Result<usize, ConfigError> {
    if !TOPOLOGY_TAGS.contains(&topology) {
        return Err(ConfigError::Invalid(format!(
            "{context} has unknown topology '{topology}'; expected one of {}",
            TOPOLOGY_TAGS.join(", ")
        )));
    }
    Ok(if topology.starts_with("triangle") { 3 } else { 2 })
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("display size must be non-zero".into()));
        }
        if !(self.fov > 0.0 && self.fov < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "display.fov must be in (0, 180), got {}",
                self.fov
            )));
        }
        if !(self.near > 0.0 && self.near < self.far) {
            return Err(ConfigError::Invalid(format!(
                "display clip planes need 0 < near < far, got near={} far={}",
                self.near, self.far
            )));
        }
        Ok(())
    }
}

impl MaterialConfig {
    fn paths_mut(&mut self) -> Vec<&mut PathBuf> {
        let MaterialConfig {
            texture,
            mix,
            normal,
            emission,
            smoothness,
            vertex,
            fragment,
            samplers,
            ..
        } = self;
        let mut paths: Vec<&mut PathBuf> = [texture, normal, vertex, fragment]
            .into_iter()
            .filter_map(Option::as_mut)
            .collect();
        if let Some(mix) = mix {
            paths.extend(mix.slots_mut().into_iter().filter_map(ScalarConfig::texture_mut));
        }
        paths.extend([emission, smoothness].into_iter().filter_map(ScalarConfig::texture_mut));
        paths.extend(samplers.iter_mut().map(|sampler| &mut sampler.texture));
        paths
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let what = |field: &str| format!("material '{name}' {field}");
        match self.kind {
            MaterialKind::Fixed | MaterialKind::Auto => self.validate_base_color(name)?,
            MaterialKind::Program => self.validate_program(name)?,
        }
        if self.kind != MaterialKind::Auto && self.normal.is_some() {
            return Err(ConfigError::Invalid(format!(
                "material '{name}' sets a normal map, which only auto materials use"
            )));
        }
        if let Some(normal) = &self.normal {
            check_path(&what("normal"), normal)?;
        }
        if self.kind == MaterialKind::Fixed && self.emission.as_constant().is_none() {
            return Err(ConfigError::Invalid(format!(
                "material '{name}' emission must be a constant for fixed materials"
            )));
        }
        self.emission.validate(&what("emission"))?;
        self.smoothness.validate(&what("smoothness"))?;
        Ok(())
    }

    fn validate_base_color(&self, name: &str) -> Result<(), ConfigError> {
        match (&self.color, &self.texture, &self.mix) {
            (Some(color), None, None) => {
                check_unit_values(&format!("material '{name}' color"), color)
            }
            (None, Some(texture), None) => {
                check_path(&format!("material '{name}' texture"), texture)
            }
            (None, None, Some(mix)) => {
                if mix.size.contains(&0) {
                    return Err(ConfigError::Invalid(format!(
                        "material '{name}' mix size must be non-zero"
                    )));
                }
                for (slot, source) in mix.slots() {
                    source.validate(&format!("material '{name}' mix {slot}"))?;
                }
                Ok(())
            }
            _ => Err(ConfigError::Invalid(format!(
                "material '{name}' must set exactly one of color, texture or mix"
            ))),
        }
    }

    fn validate_program(&self, name: &str) -> Result<(), ConfigError> {
        if self.color.is_some() || self.texture.is_some() || self.mix.is_some() {
            return Err(ConfigError::Invalid(format!(
                "material '{name}' is a program; bind images through samplers instead"
            )));
        }
        for (field, file) in [("vertex", &self.vertex), ("fragment", &self.fragment)] {
            match file {
                Some(file) => check_path(&format!("material '{name}' {field}"), file)?,
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "material '{name}' needs a {field} shader file"
                    )));
                }
            }
        }
        if self.attributes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "material '{name}' must declare at least one attribute buffer"
            )));
        }
        for uniform in &self.uniforms {
            if !(1..=4).contains(&uniform.values.len()) {
                return Err(ConfigError::Invalid(format!(
                    "material '{name}' uniform '{}' needs 1 to 4 values, got {}",
                    uniform.name,
                    uniform.values.len()
                )));
            }
        }
        for sampler in &self.samplers {
            check_path(&format!("material '{name}' sampler '{}'", sampler.name), &sampler.texture)?;
        }
        Ok(())
    }
}

impl LightConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        check_unit_values(&format!("light {index} color"), &self.color)?;
        if self.kind == LightKindConfig::Point {
            if !(self.attenuation >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "light {index} attenuation must be >= 0"
                )));
            }
            if !(self.angle > 0.0 && self.angle <= 360.0) {
                return Err(ConfigError::Invalid(format!(
                    "light {index} angle must be in (0, 360]"
                )));
            }
        }
        Ok(())
    }
}

fn check_path(what: &str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!("{what} path may not be empty")));
    }
    Ok(())
}

fn check_unit_values(what: &str, values: &[f32]) -> Result<(), ConfigError> {
    match values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
        Some(value) => Err(ConfigError::Invalid(format!(
            "{what} must be within [0, 1], got {value}"
        ))),
        None => Ok(()),
    }
}
