use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

use crate::error::{Result, ShadingError};

/// Texture unit the base color map is always bound to.
pub const BASE_COLOR_UNIT: u32 = 0;
/// Texture unit the normal map is always bound to.
pub const NORMAL_UNIT: u32 = 1;
/// Texture unit the smoothness map is always bound to.
pub const SMOOTHNESS_UNIT: u32 = 3;
/// Texture unit the emission map is always bound to.
pub const EMISSION_UNIT: u32 = 4;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a surface, allocated once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub(crate) fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of a node in the shading graph (texture, channel, mix, bsdf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primitive assembly mode for a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Disconnected line segments (`line_b`).
    Lines,
    /// Connected line strip (`line_s`).
    LineStrip,
    /// Closed line loop (`line_l`).
    LineLoop,
    /// Disconnected triangles (`triangle_b`).
    Triangles,
    /// Triangle strip (`triangle_s`).
    TriangleStrip,
    /// Triangle fan (`triangle_l`).
    TriangleFan,
}

impl Topology {
    pub const ALL: [Topology; 6] = [
        Topology::Lines,
        Topology::LineStrip,
        Topology::LineLoop,
        Topology::Triangles,
        Topology::TriangleStrip,
        Topology::TriangleFan,
    ];

    /// Parses one of the scene-facing topology tags.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "line_b" => Ok(Topology::Lines),
            "line_s" => Ok(Topology::LineStrip),
            "line_l" => Ok(Topology::LineLoop),
            "triangle_b" => Ok(Topology::Triangles),
            "triangle_s" => Ok(Topology::TriangleStrip),
            "triangle_l" => Ok(Topology::TriangleFan),
            other => Err(ShadingError::invalid(format!("unknown shape_type: {other}"))),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Topology::Lines => "line_b",
            Topology::LineStrip => "line_s",
            Topology::LineLoop => "line_l",
            Topology::Triangles => "triangle_b",
            Topology::TriangleStrip => "triangle_s",
            Topology::TriangleFan => "triangle_l",
        }
    }

    pub fn is_triangles(self) -> bool {
        matches!(
            self,
            Topology::Triangles | Topology::TriangleStrip | Topology::TriangleFan
        )
    }
}

impl FromStr for Topology {
    type Err = ShadingError;

    fn from_str(s: &str) -> Result<Self> {
        Topology::from_tag(s)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Band selector used by [`Channel`](crate::Channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    R,
    G,
    B,
    A,
}

impl ChannelId {
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(ChannelId::R),
            1 => Ok(ChannelId::G),
            2 => Ok(ChannelId::B),
            3 => Ok(ChannelId::A),
            other => Err(ShadingError::invalid(format!(
                "channel index {other} is outside 0..=3"
            ))),
        }
    }

    pub fn index(self) -> usize {
        match self {
            ChannelId::R => 0,
            ChannelId::G => 1,
            ChannelId::B => 2,
            ChannelId::A => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelId::R => "R",
            ChannelId::G => "G",
            ChannelId::B => "B",
            ChannelId::A => "A",
        }
    }
}

/// Capability flags a surface advertises to the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// The surface consumes model/view/projection matrices.
    pub supports_transform: bool,
    /// The surface consumes the scene light list.
    pub supports_lighting: bool,
}

/// Interleaved vertex consumed by the fixed pipeline and generated programs.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex {
    pub fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            uv,
            normal: [0.0; 3],
        }
    }

    pub fn with_normal(mut self, normal: [f32; 3]) -> Self {
        self.normal = normal;
        self
    }

    /// Builds a vertex from a flat `(x, y, z[, u, v[, nx, ny, nz]])` record.
    pub fn from_slice(values: &[f32]) -> Result<Self> {
        match values.len() {
            3 => Ok(Vertex::new([values[0], values[1], values[2]], [0.0, 0.0])),
            5 => Ok(Vertex::new(
                [values[0], values[1], values[2]],
                [values[3], values[4]],
            )),
            8 => Ok(Vertex::new(
                [values[0], values[1], values[2]],
                [values[3], values[4]],
            )
            .with_normal([values[5], values[6], values[7]])),
            n => Err(ShadingError::invalid(format!(
                "vertex record must have 3, 5 or 8 components, got {n}"
            ))),
        }
    }
}

/// Scalar type of a hand-declared vertex attribute buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Float,
    Int,
    UInt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeData {
    Float(Vec<f32>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
}

impl AttributeData {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            AttributeData::Float(_) => ScalarType::Float,
            AttributeData::Int(_) => ScalarType::Int,
            AttributeData::UInt(_) => ScalarType::UInt,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AttributeData::Float(values) => values.len(),
            AttributeData::Int(values) => values.len(),
            AttributeData::UInt(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttributeData::Float(values) => bytemuck::cast_slice(values),
            AttributeData::Int(values) => bytemuck::cast_slice(values),
            AttributeData::UInt(values) => bytemuck::cast_slice(values),
        }
    }
}

/// One per-vertex attribute stream for a [`ShaderProgram`](crate::ShaderProgram).
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeBuffer {
    components: u32,
    data: AttributeData,
}

impl AttributeBuffer {
    pub fn new(components: u32, data: AttributeData) -> Result<Self> {
        if !(1..=4).contains(&components) {
            return Err(ShadingError::invalid(format!(
                "attribute buffers carry 1-4 components per vertex, got {components}"
            )));
        }
        if data.len() % components as usize != 0 {
            return Err(ShadingError::invalid(format!(
                "attribute buffer of {} scalars is not a multiple of {components} components",
                data.len()
            )));
        }
        Ok(Self { components, data })
    }

    pub fn floats(components: u32, values: Vec<f32>) -> Result<Self> {
        Self::new(components, AttributeData::Float(values))
    }

    pub fn components(&self) -> u32 {
        self.components
    }

    pub fn data(&self) -> &AttributeData {
        &self.data
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.data.scalar_type()
    }

    pub fn vertex_count(&self) -> usize {
        self.data.len() / self.components as usize
    }
}

/// Vertex payload carried by a face.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexData {
    /// Interleaved position/uv/normal vertices for FPL and AutoSP surfaces.
    Mesh(Vec<Vertex>),
    /// Independent attribute streams for hand-written shader programs.
    Attributes(Vec<AttributeBuffer>),
}

impl VertexData {
    pub fn vertex_count(&self) -> usize {
        match self {
            VertexData::Mesh(vertices) => vertices.len(),
            VertexData::Attributes(buffers) => {
                buffers.first().map(AttributeBuffer::vertex_count).unwrap_or(0)
            }
        }
    }
}
