//! Material and shader composition core for the soup 3D engine.
//!
//! Image sources feed per-band composites, composites feed a [`Bsdf`], and a
//! [`Surface`] turns materials into GPU state at draw time:
//!
//! ```text
//!   Texture ──▶ Channel ──▶ MixChannel ──▶ Bsdf ──▶ AutoSp ─┐
//!        └──────────────────────┴──────────────▶ Fpl ───────┤
//!                                 ShaderProgram ────────────┤
//!                                                           ▼
//!   Scene::frame ──▶ stage uniforms ──▶ UpdateQueue::flush ──▶ bind/render
//!                                                                  │
//!                                             ui::Shape overlay ◀──┘
//! ```
//!
//! Everything talks to the GPU through the [`GpuBackend`] trait. The
//! [`RecordingBackend`] implementation keeps a command log and enough state
//! to check uniform writes, texture units and draw calls without a device.
//!
//! Derived data is cached by structural content hash ([`Cacheable`]); a
//! [`soft_update`] rebuilds only what changed upstream.

mod bsdf;
mod compile;
mod error;
mod geometry;
pub mod gpu;
mod hash;
mod light;
mod mermaid;
mod mix;
mod queue;
mod scene;
pub mod surface;
mod texture;
mod types;
mod ui;

pub use bsdf::{Bsdf, MapSource};
pub use compile::{auto_fragment_source, auto_vertex_source, ALPHA_CUTOUT};
pub use error::{Result, ShadingError};
pub use geometry::{Face, Model};
pub use gpu::{GpuBackend, RecordingBackend};
pub use hash::{soft_update, Cacheable, ContentHash};
pub use light::{direction_from_angles, Light, LightId, LightKind, LightSet, MAX_LIGHTS};
pub use mermaid::{to_mermaid, GraphRoot};
pub use mix::{quantize, Channel, MixChannel, MixChannelBuilder, ScalarSource};
pub use queue::{FlushReport, UpdateQueue};
pub use scene::{Camera, FrameReport, ModelId, Projection, Scene};
pub use surface::{
    share, AutoSp, Fpl, LightBinding, LightingSurface, ShaderProgram, SharedSurface, Surface,
    TransformSurface,
};
pub use texture::{PixelFormat, Texture};
pub use types::{
    AttributeBuffer, AttributeData, Capabilities, ChannelId, NodeId, ScalarType, SurfaceId,
    Topology, Vertex, VertexData, BASE_COLOR_UNIT, EMISSION_UNIT, NORMAL_UNIT, SMOOTHNESS_UNIT,
};
pub use ui::{Group, Shape, SharedShape};
