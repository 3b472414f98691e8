use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::error::{Result, ShadingError};
use crate::gpu::GpuBackend;
use crate::surface::SharedSurface;
use crate::types::{SurfaceId, Topology, Vertex, VertexData};

/// Geometry drawn with exactly one surface.
pub struct Face {
    topology: Topology,
    surface: SharedSurface,
    vertices: VertexData,
    normal: Vec3,
}

impl std::fmt::Debug for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Face")
            .field("topology", &self.topology)
            .field("surface", &self.surface.borrow().id())
            .field("vertices", &self.vertices)
            .field("normal", &self.normal)
            .finish()
    }
}

impl Face {
    /// Builds a face after checking the vertex data against the topology and
    /// the surface. Mesh faces get a flat normal from their first triangle,
    /// written into every vertex whose normal is zero.
    pub fn new(topology: Topology, surface: &SharedSurface, vertices: VertexData) -> Result<Self> {
        {
            let surface = surface.borrow();
            if surface.is_released() {
                return Err(ShadingError::Released(surface.id()));
            }
            surface.validate_vertices(&vertices)?;
        }
        let minimum = if topology.is_triangles() { 3 } else { 2 };
        let count = vertices.vertex_count();
        if count < minimum {
            return Err(ShadingError::invalid(format!(
                "{topology} faces need at least {minimum} vertices, got {count}"
            )));
        }

        let (vertices, normal) = match vertices {
            VertexData::Mesh(mut mesh) => {
                let normal = flat_normal(&mesh);
                for vertex in mesh.iter_mut().filter(|v| v.normal == [0.0; 3]) {
                    vertex.normal = normal.to_array();
                }
                (VertexData::Mesh(mesh), normal)
            }
            attributes => (attributes, Vec3::Z),
        };
        Ok(Self {
            topology,
            surface: Rc::clone(surface),
            vertices,
            normal,
        })
    }

    /// Same as [`Face::new`] with a scene topology tag such as `triangle_b`.
    pub fn from_tag(tag: &str, surface: &SharedSurface, vertices: VertexData) -> Result<Self> {
        Self::new(Topology::from_tag(tag)?, surface, vertices)
    }

    pub fn mesh(
        topology: Topology,
        surface: &SharedSurface,
        vertices: Vec<Vertex>,
    ) -> Result<Self> {
        Self::new(topology, surface, VertexData::Mesh(vertices))
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface.borrow().id()
    }

    pub fn vertices(&self) -> &VertexData {
        &self.vertices
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn render(&self, gpu: &mut dyn GpuBackend) -> Result<()> {
        self.surface
            .borrow_mut()
            .render(gpu, self.topology, &self.vertices)
    }
}

/// Normal of the plane through the first three vertices, or +Z when they
/// are degenerate.
fn flat_normal(vertices: &[Vertex]) -> Vec3 {
    let [a, b, c] = match vertices {
        [a, b, c, ..] => [a, b, c].map(|v| Vec3::from(v.position)),
        _ => return Vec3::Z,
    };
    (b - a).cross(c - a).try_normalize().unwrap_or(Vec3::Z)
}

/// A set of faces placed in the scene.
pub struct Model {
    faces: Vec<Face>,
    position: Vec3,
    /// Yaw, pitch and roll in degrees.
    rotation: [f32; 3],
    scale: Vec3,
}

impl Model {
    pub fn new(position: [f32; 3], faces: Vec<Face>) -> Self {
        Self {
            faces,
            position: Vec3::from(position),
            rotation: [0.0; 3],
            scale: Vec3::ONE,
        }
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> [f32; 3] {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn goto(&mut self, position: [f32; 3]) {
        self.position = Vec3::from(position);
    }

    pub fn turn(&mut self, yaw: f32, pitch: f32, roll: f32) {
        self.rotation = [yaw, pitch, roll];
    }

    pub fn size(&mut self, width: f32, height: f32, length: f32) {
        self.scale = Vec3::new(width, height, length);
    }

    /// `translate * Rz(roll) * Rx(pitch) * Ry(yaw) * scale`.
    pub fn model_matrix(&self) -> Mat4 {
        let [yaw, pitch, roll] = self.rotation;
        Mat4::from_translation(self.position)
            * Mat4::from_rotation_z(roll.to_radians())
            * Mat4::from_rotation_x(pitch.to_radians())
            * Mat4::from_rotation_y(yaw.to_radians())
            * Mat4::from_scale(self.scale)
    }

    /// Every distinct surface used by the faces, in first-use order.
    pub fn surfaces(&self) -> Vec<SharedSurface> {
        let mut seen: Vec<SurfaceId> = Vec::new();
        let mut surfaces = Vec::new();
        for face in &self.faces {
            let id = face.surface_id();
            if !seen.contains(&id) {
                seen.push(id);
                surfaces.push(Rc::clone(face.surface()));
            }
        }
        surfaces
    }

    /// Releases every distinct surface of the model.
    pub fn release(&self, gpu: &mut dyn GpuBackend) {
        for surface in self.surfaces() {
            surface.borrow_mut().release(gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingBackend;
    use crate::mix::MixChannel;
    use crate::surface::{share, Fpl};

    fn flat_surface() -> SharedSurface {
        share(Fpl::new(MixChannel::solid([1.0; 4]).unwrap(), 0.0).unwrap())
    }

    fn triangle() -> Vec<Vertex> {
        vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 1.0]),
        ]
    }

    #[test]
    fn computes_flat_normal_and_fills_missing_normals() {
        let surface = flat_surface();
        let mut vertices = triangle();
        vertices[2].normal = [1.0, 0.0, 0.0];
        let face = Face::mesh(Topology::Triangles, &surface, vertices).unwrap();
        assert_eq!(face.normal(), Vec3::Z);
        let VertexData::Mesh(mesh) = face.vertices() else {
            panic!("expected a mesh");
        };
        assert_eq!(mesh[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh[2].normal, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn degenerate_triangle_falls_back_to_z() {
        let surface = flat_surface();
        let collinear = vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([2.0, 0.0, 0.0], [0.0, 0.0]),
        ];
        let face = Face::mesh(Topology::Triangles, &surface, collinear).unwrap();
        assert_eq!(face.normal(), Vec3::Z);
    }

    #[test]
    fn rejects_unknown_tags_and_short_faces() {
        let surface = flat_surface();
        let err = Face::from_tag("polygon", &surface, VertexData::Mesh(triangle())).unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));
        let err = Face::mesh(Topology::Triangles, &surface, triangle()[..2].to_vec()).unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));
        let segment = VertexData::Mesh(triangle()[..2].to_vec());
        assert!(Face::from_tag("line_b", &surface, segment).is_ok());
    }

    #[test]
    fn model_matrix_composes_translation_rotation_scale() {
        let mut model = Model::new([1.0, 2.0, 3.0], Vec::new());
        model.size(2.0, 2.0, 2.0);
        model.turn(90.0, 0.0, 0.0);
        let moved = model.model_matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!(moved.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-5), "{moved:?}");
    }

    #[test]
    fn release_hits_each_shared_surface_once() {
        let surface = flat_surface();
        let faces = vec![
            Face::mesh(Topology::Triangles, &surface, triangle()).unwrap(),
            Face::mesh(Topology::Triangles, &surface, triangle()).unwrap(),
        ];
        let model = Model::new([0.0; 3], faces);
        assert_eq!(model.surfaces().len(), 1);
        let mut gpu = RecordingBackend::new();
        model.release(&mut gpu);
        assert!(surface.borrow().is_released());
        let err = Face::mesh(Topology::Triangles, &surface, triangle()).unwrap_err();
        assert!(matches!(err, ShadingError::Released(_)));
    }
}
