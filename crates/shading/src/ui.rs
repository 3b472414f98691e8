//! Screen-space overlay shapes for HUDs and simple interfaces.
//!
//! Shapes are painted per frame at a pixel origin and drawn after every
//! model under an orthographic projection with `(0, 0)` at the top-left
//! corner of the viewport and `y` growing downwards. Depth testing is off
//! while they draw, so later shapes cover earlier ones.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Mat4, Vec3};
use tracing::debug;

use crate::bsdf::MapSource;
use crate::error::{Result, ShadingError};
use crate::gpu::GpuBackend;
use crate::scene::{Projection, Scene};
use crate::surface::{Fpl, Surface};
use crate::types::{Topology, Vertex, VertexData};

/// Shape shared between the caller and the overlay queue.
pub type SharedShape = Rc<RefCell<Shape>>;

/// Flat 2D geometry filled with a color composite or a texture.
#[derive(Debug)]
pub struct Shape {
    topology: Topology,
    fill: Fpl,
    vertices: VertexData,
}

impl Shape {
    /// `vertices` are `(x, y, u, v)` records, in pixels relative to the
    /// origin the shape is painted at.
    pub fn new(
        topology: Topology,
        fill: impl Into<MapSource>,
        vertices: &[[f32; 4]],
    ) -> Result<Self> {
        let minimum = if topology.is_triangles() { 3 } else { 2 };
        if vertices.len() < minimum {
            return Err(ShadingError::invalid(format!(
                "{topology} shapes need at least {minimum} vertices, got {}",
                vertices.len()
            )));
        }
        let vertices = vertices
            .iter()
            .map(|[x, y, u, v]| Vertex::new([*x, *y, 0.0], [*u, *v]).with_normal([0.0, 0.0, 1.0]))
            .collect();
        Ok(Self {
            topology,
            fill: Fpl::new(fill, 0.0)?,
            vertices: VertexData::Mesh(vertices),
        })
    }

    /// Same as [`Shape::new`] with a topology tag such as `triangle_l`.
    pub fn from_tag(tag: &str, fill: impl Into<MapSource>, vertices: &[[f32; 4]]) -> Result<Self> {
        Self::new(Topology::from_tag(tag)?, fill, vertices)
    }

    pub fn share(self) -> SharedShape {
        Rc::new(RefCell::new(self))
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn fill(&self) -> &MapSource {
        self.fill.base_color()
    }

    pub fn set_fill(&mut self, fill: impl Into<MapSource>) {
        self.fill.set_base_color(fill);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.vertex_count()
    }

    /// Frees the fill texture. Painting a released shape fails the frame.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        self.fill.release(gpu);
    }

    pub fn is_released(&self) -> bool {
        self.fill.is_released()
    }

    pub(crate) fn draw(&mut self, gpu: &mut dyn GpuBackend, origin: [f32; 2]) -> Result<()> {
        let [x, y] = origin;
        gpu.push_transform(Mat4::from_translation(Vec3::new(x, y, 0.0)).to_cols_array());
        let outcome = self
            .fill
            .bind(gpu)
            .and_then(|()| self.fill.render(gpu, self.topology, &self.vertices));
        self.fill.unbind(gpu);
        gpu.pop_transform();
        outcome
    }
}

/// Shapes painted together around a movable origin.
pub struct Group {
    shapes: Vec<SharedShape>,
    origin: [f32; 2],
}

impl Group {
    pub fn new(shapes: Vec<SharedShape>, origin: [f32; 2]) -> Self {
        Self { shapes, origin }
    }

    pub fn shapes(&self) -> &[SharedShape] {
        &self.shapes
    }

    pub fn origin(&self) -> [f32; 2] {
        self.origin
    }

    pub fn goto(&mut self, x: f32, y: f32) {
        self.origin = [x, y];
    }

    pub fn shift(&mut self, dx: f32, dy: f32) {
        self.origin[0] += dx;
        self.origin[1] += dy;
    }

    /// Paints every shape of the group for the next frame.
    pub fn display(&self, scene: &mut Scene) {
        let [x, y] = self.origin;
        for shape in &self.shapes {
            scene.paint_ui(shape, x, y);
        }
        debug!(shapes = self.shapes.len(), x, y, "painted overlay group");
    }
}

/// Pixel-space orthographic projection for the viewport of `projection`.
pub(crate) fn screen_projection(projection: &Projection) -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, projection.width, projection.height, 0.0, -1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Capability, Command, RecordingBackend};
    use crate::mix::MixChannel;

    fn square(rgba: [f32; 4]) -> SharedShape {
        let vertices = [
            [0.0, 0.0, 0.0, 0.0],
            [10.0, 0.0, 1.0, 0.0],
            [10.0, 10.0, 1.0, 1.0],
            [0.0, 10.0, 0.0, 1.0],
        ];
        Shape::new(Topology::TriangleFan, MixChannel::solid(rgba).unwrap(), &vertices)
            .unwrap()
            .share()
    }

    #[test]
    fn rejects_short_shapes_and_unknown_tags() {
        let fill = MixChannel::solid([1.0; 4]).unwrap();
        let err = Shape::new(Topology::Triangles, fill.clone(), &[[0.0; 4]; 2]).unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));
        assert!(Shape::from_tag("line_s", fill.clone(), &[[0.0; 4]; 2]).is_ok());
        assert!(Shape::from_tag("quad", fill, &[[0.0; 4]; 4]).is_err());
    }

    #[test]
    fn origin_maps_to_viewport_pixels() {
        let mut scene = Scene::new();
        scene
            .set_projection(Projection {
                width: 640.0,
                height: 480.0,
                ..Projection::default()
            })
            .unwrap();
        let mut gpu = RecordingBackend::new();
        scene.paint_ui(&square([1.0; 4]), 100.0, 50.0);
        let report = scene.frame(&mut gpu).unwrap();
        assert_eq!(report.shapes, 1);

        let (projection, view) = gpu.fixed_camera().unwrap();
        let translation = gpu
            .commands()
            .iter()
            .rev()
            .find_map(|command| match command {
                Command::PushTransform { matrix } => Some(*matrix),
                _ => None,
            })
            .unwrap();
        let clip = Mat4::from_cols_array(&projection)
            * Mat4::from_cols_array(&view)
            * Mat4::from_cols_array(&translation);
        let corner = clip.project_point3(Vec3::ZERO);
        assert!((corner.x - (-0.6875)).abs() < 1e-5, "{corner:?}");
        assert!((corner.y - (1.0 - 100.0 / 480.0)).abs() < 1e-5, "{corner:?}");
        assert!(!gpu.enabled_capabilities().contains(&Capability::DepthTest));
    }

    #[test]
    fn overlay_draws_after_models_in_paint_order_for_one_frame() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let mut group = Group::new(
            vec![square([1.0, 0.0, 0.0, 1.0]), square([0.0, 0.0, 1.0, 1.0])],
            [0.0, 0.0],
        );
        group.goto(20.0, 20.0);
        group.shift(5.0, -5.0);
        assert_eq!(group.origin(), [25.0, 15.0]);
        group.display(&mut scene);

        assert_eq!(scene.frame(&mut gpu).unwrap().shapes, 2);
        let colors: Vec<[f32; 4]> = gpu
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::SetColor { rgba } => Some(*rgba),
                _ => None,
            })
            .collect();
        assert_eq!(colors, vec![[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]]);
        assert_eq!(gpu.transform_depth(), 0);
        assert_eq!(scene.frame(&mut gpu).unwrap().shapes, 0);
    }

    #[test]
    fn released_shape_fails_the_frame() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let shape = square([1.0; 4]);
        shape.borrow_mut().release(&mut gpu);
        assert!(shape.borrow().is_released());
        scene.paint_ui(&shape, 0.0, 0.0);
        assert!(matches!(scene.frame(&mut gpu), Err(ShadingError::Released(_))));
        assert_eq!(gpu.transform_depth(), 0);
        assert_eq!(scene.frame(&mut gpu).unwrap().shapes, 0);
    }
}
