//! Scene ownership and the per-frame draw sequence.
//!
//! A frame runs in a fixed order:
//!
//! ```text
//!   clear ──▶ shown + painted ──▶ sort back-to-front ──▶ stage matrices/lights
//!                                                               │ (queued)
//!                                                               ▼
//!   fixed camera ◀──────────────────────────────────────── flush queue once
//!        │
//!        ▼
//!   bind per surface run ──▶ draw faces ──▶ end_frame ──▶ overlay shapes
//! ```
//!
//! Staging only enqueues deferred updates on the scene's queue; the single
//! flush applies them before any geometry is submitted. Overlay shapes draw
//! last, in screen space, without depth testing.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use glam::{Mat4, Vec3};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, ShadingError};
use crate::geometry::Model;
use crate::gpu::{Capability, GpuBackend};
use crate::light::{orient, LightSet};
use crate::mix::validate_unit;
use crate::queue::{FlushReport, UpdateQueue};
use crate::surface::SharedSurface;
use crate::types::SurfaceId;
use crate::ui::{screen_projection, SharedShape};

/// Generation-checked handle to a model owned by a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    model: Option<Model>,
}

/// Camera pose: a position plus yaw, pitch and roll in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Camera {
    pub position: [f32; 3],
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Camera {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn goto(&mut self, position: [f32; 3]) {
        self.position = position;
    }

    pub fn turn(&mut self, yaw: f32, pitch: f32, roll: f32) {
        self.yaw = yaw;
        self.pitch = pitch;
        self.roll = roll;
    }

    /// Looks down -Z with +Y up, after applying roll, pitch and yaw.
    pub fn view_matrix(&self) -> Mat4 {
        let eye = Vec3::from(self.position);
        let angles = [self.yaw, self.pitch, self.roll];
        let forward = orient(Vec3::NEG_Z, angles);
        let up = orient(Vec3::Y, angles);
        Mat4::look_at_rh(eye, eye + forward, up)
    }
}

/// Perspective projection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub width: f32,
    pub height: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov: 45.0,
            width: 1920.0,
            height: 1080.0,
            near: 0.1,
            far: 1024.0,
        }
    }
}

impl Projection {
    pub fn validate(&self) -> Result<()> {
        if !(self.fov > 0.0 && self.fov < 180.0) {
            return Err(ShadingError::invalid(format!(
                "field of view must be in (0, 180) degrees, got {}",
                self.fov
            )));
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(ShadingError::invalid(format!(
                "viewport must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.near > 0.0 && self.near < self.far) {
            return Err(ShadingError::invalid(format!(
                "clip planes need 0 < near < far, got near={} far={}",
                self.near, self.far
            )));
        }
        Ok(())
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(
            self.fov.to_radians(),
            self.width / self.height,
            self.near,
            self.far,
        )
    }
}

/// Summary of one [`Scene::frame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub models: usize,
    pub faces: usize,
    pub surface_binds: usize,
    pub shapes: usize,
    pub lights_truncated: usize,
    pub flush: FlushReport,
}

/// Owns models, lights, camera and the update queue of one render context.
pub struct Scene {
    queue: UpdateQueue,
    slots: Vec<Slot>,
    free: Vec<u32>,
    shown: Vec<ModelId>,
    painted: Vec<ModelId>,
    overlay: Vec<(SharedShape, [f32; 2])>,
    lights: LightSet,
    camera: Camera,
    projection: Projection,
    background: [f32; 3],
    frames: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            queue: UpdateQueue::new(),
            slots: Vec::new(),
            free: Vec::new(),
            shown: Vec::new(),
            painted: Vec::new(),
            overlay: Vec::new(),
            lights: LightSet::new(),
            camera: Camera::default(),
            projection: Projection::default(),
            background: [0.0; 3],
            frames: 0,
        }
    }

    /// The queue surfaces built for this scene must stage their updates on.
    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    pub fn add_model(&mut self, model: Model) -> ModelId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.model = Some(model);
                ModelId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    model: Some(model),
                });
                ModelId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub fn model(&self, id: ModelId) -> Result<&Model> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.model.as_ref())
            .ok_or_else(|| stale(id))
    }

    pub fn model_mut(&mut self, id: ModelId) -> Result<&mut Model> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.model.as_mut())
            .ok_or_else(|| stale(id))
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.model(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.model.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draws the model every frame until hidden.
    pub fn show(&mut self, id: ModelId) -> Result<()> {
        self.model(id)?;
        if !self.shown.contains(&id) {
            self.shown.push(id);
        }
        Ok(())
    }

    pub fn hide(&mut self, id: ModelId) -> Result<()> {
        self.model(id)?;
        self.shown.retain(|shown| *shown != id);
        Ok(())
    }

    pub fn is_shown(&self, id: ModelId) -> bool {
        self.shown.contains(&id)
    }

    /// Draws the model in the next frame only.
    pub fn paint(&mut self, id: ModelId) -> Result<()> {
        self.model(id)?;
        self.painted.push(id);
        Ok(())
    }

    /// Draws `shape` in the next frame only, offset by `(x, y)` pixels from
    /// the top-left corner of the viewport.
    pub fn paint_ui(&mut self, shape: &SharedShape, x: f32, y: f32) {
        self.overlay.push((Rc::clone(shape), [x, y]));
    }

    /// Removes the model and deep-releases its surfaces.
    pub fn remove(&mut self, id: ModelId, gpu: &mut dyn GpuBackend) -> Result<Model> {
        self.model(id)?;
        let slot = &mut self.slots[id.index as usize];
        let model = slot.model.take().ok_or_else(|| stale(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.shown.retain(|shown| *shown != id);
        self.painted.retain(|painted| *painted != id);
        model.release(gpu);
        debug!(model = id.index, "removed model");
        Ok(model)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn set_projection(&mut self, projection: Projection) -> Result<()> {
        projection.validate()?;
        self.projection = projection;
        Ok(())
    }

    pub fn background(&self) -> [f32; 3] {
        self.background
    }

    /// Color the frame is cleared to; every component must be in `[0, 1]`.
    pub fn set_background(&mut self, rgb: [f32; 3]) -> Result<()> {
        for (name, value) in ["red", "green", "blue"].into_iter().zip(rgb) {
            validate_unit(name, value)?;
        }
        self.background = rgb;
        Ok(())
    }

    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut LightSet {
        &mut self.lights
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Shown and painted models, deduplicated, farthest from the camera first.
    fn draw_list(&self) -> Vec<ModelId> {
        let mut seen = HashSet::new();
        let eye = Vec3::from(self.camera.position);
        let mut list: Vec<(ModelId, f32)> = self
            .shown
            .iter()
            .chain(&self.painted)
            .copied()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| {
                let model = self.model(id).ok()?;
                Some((id, model.position().distance(eye)))
            })
            .collect();
        list.sort_by(|a, b| b.1.total_cmp(&a.1));
        list.into_iter().map(|(id, _)| id).collect()
    }

    /// Stages matrices and lights on every transform/lighting-capable surface
    /// of the drawn models. Returns the number of lights dropped.
    fn stage(&self, draw_list: &[ModelId], view: Mat4, projection: Mat4) -> Result<usize> {
        let lights = self.lights.to_vec();
        let ambient = self.lights.ambient();

        let mut staged: HashMap<SurfaceId, ModelId> = HashMap::new();
        let mut truncated = 0;
        for id in draw_list {
            let model = self.model(*id)?;
            let model_matrix = model.model_matrix();
            for surface in model.surfaces() {
                let mut surface = surface.borrow_mut();
                let surface_id = surface.id();
                let first_use = match staged.get(&surface_id) {
                    None => true,
                    Some(owner) if owner == id => false,
                    Some(_) => {
                        warn!(
                            surface = %surface_id,
                            "surface shared by several drawn models; the last model matrix wins"
                        );
                        false
                    }
                };
                staged.insert(surface_id, *id);
                if let Some(transform) = surface.as_transform_mut() {
                    transform.set_model_mat(model_matrix);
                    if first_use {
                        transform.set_view_mat(view);
                        transform.set_projection_mat(projection);
                    }
                }
                if first_use {
                    if let Some(lighting) = surface.as_lighting_mut() {
                        truncated += lighting.set_light(&lights).truncated;
                        lighting.set_ambient(ambient);
                    }
                }
            }
        }
        Ok(truncated)
    }

    /// Runs one frame against `gpu`. Painted models and overlay shapes are
    /// cleared afterwards, also when the frame fails.
    pub fn frame(&mut self, gpu: &mut dyn GpuBackend) -> Result<FrameReport> {
        let outcome = self.run_frame(gpu);
        self.painted.clear();
        self.overlay.clear();
        self.frames += 1;
        outcome
    }

    fn run_frame(&mut self, gpu: &mut dyn GpuBackend) -> Result<FrameReport> {
        let [r, g, b] = self.background;
        gpu.clear([r, g, b, 1.0]);
        gpu.enable(Capability::DepthTest);

        let view = self.camera.view_matrix();
        let projection = self.projection.matrix();
        let draw_list = self.draw_list();
        let lights_truncated = self.stage(&draw_list, view, projection)?;
        let flush = self.queue.flush(gpu)?;
        gpu.set_fixed_camera(projection.to_cols_array(), view.to_cols_array());

        let mut report = FrameReport {
            frame: self.frames,
            models: draw_list.len(),
            lights_truncated,
            flush,
            ..FrameReport::default()
        };
        let mut drawn = Vec::new();
        for id in &draw_list {
            let model = self.model(*id)?;
            gpu.push_transform(model.model_matrix().to_cols_array());
            let outcome = draw_model(gpu, model, &mut report, &mut drawn);
            gpu.pop_transform();
            outcome?;
        }
        for surface in &drawn {
            surface.borrow_mut().end_frame(gpu);
        }
        self.draw_overlay(gpu, &mut report)?;
        debug!(
            frame = report.frame,
            models = report.models,
            faces = report.faces,
            binds = report.surface_binds,
            shapes = report.shapes,
            "frame complete"
        );
        Ok(report)
    }

    fn draw_overlay(&self, gpu: &mut dyn GpuBackend, report: &mut FrameReport) -> Result<()> {
        if self.overlay.is_empty() {
            return Ok(());
        }
        gpu.disable(Capability::DepthTest);
        gpu.set_fixed_camera(
            screen_projection(&self.projection).to_cols_array(),
            Mat4::IDENTITY.to_cols_array(),
        );
        for (shape, origin) in &self.overlay {
            shape.borrow_mut().draw(gpu, *origin)?;
            report.shapes += 1;
        }
        Ok(())
    }
}

/// Draws every face, binding each run of same-surface faces once. Surfaces
/// bound for the first time this frame are appended to `drawn`.
fn draw_model(
    gpu: &mut dyn GpuBackend,
    model: &Model,
    report: &mut FrameReport,
    drawn: &mut Vec<SharedSurface>,
) -> Result<()> {
    let mut current: Option<(SurfaceId, SharedSurface)> = None;
    let mut outcome = Ok(());
    for face in model.faces() {
        let surface_id = face.surface_id();
        if current.as_ref().map(|(id, _)| *id) != Some(surface_id) {
            if let Some((_, previous)) = current.take() {
                previous.borrow_mut().unbind(gpu);
            }
            if let Err(err) = face.surface().borrow_mut().bind(gpu) {
                outcome = Err(err);
                break;
            }
            report.surface_binds += 1;
            if !drawn.iter().any(|surface| Rc::ptr_eq(surface, face.surface())) {
                drawn.push(Rc::clone(face.surface()));
            }
            current = Some((surface_id, Rc::clone(face.surface())));
        }
        if let Err(err) = face.render(gpu) {
            outcome = Err(err);
            break;
        }
        report.faces += 1;
    }
    if let Some((_, surface)) = current {
        surface.borrow_mut().unbind(gpu);
    }
    outcome
}

fn stale(id: ModelId) -> ShadingError {
    ShadingError::invalid(format!(
        "model handle {}:{} is stale or was removed",
        id.index, id.generation
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Face;
    use crate::gpu::{Command, RecordingBackend};
    use crate::mix::MixChannel;
    use crate::surface::{share, Fpl};
    use crate::types::{Topology, Vertex};

    fn triangle_model(position: [f32; 3], surface: &SharedSurface, faces: usize) -> Model {
        let vertices = vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        let faces = (0..faces)
            .map(|_| Face::mesh(Topology::Triangles, surface, vertices.clone()).unwrap())
            .collect();
        Model::new(position, faces)
    }

    fn flat(rgba: [f32; 4]) -> SharedSurface {
        share(Fpl::new(MixChannel::solid(rgba).unwrap(), 0.0).unwrap())
    }

    #[test]
    fn stale_handles_are_rejected_after_remove() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let surface = flat([1.0; 4]);
        let id = scene.add_model(triangle_model([0.0; 3], &surface, 1));
        scene.show(id).unwrap();
        scene.remove(id, &mut gpu).unwrap();
        assert!(matches!(scene.show(id), Err(ShadingError::InvalidArgument(_))));
        assert!(surface.borrow().is_released());

        let reused = scene.add_model(triangle_model([0.0; 3], &flat([1.0; 4]), 1));
        assert_ne!(reused, id);
        assert!(scene.model(id).is_err());
        assert!(scene.model(reused).is_ok());
    }

    #[test]
    fn painted_models_draw_for_one_frame() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let id = scene.add_model(triangle_model([0.0; 3], &flat([1.0; 4]), 1));
        scene.paint(id).unwrap();
        scene.paint(id).unwrap();
        assert_eq!(scene.frame(&mut gpu).unwrap().faces, 1);
        assert_eq!(scene.frame(&mut gpu).unwrap().faces, 0);

        scene.show(id).unwrap();
        scene.paint(id).unwrap();
        assert_eq!(scene.frame(&mut gpu).unwrap().models, 1);
        assert_eq!(scene.frame(&mut gpu).unwrap().models, 1);
        assert_eq!(gpu.transform_depth(), 0);
    }

    #[test]
    fn models_draw_back_to_front() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let red = flat([1.0, 0.0, 0.0, 1.0]);
        let near = scene.add_model(triangle_model([0.0, 0.0, -2.0], &red, 1));
        let far = scene.add_model(triangle_model([0.0, 0.0, -9.0], &flat([0.0, 1.0, 0.0, 1.0]), 1));
        scene.show(near).unwrap();
        scene.show(far).unwrap();
        scene.frame(&mut gpu).unwrap();
        let colors: Vec<[f32; 4]> = gpu
            .commands()
            .iter()
            .filter_map(|command| match command {
                Command::SetColor { rgba } => Some(*rgba),
                _ => None,
            })
            .collect();
        assert_eq!(colors, vec![[0.0, 1.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn runs_of_same_surface_faces_bind_once() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let id = scene.add_model(triangle_model([0.0; 3], &flat([1.0; 4]), 3));
        scene.show(id).unwrap();
        let report = scene.frame(&mut gpu).unwrap();
        assert_eq!(report.faces, 3);
        assert_eq!(report.surface_binds, 1);
    }

    #[test]
    fn projection_is_validated() {
        let mut scene = Scene::new();
        let bad = Projection {
            near: 5.0,
            far: 1.0,
            ..Projection::default()
        };
        assert!(scene.set_projection(bad).is_err());
        assert_eq!(*scene.projection(), Projection::default());
    }

    #[test]
    fn frame_clears_to_background_before_flushing() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        assert!(scene.set_background([1.5, 0.0, 0.0]).is_err());
        scene.set_background([0.2, 0.3, 0.4]).unwrap();
        scene.queue().push("marker", |gpu| {
            gpu.set_color([0.5; 4]);
            Ok(())
        });
        scene.frame(&mut gpu).unwrap();

        let commands = gpu.commands();
        assert_eq!(commands[0], Command::Clear { rgba: [0.2, 0.3, 0.4, 1.0] });
        let marker = commands
            .iter()
            .position(|c| *c == Command::SetColor { rgba: [0.5; 4] })
            .unwrap();
        assert!(marker > 0);
        assert!(gpu.enabled_capabilities().contains(&Capability::DepthTest));
    }

    #[test]
    fn fixed_pipeline_receives_camera_before_model_transforms() {
        let mut scene = Scene::new();
        let mut gpu = RecordingBackend::new();
        let id = scene.add_model(triangle_model([0.0, 0.0, -5.0], &flat([1.0; 4]), 1));
        scene.show(id).unwrap();
        let mut camera = Camera::at([0.0, 0.0, 3.0]);
        camera.turn(90.0, 0.0, 0.0);
        scene.set_camera(camera);
        scene.frame(&mut gpu).unwrap();

        let commands = gpu.commands();
        let camera_at = commands
            .iter()
            .position(|c| matches!(c, Command::SetFixedCamera { .. }))
            .unwrap();
        let transform_at = commands
            .iter()
            .position(|c| matches!(c, Command::PushTransform { .. }))
            .unwrap();
        assert!(camera_at < transform_at);
        assert_eq!(
            gpu.fixed_camera(),
            Some((
                scene.projection().matrix().to_cols_array(),
                camera.view_matrix().to_cols_array()
            ))
        );
    }

    #[test]
    fn default_camera_looks_down_negative_z() {
        let view = Camera::default().view_matrix();
        let ahead = view.transform_point3(Vec3::new(0.0, 0.0, -5.0));
        assert!(ahead.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5), "{ahead:?}");
    }
}
