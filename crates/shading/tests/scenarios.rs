use shading::gpu::{Command, UniformValue};
use shading::{
    share, AutoSp, Bsdf, Camera, Channel, ChannelId, Face, Fpl, GpuBackend, Light,
    LightingSurface, MixChannel, Model, PixelFormat, RecordingBackend, ScalarSource, ScalarType,
    Scene, ShaderProgram, ShadingError, Surface, Texture, Topology, UpdateQueue, Vertex,
    VertexData, MAX_LIGHTS,
};

fn triangle() -> Vec<Vertex> {
    vec![
        Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]),
        Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0]),
        Vertex::new([0.0, 1.0, 0.0], [0.0, 1.0]),
    ]
}

fn auto_surface(queue: &UpdateQueue, gpu: &mut RecordingBackend) -> AutoSp {
    let bsdf = Bsdf::diffuse(MixChannel::solid([0.6, 0.6, 0.6, 1.0]).unwrap()).unwrap();
    AutoSp::new(bsdf, queue, gpu).unwrap()
}

#[test]
fn constant_composite_fills_every_pixel() {
    let mix = MixChannel::new(
        (2, 2),
        ScalarSource::Constant(1.0),
        ScalarSource::Constant(0.0),
        ScalarSource::Constant(0.0),
        ScalarSource::Constant(1.0),
    )
    .unwrap();
    for y in 0..2 {
        for x in 0..2 {
            assert_eq!(mix.pixel(x, y), Some([255, 0, 0, 255]));
        }
    }
    assert_eq!(mix.constant_color(), Some([1.0, 0.0, 0.0, 1.0]));
}

#[test]
fn nine_lights_bind_eight_and_report_one() {
    let mut gpu = RecordingBackend::new();
    let queue = UpdateQueue::new();
    let mut surface = auto_surface(&queue, &mut gpu);
    let lights: Vec<Light> = (0..9)
        .map(|i| Light::omni([i as f32, 0.0, 0.0], [1.0; 3], 0.1).unwrap())
        .collect();

    let binding = surface.set_light(&lights);
    assert_eq!(binding.bound, MAX_LIGHTS);
    assert_eq!(binding.truncated, 1);

    queue.flush(&mut gpu).unwrap();
    assert_eq!(
        gpu.uniform_value(surface.program(), "light_count"),
        Some(UniformValue::Int(MAX_LIGHTS as i32))
    );
    assert_eq!(surface.lights().len(), MAX_LIGHTS);
}

#[test]
fn queued_uniform_is_visible_after_one_flush() {
    let mut gpu = RecordingBackend::new();
    let queue = UpdateQueue::new();
    let vertex = "layout(location = 0) in vec3 a_pos;\nvoid main() {}\n";
    let fragment = "uniform vec3 tint;\nvoid main() {}\n";
    let surface =
        ShaderProgram::new(vertex, fragment, vec![ScalarType::Float], &queue, &mut gpu).unwrap();

    surface.uniform("tint", ScalarType::Float, &[0.1, 0.2, 0.3]).unwrap();
    surface.uniform("tint", ScalarType::Float, &[0.4, 0.5, 0.6]).unwrap();
    assert_eq!(queue.len(), 2);

    let report = queue.flush(&mut gpu).unwrap();
    assert_eq!(report.executed, 2);
    assert!(queue.is_empty());
    assert_eq!(
        gpu.uniform_value(surface.program(), "tint"),
        Some(UniformValue::Vec3([0.4, 0.5, 0.6]))
    );
}

#[test]
fn released_surface_refuses_to_render() {
    let mut gpu = RecordingBackend::new();
    let queue = UpdateQueue::new();
    let mut surface = auto_surface(&queue, &mut gpu);
    surface.release(&mut gpu);
    let err = surface
        .render(&mut gpu, Topology::Triangles, &VertexData::Mesh(triangle()))
        .unwrap_err();
    assert!(matches!(err, ShadingError::Released(id) if id == surface.id()));
}

#[test]
fn fixed_pipeline_render_leaves_state_neutral() {
    let texture = Texture::load(vec![255, 0, 0, 128], 1, 1, PixelFormat::Rgba8).unwrap();
    let mut gpu = RecordingBackend::new();
    let mut surface = Fpl::new(texture, 0.8).unwrap();
    surface.bind(&mut gpu).unwrap();
    surface
        .render(&mut gpu, Topology::Triangles, &VertexData::Mesh(triangle()))
        .unwrap();
    surface.unbind(&mut gpu);

    assert!(gpu.enabled_capabilities().is_empty());
    assert_eq!(gpu.emission(), [0.0, 0.0, 0.0, 1.0]);
    let enables = gpu
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Enable { .. }))
        .count();
    let disables = gpu
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Disable { .. }))
        .count();
    assert_eq!(enables, disables);
}

#[test]
fn enqueue_during_drain_is_fatal() {
    let mut gpu = RecordingBackend::new();
    let queue = UpdateQueue::new();
    let inner = queue.clone();
    queue.push("outer", move |_| {
        inner.push("inner", |_| Ok(()));
        Ok(())
    });
    let err = queue.flush(&mut gpu).unwrap_err();
    assert!(matches!(err, ShadingError::QueueGrewDuringDrain { .. }));
    assert!(queue.is_empty());
}

#[test]
fn changed_texture_reaches_composite_on_soft_update() {
    let texture = Texture::load(vec![0, 0, 0, 0], 2, 2, PixelFormat::Luma8).unwrap();
    let band = Channel::new(&texture, ChannelId::R);
    let mix = MixChannel::rgb((2, 2), &band, &band, &band).unwrap();
    assert_eq!(mix.pixel(0, 0), Some([0, 0, 0, 255]));

    texture
        .reset(image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            2,
            2,
            image::Luma([200]),
        )))
        .unwrap();
    assert!(shading::soft_update(&mix));
    assert_eq!(mix.pixel(1, 1), Some([200, 200, 200, 255]));
    assert!(!shading::soft_update(&mix));
}

#[test]
fn scene_frame_feeds_matrices_and_lights_before_drawing() {
    let mut gpu = RecordingBackend::new();
    let mut scene = Scene::new();
    let auto = share(auto_surface(scene.queue(), &mut gpu));
    let face = Face::mesh(Topology::Triangles, &auto, triangle()).unwrap();
    let id = scene.add_model(Model::new([0.0, 0.0, -5.0], vec![face]));
    scene.show(id).unwrap();
    assert_eq!(gpu.bound_program(), None);
    scene
        .lights_mut()
        .add(Light::directional([0.0, -90.0, 0.0], [1.0; 3]).unwrap());
    scene.set_camera(Camera::at([0.0, 0.0, 3.0]));

    let report = scene.frame(&mut gpu).unwrap();
    assert_eq!(report.models, 1);
    assert_eq!(report.faces, 1);
    assert_eq!(report.lights_truncated, 0);
    assert!(report.flush.executed >= 4);
    assert!(scene.queue().is_empty());
    assert_eq!(gpu.transform_depth(), 0);

    let commands = gpu.commands();
    let last_uniform = commands
        .iter()
        .rposition(|c| matches!(c, Command::SetUniform { .. }))
        .unwrap();
    let first_draw = commands
        .iter()
        .position(|c| matches!(c, Command::DrawArrays { .. }))
        .unwrap();
    assert!(last_uniform < first_draw);
}

#[test]
fn fixed_and_programmable_surfaces_share_one_camera() {
    let mut gpu = RecordingBackend::new();
    let mut scene = Scene::new();
    let auto = auto_surface(scene.queue(), &mut gpu);
    let program = auto.program();
    let auto = share(auto);
    let flat = share(Fpl::new(MixChannel::solid([0.0, 1.0, 0.0, 1.0]).unwrap(), 0.0).unwrap());
    let faces = vec![
        Face::mesh(Topology::Triangles, &flat, triangle()).unwrap(),
        Face::mesh(Topology::Triangles, &auto, triangle()).unwrap(),
    ];
    let id = scene.add_model(Model::new([0.0, 0.0, -5.0], faces));
    scene.show(id).unwrap();
    let mut camera = Camera::at([0.0, 0.0, 3.0]);
    camera.turn(90.0, 0.0, 0.0);
    scene.set_camera(camera);
    scene.set_background([0.1, 0.1, 0.2]).unwrap();
    gpu.take_commands();

    scene.frame(&mut gpu).unwrap();

    let commands = gpu.commands();
    assert_eq!(commands[0], Command::Clear { rgba: [0.1, 0.1, 0.2, 1.0] });
    let first_uniform = commands
        .iter()
        .position(|c| matches!(c, Command::SetUniform { .. }))
        .unwrap();
    assert!(first_uniform > 0);

    let (projection, view) = gpu.fixed_camera().unwrap();
    assert_eq!(
        gpu.uniform_value(program, "view_mat"),
        Some(UniformValue::Mat4(view))
    );
    assert_eq!(
        gpu.uniform_value(program, "projection_mat"),
        Some(UniformValue::Mat4(projection))
    );
    assert_ne!(view, glam::Mat4::IDENTITY.to_cols_array());
}
