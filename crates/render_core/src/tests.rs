//! Frame-level scenarios across the scene, the registry and the renderer,
//! driven by the software device

use std::rc::Rc;

use approx::assert_relative_eq;

use crate::events::{Event, EventHandler, MouseButton};
use crate::foundation::logging::init_test_logging;
use crate::foundation::math::{translation_of, Mat4, Vec3};
use crate::foundation::ray::Ray;
use crate::gpu::software::{DeviceCommand, SoftwareDevice};
use crate::gpu::{ClearFlags, ColorTarget, FramebufferDesc, FramebufferHandle, GraphicsDevice, TextureDesc, TextureFormat, TextureHandle};
use crate::render::mesh::{Mesh, CUBE};
use crate::render::programs::install_builtin_programs;
use crate::render::property::{Instance, InstanceRef, Material, MaterialRef, PropertyValue};
use crate::render::shader::{properties, DISSOLUTION, EMISSIVE, PBR_STATIC, POST_PROCESS, SKYBOX};
use crate::render::{Camera, RenderContext};
use crate::scene::{Scene, SceneRenderer};
use crate::settings::{CameraSettings, IblSettings, RenderSettings, RendererSettings};

const SKY_SIZE: u32 = 4;
const VIEWPORT: (u32, u32) = (100, 100);

fn context() -> RenderContext<SoftwareDevice> {
    init_test_logging();
    let mut device = SoftwareDevice::new();
    install_builtin_programs(&mut device);
    RenderContext::new(device).expect("context")
}

/// Camera at the origin looking down +Z
fn scene(ctx: &RenderContext<SoftwareDevice>) -> Scene {
    let mut camera = Camera::perspective(Vec3::zeros(), 60.0, 1.0, 0.1);
    camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::y());
    Scene::new(&ctx.shaders, &ctx.meshes, camera, CameraSettings::default(), VIEWPORT.0, VIEWPORT.1)
        .expect("scene")
}

fn material(ctx: &RenderContext<SoftwareDevice>, name: &str, shader: &str) -> MaterialRef {
    MaterialRef::new(Material::new(name, Rc::clone(ctx.shaders.get(shader).expect("shader"))))
}

fn texture(device: &mut SoftwareDevice, label: &str) -> TextureHandle {
    device
        .create_texture(&TextureDesc::d2(label, 1, 1, TextureFormat::Rgba8Srgb))
        .expect("texture")
}

fn uniform_sky(device: &mut SoftwareDevice, color: [f32; 4]) -> TextureHandle {
    let sky = device
        .create_texture(&TextureDesc::cube("Sky", SKY_SIZE, 1, TextureFormat::Rgba32Float))
        .expect("sky");
    let texels: Vec<f32> = std::iter::repeat(color)
        .take((SKY_SIZE * SKY_SIZE) as usize)
        .flatten()
        .collect();
    for face in 0..6 {
        device.write_texture(sky, face, 0, &texels).expect("face");
    }
    sky
}

fn renderer(ctx: &mut RenderContext<SoftwareDevice>, sky: TextureHandle) -> SceneRenderer {
    let settings = RendererSettings {
        ibl: IblSettings {
            map_size: SKY_SIZE,
            irradiance_sample_count: 16,
            prefilter_sample_count: 16,
        },
        ..RendererSettings::default()
    };
    SceneRenderer::new(ctx, settings, sky, VIEWPORT.0, VIEWPORT.1).expect("renderer")
}

fn output(device: &mut SoftwareDevice) -> FramebufferHandle {
    device
        .create_framebuffer(&FramebufferDesc {
            width: 8,
            height: 8,
            color: ColorTarget::Owned(TextureFormat::Rgba8Srgb),
            depth: false,
            label: "Output".to_string(),
        })
        .expect("output")
}

fn elapsed(instance: &InstanceRef) -> f32 {
    instance.borrow().get_float(properties::ELAPSED_TIME).expect("elapsed time")
}

#[test]
fn test_dissolve_migrates_once_and_never_double_advances() {
    let ctx = context();
    let mut scene = scene(&ctx);
    let cube = Rc::clone(ctx.meshes.get(CUBE).expect("cube"));
    let dissolve = material(&ctx, "Crate", DISSOLUTION);
    let transform = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));

    let instance = scene
        .add_dissolving_instance(&cube, 0, &dissolve, transform, 1.0)
        .expect("dissolving instance");
    instance.borrow_mut().set(properties::ELAPSED_TIME, PropertyValue::Float(0.9));

    scene.update(0.2).expect("update");
    assert_relative_eq!(elapsed(&instance), 1.1, epsilon = 1e-6);
    assert!(scene.registry().get_mesh_batch(DISSOLUTION).is_none());

    let opaque: Vec<_> = scene.registry().iter_entries(PBR_STATIC).collect();
    assert_eq!(opaque.len(), 1);
    assert_ne!(opaque[0].instance, instance);
    assert_relative_eq!(opaque[0].instance.transform(), transform);

    scene.update(0.2).expect("second update");
    assert_relative_eq!(elapsed(&instance), 1.1, epsilon = 1e-6);
    assert_eq!(scene.registry().iter_entries(PBR_STATIC).count(), 1);
}

#[test]
fn test_instance_in_several_dissolve_batches_advances_once_per_update() {
    let ctx = context();
    let mut scene = scene(&ctx);
    let cube = Rc::clone(ctx.meshes.get(CUBE).expect("cube"));
    let first = material(&ctx, "First", DISSOLUTION);
    let second = material(&ctx, "Second", DISSOLUTION);

    let instance = scene
        .add_dissolving_instance(&cube, 0, &first, Mat4::identity(), 0.5)
        .expect("dissolving instance");
    scene.add_instance(&cube, 0, &second, &instance).expect("second batch");

    scene.update(0.25).expect("update");
    assert_relative_eq!(elapsed(&instance), 0.25, epsilon = 1e-6);
    assert_eq!(scene.registry().iter_entries(DISSOLUTION).count(), 2);

    scene.update(0.25).expect("update");
    assert_relative_eq!(elapsed(&instance), 0.5, epsilon = 1e-6);

    // Both entries migrate to one replacement instance, one opaque material each.
    let opaque: Vec<_> = scene.registry().iter_entries(PBR_STATIC).collect();
    assert_eq!(opaque.len(), 2);
    assert_eq!(opaque[0].instance, opaque[1].instance);
    assert_ne!(opaque[0].material, opaque[1].material);
}

#[test]
fn test_opaque_material_carries_declared_maps_only() {
    let mut ctx = context();
    let albedo = texture(&mut ctx.device, "Albedo");
    let metalness = texture(&mut ctx.device, "Metalness");
    let roughness = texture(&mut ctx.device, "Roughness");
    let mut scene = scene(&ctx);
    let cube = Rc::clone(ctx.meshes.get(CUBE).expect("cube"));

    let dissolve = material(&ctx, "Metal", DISSOLUTION);
    {
        let mut source = dissolve.borrow_mut();
        source.set(properties::METALNESS, PropertyValue::Float(0.8));
        source.set(properties::HAS_METALNESS_MAP, PropertyValue::Float(1.0));
        source.set(properties::HAS_ROUGHNESS_MAP, PropertyValue::Float(0.0));
        source.set_texture(properties::ALBEDO_MAP, albedo);
        source.set_texture(properties::METALNESS_MAP, metalness);
        source.set_texture(properties::ROUGHNESS_MAP, roughness);
    }
    scene
        .add_dissolving_instance(&cube, 0, &dissolve, Mat4::identity(), 0.0)
        .expect("dissolving instance");
    scene.update(0.0).expect("update");

    let entry = scene.registry().iter_entries(PBR_STATIC).next().expect("opaque entry");
    let opaque = entry.material.borrow();
    assert_eq!(opaque.shader().name, PBR_STATIC);
    assert_eq!(opaque.texture(properties::ALBEDO_MAP), Some(albedo));
    assert_eq!(opaque.texture(properties::METALNESS_MAP), Some(metalness));
    assert_eq!(opaque.texture(properties::ROUGHNESS_MAP), None);
    assert_eq!(opaque.properties().get_float(properties::METALNESS), Some(0.8));
}

#[test]
fn test_picking_matches_analytic_sphere_root() {
    let mut ctx = context();
    let sphere = ctx
        .meshes
        .add(&mut ctx.device, Mesh::uv_sphere("FineSphere", 64, 32))
        .expect("sphere");
    let mut scene = scene(&ctx);
    let pbr = material(&ctx, "Plain", PBR_STATIC);
    let instance = InstanceRef::new(Instance::with_transform(Mat4::new_translation(&Vec3::new(0.0, 0.0, 5.0))));
    scene.add_instance(&sphere, 0, &pbr, &instance).expect("add");

    let (x, y) = (0.1_f32, 0.05_f32);
    let ray = Ray::new(Vec3::new(x, y, 0.0), Vec3::z());
    let near_root = 5.0 - (1.0 - x * x - y * y).sqrt();

    let hit = scene.pick(&ray).expect("hit");
    assert_eq!(hit.instance, instance);
    assert_eq!(hit.submesh_index, 0);
    assert_relative_eq!(hit.step, near_root, epsilon = 5e-3);
    assert_relative_eq!(hit.point, ray.point_at(hit.step), epsilon = 1e-5);
}

#[test]
fn test_pointer_drag_moves_picked_instance_until_release() {
    let ctx = context();
    let mut scene = scene(&ctx);
    let cube = Rc::clone(ctx.meshes.get(CUBE).expect("cube"));
    let pbr = material(&ctx, "Plain", PBR_STATIC);
    let instance = InstanceRef::new(Instance::with_transform(Mat4::new_translation(&Vec3::new(0.0, 0.0, 5.0))));
    scene.add_instance(&cube, 0, &pbr, &instance).expect("add");

    assert!(scene.on_event(&Event::mouse_pressed(MouseButton::Left, 52.0, 51.0)));
    assert!(scene.dragger().is_dragging());

    scene.on_event(&Event::mouse_moved(60.0, 51.0));
    scene.update(0.016).expect("update");
    let moved = translation_of(&instance.transform());
    // Camera looks down +Z, so screen-right is world -X.
    assert!(moved.x < -0.2, "expected a move to -X, got {moved:?}");
    assert_relative_eq!(moved.z, 5.0, epsilon = 1e-3);

    assert!(scene.on_event(&Event::mouse_released(MouseButton::Left, 90.0, 90.0)));
    assert!(!scene.dragger().is_dragging());

    scene.on_event(&Event::mouse_moved(10.0, 10.0));
    scene.update(0.016).expect("update");
    assert_relative_eq!(translation_of(&instance.transform()), moved);
}

#[test]
fn test_press_on_empty_space_does_not_start_drag() {
    let ctx = context();
    let mut scene = scene(&ctx);
    assert!(!scene.on_event(&Event::mouse_pressed(MouseButton::Left, 50.0, 50.0)));
    assert!(!scene.dragger().is_dragging());
    assert!(!scene.on_event(&Event::mouse_released(MouseButton::Left, 50.0, 50.0)));
}

#[test]
fn test_light_helpers_pair_lights_with_emissive_spheres() {
    let ctx = context();
    let mut scene = scene(&ctx);

    let (point, sphere) = scene
        .add_point_light(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 0.5, 2.0)
        .expect("point light");
    let (spot, _) = scene
        .add_spot_light(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 1.0),
            0.1,
            1.0,
            Vec3::new(0.0, -3.0, 0.0),
            0.9,
            0.8,
        )
        .expect("spot light");
    assert_eq!(scene.registry().iter_entries(EMISSIVE).count(), 2);
    assert_eq!(scene.lights().len(), 2);

    let radiance = sphere.borrow().properties().get_vec3(properties::RADIANCE).expect("radiance");
    assert_relative_eq!(radiance, scene.lights().point_lights()[0].radiance);
    assert_relative_eq!(sphere.transform()[(0, 0)], 0.5);

    assert!(scene.add_point_light(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), 0.0, 1.0).is_err());
    assert_eq!(scene.registry().instance_count(), 2);

    assert!(scene.remove_light(point).expect("remove point"));
    assert!(scene.remove_light(spot).expect("remove spot"));
    assert_eq!(scene.registry().instance_count(), 0);
    assert!(scene.lights().is_empty());
    assert!(!scene.remove_light(point).expect("second removal"));
}

#[test]
fn test_frame_passes_run_in_fixed_order() {
    let mut ctx = context();
    let sky = uniform_sky(&mut ctx.device, [0.5, 0.5, 0.5, 1.0]);
    let mut renderer = renderer(&mut ctx, sky);
    let mut scene = scene(&ctx);
    let target = output(&mut ctx.device);

    let cube = Rc::clone(ctx.meshes.get(CUBE).expect("cube"));
    let pbr = material(&ctx, "Plain", PBR_STATIC);
    let dissolve = material(&ctx, "Fading", DISSOLUTION);
    scene
        .add_instance(&cube, 0, &pbr, &InstanceRef::new(Instance::new()))
        .expect("opaque");
    scene
        .add_dissolving_instance(&cube, 0, &dissolve, Mat4::identity(), 10.0)
        .expect("dissolving");
    scene
        .add_point_light(Vec3::new(0.0, 3.0, 0.0), Vec3::new(1.0, 1.0, 1.0), 0.2, 1.0)
        .expect("light");

    scene.update(0.1).expect("update");
    ctx.device.clear_commands();
    let stats = renderer
        .render_scene(&mut ctx, &mut scene, target, &RenderSettings::default())
        .expect("frame");
    assert_eq!(stats.passes, 5);
    assert_eq!(stats.instances, 3);
    assert_eq!(stats.draw_calls, 5);

    let commands = ctx.device.take_commands();
    let pipelines: Vec<(&str, ClearFlags)> = commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::BindPipeline { shader, cleared, .. } => Some((shader.as_str(), *cleared)),
            _ => None,
        })
        .collect();
    assert_eq!(
        pipelines,
        vec![
            (PBR_STATIC, ClearFlags::COLOR | ClearFlags::DEPTH),
            (DISSOLUTION, ClearFlags::empty()),
            (EMISSIVE, ClearFlags::empty()),
            (SKYBOX, ClearFlags::empty()),
            (POST_PROCESS, ClearFlags::COLOR),
        ]
    );

    // Instance buffers are current before the first draw.
    let first_bind = commands
        .iter()
        .position(|command| matches!(command, DeviceCommand::BindPipeline { .. }))
        .expect("pipeline bound");
    let last_instance_upload = commands
        .iter()
        .rposition(|command| matches!(command, DeviceCommand::WriteBuffer { label, .. } if label.contains('[')))
        .expect("instance upload");
    assert!(last_instance_upload < first_bind);
}

#[test]
fn test_uniform_sky_resolves_to_exposed_gamma_color() {
    let mut ctx = context();
    let sky = uniform_sky(&mut ctx.device, [0.6, 0.3, 1.2, 1.0]);
    let mut renderer = renderer(&mut ctx, sky);
    let mut scene = scene(&ctx);
    let target = output(&mut ctx.device);

    let settings = RenderSettings {
        exposure_ev100: 1.0,
        gamma: 2.2,
    };
    renderer
        .render_scene(&mut ctx, &mut scene, target, &settings)
        .expect("frame");

    let exposure = 1.0 / (1.2 * 2.0);
    let expected = [0.6_f32, 0.3, 1.2].map(|c| (c * exposure).powf(1.0 / 2.2));
    let color = ctx.device.framebuffer_color(target).expect("color");
    for texel in ctx.device.read_texture(color, 0, 0).expect("texels") {
        assert_relative_eq!(texel[0], expected[0], epsilon = 1e-4);
        assert_relative_eq!(texel[1], expected[1], epsilon = 1e-4);
        assert_relative_eq!(texel[2], expected[2], epsilon = 1e-4);
        assert_relative_eq!(texel[3], 1.0);
    }
}

#[test]
fn test_resize_follows_output_target() {
    let mut ctx = context();
    let sky = uniform_sky(&mut ctx.device, [1.0, 1.0, 1.0, 1.0]);
    let mut renderer = renderer(&mut ctx, sky);
    let mut scene = scene(&ctx);
    let target = output(&mut ctx.device);

    scene.on_event(&Event::window_resized(8, 8));
    renderer
        .render_scene(&mut ctx, &mut scene, target, &RenderSettings::default())
        .expect("frame");
    assert_eq!(ctx.device.framebuffer_size(renderer.hdr_target()).expect("size"), (8, 8));
    assert_relative_eq!(scene.camera().aspect, 1.0);
}
