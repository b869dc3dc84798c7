//! End-to-end lifecycle tests: init, frames, resizes and close for every
//! bundled sample, against the dummy backend.

mod common;

use rstest::rstest;

use common::{sample_resources, Fixture, EXTENT};
use vk_lifecycle::backend::dummy::{DeviceCall, FailPoint, ResourceKind};
use vk_lifecycle::backend::{
    BackendError, BindingType, ClearValue, Extent2d, IndexFormat, TransformUniform,
};
use vk_lifecycle::frame::pulse_blue;
use vk_lifecycle::{Error, LifecycleHandler, LifecycleState, SampleConfig, SampleKind, SampleRenderer};

fn renderer(kind: SampleKind, dir: &std::path::Path) -> SampleRenderer {
    SampleRenderer::new(kind.config(dir))
}

fn run_frames(fixture: &mut Fixture, renderer: &mut SampleRenderer, count: u64) {
    let queue = fixture.device.graphics_queue();
    for _ in 0..count {
        renderer
            .on_frame(&mut fixture.device, &mut fixture.surface, queue)
            .unwrap();
    }
}

#[rstest]
#[case::clear(SampleKind::Clear)]
#[case::triangle(SampleKind::Triangle)]
#[case::world_triangle(SampleKind::WorldTriangle)]
#[case::texture(SampleKind::Texture)]
#[case::cube(SampleKind::Cube)]
fn test_every_resource_released_once(#[case] kind: SampleKind) {
    let dir = sample_resources("release");
    let mut renderer = renderer(kind, dir.path());
    let mut fixture = Fixture::new(renderer.needs_depth_attachment());

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    assert_eq!(renderer.state(), LifecycleState::Built);

    run_frames(&mut fixture, &mut renderer, 5);
    renderer
        .on_resize(&mut fixture.device, &fixture.surface)
        .unwrap();
    run_frames(&mut fixture, &mut renderer, 2);

    renderer.on_close(&mut fixture.device).unwrap();
    assert_eq!(renderer.state(), LifecycleState::Destroyed);
    fixture.assert_all_released_once();

    // Command buffers go back to their pool before the pool is destroyed
    let freed = fixture
        .device
        .position(|call| matches!(call, DeviceCall::FreeCommandBuffers(buffers) if buffers.len() == 2))
        .unwrap();
    let pool_destroyed = fixture
        .device
        .position(|call| matches!(call, DeviceCall::Destroy(ResourceKind::CommandPool, _)))
        .unwrap();
    assert!(freed < pool_destroyed);

    // A second close releases nothing more
    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
fn test_resizes_retire_old_pipelines(#[case] resizes: u32) {
    let dir = sample_resources("resize");
    let mut renderer = renderer(SampleKind::Triangle, dir.path());
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();

    let mut latest = EXTENT;
    for i in 0..resizes {
        latest = Extent2d::new(320 + i * 16, 200 + i * 8);
        fixture.surface.resize(latest);
        renderer
            .on_resize(&mut fixture.device, &fixture.surface)
            .unwrap();
        run_frames(&mut fixture, &mut renderer, 1);
    }

    assert_eq!(fixture.destroyed(ResourceKind::Pipeline), resizes as usize);
    assert_eq!(fixture.device.live_count(ResourceKind::Pipeline), 1);

    let context = *renderer.render_context().unwrap();
    assert_eq!(context.extent, latest);
    let desc = fixture.device.pipeline_descriptor(context.pipeline).unwrap();
    assert_eq!(desc.viewport.width, latest.width as f32);
    assert_eq!(desc.viewport.height, latest.height as f32);
    assert_eq!(desc.scissor.extent, latest);

    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}

#[test]
fn test_failed_resize_can_retry() {
    let dir = sample_resources("resize-retry");
    let mut renderer = renderer(SampleKind::Cube, dir.path());
    let mut fixture = Fixture::new(true);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    run_frames(&mut fixture, &mut renderer, 2);
    let before = *renderer.render_context().unwrap();

    let latest = Extent2d::new(640, 480);
    fixture.surface.resize(latest);
    fixture.device.fail_on(FailPoint::CreatePipeline);
    assert!(renderer
        .on_resize(&mut fixture.device, &fixture.surface)
        .is_err());
    assert_eq!(renderer.state(), LifecycleState::Resizing);
    assert_eq!(*renderer.render_context().unwrap(), before);
    assert_eq!(fixture.device.live_count(ResourceKind::Pipeline), 1);

    // No frames until a rebuild succeeds
    let queue = fixture.device.graphics_queue();
    let err = renderer
        .on_frame(&mut fixture.device, &mut fixture.surface, queue)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            state: LifecycleState::Resizing,
            ..
        }
    ));
    assert_eq!(renderer.frame_count(), 2);

    fixture.device.clear_failures();
    renderer
        .on_resize(&mut fixture.device, &fixture.surface)
        .unwrap();
    assert_eq!(renderer.state(), LifecycleState::Built);
    assert_eq!(renderer.render_context().unwrap().extent, latest);
    assert_eq!(fixture.destroyed(ResourceKind::Pipeline), 1);

    run_frames(&mut fixture, &mut renderer, 1);
    assert_eq!(renderer.frame_count(), 3);

    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(10)]
#[case(100)]
fn test_pulse_clear_after_frames(#[case] frames: u64) {
    let mut renderer = SampleRenderer::new(SampleConfig::simple_clear());
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    run_frames(&mut fixture, &mut renderer, frames);
    assert_eq!(renderer.frame_count(), frames);

    fixture.device.clear_calls();
    run_frames(&mut fixture, &mut renderer, 1);

    let color = fixture
        .device
        .calls()
        .iter()
        .find_map(|call| match call {
            DeviceCall::ClearColorImage { color, .. } => Some(*color),
            _ => None,
        })
        .unwrap();
    let expected = (0.5 * (frames as f64 * 0.1).sin() + 0.5) as f32;
    assert_eq!(color[2], expected);
    assert_eq!(pulse_blue(frames), expected);
    assert_eq!(&color[..2], &[0.125, 0.25]);
    assert_eq!(renderer.frame_count(), frames + 1);

    renderer.on_close(&mut fixture.device).unwrap();
}

#[test]
fn test_triangle_frame_order() {
    let dir = sample_resources("order");
    let mut renderer = renderer(SampleKind::Triangle, dir.path());
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    fixture.device.clear_calls();
    run_frames(&mut fixture, &mut renderer, 1);

    let names: Vec<&str> = fixture
        .device
        .calls()
        .iter()
        .map(|call| match call {
            DeviceCall::BeginCommandBuffer(_) => "begin",
            DeviceCall::BeginRenderPass(_) => "begin_pass",
            DeviceCall::BindPipeline(_) => "pipeline",
            DeviceCall::BindVertexBuffer { .. } => "vertices",
            DeviceCall::Draw { .. } => "draw",
            DeviceCall::EndRenderPass => "end_pass",
            DeviceCall::EndCommandBuffer(_) => "end",
            DeviceCall::QueueSubmit(_) => "submit",
            _ => "other",
        })
        .collect();
    assert_eq!(
        names,
        vec!["begin", "begin_pass", "pipeline", "vertices", "draw", "end_pass", "end", "submit"]
    );
    assert!(fixture.device.calls().contains(&DeviceCall::Draw {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    }));
    // The triangle is drawn over the same pulsing clear as the clear sample
    let begin = fixture
        .device
        .calls()
        .iter()
        .find_map(|call| match call {
            DeviceCall::BeginRenderPass(begin) => Some(begin.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        begin.clear_values,
        vec![ClearValue::Color([0.125, 0.25, pulse_blue(0), 1.0])]
    );
    assert_eq!(fixture.surface.presented_count(), 1);

    renderer.on_close(&mut fixture.device).unwrap();
}

#[test]
fn test_cube_draws_indexed_with_depth_clear() {
    let dir = sample_resources("cube");
    let mut renderer = renderer(SampleKind::Cube, dir.path());
    assert!(renderer.needs_depth_attachment());
    let mut fixture = Fixture::new(true);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    fixture.device.clear_calls();
    run_frames(&mut fixture, &mut renderer, 1);

    let calls = fixture.device.calls();
    let begin = calls
        .iter()
        .find_map(|call| match call {
            DeviceCall::BeginRenderPass(begin) => Some(begin.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(begin.clear_values.len(), 2);
    assert_eq!(
        begin.clear_values[1],
        ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0
        }
    );
    assert!(calls
        .iter()
        .any(|call| matches!(call, DeviceCall::BindIndexBuffer { format: IndexFormat::Uint16, .. })));
    assert!(calls.contains(&DeviceCall::DrawIndexed {
        index_count: 36,
        instance_count: 1,
        first_index: 0,
        vertex_offset: 0,
        first_instance: 0,
    }));

    let pipeline = renderer.render_context().unwrap().pipeline;
    let desc = fixture.device.pipeline_descriptor(pipeline).unwrap();
    assert!(desc.depth.is_some());

    renderer.on_close(&mut fixture.device).unwrap();
}

#[test]
fn test_uniform_written_each_frame() {
    let dir = sample_resources("uniform");
    let config = SampleConfig::world_triangle(dir.path());
    let animation = config.draw.as_ref().unwrap().transform.unwrap();
    let mut renderer = SampleRenderer::new(config);
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();

    let uniform_size = std::mem::size_of::<TransformUniform>() as u64;
    let memory = fixture
        .device
        .calls()
        .iter()
        .find_map(|call| match call {
            DeviceCall::CreateBuffer { memory, size, .. } if *size == uniform_size => Some(*memory),
            _ => None,
        })
        .unwrap();

    run_frames(&mut fixture, &mut renderer, 3);

    let expected = animation.at(2, EXTENT.aspect_ratio());
    assert_eq!(
        fixture.device.memory_contents(memory).unwrap(),
        bytemuck::bytes_of(&expected)
    );
    assert!(!fixture.device.is_mapped(memory));

    renderer.on_close(&mut fixture.device).unwrap();
}

#[test]
fn test_frames_rejected_outside_built() {
    let dir = sample_resources("state");
    let mut renderer = renderer(SampleKind::Triangle, dir.path());
    let mut fixture = Fixture::new(false);
    let queue = fixture.device.graphics_queue();

    let err = renderer
        .on_frame(&mut fixture.device, &mut fixture.surface, queue)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "frame",
            state: LifecycleState::Uninitialized
        }
    ));

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    assert!(matches!(
        renderer.on_init(&mut fixture.device, &fixture.surface, args),
        Err(Error::InvalidState { .. })
    ));

    renderer.on_close(&mut fixture.device).unwrap();
    assert!(matches!(
        renderer.on_frame(&mut fixture.device, &mut fixture.surface, queue),
        Err(Error::InvalidState {
            state: LifecycleState::Destroyed,
            ..
        })
    ));
}

#[test]
fn test_failed_frame_surfaces_error() {
    let dir = sample_resources("fail");
    let mut renderer = renderer(SampleKind::Triangle, dir.path());
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap();
    run_frames(&mut fixture, &mut renderer, 2);

    fixture.device.fail_on(FailPoint::QueueSubmit);
    let queue = fixture.device.graphics_queue();
    let err = renderer
        .on_frame(&mut fixture.device, &mut fixture.surface, queue)
        .unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::SubmitFailed(_))));
    assert_eq!(renderer.frame_count(), 2);

    fixture.device.clear_failures();
    run_frames(&mut fixture, &mut renderer, 1);
    assert_eq!(renderer.frame_count(), 3);

    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}

#[test]
fn test_descriptor_mismatch_is_setup_error() {
    let dir = sample_resources("mismatch");
    let mut config = SampleConfig::world_triangle(dir.path());
    config.draw.as_mut().unwrap().descriptor_slots[0].ty = BindingType::CombinedImageSampler;
    let mut renderer = SampleRenderer::new(config);
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    let err = renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap_err();
    assert!(matches!(err, Error::DescriptorMismatch { binding: 0, .. }));
    assert_eq!(renderer.state(), LifecycleState::Uninitialized);
    assert_eq!(fixture.device.live_count(ResourceKind::Pipeline), 0);

    // Whatever was created before the failure is still released on close
    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}

#[rstest]
#[case::shader(FailPoint::CreateShaderModule)]
#[case::buffer(FailPoint::CreateBuffer)]
#[case::pipeline(FailPoint::CreatePipeline)]
#[case::upload(FailPoint::QueueSubmit)]
fn test_init_failure_cleans_up(#[case] point: FailPoint) {
    let dir = sample_resources("init-failure");
    let mut renderer = renderer(SampleKind::Texture, dir.path());
    let mut fixture = Fixture::new(false);
    fixture.device.fail_on(point);

    let args = fixture.init_args();
    assert!(renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .is_err());

    fixture.device.clear_failures();
    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}

#[test]
fn test_missing_shader_names_path() {
    let dir = common::TempDir::new("missing");
    let mut renderer = renderer(SampleKind::Triangle, dir.path());
    let mut fixture = Fixture::new(false);

    let args = fixture.init_args();
    let err = renderer
        .on_init(&mut fixture.device, &fixture.surface, args)
        .unwrap_err();
    match err {
        Error::ShaderLoad { path, .. } => assert!(path.ends_with("simpleVS.spv")),
        other => panic!("unexpected error {other}"),
    }

    renderer.on_close(&mut fixture.device).unwrap();
    fixture.assert_all_released_once();
}
