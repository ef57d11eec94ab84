//! Frame loop behavior against the headless device.

mod common;

use std::rc::Rc;

use common::{
    TestMaterial, TestMesh, as_drawables, frame_submissions, harness, harness_on, last_frame,
};
use glam::{Mat4, Vec3};
use vkframe_renderer::ubo::vulkan_perspective;
use vkframe_renderer::{
    Drawable, FrameStatus, GlobalUbo, Renderer, RendererError, SetupBinder, SetupId,
};
use vkframe_rhi::headless::{
    HeadlessDevice, HeadlessSurface, ObjectKind, RecordedCommand, Submission,
};
use vkframe_rhi::render_pass::AttachmentLoad;
use vkframe_rhi::{RhiError, vk};

#[test]
fn test_current_frame_wraps_after_frames_in_flight_draws() {
    for frames_in_flight in 1..=4 {
        let mut h = harness(frames_in_flight);
        assert_eq!(h.renderer.frames_in_flight(), frames_in_flight);

        for i in 0..frames_in_flight {
            assert_eq!(h.renderer.current_frame(), i);
            assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);
        }
        assert_eq!(h.renderer.current_frame(), 0);
    }
}

#[test]
fn test_two_objects_in_one_setup_draw_in_order_inside_one_pass() {
    let mut h = harness(2);
    let material = TestMaterial::new();
    let setup = h.renderer.register_setup(material.clone()).unwrap();
    let a = TestMesh::new(&h.renderer, setup, 6);
    let b = TestMesh::new(&h.renderer, setup, 3);

    h.renderer.set_drawable_objects(&as_drawables(&[&a, &b])).unwrap();
    assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);

    let frame = last_frame(&h.device);
    assert_eq!(frame.draw_counts(), vec![6, 3]);
    assert_eq!(frame.render_pass_count(), 1);
    assert_eq!(material.setup_resource_binds.get(), 1);

    let ends = frame
        .commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::EndRenderPass))
        .count();
    assert_eq!(ends, 1);
}

#[test]
fn test_pass_state_is_set_before_object_binds() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let mesh = TestMesh::new(&h.renderer, setup, 36);
    h.renderer.set_drawable_objects(&as_drawables(&[&mesh])).unwrap();
    h.renderer.draw_frame().unwrap();

    let pipeline = h.renderer.setup(setup).unwrap().pipeline.handle();
    let global_set = h.renderer.frame_slots().get(0).unwrap().global_set();
    let commands = last_frame(&h.device).commands;

    assert!(matches!(commands[0], RecordedCommand::BeginRenderPass { .. }));
    assert!(matches!(commands[1], RecordedCommand::BindPipeline(p) if p == pipeline));
    assert!(matches!(commands[2], RecordedCommand::SetViewport(_)));
    assert!(matches!(commands[3], RecordedCommand::SetScissor(_)));
    assert!(matches!(
        &commands[4],
        RecordedCommand::BindDescriptorSets { first_set: 0, sets, .. } if sets == &[global_set]
    ));
    assert!(matches!(
        &commands[5],
        RecordedCommand::BindDescriptorSets { first_set: 1, sets, .. } if sets == &[mesh.object_set(0)]
    ));
    assert!(matches!(
        &commands[6],
        RecordedCommand::BindVertexBuffers(buffers) if buffers == &[mesh.vertex_buffer()]
    ));
    assert!(matches!(commands[7], RecordedCommand::BindIndexBuffer(_)));
    assert!(matches!(
        commands[8],
        RecordedCommand::DrawIndexed { index_count: 36, instance_count: 1 }
    ));
    assert!(matches!(commands[9], RecordedCommand::EndRenderPass));
    assert_eq!(commands.len(), 10);
}

#[test]
fn test_render_area_and_viewport_follow_swapchain_extent() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let mesh = TestMesh::new(&h.renderer, setup, 3);
    h.renderer.set_drawable_objects(&as_drawables(&[&mesh])).unwrap();
    h.renderer.draw_frame().unwrap();

    let extent = h.renderer.swapchain_extent();
    let commands = last_frame(&h.device).commands;
    let RecordedCommand::BeginRenderPass {
        render_area,
        clear_value_count,
        ..
    } = &commands[0]
    else {
        panic!("frame does not start with a render pass");
    };
    assert_eq!(render_area.extent, extent);
    assert_eq!(*clear_value_count, 2);

    let RecordedCommand::SetViewport(viewport) = &commands[2] else {
        panic!("viewport not set");
    };
    assert_eq!(viewport.width, extent.width as f32);
    assert_eq!(viewport.height, extent.height as f32);
}

#[test]
fn test_objects_are_grouped_by_setup() {
    let mut h = harness(2);
    let first = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let second = h.renderer.register_setup(TestMaterial::new()).unwrap();
    assert_ne!(first, second);

    let a = TestMesh::new(&h.renderer, second, 9);
    let b = TestMesh::new(&h.renderer, first, 6);
    let c = TestMesh::new(&h.renderer, second, 12);
    let d = TestMesh::new(&h.renderer, first, 3);

    h.renderer
        .set_drawable_objects(&as_drawables(&[&a, &b, &c, &d]))
        .unwrap();
    h.renderer.draw_frame().unwrap();

    let frame = last_frame(&h.device);
    assert_eq!(frame.render_pass_count(), 2);
    assert_eq!(frame.draw_counts(), vec![6, 3, 9, 12]);

    let handles = |id: SetupId| -> Vec<vk::Framebuffer> {
        let setup = h.renderer.setup(id).unwrap();
        setup.framebuffers.iter().map(|f| f.handle()).collect()
    };
    let first_fbs = handles(first);
    let second_fbs = handles(second);
    let targets = frame.framebuffers();
    assert!(first_fbs.contains(&targets[0]));
    assert!(second_fbs.contains(&targets[1]));
}

fn render_passes(frame: &Submission) -> Vec<vk::RenderPass> {
    frame
        .commands
        .iter()
        .filter_map(|cmd| match cmd {
            RecordedCommand::BeginRenderPass { render_pass, .. } => Some(*render_pass),
            _ => None,
        })
        .collect()
}

#[test]
fn test_only_the_first_setup_clears_the_frame() {
    let mut h = harness(2);
    let first = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let second = h.renderer.register_setup(TestMaterial::new()).unwrap();

    let first_pass = &h.renderer.setup(first).unwrap().render_pass;
    let second_pass = &h.renderer.setup(second).unwrap().render_pass;
    assert_eq!(first_pass.load(), AttachmentLoad::Clear);
    assert_eq!(second_pass.load(), AttachmentLoad::Load);
    let expected = vec![first_pass.handle(), second_pass.handle()];

    let a = TestMesh::new(&h.renderer, first, 6);
    let b = TestMesh::new(&h.renderer, second, 3);
    h.renderer.set_drawable_objects(&as_drawables(&[&b, &a])).unwrap();
    h.renderer.draw_frame().unwrap();

    let frame = last_frame(&h.device);
    assert_eq!(render_passes(&frame), expected);
    assert_eq!(frame.draw_counts(), vec![6, 3]);
}

#[test]
fn test_frame_is_cleared_when_only_later_setups_draw() {
    let mut h = harness(2);
    let first = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let second = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let mesh = TestMesh::new(&h.renderer, second, 9);
    h.renderer.set_drawable_objects(&as_drawables(&[&mesh])).unwrap();

    h.renderer.draw_frame().unwrap();

    let frame = last_frame(&h.device);
    let first_pass = h.renderer.setup(first).unwrap().render_pass.handle();
    let second_pass = h.renderer.setup(second).unwrap().render_pass.handle();
    assert_eq!(render_passes(&frame), vec![first_pass, second_pass]);
    assert_eq!(frame.draw_counts(), vec![9]);

    // The clearing pass is empty: nothing is bound between begin and end.
    let commands = &frame.commands;
    let begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
        .unwrap();
    assert!(matches!(commands[begin + 1], RecordedCommand::EndRenderPass));
}

#[test]
fn test_first_setup_must_clear() {
    let mut h = harness(2);
    let err = h
        .renderer
        .register_setup(TestMaterial::with_load(AttachmentLoad::Load))
        .unwrap_err();
    assert!(matches!(err, RendererError::InvalidSetup(_)));
    assert_eq!(h.renderer.setup_count(), 0);

    // A clearing setup is accepted afterwards.
    assert!(h.renderer.register_setup(TestMaterial::new()).is_ok());
}

#[test]
fn test_every_frame_uses_the_latest_draw_list() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let a = TestMesh::new(&h.renderer, setup, 6);
    let b = TestMesh::new(&h.renderer, setup, 3);

    h.renderer.set_drawable_objects(&as_drawables(&[&a, &b])).unwrap();
    h.renderer.draw_frame().unwrap();
    h.renderer.set_drawable_objects(&as_drawables(&[&b])).unwrap();
    h.renderer.draw_frame().unwrap();

    let frames = frame_submissions(&h.device);
    assert_eq!(frames[0].draw_counts(), vec![6, 3]);
    assert_eq!(frames[1].draw_counts(), vec![3]);
}

#[test]
fn test_dropped_drawables_are_skipped() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let a = TestMesh::new(&h.renderer, setup, 6);
    let b = TestMesh::new(&h.renderer, setup, 3);
    h.renderer.set_drawable_objects(&as_drawables(&[&a, &b])).unwrap();

    drop(a);
    h.renderer.draw_frame().unwrap();
    assert_eq!(last_frame(&h.device).draw_counts(), vec![3]);
}

#[test]
fn test_unknown_setup_is_rejected() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let mesh = TestMesh::new(&h.renderer, setup, 3);

    struct Stray;
    impl Drawable for Stray {
        fn setup_id(&self) -> SetupId {
            SetupId::new(7)
        }
        fn bind(
            &self,
            _: &vkframe_rhi::command::CommandBuffer,
            _: vk::PipelineLayout,
            _: usize,
        ) -> vkframe_rhi::RhiResult<()> {
            Ok(())
        }
        fn index_count(&self) -> u32 {
            3
        }
    }

    let mut objects = as_drawables(&[&mesh]);
    objects.push(Rc::new(Stray));
    let err = h.renderer.set_drawable_objects(&objects).unwrap_err();
    assert!(matches!(err, RendererError::UnknownSetup(id) if id == SetupId::new(7)));
}

#[test]
fn test_setup_ids_are_handed_to_binders() {
    let mut h = harness(2);
    let first = TestMaterial::new();
    let second = TestMaterial::new();
    let first_id = h.renderer.register_setup(first.clone()).unwrap();
    let second_id = h.renderer.register_setup(second.clone()).unwrap();

    assert_eq!(first.setup_id(), Some(first_id));
    assert_eq!(second.setup_id(), Some(second_id));
    assert_eq!(h.renderer.setup_count(), 2);
    assert_eq!(
        h.renderer.setup(first_id).unwrap().framebuffers.len(),
        h.renderer.swapchain_image_count()
    );
}

#[test]
fn test_empty_registry_still_presents_a_valid_image() {
    let mut h = harness(2);
    assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);

    let frame = last_frame(&h.device);
    assert_eq!(frame.render_pass_count(), 0);
    assert!(matches!(
        frame.commands.as_slice(),
        [RecordedCommand::ImageBarrier {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..
        }]
    ));
    assert_eq!(h.device.present_count(), 1);
}

#[test]
fn test_submission_waits_on_acquire_and_signals_present() {
    let mut h = harness(2);
    for _ in 0..3 {
        h.renderer.draw_frame().unwrap();
    }

    let frames = frame_submissions(&h.device);
    assert_eq!(frames.len(), 3);
    for (i, frame) in frames.iter().enumerate() {
        let slot = h.renderer.frame_slots().get(i % 2).unwrap();
        assert_eq!(frame.wait_semaphores, vec![slot.image_available()]);
        assert_eq!(
            frame.wait_stages,
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
        );
        assert_eq!(frame.signal_semaphores, vec![slot.render_finished()]);
        assert_eq!(frame.fence, slot.in_flight());
        assert_eq!(frame.command_buffers, vec![slot.command_buffer().handle()]);
    }
    assert_ne!(frames[0].fence, frames[1].fence);
    assert_eq!(frames[0].fence, frames[2].fence);
}

#[test]
fn test_global_uniform_is_written_to_the_current_slot() {
    let mut h = harness(2);
    let ubo = GlobalUbo::new(
        Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y),
        vulkan_perspective(45.0_f32.to_radians(), 4.0 / 3.0, 0.1, 100.0),
        Vec3::new(0.0, 0.0, 5.0),
    );

    h.renderer.draw_frame().unwrap();
    h.renderer.update_global_uniform(&ubo).unwrap();

    let slot = h.renderer.frame_slots().get(1).unwrap();
    let written = slot.uniform().read_data(0, GlobalUbo::SIZE).unwrap();
    assert_eq!(written, bytemuck::bytes_of(&ubo));

    let untouched = h.renderer.frame_slots().get(0).unwrap();
    let zeroes = untouched.uniform().read_data(0, GlobalUbo::SIZE).unwrap();
    assert!(zeroes.iter().all(|&b| b == 0));
}

#[test]
fn test_oversized_uniform_is_rejected() {
    let mut h = harness(2);
    let too_big = [0u8; 256];
    assert!(too_big.len() > GlobalUbo::SIZE);
    assert!(h.renderer.update_global_uniform(&too_big).is_err());
}

#[test]
fn test_depth_format_falls_back_to_second_candidate() {
    let device = HeadlessDevice::builder()
        .depth_formats(&[vk::Format::D24_UNORM_S8_UINT])
        .build();
    let mut config = common::config(2);
    config.depth_format_candidates = vec![vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT];

    let h = harness_on(device, config);
    assert_eq!(h.renderer.depth_format(), vk::Format::D24_UNORM_S8_UINT);
}

#[test]
fn test_no_usable_depth_format_aborts_init() {
    let device = HeadlessDevice::builder().depth_formats(&[]).build();
    let surface = HeadlessSurface::new(&device);

    let Err(err) = Renderer::with_device(common::config(2), device, Box::new(surface)) else {
        panic!("init succeeded without a depth format");
    };
    assert!(matches!(
        err,
        RendererError::Rhi(RhiError::UnsupportedCapability(_))
    ));
    assert!(err.is_fatal());
}

#[test]
fn test_invalid_config_is_rejected() {
    let device = HeadlessDevice::builder().build();
    let surface = HeadlessSurface::new(&device);

    let Err(err) = Renderer::with_device(common::config(0), device, Box::new(surface)) else {
        panic!("init accepted zero frames in flight");
    };
    assert!(matches!(err, RendererError::Core(_)));
}

#[test]
fn test_drop_releases_every_gpu_object() {
    let device = HeadlessDevice::builder().build();
    {
        let mut h = harness_on(device.clone(), common::config(3));
        let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
        let mesh = TestMesh::new(&h.renderer, setup, 3);
        h.renderer.set_drawable_objects(&as_drawables(&[&mesh])).unwrap();
        h.renderer.draw_frame().unwrap();
        drop(mesh);
    }

    for kind in [
        ObjectKind::Buffer,
        ObjectKind::Image,
        ObjectKind::ImageView,
        ObjectKind::CommandPool,
        ObjectKind::Semaphore,
        ObjectKind::Fence,
        ObjectKind::DescriptorSetLayout,
        ObjectKind::DescriptorPool,
        ObjectKind::RenderPass,
        ObjectKind::Framebuffer,
        ObjectKind::PipelineLayout,
        ObjectKind::ShaderModule,
        ObjectKind::Pipeline,
        ObjectKind::Swapchain,
    ] {
        assert_eq!(device.live_count(kind), 0, "{:?} leaked", kind);
    }
}
