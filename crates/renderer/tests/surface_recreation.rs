//! Swapchain recreation on stale surfaces and resizes.

mod common;

use common::{TestMaterial, TestMesh, as_drawables, frame_submissions, harness, last_frame};
use vkframe_renderer::{FrameStatus, SetupId};
use vkframe_rhi::headless::{DeviceEvent, ObjectKind};
use vkframe_rhi::{SurfaceProvider, vk};

fn framebuffer_handles(h: &common::Harness, id: SetupId) -> Vec<vk::Framebuffer> {
    h.renderer
        .setup(id)
        .unwrap()
        .framebuffers
        .iter()
        .map(|fb| fb.handle())
        .collect()
}

#[test]
fn test_resize_hook_is_registered_at_init() {
    let h = harness(2);
    assert_eq!(h.surface.hook_count(), 1);
}

#[test]
fn test_out_of_date_acquire_rebuilds_before_next_frame_records() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let a = TestMesh::new(&h.renderer, setup, 6);
    let b = TestMesh::new(&h.renderer, setup, 3);
    h.renderer.set_drawable_objects(&as_drawables(&[&a, &b])).unwrap();
    h.device.fail_acquire_at(5, vk::Result::ERROR_OUT_OF_DATE_KHR);

    for _ in 0..4 {
        assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);
    }
    let frame_before = h.renderer.current_frame();
    let stale_framebuffers = framebuffer_handles(&h, setup);

    assert_eq!(
        h.renderer.draw_frame().unwrap(),
        FrameStatus::SurfaceRecreated
    );
    assert_eq!(h.renderer.current_frame(), frame_before);
    assert_eq!(frame_submissions(&h.device).len(), 4);

    assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);
    let frames = frame_submissions(&h.device);
    assert_eq!(frames.len(), 5);
    assert_eq!(last_frame(&h.device).draw_counts(), vec![6, 3]);

    // Everything the next frame depends on is rebuilt between the failed
    // acquire and the next recording.
    let events = h.device.events();
    let failed = events
        .iter()
        .position(|e| *e == DeviceEvent::Acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)))
        .unwrap();
    let next_record = failed
        + events[failed..]
            .iter()
            .position(|e| matches!(e, DeviceEvent::BeginCommandBuffer(_)))
            .unwrap();
    let rebuild = &events[failed..next_record];

    assert!(rebuild.contains(&DeviceEvent::WaitIdle));
    assert_eq!(
        rebuild
            .iter()
            .filter(|e| matches!(e, DeviceEvent::SwapchainDestroyed(_)))
            .count(),
        1
    );
    assert_eq!(
        rebuild
            .iter()
            .filter(|e| matches!(e, DeviceEvent::SwapchainCreated(_)))
            .count(),
        1
    );
    assert!(rebuild.iter().any(|e| matches!(
        e,
        DeviceEvent::ImageCreated { format, .. } if *format == h.renderer.depth_format()
    )));
    assert_eq!(
        rebuild
            .iter()
            .filter(|e| matches!(e, DeviceEvent::FramebufferCreated(_)))
            .count(),
        h.renderer.swapchain_image_count()
    );

    let fresh_framebuffers = framebuffer_handles(&h, setup);
    assert!(
        fresh_framebuffers
            .iter()
            .all(|fb| !stale_framebuffers.contains(fb))
    );
    let target = frames[4].framebuffers()[0];
    assert!(fresh_framebuffers.contains(&target));
}

#[test]
fn test_resizing_twice_leaves_one_swapchain_and_one_framebuffer_set_per_setup() {
    let mut h = harness(2);
    let first = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let second = h.renderer.register_setup(TestMaterial::new()).unwrap();

    for _ in 0..2 {
        h.surface.resize(1024, 768);
        assert_eq!(
            h.renderer.draw_frame().unwrap(),
            FrameStatus::SurfaceRecreated
        );
    }

    let image_count = h.renderer.swapchain_image_count();
    assert_eq!(h.device.live_count(ObjectKind::Swapchain), 1);
    assert_eq!(h.device.live_count(ObjectKind::Framebuffer), 2 * image_count);
    assert_eq!(framebuffer_handles(&h, first).len(), image_count);
    assert_eq!(framebuffer_handles(&h, second).len(), image_count);
    assert_eq!(
        h.renderer.swapchain_extent(),
        vk::Extent2D {
            width: 1024,
            height: 768
        }
    );
    // The color views and the single depth view.
    assert_eq!(h.device.live_count(ObjectKind::ImageView), image_count + 1);
    assert_eq!(h.device.live_count(ObjectKind::Image), 1);
}

#[test]
fn test_explicit_notification_recreates_after_presenting() {
    let mut h = harness(2);
    h.renderer.notify_resized();

    assert_eq!(
        h.renderer.draw_frame().unwrap(),
        FrameStatus::SurfaceRecreated
    );
    assert_eq!(h.device.present_count(), 1);
    assert_eq!(h.renderer.current_frame(), 1);
    assert_eq!(h.device.created_count(ObjectKind::Swapchain), 2);

    assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(h.device.created_count(ObjectKind::Swapchain), 2);
}

#[test]
fn test_zero_size_blocks_until_the_surface_has_area() {
    let mut h = harness(2);
    h.surface.resize(0, 0);
    h.surface.push_size_after_wait(0, 0);
    h.surface.push_size_after_wait(640, 480);

    assert_eq!(
        h.renderer.draw_frame().unwrap(),
        FrameStatus::SurfaceRecreated
    );
    assert_eq!(h.surface.wait_calls(), 2);
    assert_eq!(
        h.renderer.swapchain_extent(),
        vk::Extent2D {
            width: 640,
            height: 480
        }
    );
}

#[test]
fn test_surface_without_area_is_reported() {
    let h = harness(2);
    assert!(h.surface.has_area());
    h.surface.resize(0, 0);
    assert!(!h.surface.has_area());
    h.surface.resize(640, 0);
    assert!(!h.surface.has_area());
}

#[test]
fn test_skipping_frames_while_minimized_never_blocks() {
    let mut h = harness(2);
    h.surface.resize(0, 0);

    // The caller holds off drawing until the window has area again.
    assert!(!h.surface.has_area());
    h.surface.resize(800, 600);
    assert!(h.surface.has_area());

    assert_eq!(
        h.renderer.draw_frame().unwrap(),
        FrameStatus::SurfaceRecreated
    );
    assert_eq!(h.surface.wait_calls(), 0);
    assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_suboptimal_acquire_still_renders_then_recreates() {
    let mut h = harness(2);
    let setup = h.renderer.register_setup(TestMaterial::new()).unwrap();
    let mesh = TestMesh::new(&h.renderer, setup, 3);
    h.renderer.set_drawable_objects(&as_drawables(&[&mesh])).unwrap();
    h.device.fail_acquire_at(1, vk::Result::SUBOPTIMAL_KHR);

    assert_eq!(
        h.renderer.draw_frame().unwrap(),
        FrameStatus::SurfaceRecreated
    );
    assert_eq!(last_frame(&h.device).draw_counts(), vec![3]);
    assert_eq!(h.device.present_count(), 1);
    assert_eq!(h.renderer.current_frame(), 1);
    assert_eq!(h.device.created_count(ObjectKind::Swapchain), 2);
}

#[test]
fn test_out_of_date_present_advances_then_recreates() {
    let mut h = harness(2);
    h.device.fail_present_at(1, vk::Result::ERROR_OUT_OF_DATE_KHR);

    assert_eq!(
        h.renderer.draw_frame().unwrap(),
        FrameStatus::SurfaceRecreated
    );
    assert_eq!(h.renderer.current_frame(), 1);
    assert_eq!(h.device.live_count(ObjectKind::Swapchain), 1);
    assert_eq!(h.device.created_count(ObjectKind::Swapchain), 2);
    assert_eq!(h.renderer.draw_frame().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_lost_surface_is_fatal() {
    let mut h = harness(2);
    h.device.fail_acquire_at(1, vk::Result::ERROR_SURFACE_LOST_KHR);

    let err = h.renderer.draw_frame().unwrap_err();
    assert!(err.is_fatal());
}
