//! Texture file loading and the staging upload path

mod common;

use common::{tga_bytes, Fixture, TempDir, CHECKER};
use vk_lifecycle::backend::dummy::{DeviceCall, DummyDevice, FailPoint, ResourceKind};
use vk_lifecycle::backend::{BackendError, BufferHandle, Device, ImageLayout};
use vk_lifecycle::resources::{TextureError, TgaImage, Texture, UploadContext};
use vk_lifecycle::{Error, ResourceRegistry};

fn upload_context(device: &mut DummyDevice, registry: &mut ResourceRegistry) -> UploadContext {
    let pool = registry.create_command_pool(device, 0).unwrap();
    let buffers = device.allocate_command_buffers(pool, 2).unwrap();
    UploadContext {
        queue: device.graphics_queue(),
        command_buffer: buffers[1],
    }
}

fn staging_buffer(device: &DummyDevice) -> BufferHandle {
    device
        .calls()
        .iter()
        .find_map(|call| match call {
            DeviceCall::CreateBuffer { buffer, size, .. } if *size == CHECKER.len() as u64 => {
                Some(*buffer)
            }
            _ => None,
        })
        .unwrap()
}

#[test]
fn test_tga_file_read_exactly() {
    let dir = TempDir::new("tga");
    let mut bytes = tga_bytes(2, 2, &CHECKER);
    bytes.extend_from_slice(b"TRUEVISION-XFILE.\0");
    let path = dir.write("checker.tga", &bytes);

    let image = TgaImage::load(&path).unwrap();
    assert_eq!((image.width, image.height), (2, 2));
    assert_eq!(image.pixels, CHECKER.to_vec());
}

#[test]
fn test_truncated_tga_file_fails() {
    let dir = TempDir::new("tga-truncated");
    let path = dir.write("short.tga", &tga_bytes(4, 4, &CHECKER));

    match TgaImage::load(&path) {
        Err(TextureError::TruncatedPixels { expected, actual }) => {
            assert_eq!(expected, 64);
            assert_eq!(actual, 16);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_staging_released_after_fence() {
    let mut fixture = Fixture::new(false);
    let device = &mut fixture.device;
    let mut registry = ResourceRegistry::new();
    let upload = upload_context(device, &mut registry);
    let image = TgaImage::from_bytes(&tga_bytes(2, 2, &CHECKER)).unwrap();

    let texture = Texture::create(device, &mut registry, &upload, &image, "checker").unwrap();
    assert_eq!((texture.width, texture.height), (2, 2));

    let staging = staging_buffer(device);
    let waited = device
        .position(|call| matches!(call, DeviceCall::WaitForFence(_)))
        .unwrap();
    let released = device
        .position(|call| *call == DeviceCall::Destroy(ResourceKind::Buffer, staging.raw()))
        .unwrap();
    assert!(waited < released);
    assert_eq!(device.destroy_count(ResourceKind::Buffer, staging.raw()), 1);
    assert_eq!(device.live_count(ResourceKind::Fence), 0);

    // The image ends up readable from shaders
    let last_barrier = device
        .calls()
        .iter()
        .rev()
        .find_map(|call| match call {
            DeviceCall::ImageBarrier(barrier) => Some(*barrier),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_barrier.image, texture.image);
    assert_eq!(last_barrier.new_layout, ImageLayout::ShaderReadOnly);
    assert!(device.calls().iter().any(|call| matches!(
        call,
        DeviceCall::CopyBufferToImage { buffer, region, .. }
            if *buffer == staging && region.width == 2 && region.height == 2
    )));

    registry.destroy_all(device);
    fixture.assert_all_released_once();
}

#[test]
fn test_fence_failure_leaks_staging() {
    let mut fixture = Fixture::new(false);
    let device = &mut fixture.device;
    let mut registry = ResourceRegistry::new();
    let upload = upload_context(device, &mut registry);
    let image = TgaImage::from_bytes(&tga_bytes(2, 2, &CHECKER)).unwrap();

    device.fail_on(FailPoint::WaitForFence);
    let err = Texture::create(device, &mut registry, &upload, &image, "checker").unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(BackendError::FenceWaitFailed(_))
    ));

    let staging = staging_buffer(device);
    assert_eq!(device.destroy_count(ResourceKind::Buffer, staging.raw()), 0);

    device.clear_failures();
    registry.destroy_all(device);
    let live = device.live();
    assert!(live.contains(&(ResourceKind::Buffer, staging.raw())));
    assert!(!live.iter().any(|(kind, _)| *kind == ResourceKind::Image));
}

#[test]
fn test_submit_failure_releases_staging() {
    let mut fixture = Fixture::new(false);
    let device = &mut fixture.device;
    let mut registry = ResourceRegistry::new();
    let upload = upload_context(device, &mut registry);
    let image = TgaImage::from_bytes(&tga_bytes(2, 2, &CHECKER)).unwrap();

    device.fail_on(FailPoint::QueueSubmit);
    assert!(Texture::create(device, &mut registry, &upload, &image, "checker").is_err());

    device.clear_failures();
    registry.destroy_all(device);
    fixture.assert_all_released_once();
}
