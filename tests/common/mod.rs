//! Shared fixtures for the integration tests.
//!
//! Everything runs against the dummy backend; sample assets are written to a
//! per-test temporary directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use vk_lifecycle::backend::dummy::{DummyDevice, DummySurface, ResourceKind};
use vk_lifecycle::backend::Extent2d;
use vk_lifecycle::resources::SPIRV_MAGIC;
use vk_lifecycle::InitArgs;

pub const EXTENT: Extent2d = Extent2d {
    width: 800,
    height: 600,
};

/// Install a test logger once; later calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Device plus surface, as the window host would hold them
pub struct Fixture {
    pub device: DummyDevice,
    pub surface: DummySurface,
}

impl Fixture {
    pub fn new(depth: bool) -> Self {
        init_logger();
        Self {
            device: DummyDevice::new(),
            surface: DummySurface::new(EXTENT, depth),
        }
    }

    pub fn init_args(&self) -> InitArgs {
        InitArgs {
            graphics_queue: self.device.graphics_queue(),
            graphics_queue_family: 0,
        }
    }

    /// Every created object was destroyed exactly once
    pub fn assert_all_released_once(&self) {
        for (kind, raw) in self.device.created() {
            assert_eq!(
                self.device.destroy_count(kind, raw),
                1,
                "{:?} {} destroyed {} times",
                kind,
                raw,
                self.device.destroy_count(kind, raw)
            );
        }
        assert!(self.device.live().is_empty());
    }

    pub fn destroyed(&self, kind: ResourceKind) -> usize {
        self.device
            .created()
            .into_iter()
            .filter(|&(k, raw)| k == kind && self.device.destroy_count(k, raw) > 0)
            .count()
    }
}

/// A minimal module: magic number, version, generator, bound, schema
pub fn spirv_bytes() -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

/// Uncompressed 32-bit true-color TGA with the given BGRA pixels
pub fn tga_bytes(width: i16, height: i16, pixels: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 18];
    bytes[2] = 2;
    bytes[12..14].copy_from_slice(&width.to_le_bytes());
    bytes[14..16].copy_from_slice(&height.to_le_bytes());
    bytes[16] = 32;
    bytes[17] = 8;
    bytes.extend_from_slice(pixels);
    bytes
}

/// 2x2 checkerboard, BGRA
pub const CHECKER: [u8; 16] = [
    0, 0, 0, 255, 255, 255, 255, 255, //
    255, 255, 255, 255, 0, 0, 0, 255,
];

/// Temporary directory removed on drop
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(name: &str) -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let path = std::env::temp_dir().join(format!(
            "vk-lifecycle-{}-{}-{}",
            name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn write(&self, file: &str, bytes: &[u8]) -> PathBuf {
        let path = self.0.join(file);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Directory with both shaders and a 2x2 texture
pub fn sample_resources(name: &str) -> TempDir {
    let dir = TempDir::new(name);
    dir.write("simpleVS.spv", &spirv_bytes());
    dir.write("simpleFS.spv", &spirv_bytes());
    dir.write("texture.tga", &tga_bytes(2, 2, &CHECKER));
    dir
}
