//! The five bundled samples

use std::path::Path;

use glam::Vec3;

use super::{DrawConfig, Motion, SampleConfig, TransformAnimation, TEXTURE_BINDING, UNIFORM_BINDING};
use crate::backend::{BindingType, DescriptorLayoutEntry, RasterizationState, ShaderStageFlags};
use crate::frame::ClearColor;
use crate::resources::{cube, quad, triangle, Geometry};

pub const VERTEX_SHADER: &str = "simpleVS.spv";
pub const FRAGMENT_SHADER: &str = "simpleFS.spv";
pub const TEXTURE_FILE: &str = "texture.tga";

/// Sample selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SampleKind {
    Clear,
    Triangle,
    WorldTriangle,
    Texture,
    Cube,
}

impl SampleKind {
    pub fn config(self, resource_dir: &Path) -> SampleConfig {
        match self {
            SampleKind::Clear => SampleConfig::simple_clear(),
            SampleKind::Triangle => SampleConfig::hello_triangle(resource_dir),
            SampleKind::WorldTriangle => SampleConfig::world_triangle(resource_dir),
            SampleKind::Texture => SampleConfig::hello_texture(resource_dir),
            SampleKind::Cube => SampleConfig::cube(resource_dir),
        }
    }
}

fn uniform_slot() -> DescriptorLayoutEntry {
    DescriptorLayoutEntry {
        binding: UNIFORM_BINDING,
        ty: BindingType::UniformBuffer,
        visibility: ShaderStageFlags::VERTEX,
    }
}

fn texture_slot() -> DescriptorLayoutEntry {
    DescriptorLayoutEntry {
        binding: TEXTURE_BINDING,
        ty: BindingType::CombinedImageSampler,
        visibility: ShaderStageFlags::FRAGMENT,
    }
}

fn draw_config(resource_dir: &Path, geometry: Geometry) -> DrawConfig {
    DrawConfig {
        geometry,
        vertex_shader: resource_dir.join(VERTEX_SHADER),
        fragment_shader: resource_dir.join(FRAGMENT_SHADER),
        rasterization: RasterizationState::pass_through(),
        depth_test: false,
        descriptor_slots: Vec::new(),
        transform: None,
        texture: None,
    }
}

impl SampleConfig {
    /// Clear only, blue channel pulsing with the frame counter
    pub fn simple_clear() -> Self {
        Self {
            name: "simple-clear".to_string(),
            clear: ClearColor::Pulse,
            draw: None,
        }
    }

    /// Vertex-colored triangle over the pulsing clear, no descriptors
    pub fn hello_triangle(resource_dir: &Path) -> Self {
        Self {
            name: "hello-triangle".to_string(),
            clear: ClearColor::Pulse,
            draw: Some(draw_config(resource_dir, triangle().into())),
        }
    }

    /// The triangle spinning about Y through a transform uniform
    pub fn world_triangle(resource_dir: &Path) -> Self {
        Self {
            name: "world-triangle".to_string(),
            clear: ClearColor::default(),
            draw: Some(DrawConfig {
                descriptor_slots: vec![uniform_slot()],
                transform: Some(TransformAnimation {
                    eye: Vec3::new(0.0, 0.0, 3.0),
                    motion: Motion::SpinY,
                }),
                ..draw_config(resource_dir, triangle().into())
            }),
        }
    }

    /// Spinning quad sampling `texture.tga`
    pub fn hello_texture(resource_dir: &Path) -> Self {
        Self {
            name: "hello-texture".to_string(),
            clear: ClearColor::default(),
            draw: Some(DrawConfig {
                descriptor_slots: vec![uniform_slot(), texture_slot()],
                transform: Some(TransformAnimation {
                    eye: Vec3::new(0.0, 0.0, 3.0),
                    motion: Motion::SpinY,
                }),
                texture: Some(resource_dir.join(TEXTURE_FILE)),
                ..draw_config(resource_dir, quad().into())
            }),
        }
    }

    /// Indexed, depth-tested cube
    pub fn cube(resource_dir: &Path) -> Self {
        Self {
            name: "cube".to_string(),
            clear: ClearColor::default(),
            draw: Some(DrawConfig {
                depth_test: true,
                descriptor_slots: vec![uniform_slot()],
                transform: Some(TransformAnimation {
                    eye: Vec3::new(0.0, 0.0, 6.0),
                    motion: Motion::Tumble,
                }),
                ..draw_config(resource_dir, cube().into())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PrimitiveTopology;

    #[test]
    fn test_preset_shapes() {
        let dir = Path::new("resource");

        assert!(SampleConfig::simple_clear().draw.is_none());

        let triangle = SampleConfig::hello_triangle(dir).draw.unwrap();
        assert_eq!(triangle.geometry.vertex_count, 3);
        assert!(triangle.descriptor_slots.is_empty());
        assert_eq!(triangle.vertex_shader, dir.join("simpleVS.spv"));
        assert_eq!(SampleConfig::hello_triangle(dir).clear, ClearColor::Pulse);

        let world = SampleConfig::world_triangle(dir);
        assert_eq!(world.clear, ClearColor::default());
        let world = world.draw.unwrap();
        assert_eq!(world.geometry.vertex_count, 3);
        assert!(world.geometry.indices.is_none());
        assert!(world.transform.is_some());

        let texture = SampleConfig::hello_texture(dir).draw.unwrap();
        assert_eq!(texture.geometry.topology, PrimitiveTopology::TriangleStrip);
        assert_eq!(texture.texture, Some(dir.join("texture.tga")));
        assert_eq!(texture.descriptor_slots.len(), 2);

        let cube = SampleConfig::cube(dir).draw.unwrap();
        assert!(cube.depth_test);
        assert_eq!(cube.geometry.indices.as_ref().map(Vec::len), Some(36));
    }

    #[test]
    fn test_kind_maps_to_preset() {
        let dir = Path::new("assets");
        assert_eq!(SampleKind::Cube.config(dir), SampleConfig::cube(dir));
        assert_eq!(SampleKind::Clear.config(dir).name, "simple-clear");
    }
}
