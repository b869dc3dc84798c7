//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 3);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const MAP_WRITE: Self = Self(1 << 0);
    pub const COPY_SRC: Self = Self(1 << 1);
    pub const COPY_DST: Self = Self(1 << 2);
    pub const INDEX: Self = Self(1 << 3);
    pub const VERTEX: Self = Self(1 << 4);
    pub const UNIFORM: Self = Self(1 << 5);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Where an allocation lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, not host-visible
    DeviceLocal,
    /// Host-visible and coherent (mappable)
    HostVisible,
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Bgra8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

impl BufferDescriptor {
    /// Host-visible buffer, the way every sample allocates its vertex/index/uniform data
    pub fn host_visible(label: &str, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.to_string()),
            size,
            usage: usage | BufferUsage::MAP_WRITE,
            location: MemoryLocation::HostVisible,
        }
    }
}

/// Two-dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Sint32,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Sint32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStepMode {
    Vertex,
    Instance,
}

/// Vertex buffer layout: one binding description plus the attributes read from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBufferLayout {
    pub binding: u32,
    pub array_stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    /// Check that every attribute lies inside one record of `array_stride` bytes.
    ///
    /// Returns a description of the first offending attribute.
    pub fn validate(&self) -> Result<(), String> {
        if self.array_stride == 0 {
            return Err("vertex stride is zero".to_string());
        }
        for attr in &self.attributes {
            if attr.binding != self.binding {
                return Err(format!(
                    "attribute at location {} reads binding {}, layout declares binding {}",
                    attr.location, attr.binding, self.binding
                ));
            }
            if attr.offset >= self.array_stride {
                return Err(format!(
                    "attribute at location {} starts at offset {} outside stride {}",
                    attr.location, attr.offset, self.array_stride
                ));
            }
            if attr.offset + attr.format.size() > self.array_stride {
                return Err(format!(
                    "attribute at location {} ({:?} at offset {}) reads past stride {}",
                    attr.location, attr.format, attr.offset, self.array_stride
                ));
            }
        }
        Ok(())
    }
}

/// Vertex with position and RGBA color (triangle and cube samples)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl ColorVertex {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            binding: 0,
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    binding: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    binding: 0,
                    format: VertexFormat::Float32x4,
                    offset: 12,
                },
            ],
        }
    }
}

/// Vertex with position and one UV set (textured quad sample)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl TexturedVertex {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            binding: 0,
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    binding: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    binding: 0,
                    format: VertexFormat::Float32x2,
                    offset: 12,
                },
            ],
        }
    }
}

/// World/view/projection uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformUniform {
    pub world: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Compare function for depth/stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
        }
    }
}

/// Descriptor binding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    CombinedImageSampler,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Nearest,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::Repeat,
        }
    }
}

/// Image layouts the protocol moves images through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    PresentSrc,
    TransferDst,
    ColorAttachment,
    ShaderReadOnly,
}

/// Memory access kinds used in barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessFlags(u32);

impl AccessFlags {
    pub const NONE: Self = Self(0);
    pub const MEMORY_READ: Self = Self(1 << 0);
    pub const MEMORY_WRITE: Self = Self(1 << 1);
    pub const TRANSFER_WRITE: Self = Self(1 << 2);
    pub const SHADER_READ: Self = Self(1 << 3);
    pub const COLOR_ATTACHMENT_WRITE: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_vertex_layouts_fit_their_stride() {
        for layout in [ColorVertex::layout(), TexturedVertex::layout()] {
            assert!(layout.validate().is_ok());
            for attr in &layout.attributes {
                assert!(attr.offset < layout.array_stride);
                assert!(attr.offset + attr.format.size() <= layout.array_stride);
            }
        }
        assert_eq!(ColorVertex::layout().array_stride, 28);
        assert_eq!(TexturedVertex::layout().array_stride, 20);
    }

    #[test]
    fn test_layout_rejects_attribute_past_stride() {
        let layout = VertexBufferLayout {
            binding: 0,
            array_stride: 20,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute {
                location: 1,
                binding: 0,
                format: VertexFormat::Float32x4,
                offset: 12,
            }],
        };
        let err = layout.validate().unwrap_err();
        assert!(err.contains("location 1"));
    }

    #[test]
    fn test_layout_rejects_offset_at_stride() {
        let layout = VertexBufferLayout {
            binding: 0,
            array_stride: 12,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![VertexAttribute {
                location: 0,
                binding: 0,
                format: VertexFormat::Float32,
                offset: 12,
            }],
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_layout_rejects_foreign_binding() {
        let mut layout = ColorVertex::layout();
        layout.attributes[0].binding = 3;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_transform_uniform_size() {
        assert_eq!(std::mem::size_of::<TransformUniform>(), 192);
    }

    #[test]
    fn test_extent_aspect() {
        assert_eq!(Extent2d::new(800, 400).aspect_ratio(), 2.0);
        assert!(Extent2d::new(0, 10).is_empty());
        assert_eq!(Extent2d::new(10, 0).aspect_ratio(), 1.0);
    }
}
