//! Texture loading and upload
//!
//! Textures are read from uncompressed 32-bit TGA-style files and copied into a
//! device-local BGRA8 image through a staging buffer. The first 12 header bytes
//! are not interpreted beyond rejecting image types that name another variant,
//! so a zero-filled prefix is accepted.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::*;
use crate::resources::ResourceRegistry;

const TGA_HEADER_LEN: usize = 18;
const TGA_COLOR_MAPPED: [u8; 2] = [1, 9];
const TGA_RLE_OR_GREY: [u8; 3] = [3, 10, 11];

/// TGA format failures
#[derive(Debug, Error)]
pub enum TextureError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TGA header truncated: {0} bytes, need 18")]
    TruncatedHeader(usize),
    #[error("Color-mapped TGA images are not supported")]
    ColorMapped,
    #[error("TGA image type {0} is not supported, only uncompressed 32-bit color")]
    UnsupportedImageType(u8),
    #[error("TGA pixel depth {0} is not supported, only 32 bits")]
    UnsupportedPixelDepth(u8),
    #[error("TGA dimensions {width}x{height} are not positive")]
    InvalidDimensions { width: i16, height: i16 },
    #[error("TGA pixel data truncated: {actual} bytes, need {expected}")]
    TruncatedPixels { expected: usize, actual: usize },
}

/// Decoded TGA image, pixels in file order as BGRA bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TgaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TgaImage {
    /// Load texture from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| TextureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parse an in-memory TGA file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TextureError> {
        if bytes.len() < TGA_HEADER_LEN {
            return Err(TextureError::TruncatedHeader(bytes.len()));
        }
        let (header, body) = bytes.split_at(TGA_HEADER_LEN);

        let image_type = header[2];
        let width = i16::from_le_bytes([header[12], header[13]]);
        let height = i16::from_le_bytes([header[14], header[15]]);
        let pixel_depth = header[16];

        if TGA_COLOR_MAPPED.contains(&image_type) {
            return Err(TextureError::ColorMapped);
        }
        if TGA_RLE_OR_GREY.contains(&image_type) {
            return Err(TextureError::UnsupportedImageType(image_type));
        }
        // A zero depth byte is the bare layout
        if pixel_depth != 0 && pixel_depth != 32 {
            return Err(TextureError::UnsupportedPixelDepth(pixel_depth));
        }
        if width <= 0 || height <= 0 {
            return Err(TextureError::InvalidDimensions { width, height });
        }

        let (width, height) = (width as u32, height as u32);
        let expected = width as usize * height as usize * 4;
        if body.len() < expected {
            return Err(TextureError::TruncatedPixels {
                expected,
                actual: body.len(),
            });
        }

        // Anything after the pixel block (extension area, footer) is ignored
        Ok(Self {
            width,
            height,
            pixels: body[..expected].to_vec(),
        })
    }
}

/// Queue and spare command buffer used for one-shot transfers
#[derive(Debug, Clone, Copy)]
pub struct UploadContext {
    pub queue: QueueHandle,
    pub command_buffer: CommandBufferHandle,
}

/// Sampled GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub sampler: SamplerHandle,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    pub const FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;

    /// Create a device-local texture and upload `source` into it.
    ///
    /// Blocks until the copy has finished. The image, view and sampler are
    /// owned by `registry`; the staging buffer is released before returning.
    pub fn create<D: Device + ?Sized>(
        device: &mut D,
        registry: &mut ResourceRegistry,
        upload: &UploadContext,
        source: &TgaImage,
        label: &str,
    ) -> crate::Result<Self> {
        let (image, _) = registry.create_image(
            device,
            &TextureDescriptor {
                label: Some(label.to_string()),
                width: source.width,
                height: source.height,
                format: Self::FORMAT,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            },
        )?;

        upload_image(device, upload, image, source)?;

        let view = registry.create_image_view(device, image, Self::FORMAT)?;
        let sampler = registry.create_sampler(
            device,
            &SamplerDescriptor {
                label: Some(label.to_string()),
                ..Default::default()
            },
        )?;

        log::info!(
            "Uploaded texture '{}' ({}x{})",
            label,
            source.width,
            source.height
        );

        Ok(Self {
            image,
            view,
            sampler,
            width: source.width,
            height: source.height,
        })
    }
}

/// Copy `source` into `image` through a staging buffer and wait for the copy.
///
/// On return `image` is in the shader-read-only layout.
pub fn upload_image<D: Device + ?Sized>(
    device: &mut D,
    upload: &UploadContext,
    image: ImageHandle,
    source: &TgaImage,
) -> BackendResult<()> {
    let (staging, staging_memory) = device.create_buffer(&BufferDescriptor::host_visible(
        "texture staging",
        source.pixels.len() as u64,
        BufferUsage::COPY_SRC,
    ))?;

    let release_staging = |device: &mut D| {
        device.destroy_buffer(staging);
        device.free_memory(staging_memory);
    };

    if let Err(e) = record_upload(device, upload.command_buffer, staging, staging_memory, image, source) {
        release_staging(device);
        return Err(e);
    }

    let fence = match device.create_fence() {
        Ok(fence) => fence,
        Err(e) => {
            release_staging(device);
            return Err(e);
        }
    };

    let submit = SubmitInfo {
        command_buffer: upload.command_buffer,
        wait_semaphore: None,
        signal_semaphore: None,
        fence: Some(fence),
    };
    if let Err(e) = device.queue_submit(upload.queue, &submit) {
        device.destroy_fence(fence);
        release_staging(device);
        return Err(e);
    }

    if let Err(e) = device.wait_for_fence(fence) {
        // The copy may still be reading the staging buffer
        log::warn!("Texture upload fence wait failed, leaking staging buffer: {}", e);
        return Err(e);
    }

    device.destroy_fence(fence);
    release_staging(device);
    Ok(())
}

fn record_upload<D: Device + ?Sized>(
    device: &mut D,
    cmd: CommandBufferHandle,
    staging: BufferHandle,
    staging_memory: MemoryHandle,
    image: ImageHandle,
    source: &TgaImage,
) -> BackendResult<()> {
    upload_slice(device, staging_memory, &source.pixels)?;

    device.begin_command_buffer(cmd)?;
    device.cmd_image_barrier(
        cmd,
        &ImageBarrier {
            image,
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::TransferDst,
            src_access: AccessFlags::NONE,
            dst_access: AccessFlags::TRANSFER_WRITE,
            depth: false,
        },
    );
    device.cmd_copy_buffer_to_image(
        cmd,
        staging,
        image,
        &BufferImageCopy {
            buffer_offset: 0,
            width: source.width,
            height: source.height,
        },
    );
    device.cmd_image_barrier(
        cmd,
        &ImageBarrier {
            image,
            old_layout: ImageLayout::TransferDst,
            new_layout: ImageLayout::ShaderReadOnly,
            src_access: AccessFlags::TRANSFER_WRITE,
            dst_access: AccessFlags::SHADER_READ,
            depth: false,
        },
    );
    device.end_command_buffer(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tga_header(image_type: u8, width: i16, height: i16, depth: u8) -> Vec<u8> {
        let mut header = vec![0u8; TGA_HEADER_LEN];
        header[2] = image_type;
        header[12..14].copy_from_slice(&width.to_le_bytes());
        header[14..16].copy_from_slice(&height.to_le_bytes());
        header[16] = depth;
        header[17] = 8;
        header
    }

    #[test]
    fn test_reads_pixels_exactly() {
        let mut bytes = tga_header(2, 2, 1, 32);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        bytes.extend_from_slice(b"TRUEVISION-XFILE.\0");

        let image = TgaImage::from_bytes(&bytes).unwrap();
        assert_eq!(image.width, 2);
        assert_eq!(image.height, 1);
        assert_eq!(image.pixels, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_reads_bare_layout() {
        // Zero-filled prefix, dimensions, two zero bytes, then pixels
        let mut bytes = vec![0u8; 12];
        bytes.extend_from_slice(&2i16.to_le_bytes());
        bytes.extend_from_slice(&1i16.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend(1..=8u8);

        let image = TgaImage::from_bytes(&bytes).unwrap();
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(image.pixels, (1..=8u8).collect::<Vec<_>>());

        bytes.pop();
        assert!(matches!(
            TgaImage::from_bytes(&bytes),
            Err(TextureError::TruncatedPixels {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_rejects_truncated_header() {
        assert!(matches!(
            TgaImage::from_bytes(&[0; 10]),
            Err(TextureError::TruncatedHeader(10))
        ));
    }

    #[test]
    fn test_rejects_unsupported_variants() {
        let rle = tga_header(10, 1, 1, 32);
        assert!(matches!(
            TgaImage::from_bytes(&rle),
            Err(TextureError::UnsupportedImageType(10))
        ));

        let rgb = tga_header(2, 1, 1, 24);
        assert!(matches!(
            TgaImage::from_bytes(&rgb),
            Err(TextureError::UnsupportedPixelDepth(24))
        ));

        let mapped = tga_header(1, 1, 1, 32);
        assert!(matches!(
            TgaImage::from_bytes(&mapped),
            Err(TextureError::ColorMapped)
        ));

        let empty = tga_header(2, 0, 4, 32);
        assert!(matches!(
            TgaImage::from_bytes(&empty),
            Err(TextureError::InvalidDimensions { width: 0, height: 4 })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = TgaImage::load("does/not/exist.tga").unwrap_err();
        assert!(matches!(err, TextureError::Io { .. }));
    }
}
