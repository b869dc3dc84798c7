//! Precompiled SPIR-V shader loading

use std::io::Cursor;
use std::path::Path;

use crate::backend::{Device, ShaderModuleHandle};
use crate::error::{Error, Result};
use crate::resources::ResourceRegistry;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Entry point every sample shader exports
pub const SHADER_ENTRY_POINT: &str = "main";

/// Decode a SPIR-V blob into words
pub fn parse_spirv(bytes: &[u8]) -> std::result::Result<Vec<u32>, String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(format!("length {} is not a non-zero multiple of 4", bytes.len()));
    }
    // read_spv also accepts big-endian modules and swaps them
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| e.to_string())?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(format!("bad magic number {:#010x}", other)),
        None => Err("empty module".to_string()),
    }
}

/// Read a SPIR-V file whole
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| Error::ShaderLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_spirv(&bytes).map_err(|reason| Error::ShaderLoad {
        path: path.to_path_buf(),
        reason,
    })
}

/// Read a SPIR-V file and create a registry-owned shader module from it
pub fn create_shader_module<D: Device + ?Sized>(
    device: &mut D,
    registry: &mut ResourceRegistry,
    path: &Path,
) -> Result<ShaderModuleHandle> {
    let code = load_spirv(path)?;
    log::debug!("Loaded shader {} ({} words)", path.display(), code.len());
    Ok(registry.create_shader_module(device, &code)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_module() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_rejects_unaligned_length() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(parse_spirv(&bytes).is_err());
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(parse_spirv(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
