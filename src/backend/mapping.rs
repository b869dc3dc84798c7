//! Scoped host access to a mappable allocation.

use bytemuck::Pod;

use super::traits::{BackendResult, Device, MemoryHandle};

/// Mapped view of one host-visible allocation.
///
/// The allocation is unmapped when the guard is dropped, including when a
/// write fails and the error propagates out of the caller.
pub struct Mapping<'a, D: Device + ?Sized> {
    device: &'a mut D,
    memory: MemoryHandle,
}

impl<'a, D: Device + ?Sized> Mapping<'a, D> {
    pub fn new(device: &'a mut D, memory: MemoryHandle) -> BackendResult<Self> {
        device.map_memory(memory)?;
        Ok(Self { device, memory })
    }

    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> BackendResult<()> {
        self.device.write_mapped(self.memory, offset, data)
    }

    pub fn write<T: Pod>(&mut self, offset: u64, value: &T) -> BackendResult<()> {
        self.write_bytes(offset, bytemuck::bytes_of(value))
    }

    pub fn write_slice<T: Pod>(&mut self, offset: u64, values: &[T]) -> BackendResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(values))
    }
}

impl<D: Device + ?Sized> Drop for Mapping<'_, D> {
    fn drop(&mut self) {
        self.device.unmap_memory(self.memory);
    }
}

/// Map, copy `values` to the start of the allocation, unmap
pub fn upload_slice<D: Device + ?Sized, T: Pod>(
    device: &mut D,
    memory: MemoryHandle,
    values: &[T],
) -> BackendResult<()> {
    Mapping::new(device, memory)?.write_slice(0, values)
}
