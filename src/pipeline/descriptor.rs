//! Descriptor slots and the single descriptor set a sample draws with

use std::collections::{HashMap, HashSet};

use crate::backend::*;
use crate::error::{Error, Result};
use crate::resources::ResourceRegistry;

/// Reject layouts that declare the same binding index twice
pub fn validate_slots(slots: &[DescriptorLayoutEntry]) -> Result<()> {
    let mut seen = HashMap::new();
    for slot in slots {
        if let Some(previous) = seen.insert(slot.binding, slot.ty) {
            return Err(Error::DescriptorMismatch {
                binding: slot.binding,
                reason: format!("declared twice, as {:?} and {:?}", previous, slot.ty),
            });
        }
    }
    Ok(())
}

/// Check that `writes` fill every slot exactly once with a resource of the
/// declared type
pub fn check_writes(slots: &[DescriptorLayoutEntry], writes: &[DescriptorWrite]) -> Result<()> {
    let mut written = HashSet::new();
    for write in writes {
        let slot = slots
            .iter()
            .find(|slot| slot.binding == write.binding)
            .ok_or_else(|| Error::DescriptorMismatch {
                binding: write.binding,
                reason: "no slot is declared at this binding".to_string(),
            })?;

        let provided = write.resource.binding_type();
        if provided != slot.ty {
            return Err(Error::DescriptorMismatch {
                binding: write.binding,
                reason: format!("layout declares {:?}, write provides {:?}", slot.ty, provided),
            });
        }

        if !written.insert(write.binding) {
            return Err(Error::DescriptorMismatch {
                binding: write.binding,
                reason: "written more than once".to_string(),
            });
        }
    }

    if let Some(slot) = slots.iter().find(|slot| !written.contains(&slot.binding)) {
        return Err(Error::DescriptorMismatch {
            binding: slot.binding,
            reason: format!("{:?} slot is never written", slot.ty),
        });
    }
    Ok(())
}

/// Check that every slot is visible only to stages the pipeline actually has
pub fn check_visibility(slots: &[DescriptorLayoutEntry], stages: ShaderStageFlags) -> Result<()> {
    for slot in slots {
        if !stages.contains(slot.visibility) {
            return Err(Error::DescriptorMismatch {
                binding: slot.binding,
                reason: format!(
                    "visible to {:?} but the pipeline only has {:?}",
                    slot.visibility, stages
                ),
            });
        }
    }
    Ok(())
}

fn pool_sizes(slots: &[DescriptorLayoutEntry]) -> Vec<DescriptorPoolSize> {
    let mut sizes: Vec<DescriptorPoolSize> = Vec::new();
    for slot in slots {
        match sizes.iter_mut().find(|size| size.ty == slot.ty) {
            Some(size) => size.count += 1,
            None => sizes.push(DescriptorPoolSize {
                ty: slot.ty,
                count: 1,
            }),
        }
    }
    sizes
}

/// A set layout, the pool sized for it and the one set allocated from it
#[derive(Debug, Clone)]
pub struct DescriptorBindings {
    pub layout: DescriptorSetLayoutHandle,
    pub pool: DescriptorPoolHandle,
    pub set: DescriptorSetHandle,
    slots: Vec<DescriptorLayoutEntry>,
}

impl DescriptorBindings {
    /// Create the layout and pool (registry-owned) and allocate the set
    pub fn create<D: Device + ?Sized>(
        device: &mut D,
        registry: &mut ResourceRegistry,
        slots: &[DescriptorLayoutEntry],
    ) -> Result<Self> {
        validate_slots(slots)?;

        let layout = registry.create_descriptor_set_layout(device, slots)?;
        let pool = registry.create_descriptor_pool(device, &pool_sizes(slots), 1)?;
        let set = device.allocate_descriptor_set(pool, layout)?;

        Ok(Self {
            layout,
            pool,
            set,
            slots: slots.to_vec(),
        })
    }

    /// Point the set at concrete resources. Nothing is written if the writes
    /// disagree with the layout.
    pub fn write<D: Device + ?Sized>(&self, device: &mut D, writes: &[DescriptorWrite]) -> Result<()> {
        check_writes(&self.slots, writes)?;
        device.update_descriptor_set(self.set, writes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_slot() -> DescriptorLayoutEntry {
        DescriptorLayoutEntry {
            binding: 0,
            ty: BindingType::UniformBuffer,
            visibility: ShaderStageFlags::VERTEX,
        }
    }

    fn sampler_slot() -> DescriptorLayoutEntry {
        DescriptorLayoutEntry {
            binding: 1,
            ty: BindingType::CombinedImageSampler,
            visibility: ShaderStageFlags::FRAGMENT,
        }
    }

    fn uniform_write(binding: u32) -> DescriptorWrite {
        DescriptorWrite {
            binding,
            resource: DescriptorResource::UniformBuffer {
                buffer: BufferHandle::from_raw(1),
                offset: 0,
                range: 192,
            },
        }
    }

    #[test]
    fn test_matching_writes() {
        let slots = [uniform_slot()];
        assert!(check_writes(&slots, &[uniform_write(0)]).is_ok());
    }

    #[test]
    fn test_type_mismatch_names_slot() {
        let slots = [uniform_slot(), sampler_slot()];
        let err = check_writes(&slots, &[uniform_write(0), uniform_write(1)]).unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch { binding: 1, .. }));
    }

    #[test]
    fn test_unwritten_and_unknown_slots() {
        let slots = [uniform_slot(), sampler_slot()];
        let err = check_writes(&slots, &[uniform_write(0)]).unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch { binding: 1, .. }));

        let err = check_writes(&slots[..1], &[uniform_write(0), uniform_write(3)]).unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch { binding: 3, .. }));
    }

    #[test]
    fn test_duplicate_binding() {
        let mut slot = sampler_slot();
        slot.binding = 0;
        let err = validate_slots(&[uniform_slot(), slot]).unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch { binding: 0, .. }));
    }

    #[test]
    fn test_visibility() {
        let slots = [uniform_slot(), sampler_slot()];
        assert!(check_visibility(&slots, ShaderStageFlags::VERTEX_FRAGMENT).is_ok());
        let err = check_visibility(&slots, ShaderStageFlags::VERTEX).unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch { binding: 1, .. }));
    }

    #[test]
    fn test_pool_sizes_group_by_type() {
        let mut second = uniform_slot();
        second.binding = 2;
        let sizes = pool_sizes(&[uniform_slot(), sampler_slot(), second]);
        assert_eq!(
            sizes,
            vec![
                DescriptorPoolSize {
                    ty: BindingType::UniformBuffer,
                    count: 2
                },
                DescriptorPoolSize {
                    ty: BindingType::CombinedImageSampler,
                    count: 1
                },
            ]
        );
    }
}
