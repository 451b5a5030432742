//! Descriptor layout, pool and set for the launch buffers.

use ash::{prelude::VkResult, vk};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{VkResultExt, VulkanError};

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("`{call}` could not allocate descriptors: {result}")]
    BindingAllocationFailed {
        call: &'static str,
        result: vk::Result,
    },
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// How buffers map onto binding slots of set 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BindingScheme {
    /// Buffer `i` at binding `i`, one descriptor each.
    #[default]
    PerBuffer,
    /// All buffers as one array of descriptors at binding 0.
    SingleSlot,
}

pub fn layout_bindings(
    count: usize,
    scheme: BindingScheme,
) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    let binding = |index: u32, count: u32| {
        vk::DescriptorSetLayoutBinding::default()
            .binding(index)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(count)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
    };
    match scheme {
        BindingScheme::PerBuffer => (0..count as u32).map(|index| binding(index, 1)).collect(),
        BindingScheme::SingleSlot if count == 0 => vec![],
        BindingScheme::SingleSlot => vec![binding(0, count as u32)],
    }
}

pub fn create_layout(
    device: &ash::Device,
    count: usize,
    scheme: BindingScheme,
) -> Result<vk::DescriptorSetLayout, BindingError> {
    let bindings = layout_bindings(count, scheme);
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let layout = unsafe { device.create_descriptor_set_layout(&info, None) }
        .call("vkCreateDescriptorSetLayout")?;
    Ok(layout)
}

/// Pool sizes for one set of `count` storage-buffer descriptors.
///
/// Vulkan rejects zero-sized pools, so a launch without buffers still reserves one descriptor.
pub fn pool_sizes(count: usize) -> [vk::DescriptorPoolSize; 1] {
    [vk::DescriptorPoolSize::default()
        .ty(vk::DescriptorType::STORAGE_BUFFER)
        .descriptor_count(count.max(1) as u32)]
}

/// Maps a rejected pool or set allocation to [`BindingError::BindingAllocationFailed`].
pub fn check_allocation<T>(result: VkResult<T>, call: &'static str) -> Result<T, BindingError> {
    result.map_err(|result| BindingError::BindingAllocationFailed { call, result })
}

/// Creates a pool holding exactly one set of `count` storage-buffer descriptors.
pub fn create_pool(
    device: &ash::Device,
    count: usize,
) -> Result<vk::DescriptorPool, BindingError> {
    let sizes = pool_sizes(count);
    let info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(1)
        .pool_sizes(&sizes);
    let pool = unsafe { device.create_descriptor_pool(&info, None) };
    check_allocation(pool, "vkCreateDescriptorPool")
}

pub fn allocate_set(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet, BindingError> {
    let layouts = [layout];
    let info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    let sets = unsafe { device.allocate_descriptor_sets(&info) };
    let set = sets.and_then(|sets| sets.first().copied().ok_or(vk::Result::ERROR_UNKNOWN));
    check_allocation(set, "vkAllocateDescriptorSets")
}

/// Descriptor writes covering every buffer over its whole range.
pub fn descriptor_writes<'a>(
    set: vk::DescriptorSet,
    infos: &'a [vk::DescriptorBufferInfo],
    scheme: BindingScheme,
) -> Vec<vk::WriteDescriptorSet<'a>> {
    let write = |binding: u32, infos: &'a [vk::DescriptorBufferInfo]| {
        vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(infos)
    };
    match scheme {
        BindingScheme::PerBuffer => infos
            .iter()
            .enumerate()
            .map(|(index, info)| write(index as u32, std::slice::from_ref(info)))
            .collect(),
        BindingScheme::SingleSlot if infos.is_empty() => vec![],
        BindingScheme::SingleSlot => vec![write(0, infos)],
    }
}

/// Associates `buffers` with their slots in one batched update.
pub fn write_set(
    device: &ash::Device,
    set: vk::DescriptorSet,
    buffers: &[vk::Buffer],
    scheme: BindingScheme,
) {
    let infos: Vec<_> = buffers
        .iter()
        .map(|&buffer| {
            vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)
        })
        .collect();
    let writes = descriptor_writes(set, &infos, scheme);
    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use itertools::Itertools;

    use super::{
        BindingError, BindingScheme, check_allocation, descriptor_writes, layout_bindings,
        pool_sizes,
    };

    #[test]
    fn test_per_buffer_layout() {
        let bindings = layout_bindings(3, BindingScheme::PerBuffer);
        assert_eq!(bindings.len(), 3);
        for (index, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, index as u32);
            assert_eq!(binding.descriptor_count, 1);
            assert_eq!(binding.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
        }
    }

    #[test]
    fn test_single_slot_layout() {
        let bindings = layout_bindings(3, BindingScheme::SingleSlot);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_count, 3);
        assert!(layout_bindings(0, BindingScheme::SingleSlot).is_empty());
    }

    #[test]
    fn test_descriptor_writes() {
        let infos = (0..4)
            .map(|_| vk::DescriptorBufferInfo::default().range(vk::WHOLE_SIZE))
            .collect_vec();

        let set = vk::DescriptorSet::null();
        let writes = descriptor_writes(set, &infos, BindingScheme::PerBuffer);
        assert_eq!(writes.len(), 4);
        assert_eq!(
            writes.iter().map(|write| write.dst_binding).collect_vec(),
            vec![0, 1, 2, 3]
        );
        assert!(writes.iter().all(|write| write.descriptor_count == 1));

        let writes = descriptor_writes(set, &infos, BindingScheme::SingleSlot);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].dst_binding, 0);
        assert_eq!(writes[0].descriptor_count, 4);
    }

    #[test]
    fn test_pool_sizes() {
        let [sizes] = pool_sizes(3);
        assert_eq!(sizes.ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes.descriptor_count, 3);
        let [sizes] = pool_sizes(0);
        assert_eq!(sizes.descriptor_count, 1);
    }

    #[test]
    fn test_allocation_failure() {
        let result = check_allocation(Ok(7u32), "vkAllocateDescriptorSets");
        assert!(matches!(result, Ok(7)));

        let result: Result<(), _> = check_allocation(
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            "vkAllocateDescriptorSets",
        );
        assert!(matches!(
            result,
            Err(BindingError::BindingAllocationFailed {
                call: "vkAllocateDescriptorSets",
                result: vk::Result::ERROR_OUT_OF_POOL_MEMORY
            })
        ));

        let result: Result<(), _> =
            check_allocation(Err(vk::Result::ERROR_FRAGMENTATION), "vkCreateDescriptorPool");
        assert!(matches!(
            result,
            Err(BindingError::BindingAllocationFailed { call: "vkCreateDescriptorPool", .. })
        ));
    }
}
