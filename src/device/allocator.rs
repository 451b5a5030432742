//! Storage buffers in host-visible, host-coherent memory.

use ash::vk;
use thiserror::Error;

use super::{Context, VkResultExt, VulkanError};
use crate::num::DataType;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("no memory type in {type_bits:#b} has properties {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("buffer {0} has no elements")]
    EmptyBuffer(usize),
    #[error("buffer {index} of {count} {data_type} elements overflows the address space")]
    BufferTooLarge {
        index: usize,
        data_type: DataType,
        count: usize,
    },
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// The properties every launch buffer is allocated with.
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Finds the first memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, MemoryError> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, ty)| type_bits & (1 << index) != 0 && ty.property_flags.contains(required))
        .map(|(index, _)| index as u32)
        .ok_or(MemoryError::NoSuitableMemoryType {
            type_bits,
            required,
        })
}

/// Creates an exclusive storage buffer of `size` bytes.
pub fn create_buffer(
    device: &ash::Device,
    size: vk::DeviceSize,
) -> Result<vk::Buffer, VulkanError> {
    let info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    unsafe { device.create_buffer(&info, None) }.call("vkCreateBuffer")
}

/// Allocates host-visible, host-coherent memory for `buffer` and binds it at offset 0.
pub fn allocate(context: &Context, buffer: vk::Buffer) -> Result<vk::DeviceMemory, MemoryError> {
    let device = context.device();
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let index = find_memory_type(
        context.memory_properties(),
        requirements.memory_type_bits,
        HOST_MEMORY,
    )?;

    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(index);
    let memory = unsafe { device.allocate_memory(&info, None) }.call("vkAllocateMemory")?;
    let bound = unsafe { device.bind_buffer_memory(buffer, memory, 0) };
    if let Err(err) = bound.call("vkBindBufferMemory") {
        unsafe { device.free_memory(memory, None) };
        return Err(err.into());
    }
    Ok(memory)
}

/// A launch buffer after allocation.
///
/// Handles start out null and are filled in as soon as they are created, so a buffer that
/// failed half-way can still be released.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    pub name: Option<String>,
    pub data_type: DataType,
    pub count: usize,
    size: usize,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
}

impl DeviceBuffer {
    /// Describes buffer `index` without creating anything yet.
    pub fn new(
        index: usize,
        name: Option<String>,
        data_type: DataType,
        count: usize,
    ) -> Result<Self, MemoryError> {
        let size = match data_type.bytes(count) {
            Some(0) => return Err(MemoryError::EmptyBuffer(index)),
            Some(size) => size,
            None => {
                return Err(MemoryError::BufferTooLarge {
                    index,
                    data_type,
                    count,
                });
            }
        };
        Ok(Self {
            name,
            data_type,
            count,
            size,
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
        })
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Creates the buffer and binds memory to it.
    pub fn create(&mut self, context: &Context) -> Result<(), MemoryError> {
        self.buffer = create_buffer(context.device(), self.size() as vk::DeviceSize)?;
        self.memory = allocate(context, self.buffer)?;
        Ok(())
    }

    /// Releases the memory and the buffer. Null handles are ignored by the driver.
    ///
    /// # Safety
    /// The device must be idle with respect to this buffer.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.free_memory(self.memory, None);
            device.destroy_buffer(self.buffer, None);
        }
        self.memory = vk::DeviceMemory::null();
        self.buffer = vk::Buffer::null();
    }
}
