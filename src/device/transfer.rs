//! Host access to launch buffers.

use std::ffi::c_void;

use ash::vk;

use super::{VkResultExt, VulkanError};

/// Maps the whole of `memory` and leaves it mapped.
///
/// Vulkan forbids mapping the same memory twice; callers cache the returned pointer.
/// The mapping is released when the memory is freed.
#[inline]
pub fn map(device: &ash::Device, memory: vk::DeviceMemory) -> Result<*mut c_void, VulkanError> {
    unsafe { device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }
        .call("vkMapMemory")
}

/// Copies `bytes` to the start of `memory`. Zero-fills instead when `bytes` is [`None`].
///
/// # Safety
/// `memory` must be host-visible, host-coherent, unmapped and at least `size` bytes long,
/// with `bytes` no longer than `size`.
pub unsafe fn fill(
    device: &ash::Device,
    memory: vk::DeviceMemory,
    bytes: Option<&[u8]>,
    size: usize,
) -> Result<(), VulkanError> {
    let data = map(device, memory)?.cast::<u8>();
    unsafe {
        match bytes {
            Some(bytes) => std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len()),
            None => std::ptr::write_bytes(data, 0, size),
        }
        device.unmap_memory(memory);
    }
    Ok(())
}
