use ash::vk;
use derive_more::{Deref, Display};
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{VkResultExt, VulkanError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("workgroup extent along axis {0} is zero")]
    ZeroWorkgroup(usize),
    #[error("dispatch grid {grid} exceeds device limit {}", .max.iter().format(", "))]
    GridTooLarge { grid: DispatchGrid, max: [u32; 3] },
    #[error("push constants take {size} bytes, device allows {max}")]
    PushConstantsTooLarge { size: usize, max: u32 },
}

/// Number of workgroups along each axis.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("[{}]", _0.iter().format(", "))]
pub struct DispatchGrid([u32; 3]);

impl DispatchGrid {
    /// Covers `dims` with workgroups of extent `workgroup`, rounding up per axis.
    pub fn new(dims: [u32; 3], workgroup: [u32; 3]) -> Result<Self, DispatchError> {
        if let Some(axis) = workgroup.iter().position(|&x| x == 0) {
            return Err(DispatchError::ZeroWorkgroup(axis));
        }
        let mut grid = [0; 3];
        for (grid, (dim, workgroup)) in grid.iter_mut().zip_eq(dims.into_iter().zip_eq(workgroup)) {
            *grid = dim.div_ceil(workgroup);
        }
        Ok(Self(grid))
    }

    /// Checks every axis against `maxComputeWorkGroupCount`.
    pub fn check(&self, limits: &vk::PhysicalDeviceLimits) -> Result<(), DispatchError> {
        let max = limits.max_compute_work_group_count;
        match self.0.iter().zip_eq(max.iter()).all(|(x, max)| x <= max) {
            true => Ok(()),
            false => Err(DispatchError::GridTooLarge { grid: *self, max }),
        }
    }

    /// Total number of workgroups.
    #[inline]
    pub fn count(&self) -> u64 {
        self.0.iter().map(|&x| x as u64).product()
    }
}

/// Checks the packed push-constant size against `maxPushConstantsSize`.
pub fn check_push_size(
    size: usize,
    limits: &vk::PhysicalDeviceLimits,
) -> Result<(), DispatchError> {
    let max = limits.max_push_constants_size;
    match size <= max as usize {
        true => Ok(()),
        false => Err(DispatchError::PushConstantsTooLarge { size, max }),
    }
}

pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, VulkanError> {
    let info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index);
    unsafe { device.create_command_pool(&info, None) }.call("vkCreateCommandPool")
}

pub fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, VulkanError> {
    let info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers =
        unsafe { device.allocate_command_buffers(&info) }.call("vkAllocateCommandBuffers")?;
    buffers.first().copied().ok_or(VulkanError {
        call: "vkAllocateCommandBuffers",
        result: vk::Result::ERROR_UNKNOWN,
    })
}

/// What a single dispatch binds and uploads.
#[derive(Debug, Clone, Copy)]
pub struct Recording<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set: vk::DescriptorSet,
    pub push: &'a [u8],
    pub grid: DispatchGrid,
}

/// Records one one-time-submit dispatch into `command_buffer`.
pub fn record(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    recording: Recording,
) -> Result<(), VulkanError> {
    let Recording {
        pipeline,
        layout,
        set,
        push,
        grid,
    } = recording;
    let [x, y, z] = *grid;

    let begin =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device
            .begin_command_buffer(command_buffer, &begin)
            .call("vkBeginCommandBuffer")?;
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::COMPUTE,
            layout,
            0,
            &[set],
            &[],
        );
        if !push.is_empty() {
            let stage = vk::ShaderStageFlags::COMPUTE;
            device.cmd_push_constants(command_buffer, layout, stage, 0, push);
        }
        device.cmd_dispatch(command_buffer, x, y, z);
        device
            .end_command_buffer(command_buffer)
            .call("vkEndCommandBuffer")?;
    }
    Ok(())
}
