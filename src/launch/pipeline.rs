use std::ffi::CStr;

use ash::vk;

use super::kernel::KernelBinary;
use crate::device::{VkResultExt, VulkanError};

pub fn create_shader_module(
    device: &ash::Device,
    binary: &KernelBinary,
) -> Result<vk::ShaderModule, VulkanError> {
    let info = vk::ShaderModuleCreateInfo::default().code(binary);
    unsafe { device.create_shader_module(&info, None) }.call("vkCreateShaderModule")
}

/// The push range covering `push_size` bytes at offset 0, if any.
pub fn push_constant_ranges(push_size: usize) -> Vec<vk::PushConstantRange> {
    match push_size {
        0 => vec![],
        size => vec![
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(size as u32),
        ],
    }
}

pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
    push_size: usize,
) -> Result<vk::PipelineLayout, VulkanError> {
    let set_layouts = [set_layout];
    let ranges = push_constant_ranges(push_size);
    let info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&ranges);
    unsafe { device.create_pipeline_layout(&info, None) }.call("vkCreatePipelineLayout")
}

/// Creates a single-stage compute pipeline running `entry_point` of `module`.
pub fn create_pipeline(
    device: &ash::Device,
    module: vk::ShaderModule,
    layout: vk::PipelineLayout,
    entry_point: &CStr,
) -> Result<vk::Pipeline, VulkanError> {
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(entry_point);
    let info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);
    let infos = std::slice::from_ref(&info);
    let cache = vk::PipelineCache::null();
    let pipelines = unsafe { device.create_compute_pipelines(cache, infos, None) }
        .map_err(|(_, result)| VulkanError {
            call: "vkCreateComputePipelines",
            result,
        })?;
    pipelines.first().copied().ok_or(VulkanError {
        call: "vkCreateComputePipelines",
        result: vk::Result::ERROR_UNKNOWN,
    })
}
