//! The device context: one Vulkan instance, one physical device, one logical device and one
//! compute queue.

use std::ffi::{CStr, c_char};

use ash::vk;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod allocator;
pub mod transfer;

/// The Khronos validation layer enabled by [`ContextConfig::validation`].
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const APPLICATION_NAME: &CStr = c"vklaunch";

/// A native call that returned a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("`{call}` failed: {result}")]
pub struct VulkanError {
    /// The failing Vulkan entry point.
    pub call: &'static str,
    /// The status it returned.
    pub result: vk::Result,
}

/// Attaches the failing call site to a raw [`vk::Result`].
pub(crate) trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T, VulkanError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[inline]
    fn call(self, call: &'static str) -> Result<T, VulkanError> {
        self.map_err(|result| VulkanError { call, result })
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to load the vulkan library")]
    Loading(#[from] ash::LoadingError),
    #[error("validation layer `VK_LAYER_KHRONOS_validation` is not available")]
    ValidationLayerUnavailable,
    #[error("no vulkan device available")]
    NoDeviceAvailable,
    #[error("no queue family of `{0}` supports compute")]
    NoComputeQueueFamily(String),
    #[error("device `{0}` does not support {1}")]
    Unsupported(String, &'static str),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Options for opening a [`Context`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContextConfig {
    /// Enables [`VALIDATION_LAYER`] on the instance.
    pub validation: bool,
    /// Enables `VK_EXT_shader_atomic_float` for buffer float atomics.
    pub atomic_float: bool,
    /// Enables the `shaderFloat64` device feature.
    pub shader_float64: bool,
    /// Rejects devices without arithmetic subgroup operations.
    pub require_subgroup_arithmetic: bool,
}

impl ContextConfig {
    pub fn validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn atomic_float(mut self, atomic_float: bool) -> Self {
        self.atomic_float = atomic_float;
        self
    }

    pub fn shader_float64(mut self, shader_float64: bool) -> Self {
        self.shader_float64 = shader_float64;
        self
    }

    pub fn require_subgroup_arithmetic(mut self, require: bool) -> Self {
        self.require_subgroup_arithmetic = require;
        self
    }
}

/// Subgroup capabilities reported by a Vulkan 1.1 device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubgroupInfo {
    /// Number of invocations in a subgroup.
    pub size: u32,
    /// Supported subgroup operation classes.
    pub operations: vk::SubgroupFeatureFlags,
}

impl SubgroupInfo {
    #[inline]
    pub fn supports_arithmetic(&self) -> bool {
        self.operations.contains(vk::SubgroupFeatureFlags::ARITHMETIC)
    }
}

/// Whether the device can load, store and add 32-bit floats atomically in storage buffers.
pub fn supports_float_atomics(features: &vk::PhysicalDeviceShaderAtomicFloatFeaturesEXT) -> bool {
    features.shader_buffer_float32_atomics == vk::TRUE
        && features.shader_buffer_float32_atomic_add == vk::TRUE
}

/// Everything selected on the physical device, gathered before the instance is handed over.
struct Selection {
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
    queue: vk::Queue,
    name: String,
    limits: vk::PhysicalDeviceLimits,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    subgroup: Option<SubgroupInfo>,
}

/// An opened compute device and its single queue.
pub struct Context {
    /// Keeps the loaded library alive for the instance.
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
    queue: vk::Queue,
    name: String,
    limits: vk::PhysicalDeviceLimits,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    subgroup: Option<SubgroupInfo>,
}

impl Context {
    /// Opens the first device and its first compute-capable queue family.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn open(config: &ContextConfig) -> Result<Self, ContextError> {
        let entry = unsafe { ash::Entry::load() }?;

        let mut layers: Vec<*const c_char> = vec![];
        if config.validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .call("vkEnumerateInstanceLayerProperties")?;
            let found = available
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
            if !found {
                return Err(ContextError::ValidationLayerUnavailable);
            }
            log::warn!("validation layer enabled");
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        // devices older than 1.1 are still accepted, without subgroup queries
        let loader_version = unsafe { entry.try_enumerate_instance_version() }
            .call("vkEnumerateInstanceVersion")?
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = loader_version.min(vk::API_VERSION_1_1);

        let application_info = vk::ApplicationInfo::default()
            .application_name(APPLICATION_NAME)
            .engine_name(APPLICATION_NAME)
            .api_version(api_version);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&layers);
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;

        let selection = match Self::select(&instance, api_version, config) {
            Ok(selection) => selection,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };
        let Selection {
            physical_device,
            device,
            queue_family_index,
            queue,
            name,
            limits,
            memory_properties,
            subgroup,
        } = selection;

        log::info!("opened device `{name}` with compute queue family {queue_family_index}");
        if let Some(subgroup) = subgroup {
            log::debug!(
                "subgroup size {}, operations {:?}",
                subgroup.size,
                subgroup.operations
            );
        }

        Ok(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            queue_family_index,
            queue,
            name,
            limits,
            memory_properties,
            subgroup,
        })
    }

    fn select(
        instance: &ash::Instance,
        api_version: u32,
        config: &ContextConfig,
    ) -> Result<Selection, ContextError> {
        let physical_device = unsafe { instance.enumerate_physical_devices() }
            .call("vkEnumeratePhysicalDevices")?
            .first()
            .copied()
            .ok_or(ContextError::NoDeviceAvailable)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let queue_family_index =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) }
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|index| index as u32)
                .ok_or_else(|| ContextError::NoComputeQueueFamily(name.clone()))?;

        // the `*2` queries need 1.1 on both the instance and the device
        let queries2 = api_version >= vk::API_VERSION_1_1
            && properties.api_version >= vk::API_VERSION_1_1;

        let subgroup = queries2.then(|| {
            let mut subgroup = vk::PhysicalDeviceSubgroupProperties::default();
            {
                let mut properties =
                    vk::PhysicalDeviceProperties2::default().push_next(&mut subgroup);
                unsafe {
                    instance.get_physical_device_properties2(physical_device, &mut properties)
                };
            }
            SubgroupInfo {
                size: subgroup.subgroup_size,
                operations: subgroup.supported_operations,
            }
        });
        if config.require_subgroup_arithmetic
            && !subgroup.is_some_and(|subgroup| subgroup.supports_arithmetic())
        {
            return Err(ContextError::Unsupported(name, "arithmetic subgroup operations"));
        }

        if config.shader_float64 {
            let features = unsafe { instance.get_physical_device_features(physical_device) };
            if features.shader_float64 != vk::TRUE {
                return Err(ContextError::Unsupported(name, "64-bit float shaders"));
            }
        }

        let mut extensions: Vec<*const c_char> = vec![];
        if config.atomic_float {
            let available =
                unsafe { instance.enumerate_device_extension_properties(physical_device) }
                    .call("vkEnumerateDeviceExtensionProperties")?;
            let name_matches = |extension: &vk::ExtensionProperties| {
                extension.extension_name_as_c_str() == Ok(ash::ext::shader_atomic_float::NAME)
            };
            if !available.iter().any(name_matches) {
                return Err(ContextError::Unsupported(name, "float atomics"));
            }
            let supported = queries2.then(|| {
                let mut atomic_float = vk::PhysicalDeviceShaderAtomicFloatFeaturesEXT::default();
                {
                    let mut features =
                        vk::PhysicalDeviceFeatures2::default().push_next(&mut atomic_float);
                    unsafe {
                        instance.get_physical_device_features2(physical_device, &mut features)
                    };
                }
                supports_float_atomics(&atomic_float)
            });
            if supported != Some(true) {
                return Err(ContextError::Unsupported(name, "float atomics"));
            }
            extensions.push(ash::ext::shader_atomic_float::NAME.as_ptr());
        }

        let priorities = [1.0];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities);
        let features = vk::PhysicalDeviceFeatures::default().shader_float64(config.shader_float64);
        let mut atomic_float = vk::PhysicalDeviceShaderAtomicFloatFeaturesEXT::default()
            .shader_buffer_float32_atomics(true)
            .shader_buffer_float32_atomic_add(true);
        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);
        if config.atomic_float {
            create_info = create_info.push_next(&mut atomic_float);
        }

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .call("vkCreateDevice")?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Selection {
            physical_device,
            device,
            queue_family_index,
            queue,
            name,
            limits: properties.limits,
            memory_properties,
            subgroup,
        })
    }

    #[inline]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// The device name as reported by the driver.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Subgroup capabilities, if the device and instance are at least Vulkan 1.1.
    #[inline]
    pub fn subgroup(&self) -> Option<SubgroupInfo> {
        self.subgroup
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("queue_family_index", &self.queue_family_index)
            .field("subgroup", &self.subgroup)
            .finish_non_exhaustive()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        log::debug!("closed device `{}`", self.name);
    }
}
