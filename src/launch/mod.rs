//! One kernel launch: buffers in, dispatch, buffers out.
//!
//! A [`Launch`] describes the kernel, its buffers, push constants and problem size.
//! [`ComputeApp::new`] runs it to completion on a freshly opened [`Context`] and keeps the
//! buffers around for the host to read.

use std::{cell::Cell, ffi::CString, path::PathBuf, ptr::NonNull, time::Duration};

use ash::vk;
use derive_more::{Display, From};
use itertools::Itertools;
use rustc_hash::FxHashMap as HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use self::{
    binding::{BindingError, BindingScheme},
    dispatch::{DispatchError, DispatchGrid, Recording},
    executor::ExecuteError,
    kernel::{KernelBinary, KernelError},
    push::{PushConstant, PushConstants},
};
use crate::{
    device::{
        Context, ContextConfig, ContextError, VulkanError,
        allocator::{DeviceBuffer, MemoryError},
        transfer,
    },
    num::{DataType, Scalar},
};

pub mod binding;
pub mod dispatch;
pub mod executor;
pub mod kernel;
pub mod pipeline;
pub mod push;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error("buffer {index} holds {expected} bytes but {actual} bytes of contents were given")]
    ContentsSize {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("unknown buffer {0}")]
    UnknownBuffer(String),
    #[error("buffer {index} holds {expected} elements, not {requested}")]
    Type {
        index: usize,
        expected: DataType,
        requested: DataType,
    },
    #[error("failed to view buffer: {0}")]
    Cast(#[from] bytemuck::PodCastError),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Where the kernel binary comes from.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum KernelSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Words(Vec<u32>),
}

impl From<&std::path::Path> for KernelSource {
    fn from(value: &std::path::Path) -> Self {
        Self::Path(value.to_owned())
    }
}

impl From<&str> for KernelSource {
    fn from(value: &str) -> Self {
        Self::Path(value.into())
    }
}

impl KernelSource {
    pub fn load(self) -> Result<KernelBinary, KernelError> {
        match self {
            KernelSource::Path(path) => KernelBinary::load(path),
            KernelSource::Bytes(bytes) => KernelBinary::from_bytes(&bytes),
            KernelSource::Words(words) => KernelBinary::from_words(words),
        }
    }
}

/// A storage buffer as described by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    name: Option<String>,
    data_type: DataType,
    count: usize,
    contents: Option<Vec<u8>>,
}

impl Buffer {
    /// A zero-filled buffer of `count` elements of `T`.
    pub fn zeroed<T: Scalar>(count: usize) -> Self {
        Self::raw(T::DATA_TYPE, count)
    }

    /// A zero-filled buffer of `count` elements of `data_type`.
    pub fn raw(data_type: DataType, count: usize) -> Self {
        Self {
            name: None,
            data_type,
            count,
            contents: None,
        }
    }

    /// A buffer initialized with a copy of `data`.
    pub fn from_slice<T: Scalar>(data: &[T]) -> Self {
        Self {
            name: None,
            data_type: T::DATA_TYPE,
            count: data.len(),
            contents: Some(bytemuck::cast_slice(data).to_vec()),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the initial contents with raw bytes, checked against the size at launch.
    pub fn contents(mut self, bytes: Vec<u8>) -> Self {
        self.contents = Some(bytes);
        self
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size in bytes, or [`None`] if it overflows.
    #[inline]
    pub fn size(&self) -> Option<usize> {
        self.data_type.bytes(self.count)
    }
}

impl<T: Scalar> From<&[T]> for Buffer {
    fn from(value: &[T]) -> Self {
        Self::from_slice(value)
    }
}

impl<T: Scalar> From<&Vec<T>> for Buffer {
    fn from(value: &Vec<T>) -> Self {
        Self::from_slice(value)
    }
}

impl<T: Scalar, const N: usize> From<&[T; N]> for Buffer {
    fn from(value: &[T; N]) -> Self {
        Self::from_slice(value)
    }
}

/// Everything needed to run one kernel once.
#[derive(Debug, Clone)]
pub struct Launch {
    kernel: KernelSource,
    buffers: Vec<Buffer>,
    push: Vec<PushConstant>,
    dims: [u32; 3],
    workgroup: [u32; 3],
}

impl Launch {
    pub fn new(kernel: impl Into<KernelSource>) -> Self {
        Self {
            kernel: kernel.into(),
            buffers: vec![],
            push: vec![],
            dims: [1, 1, 1],
            workgroup: [1, 1, 1],
        }
    }

    /// Appends a buffer. Its position is its binding index.
    pub fn buffer(mut self, buffer: impl Into<Buffer>) -> Self {
        self.buffers.push(buffer.into());
        self
    }

    /// Appends a named buffer.
    pub fn named(self, name: impl Into<String>, buffer: impl Into<Buffer>) -> Self {
        self.buffer(buffer.into().name(name))
    }

    /// Appends push constants after the ones already given.
    pub fn push_constants(mut self, values: impl PushConstants) -> Self {
        self.push.extend(values.push_constants());
        self
    }

    pub fn push_constant(mut self, value: impl Into<PushConstant>) -> Self {
        self.push.push(value.into());
        self
    }

    /// Problem size in invocations.
    pub fn dims(mut self, dims: [u32; 3]) -> Self {
        self.dims = dims;
        self
    }

    /// Local workgroup size, as compiled into the kernel.
    pub fn workgroup(mut self, workgroup: [u32; 3]) -> Self {
        self.workgroup = workgroup;
        self
    }
}

/// Host-side knobs of a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaunchConfig {
    pub context: ContextConfig,
    pub binding: BindingScheme,
    pub timeout: Duration,
    pub entry_point: CString,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            context: Default::default(),
            binding: Default::default(),
            timeout: executor::DEFAULT_TIMEOUT,
            entry_point: c"main".to_owned(),
        }
    }
}

impl LaunchConfig {
    pub fn context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn binding(mut self, binding: BindingScheme) -> Self {
        self.binding = binding;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn entry_point(mut self, entry_point: impl Into<CString>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaunchState {
    Created,
    DeviceOpened,
    BuffersReady,
    BoundDescriptors,
    PipelineReady,
    Dispatched,
    Completed,
    TornDown,
}

/// Selects a buffer by position or by name.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, From)]
pub enum BufferRef<'a> {
    #[display("#{_0}")]
    Index(usize),
    #[display("`{_0}`")]
    Name(&'a str),
}

/// A completed launch and every native handle it created.
///
/// Dropping it waits for the device and releases everything in dependency order.
pub struct ComputeApp {
    buffers: Vec<DeviceBuffer>,
    names: HashMap<String, usize>,
    mappings: Vec<Cell<Option<NonNull<u8>>>>,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    shader_module: vk::ShaderModule,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    grid: Option<DispatchGrid>,
    state: LaunchState,
    /// Dropped last: closes the device, then the instance.
    context: Context,
}

impl ComputeApp {
    /// Opens a device, runs `launch` on it and waits for completion.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn new(launch: Launch, config: &LaunchConfig) -> Result<Self, LaunchError> {
        log::debug!("launch state: {}", LaunchState::Created);
        let Launch {
            kernel,
            buffers,
            push: values,
            dims,
            workgroup,
        } = launch;

        let context = Context::open(&config.context)?;
        let mut app = Self {
            buffers: vec![],
            names: HashMap::default(),
            mappings: vec![],
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            shader_module: vk::ShaderModule::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            grid: None,
            state: LaunchState::Created,
            context,
        };
        app.transition(LaunchState::DeviceOpened);

        app.create_buffers(buffers)?;
        app.bind(config.binding)?;

        let bytes = push::pack(&values);
        log::trace!("push constants: {values:?} as {:?}", *bytes);
        app.build_pipeline(kernel, bytes.len(), config)?;

        let grid = DispatchGrid::new(dims, workgroup)?;
        app.record(grid, &bytes)?;
        app.execute(config.timeout)?;

        if log::log_enabled!(log::Level::Trace) {
            for index in 0..app.len() {
                log::trace!("buffer #{index}: {}", app.format_buffer(index)?);
            }
        }
        Ok(app)
    }

    fn transition(&mut self, state: LaunchState) {
        log::debug!("launch state: {} → {state}", self.state);
        self.state = state;
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    fn create_buffers(&mut self, buffers: Vec<Buffer>) -> Result<(), LaunchError> {
        for (index, buffer) in buffers.into_iter().enumerate() {
            let Buffer {
                name,
                data_type,
                count,
                contents,
            } = buffer;

            let device_buffer = DeviceBuffer::new(index, name, data_type, count)?;
            let expected = device_buffer.size();
            match contents.as_ref().map(Vec::len) {
                Some(actual) if actual != expected => {
                    return Err(LaunchError::ContentsSize {
                        index,
                        expected,
                        actual,
                    });
                }
                _ => {}
            }

            if let Some(name) = &device_buffer.name {
                if self.names.insert(name.clone(), index).is_some() {
                    log::warn!("buffer name `{name}` is bound more than once, using #{index}");
                }
            }

            self.buffers.push(device_buffer);
            self.mappings.push(Cell::new(None));

            let buffer = &mut self.buffers[index];
            buffer.create(&self.context)?;
            unsafe {
                transfer::fill(
                    self.context.device(),
                    buffer.memory,
                    contents.as_deref(),
                    expected,
                )?
            };
        }
        self.transition(LaunchState::BuffersReady);
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    fn bind(&mut self, scheme: BindingScheme) -> Result<(), LaunchError> {
        let device = self.context.device();
        let count = self.buffers.len();

        self.set_layout = binding::create_layout(device, count, scheme)?;
        self.descriptor_pool = binding::create_pool(device, count)?;
        self.descriptor_set = binding::allocate_set(device, self.descriptor_pool, self.set_layout)?;

        let buffers = self.buffers.iter().map(|buffer| buffer.buffer).collect_vec();
        binding::write_set(device, self.descriptor_set, &buffers, scheme);

        self.transition(LaunchState::BoundDescriptors);
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    fn build_pipeline(
        &mut self,
        kernel: KernelSource,
        push_size: usize,
        config: &LaunchConfig,
    ) -> Result<(), LaunchError> {
        let device = self.context.device();
        dispatch::check_push_size(push_size, self.context.limits())?;

        let binary = kernel.load()?;
        self.shader_module = pipeline::create_shader_module(device, &binary)?;
        self.pipeline_layout =
            pipeline::create_pipeline_layout(device, self.set_layout, push_size)?;
        self.pipeline = pipeline::create_pipeline(
            device,
            self.shader_module,
            self.pipeline_layout,
            &config.entry_point,
        )?;

        self.transition(LaunchState::PipelineReady);
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    fn record(&mut self, grid: DispatchGrid, push: &[u8]) -> Result<(), LaunchError> {
        let device = self.context.device();
        grid.check(self.context.limits())?;
        log::debug!("dispatch grid: {grid}");

        let family = self.context.queue_family_index();
        self.command_pool = dispatch::create_command_pool(device, family)?;
        self.command_buffer = dispatch::allocate_command_buffer(device, self.command_pool)?;
        let recording = Recording {
            pipeline: self.pipeline,
            layout: self.pipeline_layout,
            set: self.descriptor_set,
            push,
            grid,
        };
        dispatch::record(device, self.command_buffer, recording)?;
        self.grid = Some(grid);

        self.transition(LaunchState::Dispatched);
        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    fn execute(&mut self, timeout: Duration) -> Result<(), LaunchError> {
        executor::run(
            self.context.device(),
            self.context.queue(),
            self.command_buffer,
            timeout,
            &mut self.fence,
        )?;
        self.transition(LaunchState::Completed);
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// The number of workgroups dispatched.
    #[inline]
    pub fn grid(&self) -> Option<DispatchGrid> {
        self.grid
    }

    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Number of buffers.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn resolve(&self, buffer: BufferRef) -> Result<usize, LaunchError> {
        let index = match buffer {
            BufferRef::Index(index) => Some(index).filter(|&index| index < self.buffers.len()),
            BufferRef::Name(name) => self.names.get(name).copied(),
        };
        index.ok_or_else(|| LaunchError::UnknownBuffer(buffer.to_string()))
    }

    /// Element type and count of a buffer.
    pub fn describe<'a>(
        &self,
        buffer: impl Into<BufferRef<'a>>,
    ) -> Result<(DataType, usize), LaunchError> {
        let index = self.resolve(buffer.into())?;
        let buffer = &self.buffers[index];
        Ok((buffer.data_type, buffer.count))
    }

    /// Maps a buffer once; later calls return the cached pointer.
    fn mapping(&self, index: usize) -> Result<NonNull<u8>, LaunchError> {
        if let Some(data) = self.mappings[index].get() {
            return Ok(data);
        }
        let data = transfer::map(self.context.device(), self.buffers[index].memory)?;
        let data = NonNull::new(data.cast::<u8>()).ok_or(VulkanError {
            call: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })?;
        self.mappings[index].set(Some(data));
        Ok(data)
    }

    /// The raw bytes of a buffer.
    pub fn map_bytes<'a>(&self, buffer: impl Into<BufferRef<'a>>) -> Result<&[u8], LaunchError> {
        let index = self.resolve(buffer.into())?;
        let data = self.mapping(index)?;
        let size = self.buffers[index].size();
        Ok(unsafe { std::slice::from_raw_parts(data.as_ptr(), size) })
    }

    /// The elements of a buffer of element type `T`.
    pub fn map<'a, T: Scalar>(
        &self,
        buffer: impl Into<BufferRef<'a>>,
    ) -> Result<&[T], LaunchError> {
        let index = self.resolve(buffer.into())?;
        self.check_type::<T>(index)?;
        let bytes = self.map_bytes(index)?;
        Ok(bytemuck::try_cast_slice(bytes)?)
    }

    /// Writable elements of a buffer of element type `T`.
    pub fn map_mut<'a, T: Scalar>(
        &mut self,
        buffer: impl Into<BufferRef<'a>>,
    ) -> Result<&mut [T], LaunchError> {
        let index = self.resolve(buffer.into())?;
        self.check_type::<T>(index)?;
        let data = self.mapping(index)?;
        let size = self.buffers[index].size();
        let bytes = unsafe { std::slice::from_raw_parts_mut(data.as_ptr(), size) };
        Ok(bytemuck::try_cast_slice_mut(bytes)?)
    }

    fn check_type<T: Scalar>(&self, index: usize) -> Result<(), LaunchError> {
        let expected = self.buffers[index].data_type;
        match expected == T::DATA_TYPE {
            true => Ok(()),
            false => Err(LaunchError::Type {
                index,
                expected,
                requested: T::DATA_TYPE,
            }),
        }
    }

    /// Renders a buffer's elements, e.g. `[1, 2, 3]`.
    pub fn format_buffer<'a>(
        &self,
        buffer: impl Into<BufferRef<'a>>,
    ) -> Result<String, LaunchError> {
        let index = self.resolve(buffer.into())?;
        let text = match self.buffers[index].data_type {
            DataType::F16 => format_slice(self.map::<half::f16>(index)?),
            DataType::F32 => format_slice(self.map::<f32>(index)?),
            DataType::F64 => format_slice(self.map::<f64>(index)?),
            DataType::U32 => format_slice(self.map::<u32>(index)?),
            DataType::I32 => format_slice(self.map::<i32>(index)?),
        };
        Ok(text)
    }
}

fn format_slice<T: std::fmt::Display>(data: &[T]) -> String {
    format!("[{}]", data.iter().format(", "))
}

impl std::fmt::Debug for ComputeApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeApp")
            .field("context", &self.context)
            .field("buffers", &self.buffers)
            .field("grid", &self.grid)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for ComputeApp {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            if let Err(result) = device.device_wait_idle() {
                log::error!("failed to wait for device idle: {result}");
            }
            device.destroy_fence(self.fence, None);
            for buffer in self.buffers.iter_mut() {
                buffer.destroy(device);
            }
            device.destroy_shader_module(self.shader_module, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_command_pool(self.command_pool, None);
        }
        self.transition(LaunchState::TornDown);
    }
}
