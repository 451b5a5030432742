use std::time::Duration;

use ash::{prelude::VkResult, vk};
use thiserror::Error;

use crate::device::{VkResultExt, VulkanError};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("kernel did not complete within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Fence wait timeout used unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Submits `command_buffer` once and blocks until it completes or `timeout` elapses.
///
/// The fence lives in `fence` while in flight. It is destroyed on success; on failure it is
/// left there for the owner to destroy once the device is idle.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn run(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    timeout: Duration,
    fence: &mut vk::Fence,
) -> Result<(), ExecuteError> {
    let info = vk::FenceCreateInfo::default();
    *fence = unsafe { device.create_fence(&info, None) }.call("vkCreateFence")?;

    let command_buffers = [command_buffer];
    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
    unsafe { device.queue_submit(queue, &[submit], *fence) }.call("vkQueueSubmit")?;

    let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    let waited = unsafe { device.wait_for_fences(&[*fence], true, nanos) };
    check_wait(waited, timeout)?;

    unsafe { device.destroy_fence(*fence, None) };
    *fence = vk::Fence::null();
    Ok(())
}

/// Separates an elapsed `timeout` from other fence wait failures.
pub fn check_wait(result: VkResult<()>, timeout: Duration) -> Result<(), ExecuteError> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(ExecuteError::Timeout(timeout)),
        Err(result) => Err(VulkanError {
            call: "vkWaitForFences",
            result,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ash::vk;

    use super::{DEFAULT_TIMEOUT, ExecuteError, check_wait};
    use crate::device::VulkanError;

    #[test]
    fn test_check_wait() {
        let timeout = Duration::from_millis(250);
        assert!(check_wait(Ok(()), timeout).is_ok());
        assert!(matches!(
            check_wait(Err(vk::Result::TIMEOUT), timeout),
            Err(ExecuteError::Timeout(elapsed)) if elapsed == timeout
        ));
        assert!(matches!(
            check_wait(Err(vk::Result::ERROR_DEVICE_LOST), timeout),
            Err(ExecuteError::Vulkan(VulkanError {
                call: "vkWaitForFences",
                result: vk::Result::ERROR_DEVICE_LOST
            }))
        ));
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(DEFAULT_TIMEOUT.as_nanos(), 100_000_000_000);
    }
}
