// Synchronization primitives
//
// One set of sync objects for the single frame in flight: two GPU-side
// semaphores ordering acquire -> render -> present, and one fence the CPU
// waits on before reusing the command buffer.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RenderError;

/// Frame synchronization objects, owned exclusively by the frame loop.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first frame's fence wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
