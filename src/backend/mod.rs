// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash keeping handle lifetimes explicit: the device
// context owns the instance/surface/device chain, everything else borrows
// it through an Arc and is destroyed before it.

pub mod buffer;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
