// Error taxonomy for the rendering core
//
// Everything here is fatal at the point it occurs: there is no retry of
// device or swapchain creation, and a lost surface is not recovered from.
// The only expected non-error outcome is an acquire timeout, which is
// reported through `frame::AcquireOutcome::NotReady`, not through this enum.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The Vulkan runtime could not be initialized (missing driver/loader).
    #[error("failed to initialize Vulkan: {0}")]
    Init(String),

    /// No physical device meets the mandatory capability set
    /// (graphics + present queue families, swapchain extension).
    #[error("no suitable GPU found: {0}")]
    NoSuitableDevice(String),

    #[error("failed to create logical device")]
    DeviceCreation(#[source] vk::Result),

    #[error("failed to create swapchain: {0}")]
    SwapchainCreation(String),

    /// Shader compilation failed; carries the backend diagnostic text.
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    #[error("queue submission rejected")]
    Submit(#[source] vk::Result),

    #[error("present request rejected")]
    Present(#[source] vk::Result),

    /// The swapchain became invalid mid-run (surface resized or destroyed).
    /// Swapchain recreation is out of scope, so this ends the run.
    #[error("presentation surface lost")]
    SurfaceLost,

    /// Any other Vulkan call that returned a fatal status.
    #[error("Vulkan call failed")]
    Vk(#[from] vk::Result),
}
