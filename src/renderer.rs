// Vulkan renderer - production FrameBackend
//
// Owns every GPU resource for the triangle: device context (instance,
// surface, adapter, logical device, queues), swapchain, pipeline, static
// vertex buffer, one reusable command buffer, and the per-frame sync
// objects. Created once at startup against a fixed-size window; torn down
// in reverse order, including when initialization aborts partway.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use crate::backend::pipeline::{self, Vertex};
use crate::backend::sync::FrameSync;
use crate::backend::{buffer, shader, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::RenderError;
use crate::frame::{AcquireOutcome, FrameBackend};

/// Upper bound on how long one acquire may block. Expiry skips the frame
/// rather than failing it.
const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// The one piece of geometry this renderer draws.
const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

pub struct VulkanRenderer {
    device: Arc<VulkanDevice>,
    swapchain: Swapchain,
    sync: FrameSync,

    // Created by `create_resources`; null until then so a failed init
    // tears down only what exists (destroying a null handle is a no-op)
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,
    vertex_buffer: vk::Buffer,
    vertex_buffer_memory: vk::DeviceMemory,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    clear_color: [f32; 4],
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl VulkanRenderer {
    pub fn new(
        config: &Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self, RenderError> {
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        let device = VulkanDevice::new(
            &config.window.title,
            enable_validation,
            display,
            window,
        )?;

        let swapchain = Swapchain::new(
            device.clone(),
            config.window.width,
            config.window.height,
            config.preferred_present_mode(),
        )?;

        let sync = FrameSync::new(&device)?;

        let mut renderer = Self {
            device,
            swapchain,
            sync,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            vertex_buffer: vk::Buffer::null(),
            vertex_buffer_memory: vk::DeviceMemory::null(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            clear_color: config.graphics.clear_color,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        };

        // On error the partially built renderer drops, releasing whatever
        // was created so far in reverse order
        renderer.create_resources()?;

        log::info!(
            "Renderer ready: {}x{}, format {:?}",
            renderer.swapchain.extent.width,
            renderer.swapchain.extent.height,
            renderer.swapchain.format
        );

        Ok(renderer)
    }

    fn create_resources(&mut self) -> Result<(), RenderError> {
        self.render_pass = pipeline::create_render_pass(&self.device, self.swapchain.format)?;

        let vert_words = shader::compile(
            shader::TRIANGLE_VERT,
            shaderc::ShaderKind::Vertex,
            "triangle.vert",
            "main",
        )?;
        let frag_words = shader::compile(
            shader::TRIANGLE_FRAG,
            shaderc::ShaderKind::Fragment,
            "triangle.frag",
            "main",
        )?;

        let vert_module = shader::create_shader_module(&self.device, &vert_words)?;
        let frag_module = match shader::create_shader_module(&self.device, &frag_words) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.device.device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let pipeline_result = pipeline::create_graphics_pipeline(
            &self.device,
            self.render_pass,
            self.swapchain.extent,
            vert_module,
            frag_module,
        );

        // Modules are only needed during pipeline creation
        unsafe {
            self.device.device.destroy_shader_module(vert_module, None);
            self.device.device.destroy_shader_module(frag_module, None);
        }

        let (graphics_pipeline, pipeline_layout) = pipeline_result?;
        self.pipeline = graphics_pipeline;
        self.pipeline_layout = pipeline_layout;

        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &self.swapchain.image_views,
            self.render_pass,
            self.swapchain.extent,
        )?;

        let (vertex_buffer, vertex_buffer_memory) = buffer::create_buffer_with_data(
            &self.device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &TRIANGLE,
        )?;
        self.vertex_buffer = vertex_buffer;
        self.vertex_buffer_memory = vertex_buffer_memory;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        self.command_pool =
            unsafe { self.device.device.create_command_pool(&pool_info, None) }?;

        // One reusable primary command buffer, re-recorded each frame
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        self.command_buffer =
            unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?[0];

        Ok(())
    }

    fn record_commands(&self, image_index: u32) -> Result<(), RenderError> {
        let cmd = self.command_buffer;
        let device = &self.device.device;

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device.begin_command_buffer(cmd, &begin_info)?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];

            let render_pass_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(self.framebuffers[image_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.swapchain.extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_draw(cmd, TRIANGLE.len() as u32, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }
}

impl FrameBackend for VulkanRenderer {
    fn wait_for_prior_frame(&mut self) -> Result<(), RenderError> {
        // Fence reset is deferred to record_and_submit: a frame skipped
        // after this wait leaves the fence signaled, so the next wait
        // cannot deadlock
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.sync.in_flight_fence], true, u64::MAX)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self) -> Result<AcquireOutcome, RenderError> {
        self.swapchain
            .acquire_next_image(ACQUIRE_TIMEOUT_NS, self.sync.image_available)
    }

    fn record_and_submit(&mut self, image_index: u32) -> Result<(), RenderError> {
        unsafe {
            self.device
                .device
                .reset_fences(&[self.sync.in_flight_fence])?;
        }

        self.record_commands(image_index)?;

        let wait_semaphores = [self.sync.image_available];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [self.command_buffer];

        // Wait GPU-side for the image at color-attachment output only, so
        // earlier pipeline stages may start before the image is ready
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    self.sync.in_flight_fence,
                )
                .map_err(RenderError::Submit)?;
        }

        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<(), RenderError> {
        self.swapchain.present(
            self.device.present_queue,
            image_index,
            &[self.sync.render_finished],
        )
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer resources...");

        // The GPU must be done with everything before destruction starts
        let _ = self.device.wait_idle();

        let device = &self.device.device;
        unsafe {
            self.sync.destroy(device);
            // Destroying the pool frees the command buffer with it
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_buffer(self.vertex_buffer, None);
            device.free_memory(self.vertex_buffer_memory, None);
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
        // Swapchain (views first, then the swapchain itself) and the device
        // context drop after this body, completing the reverse order
    }
}
