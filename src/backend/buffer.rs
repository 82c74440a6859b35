// Buffer utilities
//
// Host-visible buffer creation for the static vertex data. The triangle
// is uploaded once at startup and never written again, so a staging copy
// would buy nothing.

use ash::vk;

use super::VulkanDevice;
use crate::error::RenderError;

/// Create a GPU buffer with the given usage and memory properties.
pub fn create_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory), RenderError> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;

    let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let memory_type_index = match find_memory_type(
        device,
        mem_requirements.memory_type_bits,
        memory_properties,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type_index);

    let buffer_memory = match unsafe { device.device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    unsafe { device.device.bind_buffer_memory(buffer, buffer_memory, 0) }?;

    Ok((buffer, buffer_memory))
}

/// Create a host-visible buffer and fill it with `data`.
pub fn create_buffer_with_data<T: bytemuck::Pod>(
    device: &VulkanDevice,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<(vk::Buffer, vk::DeviceMemory), RenderError> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = bytes.len() as vk::DeviceSize;

    let (buffer, memory) = create_buffer(
        device,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    unsafe {
        let ptr = device
            .device
            .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())? as *mut u8;
        ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        device.device.unmap_memory(memory);
    }

    Ok((buffer, memory))
}

/// Find a memory type matching the filter and property requirements.
fn find_memory_type(
    device: &VulkanDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    let mem_properties = unsafe {
        device
            .instance
            .get_physical_device_memory_properties(device.physical_device)
    };

    for i in 0..mem_properties.memory_type_count {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = mem_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    Err(RenderError::Init(
        "no suitable memory type for buffer".to_string(),
    ))
}
