// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. Modules are loaded from disk at
// startup, so a missing shader compiler only costs the triangle, not the
// whole frame loop.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // read_spv handles alignment and endianness of the byte stream
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V bytecode")?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Load a compiled shader from `path`
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;
    create_shader_module(device, &bytes)
        .with_context(|| format!("Failed to load shader {}", path.display()))
}
