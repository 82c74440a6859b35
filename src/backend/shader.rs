// Shader compilation and module creation
//
// Shader source lives as embedded GLSL text and is compiled to SPIR-V at
// startup with shaderc, so a compile failure carries the full compiler
// diagnostic instead of a missing-file error.

use ash::vk;

use super::VulkanDevice;
use crate::error::RenderError;

/// Vertex stage: passes the static per-vertex position and color through.
pub const TRIANGLE_VERT: &str = r#"
#version 450

layout(location = 0) in vec2 in_position;
layout(location = 1) in vec3 in_color;

layout(location = 0) out vec3 frag_color;

void main() {
    gl_Position = vec4(in_position, 0.0, 1.0);
    frag_color = in_color;
}
"#;

/// Fragment stage: interpolated vertex color, opaque alpha.
pub const TRIANGLE_FRAG: &str = r#"
#version 450

layout(location = 0) in vec3 frag_color;

layout(location = 0) out vec4 out_color;

void main() {
    out_color = vec4(frag_color, 1.0);
}
"#;

/// Compile one GLSL stage to SPIR-V words.
pub fn compile(
    source: &str,
    kind: shaderc::ShaderKind,
    file_name: &str,
    entry_point: &str,
) -> Result<Vec<u32>, RenderError> {
    let mut compiler = shaderc::Compiler::new()
        .ok_or_else(|| RenderError::ShaderCompile("shaderc compiler unavailable".to_string()))?;

    let artifact = compiler
        .compile_into_spirv(source, kind, file_name, entry_point, None)
        .map_err(|e| RenderError::ShaderCompile(e.to_string()))?;

    Ok(artifact.as_binary().to_vec())
}

/// Create a shader module from SPIR-V words.
pub fn create_shader_module(
    device: &VulkanDevice,
    code: &[u32],
) -> Result<vk::ShaderModule, RenderError> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(|e| RenderError::ShaderCompile(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_stages_compile() {
        let vert = compile(
            TRIANGLE_VERT,
            shaderc::ShaderKind::Vertex,
            "triangle.vert",
            "main",
        )
        .unwrap();
        let frag = compile(
            TRIANGLE_FRAG,
            shaderc::ShaderKind::Fragment,
            "triangle.frag",
            "main",
        )
        .unwrap();

        // SPIR-V magic number leads both binaries
        assert_eq!(vert[0], 0x0723_0203);
        assert_eq!(frag[0], 0x0723_0203);
    }

    #[test]
    fn syntax_error_carries_diagnostic() {
        let err = compile(
            "#version 450\nvoid main() { bogus; }",
            shaderc::ShaderKind::Vertex,
            "broken.vert",
            "main",
        )
        .unwrap_err();

        match err {
            RenderError::ShaderCompile(diag) => assert!(diag.contains("bogus")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
