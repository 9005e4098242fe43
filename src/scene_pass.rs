// Scene pass - records one frame of the demo scene
//
// Clears the swap image and, when a pipeline is available, draws every
// uploaded mesh. Without shaders it degrades to a plain clear.

use ash::vk;

use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::{RenderResult, VulkanDevice};
use crate::renderer::{FrameRecorder, FrameTarget};
use crate::scene::UploadedScene;

pub struct ScenePass {
    pub clear_color: [f32; 4],
    pub pipeline: Option<GraphicsPipeline>,
    pub scene: UploadedScene,
}

impl ScenePass {
    pub fn new(clear_color: [f32; 4], pipeline: Option<GraphicsPipeline>, scene: UploadedScene) -> Self {
        Self {
            clear_color,
            pipeline,
            scene,
        }
    }
}

impl FrameRecorder<VulkanDevice> for ScenePass {
    fn record(&mut self, device: &VulkanDevice, target: &FrameTarget) -> RenderResult<()> {
        let cmd = target.command_buffer;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        }];

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device
                .device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            if let Some(pipeline) = &self.pipeline {
                // Viewport and scissor are dynamic, they follow the swapchain
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: target.extent.width as f32,
                    height: target.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                device.device.cmd_set_viewport(cmd, 0, &[viewport]);
                device.device.cmd_set_scissor(cmd, 0, &[render_area]);
                device
                    .device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);

                for mesh in self.scene.meshes.iter().filter(|m| m.vertex_count > 0) {
                    device
                        .device
                        .cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.buffer], &[0]);
                    device.device.cmd_draw(cmd, mesh.vertex_count, 1, 0, 0);
                }
            }

            device.device.cmd_end_render_pass(cmd);
        }

        Ok(())
    }
}
