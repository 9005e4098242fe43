// Scene data and its upload to the GPU
//
// A scene is just CPU-side meshes until it's uploaded; uploading hands back
// device-local buffers that the frame recorder draws from and that must be
// released through a deletion queue once no frame uses them anymore.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};

use crate::backend::{
    Deletion, DeletionQueue, DeviceBuffer, RenderDevice, RenderResult, StagedTransferUploader,
};

/// Interleaved vertex: position, color, texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub const fn new(position: Vec3, color: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0, 1, 2 for position, color and uv
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// CPU-side geometry
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
}

impl Mesh {
    /// One RGB triangle in clip space
    pub fn triangle() -> Self {
        Self {
            vertices: vec![
                Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::X, Vec2::new(0.5, 0.0)),
                Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::Y, Vec2::new(1.0, 1.0)),
                Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::Z, Vec2::new(0.0, 1.0)),
            ],
        }
    }
}

/// A mesh living in device-local memory
#[derive(Debug, Clone, Copy)]
pub struct UploadedMesh {
    pub vertex_buffer: DeviceBuffer,
    pub vertex_count: u32,
}

/// Everything a scene upload produced
#[derive(Debug, Default)]
pub struct UploadedScene {
    pub meshes: Vec<UploadedMesh>,
}

impl UploadedScene {
    /// Hand every buffer to `queue`; they're destroyed on its next flush.
    pub fn release_into<D: RenderDevice>(self, queue: &mut DeletionQueue<D>) {
        for mesh in self.meshes {
            queue.enqueue(Deletion::Buffer(mesh.vertex_buffer.buffer));
        }
    }
}

/// Anything that can put its meshes on the GPU
pub trait SceneUpload<D: RenderDevice> {
    fn upload_meshes(&self, uploader: &mut StagedTransferUploader<D>) -> RenderResult<UploadedScene>;
}

/// The demo scene: a single triangle
#[derive(Debug, Clone)]
pub struct TriangleScene {
    pub meshes: Vec<Mesh>,
}

impl Default for TriangleScene {
    fn default() -> Self {
        Self {
            meshes: vec![Mesh::triangle()],
        }
    }
}

impl<D: RenderDevice> SceneUpload<D> for TriangleScene {
    fn upload_meshes(&self, uploader: &mut StagedTransferUploader<D>) -> RenderResult<UploadedScene> {
        let mut uploaded = UploadedScene::default();
        for mesh in &self.meshes {
            let vertex_buffer = match uploader.upload_slice(
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
                &mesh.vertices,
            ) {
                Ok(buffer) => buffer,
                Err(e) => {
                    // Earlier meshes were fully written; nothing references them yet
                    for mesh in uploaded.meshes {
                        uploader.device().destroy_buffer(mesh.vertex_buffer.buffer);
                    }
                    return Err(e);
                }
            };
            uploaded.meshes.push(UploadedMesh {
                vertex_buffer,
                vertex_count: mesh.vertices.len() as u32,
            });
        }
        log::info!("Uploaded {} meshes", uploaded.meshes.len());
        Ok(uploaded)
    }
}
