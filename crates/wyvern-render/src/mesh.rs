//! Device-resident meshes and the vertex layout the mesh pipeline expects.

use crate::error::Result;
use ash::vk;
use std::mem::offset_of;
use wyvern_core::Vertex;
use wyvern_gpu::{DeviceBuffer, PipelineDesc, RenderDevice};

/// A mesh uploaded to device-local memory.
#[derive(Debug)]
pub struct GpuMesh<B> {
    pub vertex_buffer: B,
    pub index_buffer: Option<(B, vk::IndexType)>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl<B: DeviceBuffer> GpuMesh<B> {
    /// Whether the mesh is drawn with an index buffer.
    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    /// Release both buffers. The GPU must no longer reference them.
    pub fn destroy<D: RenderDevice<Buffer = B>>(self, device: &D) -> Result<()> {
        device.destroy_buffer(self.vertex_buffer)?;
        if let Some((buffer, _)) = self.index_buffer {
            device.destroy_buffer(buffer)?;
        }
        Ok(())
    }
}

/// One mesh to draw in a frame.
pub struct MeshDraw<'a, B> {
    pub mesh: &'a GpuMesh<B>,
    pub instance_count: u32,
}

impl<'a, B> MeshDraw<'a, B> {
    pub fn new(mesh: &'a GpuMesh<B>) -> Self {
        Self {
            mesh,
            instance_count: 1,
        }
    }
}

/// Vertex input for [`Vertex`]: one interleaved binding, position at location 0
/// and color at location 1.
pub fn vertex_layout() -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }];
    let attributes = vec![
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
    ];
    (bindings, attributes)
}

/// Pipeline description for drawing [`Vertex`] meshes with the given SPIR-V.
pub fn mesh_pipeline_desc(vertex_shader: Vec<u32>, fragment_shader: Vec<u32>) -> PipelineDesc {
    let (vertex_bindings, vertex_attributes) = vertex_layout();
    PipelineDesc {
        vertex_shader,
        fragment_shader,
        vertex_bindings,
        vertex_attributes,
        ..PipelineDesc::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_vertex() {
        let (bindings, attributes) = vertex_layout();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 24);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].location, 1);
    }

    #[test]
    fn mesh_pipeline_desc_keeps_defaults() {
        let desc = mesh_pipeline_desc(vec![0x0723_0203], vec![0x0723_0203]);
        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert!(desc.depth_test);
        assert_eq!(desc.vertex_attributes.len(), 2);
    }
}
