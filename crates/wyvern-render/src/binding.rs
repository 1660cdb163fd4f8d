//! Per-frame uniform descriptor binding.

use crate::error::Result;
use ash::vk;
use wyvern_core::constants::{FRAME_UNIFORM_BINDING, FRAME_UNIFORM_SIZE};
use wyvern_gpu::RenderDevice;

/// Descriptor layout and pool for the per-frame uniform block.
///
/// The layout exposes one uniform buffer at binding 0 to the vertex stage; the
/// pool holds exactly one set per frame in flight.
#[derive(Debug)]
pub struct UniformBinding {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    capacity: u32,
}

impl UniformBinding {
    /// Create the layout and a pool sized for `sets` descriptor sets.
    pub fn new<D: RenderDevice>(device: &D, sets: u32) -> Result<Self> {
        let layout =
            device.create_uniform_set_layout(FRAME_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: sets,
        }];
        let pool = match device.create_descriptor_pool(sets, &pool_sizes) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_descriptor_set_layout(layout);
                return Err(e.into());
            }
        };

        Ok(Self {
            layout,
            pool,
            capacity: sets,
        })
    }

    /// Layout used by the pipeline and every frame's set.
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Number of sets the pool can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocate one set per frame slot.
    pub fn allocate<D: RenderDevice>(
        &self,
        device: &D,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![self.layout; count as usize];
        Ok(device.allocate_descriptor_sets(self.pool, &layouts)?)
    }

    /// Point `set` at a frame's uniform buffer.
    pub fn bind_buffer<D: RenderDevice>(
        &self,
        device: &D,
        set: vk::DescriptorSet,
        buffer: vk::Buffer,
    ) {
        device.write_uniform_descriptor(
            set,
            FRAME_UNIFORM_BINDING,
            buffer,
            FRAME_UNIFORM_SIZE as u64,
        );
    }

    /// Destroy the pool (freeing its sets) and the layout.
    pub fn destroy<D: RenderDevice>(&self, device: &D) {
        device.destroy_descriptor_pool(self.pool);
        device.destroy_descriptor_set_layout(self.layout);
    }
}
