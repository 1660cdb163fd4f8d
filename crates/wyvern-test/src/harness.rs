//! Helpers for driving a [`FrameOrchestrator`] against the mock device.

use crate::device::MockDevice;
use crate::platform::MockPlatform;
use wyvern_gpu::PipelineDesc;
use wyvern_render::{mesh_pipeline_desc, FrameOrchestrator, RendererConfig, Result};

/// Orchestrator type used throughout the tests.
pub type MockOrchestrator = FrameOrchestrator<MockDevice, MockPlatform>;

/// SPIR-V magic number; the mock only checks that shader code is present.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Mesh pipeline description with placeholder shader code.
pub fn test_pipeline_desc() -> PipelineDesc {
    mesh_pipeline_desc(vec![SPIRV_MAGIC], vec![SPIRV_MAGIC])
}

/// A mock device, a 800x600 platform and an orchestrator built on clones of both.
pub struct TestRenderer {
    pub device: MockDevice,
    pub platform: MockPlatform,
    pub renderer: MockOrchestrator,
}

impl TestRenderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        Self::with_parts(MockDevice::new(), MockPlatform::new(800, 600), config)
    }

    pub fn with_parts(
        device: MockDevice,
        platform: MockPlatform,
        config: RendererConfig,
    ) -> Result<Self> {
        let renderer = FrameOrchestrator::new(
            device.clone(),
            platform.clone(),
            &test_pipeline_desc(),
            config,
        )?;
        Ok(Self {
            device,
            platform,
            renderer,
        })
    }
}
