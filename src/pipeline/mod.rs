//! Graphics pipeline construction
//!
//! A [`PipelineState`] is the immutable description of everything a sample's
//! pipeline needs except the target size. [`PipelineBuilder`] compiles it for
//! one extent; the resulting [`RenderContext`] is never patched in place, a
//! resize builds a fresh one and retires the old one.

pub mod descriptor;

pub use descriptor::*;

use crate::backend::*;
use crate::error::{Error, Result};

/// Size-independent pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub label: Option<String>,
    pub vertex_layout: VertexBufferLayout,
    pub topology: PrimitiveTopology,
    pub stages: Vec<ShaderStageDescriptor>,
    pub rasterization: RasterizationState,
    pub depth: Option<DepthState>,
    pub sample_count: u32,
}

impl PipelineState {
    /// Pass-through fixed function state: no culling, counter-clockwise front
    /// faces, no blending, one sample and no depth test
    pub fn new(
        label: &str,
        vertex_layout: VertexBufferLayout,
        topology: PrimitiveTopology,
        stages: Vec<ShaderStageDescriptor>,
    ) -> Self {
        Self {
            label: Some(label.to_string()),
            vertex_layout,
            topology,
            stages,
            rasterization: RasterizationState::pass_through(),
            depth: None,
            sample_count: 1,
        }
    }

    pub fn with_rasterization(mut self, rasterization: RasterizationState) -> Self {
        self.rasterization = rasterization;
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Shader stages present in this pipeline
    pub fn stage_flags(&self) -> ShaderStageFlags {
        self.stages
            .iter()
            .fold(ShaderStageFlags::empty(), |flags, stage| flags | stage.stage.into())
    }
}

/// Compiles a [`PipelineState`] for a concrete target
pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn build<D: Device + ?Sized>(
        device: &mut D,
        state: &PipelineState,
        layout: PipelineLayoutHandle,
        render_pass: RenderPassHandle,
        extent: Extent2d,
    ) -> Result<PipelineHandle> {
        state
            .vertex_layout
            .validate()
            .map_err(Error::InvalidVertexLayout)?;

        let desc = GraphicsPipelineDescriptor {
            label: state.label.clone(),
            stages: state.stages.clone(),
            vertex_layout: state.vertex_layout.clone(),
            topology: state.topology,
            rasterization: state.rasterization,
            depth: state.depth,
            sample_count: state.sample_count,
            viewport: Viewport::from_extent(extent),
            scissor: ScissorRect {
                x: 0,
                y: 0,
                extent,
            },
            layout,
            render_pass,
        };

        Ok(device.create_graphics_pipeline(&desc)?)
    }
}

/// The pipeline currently used for drawing and the target it was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    pub pipeline: PipelineHandle,
    pub pipeline_layout: PipelineLayoutHandle,
    pub extent: Extent2d,
}

impl RenderContext {
    pub fn build<D: Device + ?Sized>(
        device: &mut D,
        state: &PipelineState,
        pipeline_layout: PipelineLayoutHandle,
        render_pass: RenderPassHandle,
        extent: Extent2d,
    ) -> Result<Self> {
        let pipeline = PipelineBuilder::build(device, state, pipeline_layout, render_pass, extent)?;
        Ok(Self {
            pipeline,
            pipeline_layout,
            extent,
        })
    }

    /// Build a replacement for a new extent. `self` stays usable until it is
    /// passed to [`RenderContext::retire`].
    pub fn rebuild<D: Device + ?Sized>(
        &self,
        device: &mut D,
        state: &PipelineState,
        render_pass: RenderPassHandle,
        extent: Extent2d,
    ) -> Result<Self> {
        let next = Self::build(device, state, self.pipeline_layout, render_pass, extent)?;
        log::debug!(
            "Rebuilt pipeline for {}x{} (was {}x{})",
            extent.width,
            extent.height,
            self.extent.width,
            self.extent.height
        );
        Ok(next)
    }

    /// Destroy the pipeline of a replaced context. The layout is shared with
    /// the replacement and stays alive.
    pub fn retire<D: Device + ?Sized>(self, device: &mut D) {
        device.destroy_pipeline(self.pipeline);
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyDevice, ResourceKind};

    fn state(layout: VertexBufferLayout) -> PipelineState {
        PipelineState::new(
            "test",
            layout,
            PrimitiveTopology::TriangleList,
            vec![ShaderStageDescriptor {
                stage: ShaderStage::Vertex,
                module: ShaderModuleHandle::from_raw(1),
                entry_point: "main".into(),
            }],
        )
    }

    #[test]
    fn test_defaults_are_pass_through() {
        let state = state(ColorVertex::layout());
        assert_eq!(state.rasterization.cull_mode, CullMode::None);
        assert_eq!(state.rasterization.front_face, FrontFace::Ccw);
        assert!(state.depth.is_none());
        assert_eq!(state.sample_count, 1);
        assert_eq!(state.stage_flags(), ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_viewport_follows_extent() {
        let mut device = DummyDevice::new();
        let layout = device.create_pipeline_layout(&[]).unwrap();
        let extent = Extent2d::new(640, 480);

        let pipeline = PipelineBuilder::build(
            &mut device,
            &state(ColorVertex::layout()),
            layout,
            RenderPassHandle::from_raw(7),
            extent,
        )
        .unwrap();

        let desc = device.pipeline_descriptor(pipeline).unwrap();
        assert_eq!(desc.viewport.width, 640.0);
        assert_eq!(desc.viewport.height, 480.0);
        assert_eq!(desc.scissor.extent, extent);
    }

    #[test]
    fn test_invalid_layout_is_rejected() {
        let mut device = DummyDevice::new();
        let layout = device.create_pipeline_layout(&[]).unwrap();
        let mut vertex_layout = ColorVertex::layout();
        vertex_layout.attributes[1].offset = 20;

        let result = PipelineBuilder::build(
            &mut device,
            &state(vertex_layout),
            layout,
            RenderPassHandle::from_raw(7),
            Extent2d::new(1, 1),
        );
        assert!(matches!(result, Err(Error::InvalidVertexLayout(_))));
        assert_eq!(device.live_count(ResourceKind::Pipeline), 0);
    }

    #[test]
    fn test_rebuild_then_retire() {
        let mut device = DummyDevice::new();
        let layout = device.create_pipeline_layout(&[]).unwrap();
        let state = state(ColorVertex::layout());
        let render_pass = RenderPassHandle::from_raw(7);

        let first =
            RenderContext::build(&mut device, &state, layout, render_pass, Extent2d::new(8, 8))
                .unwrap();
        let second = first
            .rebuild(&mut device, &state, render_pass, Extent2d::new(16, 4))
            .unwrap();
        assert_ne!(first.pipeline, second.pipeline);
        assert_eq!(second.pipeline_layout, layout);

        let old = first.pipeline;
        first.retire(&mut device);
        assert_eq!(device.destroy_count(ResourceKind::Pipeline, old.raw()), 1);
        assert_eq!(device.live_count(ResourceKind::Pipeline), 1);
    }
}
