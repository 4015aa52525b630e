use std::sync::Arc;

use dpi::PhysicalSize;

use crate::engine::batch::{BatchRegistry, MaterialProgram};
use crate::engine::gpu::PrimitiveType;
use crate::engine::pass::{PassDescriptor, PassId};
use crate::engine::streaming::{BufferClass, BufferRange, StreamAllocation, StreamingBuffers};
use crate::engine::target::PassTarget;
use crate::engine::vertex_format::VertexFormat;
use crate::engine::viewpoint::ViewpointId;

/// ### English
/// Immutable snapshot of one frame, built on the main context after the batch flush and shared
/// read-only with every render pass of that frame.
///
/// ### 中文
/// 单帧的不可变快照：在主上下文完成批次刷新后构建，并以只读方式共享给该帧的所有渲染 pass。
#[derive(Debug)]
pub(crate) struct FramePlan {
    pub(crate) frame: u64,
    pub(crate) passes: Arc<[PassDescriptor]>,
    pub(crate) materials: Vec<PlannedMaterial>,
    pub(crate) buffers: FrameBuffers,
    pub(crate) viewpoints: Vec<PlannedViewpoint>,
}

#[derive(Debug)]
pub(crate) struct PlannedMaterial {
    pub(crate) program: MaterialProgram,
    pub(crate) pass: PassId,
    pub(crate) uniforms: Option<BufferRange>,
    pub(crate) batches: Vec<PlannedBatch>,
}

#[derive(Debug)]
pub(crate) struct PlannedBatch {
    pub(crate) format: VertexFormat,
    pub(crate) stride: u32,
    pub(crate) primitive: PrimitiveType,
    /// ### English
    /// Byte offset of the first command in the indirect buffer.
    ///
    /// ### 中文
    /// 首条命令在间接缓冲区中的字节偏移。
    pub(crate) commands: usize,
    pub(crate) draw_count: u32,
}

/// ### English
/// Current-frame slices bound once per pass.
///
/// ### 中文
/// 每个 pass 绑定一次的当前帧切片。
#[derive(Debug, Default)]
pub(crate) struct FrameBuffers {
    pub(crate) vertices: Option<BufferRange>,
    pub(crate) indirect: Option<BufferRange>,
    pub(crate) draw_info: Option<BufferRange>,
    pub(crate) transforms: Option<BufferRange>,
}

#[derive(Debug)]
pub(crate) struct PlannedViewpoint {
    pub(crate) id: ViewpointId,
    pub(crate) size: PhysicalSize<u32>,
    pub(crate) targets: Vec<PassTarget>,
    pub(crate) camera: Option<BufferRange>,
}

pub(crate) fn range_of(streams: &StreamingBuffers, allocation: &StreamAllocation) -> Option<BufferRange> {
    Some(BufferRange {
        buffer: streams.get(allocation.class).buffer_id()?,
        offset: allocation.absolute(),
        size: allocation.size,
    })
}

impl FramePlan {
    pub(crate) fn build(
        frame: u64,
        passes: Arc<[PassDescriptor]>,
        registry: &BatchRegistry,
        streams: &StreamingBuffers,
        transforms: Option<&StreamAllocation>,
        viewpoints: Vec<PlannedViewpoint>,
    ) -> Self {
        let materials = registry
            .materials()
            .iter()
            .filter(|material| material.batch_count() > 0)
            .map(|material| PlannedMaterial {
                program: material.program().clone(),
                pass: material.pass(),
                uniforms: material
                    .uniform_range()
                    .and_then(|range| range_of(streams, range)),
                batches: material
                    .batches()
                    .filter_map(|(key, batch)| {
                        let commands = batch.commands()?;
                        Some(PlannedBatch {
                            format: key.format.clone(),
                            stride: key.stride,
                            primitive: key.primitive,
                            commands: commands.absolute(),
                            draw_count: batch.written(),
                        })
                    })
                    .collect(),
            })
            .collect();

        let buffers = FrameBuffers {
            vertices: streams.get(BufferClass::Vertex).frame_range(frame),
            indirect: streams.get(BufferClass::DrawIndirect).frame_range(frame),
            draw_info: streams.get(BufferClass::DrawInfo).frame_range(frame),
            transforms: transforms.and_then(|range| range_of(streams, range)),
        };

        Self {
            frame,
            passes,
            materials,
            buffers,
            viewpoints,
        }
    }

    pub(crate) fn batch_count(&self) -> usize {
        self.materials.iter().map(|material| material.batches.len()).sum()
    }
}
