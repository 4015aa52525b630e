/// ### English
/// Engine internals: context pool, streaming ring buffers, batch hierarchy, GPU seam and the
/// frame orchestrator.
///
/// ### 中文
/// 引擎内部模块：上下文池、流式环形缓冲区、批次层级、GPU 接口层与帧编排器。
pub mod batch;
pub(crate) mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod flags;
pub mod frame;
pub mod gpu;
pub(crate) mod lockfree;
pub mod output;
pub mod pass;
pub mod streaming;
pub mod target;
pub mod vertex_format;
pub mod viewpoint;

pub use batch::{
    BatchKey, BatchRegistry, Draw, DrawBatch, DrawDescriptor, DrawHandle, DrawInstance,
    ElementRange, FlushStats, InstanceData, InstanceHandle, Material, MaterialId, VertexRange,
};
pub use config::{RendererConfig, StreamSizes};
pub use context::{ContextPlatform, ContextPool, HeadlessPlatform, ScopedContext, SurfmanPlatform};
pub use error::{RenderError, Result};
pub use frame::{FrameReport, PassReport, Renderer};
pub use output::{FrameTextures, Output};
pub use pass::{PassDescriptor, PassId};
pub use streaming::{BufferClass, FRAME_RING_DEPTH, StreamAllocation, StreamingBuffer, StreamingBuffers};
pub use vertex_format::{AttributeType, VertexAttribute, VertexFormat};
pub use viewpoint::{CameraBlock, Viewpoint, ViewpointId};
