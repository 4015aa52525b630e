/// ### English
/// `xian_render_core` crate root.
/// Exposes the C ABI via `ffi`; the batching engine lives under `engine` and is also usable
/// directly from Rust.
///
/// ### 中文
/// `xian_render_core` 的 crate 根。
/// 通过 `ffi` 导出 C ABI；批处理引擎位于 `engine` 模块，也可直接从 Rust 使用。
pub mod engine;
mod ffi;

pub use engine::{
    DrawDescriptor, DrawHandle, FrameTextures, InstanceData, InstanceHandle, MaterialId, Output,
    PassId, RenderError, Renderer, RendererConfig, Result, VertexFormat, ViewpointId,
};
