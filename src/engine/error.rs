//! ### English
//! Crate-wide error type.
//!
//! Every failure is surfaced as a value; callers decide whether to abort. Initialization,
//! capacity and unsupported-feature errors are all fatal for the current frame.
//!
//! ### 中文
//! crate 统一错误类型。
//!
//! 所有失败都以返回值形式暴露，由调用方决定是否中止。初始化失败、容量耗尽与不支持的功能
//! 对当前帧而言都是致命错误。

use thiserror::Error;

use crate::engine::streaming::BufferClass;

/// ### English
/// Errors produced by the rendering core.
///
/// ### 中文
/// 渲染核心产生的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RenderError {
    /// ### English
    /// A graphics context could not be created or made current.
    ///
    /// ### 中文
    /// 图形上下文创建失败或无法设为 current。
    #[error("graphics context initialization failed: {0}")]
    ContextInit(String),

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: &'static str, log: String },

    #[error("program for material `{material}` failed to link: {log}")]
    ProgramLink { material: String, log: String },

    /// ### English
    /// Framebuffer completeness check failed (`status` is the raw GL status).
    ///
    /// ### 中文
    /// framebuffer 完整性检查失败（`status` 为原始 GL 状态码）。
    #[error("framebuffer incomplete (status 0x{status:04x})")]
    IncompleteFramebuffer { status: u32 },

    #[error("GPU object creation failed: {0}")]
    GpuObject(String),

    /// ### English
    /// A streaming buffer slice has no room left for this frame.
    ///
    /// ### 中文
    /// 流式缓冲区当前帧切片已无剩余空间。
    #[error("{class:?} stream exhausted: requested {requested} bytes, {available} available")]
    StreamExhausted {
        class: BufferClass,
        requested: usize,
        available: usize,
    },

    #[error("draw limit exceeded: {requested} draws, limit {limit}")]
    DrawLimitExceeded { requested: usize, limit: usize },

    /// ### English
    /// No unreserved context became free before the acquisition timeout.
    ///
    /// ### 中文
    /// 在获取超时前没有空闲的非保留上下文。
    #[error("no free graphics context among {workers} worker contexts")]
    ContextPoolExhausted { workers: usize },

    #[error("context slot {slot} is not held by the calling thread")]
    ContextNotHeld { slot: usize },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("unknown material `{0}`")]
    UnknownMaterial(String),

    #[error("material `{0}` is already registered")]
    DuplicateMaterial(String),

    #[error("stale or invalid handle")]
    StaleHandle,

    #[error("invalid vertex format: {0}")]
    InvalidVertexFormat(String),

    /// ### English
    /// A drawn batch references vertices streamed in an earlier frame; that ring slice has
    /// already been recycled.
    ///
    /// ### 中文
    /// 待绘制批次引用了更早帧流入的顶点；该环形切片已被回收。
    #[error("draw geometry was streamed in frame {streamed}, not the current frame {frame}")]
    StaleGeometry { streamed: u64, frame: u64 },

    #[error("draws reference vertices but nothing was streamed in frame {frame}")]
    GeometryNotStreamed { frame: u64 },

    #[error("pass {0} is not declared")]
    UnknownPass(u32),

    #[error("pixel upload size mismatch: expected {expected} bytes, got {actual}")]
    InvalidUpload { expected: usize, actual: usize },

    #[error("render worker panicked")]
    WorkerPanicked,
}

/// ### English
/// Result alias used across the crate.
///
/// ### 中文
/// crate 内通用的 Result 别名。
pub type Result<T> = std::result::Result<T, RenderError>;
