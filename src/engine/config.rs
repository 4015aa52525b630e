//! ### English
//! Renderer configuration.
//!
//! ### 中文
//! 渲染器配置。

use std::time::Duration;

use dpi::PhysicalSize;

use crate::engine::streaming::BufferClass;

/// ### English
/// Per-class slice sizes in bytes. Each streaming buffer holds `FRAME_RING_DEPTH` slices.
///
/// ### 中文
/// 各类别的切片字节大小。每个流式缓冲区包含 `FRAME_RING_DEPTH` 个切片。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSizes {
    pub vertex: usize,
    pub index: usize,
    pub draw_indirect: usize,
    pub draw_info: usize,
    pub uniform: usize,
    pub pixel_staging: usize,
}

impl StreamSizes {
    pub fn slice_size(&self, class: BufferClass) -> usize {
        match class {
            BufferClass::Vertex => self.vertex,
            BufferClass::Index => self.index,
            BufferClass::DrawIndirect => self.draw_indirect,
            BufferClass::DrawInfo => self.draw_info,
            BufferClass::Uniform => self.uniform,
            BufferClass::PixelStaging => self.pixel_staging,
        }
    }
}

impl Default for StreamSizes {
    fn default() -> Self {
        Self {
            vertex: 8 << 20,
            index: 2 << 20,
            draw_indirect: 256 << 10,
            draw_info: 1 << 20,
            uniform: 1 << 20,
            pixel_staging: 4 << 20,
        }
    }
}

/// ### English
/// Construction-time renderer settings.
///
/// ### 中文
/// 渲染器构造时的设置。
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// ### English
    /// Requested shared worker contexts. Clamped to `min(hint, available_parallelism, 2)`,
    /// at least 1. The root context is always created in addition.
    ///
    /// ### 中文
    /// 请求的共享工作上下文数量。会被限制为 `min(hint, 可用并行度, 2)`，且至少为 1。
    /// 根上下文总会额外创建。
    pub context_size_hint: usize,
    /// ### English
    /// How long unnamed context acquisition spins before reporting exhaustion.
    ///
    /// ### 中文
    /// 非命名上下文获取在报告耗尽前的自旋时长。
    pub acquire_timeout: Duration,
    pub streams: StreamSizes,
    pub max_draws_per_frame: usize,
    pub default_viewport: PhysicalSize<u32>,
    pub stereo: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            context_size_hint: 2,
            acquire_timeout: Duration::from_secs(2),
            streams: StreamSizes::default(),
            max_draws_per_frame: 16_384,
            default_viewport: PhysicalSize::new(1280, 720),
            stereo: false,
        }
    }
}

impl RendererConfig {
    /// ### English
    /// Smallest `draw_indirect` slice that fits `max_draws_per_frame` records.
    ///
    /// ### 中文
    /// 能容纳 `max_draws_per_frame` 条记录的最小 `draw_indirect` 切片大小。
    pub fn min_indirect_slice(&self) -> usize {
        self.max_draws_per_frame * crate::engine::gpu::INDIRECT_COMMAND_SIZE
    }
}
