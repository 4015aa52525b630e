//! ### English
//! Bitflags controlling optional renderer behaviors.
//!
//! These are passed through the C ABI as a `u32` bitmask in `XianRenderConfig::flags`.
//!
//! ### 中文
//! 控制渲染器可选行为的位标志（bitflags）。
//!
//! 通过 C ABI 以 `u32` 位掩码传入 `XianRenderConfig::flags`。

/// ### English
/// Render both viewpoints (left and right eye) each frame, concurrently on two worker contexts.
///
/// ### 中文
/// 每帧渲染两个视点（左右眼），在两个工作上下文上并发执行。
pub const XIAN_RENDER_FLAG_STEREO: u32 = 1 << 0;

/// ### English
/// Use the in-memory headless backend instead of creating real GL contexts.
///
/// No pixels are produced; draw commands are recorded. Useful for CI and embedder smoke tests.
///
/// ### 中文
/// 使用内存中的无头后端，而不是创建真实 GL 上下文。
///
/// 不会产生像素，只记录绘制命令。适用于 CI 与宿主的冒烟测试。
pub const XIAN_RENDER_FLAG_HEADLESS: u32 = 1 << 1;

pub(crate) const XIAN_RENDER_KNOWN_FLAGS: u32 = XIAN_RENDER_FLAG_STEREO | XIAN_RENDER_FLAG_HEADLESS;
