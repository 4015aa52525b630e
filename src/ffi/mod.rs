//! ### English
//! C ABI surface for `xian_render_core`.
//!
//! All exported symbols are `extern "C"` functions; structs are `#[repr(C)]`.
//! Strings must be NUL-terminated UTF-8. Failing calls log the error and return `false` / NULL.
//!
//! ### 中文
//! `xian_render_core` 的 C ABI 接口层。
//!
//! 所有导出符号均为 `extern "C"` 函数；结构体使用 `#[repr(C)]`。
//! 字符串必须是以 NUL 结尾的 UTF-8。调用失败时记录错误日志并返回 `false` / NULL。
mod abi;
mod draw;
mod frame;
mod material;
mod renderer;
mod viewpoint;

use std::ffi::{CStr, c_char};
use std::time::Duration;

use dpi::PhysicalSize;

use crate::engine::batch::{DrawHandle, InstanceHandle};
use crate::engine::config::{RendererConfig, StreamSizes};
use crate::engine::error::Result;
use crate::engine::flags;
use crate::engine::frame::Renderer;
use crate::engine::output::FrameTextures;

/// ### English
/// Opaque renderer handle. Must be used from one thread at a time.
///
/// ### 中文
/// 不透明渲染器句柄。同一时间只能由一个线程使用。
#[repr(C)]
pub struct XianRenderer {
    renderer: Renderer,
}

/// ### English
/// Construction parameters. Zero fields fall back to the built-in defaults.
///
/// ### 中文
/// 构造参数。为 0 的字段使用内置默认值。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XianRenderConfig {
    /// ### English
    /// Bitmask of `XIAN_RENDER_FLAG_*`.
    ///
    /// ### 中文
    /// `XIAN_RENDER_FLAG_*` 位掩码。
    pub flags: u32,
    pub context_size_hint: u32,
    pub acquire_timeout_ms: u32,
    pub max_draws_per_frame: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub vertex_slice_bytes: u64,
    pub index_slice_bytes: u64,
    pub draw_indirect_slice_bytes: u64,
    pub draw_info_slice_bytes: u64,
    pub uniform_slice_bytes: u64,
    pub pixel_staging_slice_bytes: u64,
}

/// ### English
/// Generational draw handle as seen by C.
///
/// ### 中文
/// C 侧看到的带代数的绘制句柄。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XianDrawHandle {
    pub index: u32,
    pub generation: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XianInstanceHandle {
    pub draw: XianDrawHandle,
    pub id: u32,
}

/// ### English
/// Final textures of one frame. Texture id `0` means the viewpoint was disabled.
///
/// ### 中文
/// 单帧的最终纹理。纹理 id 为 `0` 表示该视点未启用。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XianFrameTextures {
    pub frame: u64,
    pub left_texture: u32,
    pub right_texture: u32,
}

/// ### English
/// C ABI version for `xian_render_core`.
///
/// ### 中文
/// `xian_render_core` 的 C ABI 版本号。
const XIAN_RENDER_ABI_VERSION: u32 = 1;

fn or_default<T: Copy + PartialEq + Default>(value: T, fallback: T) -> T {
    if value == T::default() { fallback } else { value }
}

impl From<&XianRenderConfig> for RendererConfig {
    fn from(value: &XianRenderConfig) -> Self {
        let defaults = RendererConfig::default();
        let streams = StreamSizes::default();
        let unknown = value.flags & !flags::XIAN_RENDER_KNOWN_FLAGS;
        if unknown != 0 {
            log::warn!("ignoring unknown render flags 0x{unknown:x}");
        }
        let viewport = if value.viewport_width == 0 || value.viewport_height == 0 {
            defaults.default_viewport
        } else {
            PhysicalSize::new(value.viewport_width, value.viewport_height)
        };
        let bytes = |requested: u64, fallback: usize| {
            usize::try_from(requested).map_or(fallback, |requested| or_default(requested, fallback))
        };

        Self {
            context_size_hint: or_default(value.context_size_hint as usize, defaults.context_size_hint),
            acquire_timeout: if value.acquire_timeout_ms == 0 {
                defaults.acquire_timeout
            } else {
                Duration::from_millis(value.acquire_timeout_ms.into())
            },
            streams: StreamSizes {
                vertex: bytes(value.vertex_slice_bytes, streams.vertex),
                index: bytes(value.index_slice_bytes, streams.index),
                draw_indirect: bytes(value.draw_indirect_slice_bytes, streams.draw_indirect),
                draw_info: bytes(value.draw_info_slice_bytes, streams.draw_info),
                uniform: bytes(value.uniform_slice_bytes, streams.uniform),
                pixel_staging: bytes(value.pixel_staging_slice_bytes, streams.pixel_staging),
            },
            max_draws_per_frame: or_default(
                value.max_draws_per_frame as usize,
                defaults.max_draws_per_frame,
            ),
            default_viewport: viewport,
            stereo: value.flags & flags::XIAN_RENDER_FLAG_STEREO != 0,
        }
    }
}

impl From<DrawHandle> for XianDrawHandle {
    fn from(value: DrawHandle) -> Self {
        Self {
            index: value.index,
            generation: value.generation,
        }
    }
}

impl From<XianDrawHandle> for DrawHandle {
    fn from(value: XianDrawHandle) -> Self {
        Self {
            index: value.index,
            generation: value.generation,
        }
    }
}

impl From<InstanceHandle> for XianInstanceHandle {
    fn from(value: InstanceHandle) -> Self {
        Self {
            draw: value.draw.into(),
            id: value.id,
        }
    }
}

impl From<XianInstanceHandle> for InstanceHandle {
    fn from(value: XianInstanceHandle) -> Self {
        Self {
            draw: value.draw.into(),
            id: value.id,
        }
    }
}

impl From<FrameTextures> for XianFrameTextures {
    fn from(value: FrameTextures) -> Self {
        Self {
            frame: value.frame,
            left_texture: value.left.map_or(0, |texture| texture.0),
            right_texture: value.right.map_or(0, |texture| texture.0),
        }
    }
}

/// ### English
/// Logs a failed call and converts it to `None`.
///
/// ### 中文
/// 记录失败调用的日志并转换为 `None`。
fn report<T>(call: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            log::error!("{call}: {err}");
            None
        }
    }
}

/// ### English
/// Borrows the renderer behind a C pointer.
///
/// # Safety
/// `renderer` must be NULL or a live pointer from `xian_render_core_create`, not used
/// concurrently.
///
/// ### 中文
/// 借用 C 指针背后的渲染器。
///
/// # Safety
/// `renderer` 必须为 NULL 或来自 `xian_render_core_create` 的有效指针，且未被并发使用。
unsafe fn renderer_mut<'a>(renderer: *mut XianRenderer) -> Option<&'a mut Renderer> {
    unsafe { renderer.as_mut() }.map(|handle| &mut handle.renderer)
}

/// ### English
/// Converts a NUL-terminated UTF-8 C string into `&str`.
///
/// Returns `None` for NULL pointers and invalid UTF-8.
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string valid for the call.
///
/// ### 中文
/// 将 NUL 结尾的 UTF-8 C 字符串转换为 `&str`。
///
/// 对 NULL 指针与非法 UTF-8 返回 `None`。
///
/// # Safety
/// `ptr` 必须为 NULL，或指向在本次调用期间有效的 NUL 结尾字符串。
unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}
