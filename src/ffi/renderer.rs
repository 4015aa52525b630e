//! ### English
//! C ABI bindings for renderer lifecycle (create/destroy).
//!
//! ### 中文
//! 渲染器生命周期相关的 C ABI 绑定（create/destroy）。

use std::sync::Arc;

use super::{XianRenderConfig, XianRenderer};
use crate::engine::config::RendererConfig;
use crate::engine::context::{ContextPlatform, HeadlessPlatform, SurfmanPlatform};
use crate::engine::error::Result;
use crate::engine::flags;
use crate::engine::frame::Renderer;
use crate::engine::output::Output;

fn create(config: &XianRenderConfig) -> Result<Renderer> {
    let platform: Arc<dyn ContextPlatform> = if config.flags & flags::XIAN_RENDER_FLAG_HEADLESS != 0
    {
        HeadlessPlatform::new()
    } else {
        SurfmanPlatform::new()?
    };
    Renderer::new(RendererConfig::from(config), platform, Output::offscreen())
}

#[unsafe(no_mangle)]
/// ### English
/// Creates a renderer: the context pool, render workers and streaming buffers.
///
/// `config` may be NULL for all defaults. Returns NULL if no usable GL 4.5 context could be
/// created.
///
/// ### 中文
/// 创建渲染器：上下文池、渲染工作线程与流式缓冲区。
///
/// `config` 可为 NULL，表示全部使用默认值。无法创建可用的 GL 4.5 上下文时返回 NULL。
pub unsafe extern "C" fn xian_render_core_create(
    config: *const XianRenderConfig,
) -> *mut XianRenderer {
    let config = unsafe { config.as_ref() }.copied().unwrap_or_default();
    match super::report("xian_render_core_create", create(&config)) {
        Some(renderer) => Box::into_raw(Box::new(XianRenderer { renderer })),
        None => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Destroys a renderer created by `xian_render_core_create`, deleting every GPU object it owns.
///
/// ### 中文
/// 销毁由 `xian_render_core_create` 创建的渲染器，并删除其持有的全部 GPU 对象。
pub unsafe extern "C" fn xian_render_core_destroy(renderer: *mut XianRenderer) {
    if renderer.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(renderer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_renderer_round_trips_through_the_abi() {
        let config = XianRenderConfig {
            flags: flags::XIAN_RENDER_FLAG_HEADLESS,
            ..XianRenderConfig::default()
        };
        let renderer = unsafe { xian_render_core_create(&config) };
        assert!(!renderer.is_null());
        unsafe { xian_render_core_destroy(renderer) };
        unsafe { xian_render_core_destroy(std::ptr::null_mut()) };
    }
}
