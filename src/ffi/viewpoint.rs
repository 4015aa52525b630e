use glam::Mat4;

use super::XianRenderer;
use crate::engine::viewpoint::ViewpointId;

/// ### English
/// Reads a column-major 4x4 matrix.
///
/// # Safety
/// `ptr` must point to 16 readable `f32`.
///
/// ### 中文
/// 读取列主序 4x4 矩阵。
///
/// # Safety
/// `ptr` 必须指向 16 个可读的 `f32`。
unsafe fn matrix(ptr: *const f32) -> Option<Mat4> {
    if ptr.is_null() {
        return None;
    }
    let columns = unsafe { std::ptr::read_unaligned(ptr.cast::<[f32; 16]>()) };
    Some(Mat4::from_cols_array(&columns))
}

#[unsafe(no_mangle)]
/// ### English
/// Sets the view matrix of viewpoint `0` (left) or `1` (right).
///
/// ### 中文
/// 设置视点 `0`（左）或 `1`（右）的视图矩阵。
pub unsafe extern "C" fn xian_render_core_set_viewpoint_transform(
    renderer: *mut XianRenderer,
    viewpoint: u32,
    view: *const f32,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    let (Some(id), Some(view)) = (ViewpointId::from_index(viewpoint as usize), unsafe {
        matrix(view)
    }) else {
        return false;
    };
    renderer.set_viewpoint_transform(id, view);
    true
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_render_core_set_viewpoint_projection(
    renderer: *mut XianRenderer,
    viewpoint: u32,
    projection: *const f32,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    let (Some(id), Some(projection)) = (ViewpointId::from_index(viewpoint as usize), unsafe {
        matrix(projection)
    }) else {
        return false;
    };
    renderer.set_viewpoint_projection(id, projection);
    true
}

#[unsafe(no_mangle)]
/// ### English
/// Resizes a viewpoint. Zero dimensions fall back to the configured default viewport.
///
/// ### 中文
/// 调整视点尺寸。宽或高为 0 时使用配置中的默认视口。
pub unsafe extern "C" fn xian_render_core_set_viewpoint_viewport(
    renderer: *mut XianRenderer,
    viewpoint: u32,
    width: u32,
    height: u32,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    let Some(id) = ViewpointId::from_index(viewpoint as usize) else {
        return false;
    };
    renderer.set_viewpoint_viewport(id, width, height);
    true
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_render_core_set_viewpoint_enabled(
    renderer: *mut XianRenderer,
    viewpoint: u32,
    enabled: bool,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    let Some(id) = ViewpointId::from_index(viewpoint as usize) else {
        return false;
    };
    renderer.set_viewpoint_enabled(id, enabled);
    true
}
