use std::ffi::c_char;

use super::XianRenderer;
use crate::engine::batch::MaterialId;
use crate::engine::pass::PassId;

/// ### English
/// Returned by material calls on failure.
///
/// ### 中文
/// 材质相关调用失败时的返回值。
pub const XIAN_RENDER_INVALID_MATERIAL: u32 = u32::MAX;

#[unsafe(no_mangle)]
/// ### English
/// Compiles, links and registers a material.
///
/// Returns the material id, or `XIAN_RENDER_INVALID_MATERIAL` on failure (duplicate name,
/// unknown pass, compile or link error).
///
/// ### 中文
/// 编译、链接并注册一个材质。
///
/// 返回材质 id；失败时（重名、未知 pass、编译或链接错误）返回 `XIAN_RENDER_INVALID_MATERIAL`。
pub unsafe extern "C" fn xian_render_core_register_material(
    renderer: *mut XianRenderer,
    name: *const c_char,
    vertex_source: *const c_char,
    fragment_source: *const c_char,
    pass: u32,
) -> u32 {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return XIAN_RENDER_INVALID_MATERIAL;
    };
    let (Some(name), Some(vertex), Some(fragment)) = (unsafe {
        (
            super::cstr(name),
            super::cstr(vertex_source),
            super::cstr(fragment_source),
        )
    }) else {
        return XIAN_RENDER_INVALID_MATERIAL;
    };
    super::report(
        "xian_render_core_register_material",
        renderer.register_material(name, vertex, fragment, PassId(pass)),
    )
    .map_or(XIAN_RENDER_INVALID_MATERIAL, |id| id.0)
}

#[unsafe(no_mangle)]
/// ### English
/// Looks up a material id by name.
///
/// ### 中文
/// 按名称查找材质 id。
pub unsafe extern "C" fn xian_render_core_material_id(
    renderer: *mut XianRenderer,
    name: *const c_char,
) -> u32 {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return XIAN_RENDER_INVALID_MATERIAL;
    };
    let Some(name) = (unsafe { super::cstr(name) }) else {
        return XIAN_RENDER_INVALID_MATERIAL;
    };
    renderer
        .material(name)
        .map_or(XIAN_RENDER_INVALID_MATERIAL, |id| id.0)
}

#[unsafe(no_mangle)]
/// ### English
/// Replaces a material's uniform block bytes (`len` may be 0 to clear them).
///
/// ### 中文
/// 替换材质的 uniform block 字节（`len` 为 0 时清空）。
pub unsafe extern "C" fn xian_render_core_set_material_uniforms(
    renderer: *mut XianRenderer,
    material: u32,
    data: *const u8,
    len: usize,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    let bytes = if len == 0 {
        &[][..]
    } else if data.is_null() {
        return false;
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    super::report(
        "xian_render_core_set_material_uniforms",
        renderer.set_material_uniforms(MaterialId(material), bytes),
    )
    .is_some()
}
