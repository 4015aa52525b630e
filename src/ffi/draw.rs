//! ### English
//! C ABI bindings for draws, instances and streamed geometry.
//!
//! ### 中文
//! 绘制、实例与流式几何相关的 C ABI 绑定。

use glam::Mat4;

use super::{XianDrawHandle, XianInstanceHandle, XianRenderer};
use crate::engine::batch::{DrawDescriptor, InstanceData, MaterialId, VertexRange};
use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::PrimitiveType;
use crate::engine::vertex_format::{AttributeType, VertexAttribute, VertexFormat};

/// ### English
/// One vertex attribute. `ty` is 0..=7 for F32, F16, I8, U8, I16, U16, I32, U32.
///
/// ### 中文
/// 单个顶点属性。`ty` 取 0..=7，依次对应 F32、F16、I8、U8、I16、U16、I32、U32。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct XianVertexAttribute {
    pub ty: u32,
    pub components: u32,
    pub normalized: bool,
    pub offset: u32,
}

/// ### English
/// Non-indexed draw description. `primitive` is 0..=5 for points, lines, line strip, triangles,
/// triangle strip, triangle fan. `stride` 0 uses the packed stride.
///
/// ### 中文
/// 非索引绘制描述。`primitive` 取 0..=5，依次为点、线、线带、三角形、三角形带、三角形扇。
/// `stride` 为 0 表示使用紧凑步长。
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct XianDrawDesc {
    pub attributes: *const XianVertexAttribute,
    pub attribute_count: u32,
    pub stride: u32,
    pub primitive: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
}

fn attribute_type(raw: u32) -> Result<AttributeType> {
    Ok(match raw {
        0 => AttributeType::F32,
        1 => AttributeType::F16,
        2 => AttributeType::I8,
        3 => AttributeType::U8,
        4 => AttributeType::I16,
        5 => AttributeType::U16,
        6 => AttributeType::I32,
        7 => AttributeType::U32,
        other => {
            return Err(RenderError::InvalidVertexFormat(format!(
                "attribute type {other}"
            )));
        }
    })
}

fn primitive(raw: u32) -> Result<PrimitiveType> {
    Ok(match raw {
        0 => PrimitiveType::Points,
        1 => PrimitiveType::Lines,
        2 => PrimitiveType::LineStrip,
        3 => PrimitiveType::Triangles,
        4 => PrimitiveType::TriangleStrip,
        5 => PrimitiveType::TriangleFan,
        _ => return Err(RenderError::Unsupported("primitive type")),
    })
}

/// ### English
/// Converts a C draw description.
///
/// # Safety
/// `desc.attributes` must point to `desc.attribute_count` attributes (or be NULL with a zero
/// count).
///
/// ### 中文
/// 转换 C 侧的绘制描述。
///
/// # Safety
/// `desc.attributes` 必须指向 `desc.attribute_count` 个属性（或在数量为 0 时为 NULL）。
unsafe fn descriptor(desc: &XianDrawDesc) -> Result<DrawDescriptor> {
    let raw = if desc.attribute_count == 0 {
        &[][..]
    } else if desc.attributes.is_null() {
        return Err(RenderError::InvalidVertexFormat("NULL attribute array".to_owned()));
    } else {
        unsafe { std::slice::from_raw_parts(desc.attributes, desc.attribute_count as usize) }
    };
    let attributes = raw
        .iter()
        .map(|attr| {
            Ok(VertexAttribute::new(
                attribute_type(attr.ty)?,
                u8::try_from(attr.components).unwrap_or(u8::MAX),
                attr.normalized,
                attr.offset,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DrawDescriptor {
        format: VertexFormat::new(attributes)?,
        stride: desc.stride,
        primitive: primitive(desc.primitive)?,
        vertices: VertexRange {
            first: desc.first_vertex,
            count: desc.vertex_count,
        },
        elements: None,
    })
}

#[unsafe(no_mangle)]
/// ### English
/// Submits a draw to `material`. Writes the handle to `out_draw` and returns `true` on success.
///
/// ### 中文
/// 向 `material` 提交一个绘制。成功时将句柄写入 `out_draw` 并返回 `true`。
pub unsafe extern "C" fn xian_render_core_submit_draw(
    renderer: *mut XianRenderer,
    material: u32,
    desc: *const XianDrawDesc,
    out_draw: *mut XianDrawHandle,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    let (Some(desc), false) = (unsafe { desc.as_ref() }, out_draw.is_null()) else {
        return false;
    };
    let result = unsafe { descriptor(desc) }
        .and_then(|desc| renderer.submit_draw(MaterialId(material), desc));
    match super::report("xian_render_core_submit_draw", result) {
        Some(handle) => {
            unsafe { out_draw.write(handle.into()) };
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Removes a draw and all its instances.
///
/// ### 中文
/// 移除一个绘制及其全部实例。
pub unsafe extern "C" fn xian_render_core_remove_draw(
    renderer: *mut XianRenderer,
    draw: XianDrawHandle,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    super::report("xian_render_core_remove_draw", renderer.remove_draw(draw.into())).is_some()
}

#[unsafe(no_mangle)]
/// ### English
/// Adds an instance to a draw. Writes the handle to `out_instance`.
///
/// ### 中文
/// 为绘制添加一个实例，并将句柄写入 `out_instance`。
pub unsafe extern "C" fn xian_render_core_add_instance(
    renderer: *mut XianRenderer,
    draw: XianDrawHandle,
    data: InstanceData,
    out_instance: *mut XianInstanceHandle,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    if out_instance.is_null() {
        return false;
    }
    match super::report(
        "xian_render_core_add_instance",
        renderer.add_instance(draw.into(), data),
    ) {
        Some(handle) => {
            unsafe { out_instance.write(handle.into()) };
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_render_core_update_instance(
    renderer: *mut XianRenderer,
    instance: XianInstanceHandle,
    data: InstanceData,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    super::report(
        "xian_render_core_update_instance",
        renderer.update_instance(instance.into(), data),
    )
    .is_some()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn xian_render_core_remove_instance(
    renderer: *mut XianRenderer,
    instance: XianInstanceHandle,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    super::report(
        "xian_render_core_remove_instance",
        renderer.remove_instance(instance.into()),
    )
    .is_some()
}

#[unsafe(no_mangle)]
/// ### English
/// Streams `len` bytes of vertices into the current frame and writes the resulting first vertex
/// and count.
///
/// ### 中文
/// 把 `len` 字节的顶点流式写入当前帧，并写出得到的首顶点与数量。
pub unsafe extern "C" fn xian_render_core_stream_vertices(
    renderer: *mut XianRenderer,
    stride: u32,
    data: *const u8,
    len: usize,
    out_first: *mut u32,
    out_count: *mut u32,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    if data.is_null() || out_first.is_null() || out_count.is_null() {
        return false;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    match super::report(
        "xian_render_core_stream_vertices",
        renderer.stream_vertices(stride, bytes),
    ) {
        Some(range) => {
            unsafe {
                out_first.write(range.first);
                out_count.write(range.count);
            }
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Points `draw` at `count` vertices from `first`, as returned by
/// `xian_render_core_stream_vertices` in the current frame. Required every frame the draw has
/// instances; otherwise `xian_render_core_render_frame` fails.
///
/// ### 中文
/// 让 `draw` 指向从 `first` 起的 `count` 个顶点（即当前帧 `xian_render_core_stream_vertices`
/// 的输出）。绘制有实例的每一帧都必须调用，否则 `xian_render_core_render_frame` 会失败。
pub unsafe extern "C" fn xian_render_core_set_draw_geometry(
    renderer: *mut XianRenderer,
    draw: XianDrawHandle,
    first: u32,
    count: u32,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    super::report(
        "xian_render_core_set_draw_geometry",
        renderer.set_draw_geometry(draw.into(), VertexRange { first, count }),
    )
    .is_some()
}

#[unsafe(no_mangle)]
/// ### English
/// Replaces the per-frame transform array with `count` column-major 4x4 matrices.
///
/// ### 中文
/// 用 `count` 个列主序 4x4 矩阵替换每帧的变换数组。
pub unsafe extern "C" fn xian_render_core_set_transforms(
    renderer: *mut XianRenderer,
    matrices: *const f32,
    count: usize,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    if count == 0 {
        renderer.set_transforms(&[]);
        return true;
    }
    if matrices.is_null() {
        return false;
    }
    let floats = unsafe { std::slice::from_raw_parts(matrices, count * 16) };
    let transforms: Vec<Mat4> = floats
        .chunks_exact(16)
        .map(|chunk| {
            let mut columns = [0.0; 16];
            columns.copy_from_slice(chunk);
            Mat4::from_cols_array(&columns)
        })
        .collect();
    renderer.set_transforms(&transforms);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflowing_attribute_offsets_are_rejected_not_wrapped() {
        let attribute = XianVertexAttribute {
            ty: 0,
            components: 4,
            normalized: false,
            offset: u32::MAX - 4,
        };
        let desc = XianDrawDesc {
            attributes: &attribute,
            attribute_count: 1,
            stride: 16,
            primitive: 3,
            first_vertex: 0,
            vertex_count: 3,
        };
        assert!(matches!(
            unsafe { descriptor(&desc) },
            Err(RenderError::InvalidVertexFormat(_))
        ));
    }
}
