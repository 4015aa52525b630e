use super::{XianFrameTextures, XianRenderer};

#[unsafe(no_mangle)]
/// ### English
/// Records, renders and submits one frame, writing its final textures to `out_textures`.
///
/// Returns `false` if the frame failed; the error is logged and the frame counter still
/// advances.
///
/// ### 中文
/// 录制、渲染并提交一帧，并把最终纹理写入 `out_textures`。
///
/// 帧失败时返回 `false`；错误会被记录，帧计数器仍会推进。
pub unsafe extern "C" fn xian_render_core_render_frame(
    renderer: *mut XianRenderer,
    out_textures: *mut XianFrameTextures,
) -> bool {
    let Some(renderer) = (unsafe { super::renderer_mut(renderer) }) else {
        return false;
    };
    if out_textures.is_null() {
        return false;
    }
    match super::report("xian_render_core_render_frame", renderer.render_frame()) {
        Some(textures) => {
            unsafe { out_textures.write(textures.into()) };
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
/// ### English
/// Frame number the next `xian_render_core_render_frame` records.
///
/// ### 中文
/// 下一次 `xian_render_core_render_frame` 录制的帧号。
pub unsafe extern "C" fn xian_render_core_frame_index(renderer: *mut XianRenderer) -> u64 {
    unsafe { super::renderer_mut(renderer) }.map_or(0, |renderer| renderer.frame())
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;
    use crate::engine::batch::InstanceData;
    use crate::engine::flags;
    use crate::ffi::draw::{
        XianDrawDesc, XianVertexAttribute, xian_render_core_add_instance,
        xian_render_core_set_draw_geometry, xian_render_core_stream_vertices,
        xian_render_core_submit_draw,
    };
    use crate::ffi::material::xian_render_core_register_material;
    use crate::ffi::renderer::{xian_render_core_create, xian_render_core_destroy};
    use crate::ffi::{XianDrawHandle, XianInstanceHandle, XianRenderConfig};

    #[test]
    fn one_headless_frame_through_the_abi() {
        let config = XianRenderConfig {
            flags: flags::XIAN_RENDER_FLAG_HEADLESS | flags::XIAN_RENDER_FLAG_STEREO,
            ..XianRenderConfig::default()
        };
        let renderer = unsafe { xian_render_core_create(&config) };
        assert!(!renderer.is_null());

        let name = CString::new("M").unwrap();
        let source = CString::new("#version 450\nvoid main() {}").unwrap();
        let material = unsafe {
            xian_render_core_register_material(
                renderer,
                name.as_ptr(),
                source.as_ptr(),
                source.as_ptr(),
                0,
            )
        };
        assert_eq!(material, 0);

        let vertices = [0u8; 36];
        let (mut first, mut count) = (u32::MAX, 0);
        assert!(unsafe {
            xian_render_core_stream_vertices(
                renderer,
                12,
                vertices.as_ptr(),
                vertices.len(),
                &mut first,
                &mut count,
            )
        });
        assert_eq!((first, count), (0, 3));

        let attribute = XianVertexAttribute {
            ty: 0,
            components: 3,
            normalized: false,
            offset: 0,
        };
        let desc = XianDrawDesc {
            attributes: &attribute,
            attribute_count: 1,
            stride: 0,
            primitive: 3,
            first_vertex: first,
            vertex_count: count,
        };
        let mut draw = XianDrawHandle::default();
        assert!(unsafe { xian_render_core_submit_draw(renderer, material, &desc, &mut draw) });
        let mut instance = XianInstanceHandle::default();
        assert!(unsafe {
            xian_render_core_add_instance(renderer, draw, InstanceData::new(0, 0, 0), &mut instance)
        });

        let mut textures = XianFrameTextures::default();
        assert!(unsafe { xian_render_core_render_frame(renderer, &mut textures) });
        assert_eq!(textures.frame, 0);
        assert_ne!(textures.left_texture, 0);
        assert_ne!(textures.right_texture, 0);
        assert_eq!(unsafe { xian_render_core_frame_index(renderer) }, 1);

        // The frame-0 vertices are gone once the ring moves on.
        assert!(!unsafe { xian_render_core_render_frame(renderer, &mut textures) });
        assert!(unsafe {
            xian_render_core_stream_vertices(
                renderer,
                12,
                vertices.as_ptr(),
                vertices.len(),
                &mut first,
                &mut count,
            )
        });
        assert!(unsafe { xian_render_core_set_draw_geometry(renderer, draw, first, count) });
        assert!(unsafe { xian_render_core_render_frame(renderer, &mut textures) });
        assert_eq!(textures.frame, 2);

        unsafe { xian_render_core_destroy(renderer) };
    }
}
