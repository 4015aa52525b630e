//! ### English
//! OpenGL 4.5 implementation of [`GpuDevice`] on top of `glow`.
//!
//! ### 中文
//! 基于 `glow` 的 OpenGL 4.5 [`GpuDevice`] 实现。

use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::sync::Arc;

use dpi::PhysicalSize;
use glow::HasContext as _;

use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{
    BufferId, BufferTarget, FramebufferId, GpuDevice, INDIRECT_COMMAND_SIZE, MappedBuffer,
    PrimitiveType, ProgramId, ShaderId, ShaderStage, TextureDesc, TextureFormat, TextureId,
    TextureRegion, VertexArrayId,
};
use crate::engine::pass::{BlendMode, ClearValues, CompareFunc, CullMode, FixedFunctionState};
use crate::engine::target::RenderTargetDesc;
use crate::engine::vertex_format::{AttributeType, VertexFormat};

/// ### English
/// Minimum desktop GL version: persistent mapping (4.4) plus multi-draw-indirect and
/// separate vertex formats (4.3).
///
/// ### 中文
/// 最低桌面 GL 版本：持久映射（4.4）以及 multi-draw-indirect 与分离顶点格式（4.3）。
const MIN_GL_VERSION: (u32, u32) = (4, 4);

fn parse_gl_version(version: &str) -> (u32, u32) {
    let number = version
        .split_whitespace()
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()));
    let Some(number) = number else {
        return (0, 0);
    };
    let mut parts = number.split('.').map(|part| part.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

/// ### English
/// glow-backed device for one context. GL calls are only issued while that context is current.
///
/// ### 中文
/// 基于 glow 的单上下文设备。仅在该上下文为 current 时发出 GL 调用。
pub struct GlowDevice {
    gl: Arc<glow::Context>,
}

// SAFETY: the context pool guarantees a device is only used by the thread holding its context.
unsafe impl Send for GlowDevice {}
unsafe impl Sync for GlowDevice {}

impl GlowDevice {
    /// ### English
    /// Wraps a loaded glow context and checks the GL version.
    ///
    /// ### 中文
    /// 封装已加载的 glow 上下文并检查 GL 版本。
    pub fn new(gl: glow::Context) -> Result<Self> {
        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        if version.starts_with("OpenGL ES") {
            return Err(RenderError::ContextInit(format!(
                "desktop OpenGL required, got `{version}`"
            )));
        }
        let parsed = parse_gl_version(&version);
        if parsed < MIN_GL_VERSION {
            return Err(RenderError::ContextInit(format!(
                "OpenGL {}.{} or newer required, got `{version}`",
                MIN_GL_VERSION.0, MIN_GL_VERSION.1
            )));
        }
        log::debug!("glow device on OpenGL {version}");
        Ok(Self { gl: Arc::new(gl) })
    }
}

fn buffer(id: BufferId) -> Option<glow::NativeBuffer> {
    NonZeroU32::new(id.0).map(glow::NativeBuffer)
}

fn texture(id: TextureId) -> Option<glow::NativeTexture> {
    NonZeroU32::new(id.0).map(glow::NativeTexture)
}

fn target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
        BufferTarget::DrawIndirect => glow::DRAW_INDIRECT_BUFFER,
        BufferTarget::ShaderStorage => glow::SHADER_STORAGE_BUFFER,
        BufferTarget::Uniform => glow::UNIFORM_BUFFER,
        BufferTarget::PixelUnpack => glow::PIXEL_UNPACK_BUFFER,
    }
}

fn primitive(primitive: PrimitiveType) -> u32 {
    match primitive {
        PrimitiveType::Points => glow::POINTS,
        PrimitiveType::Lines => glow::LINES,
        PrimitiveType::LineStrip => glow::LINE_STRIP,
        PrimitiveType::Triangles => glow::TRIANGLES,
        PrimitiveType::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveType::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn attribute_type(ty: AttributeType) -> u32 {
    match ty {
        AttributeType::F32 => glow::FLOAT,
        AttributeType::F16 => glow::HALF_FLOAT,
        AttributeType::I8 => glow::BYTE,
        AttributeType::U8 => glow::UNSIGNED_BYTE,
        AttributeType::I16 => glow::SHORT,
        AttributeType::U16 => glow::UNSIGNED_SHORT,
        AttributeType::I32 => glow::INT,
        AttributeType::U32 => glow::UNSIGNED_INT,
    }
}

fn compare(func: CompareFunc) -> u32 {
    match func {
        CompareFunc::Never => glow::NEVER,
        CompareFunc::Less => glow::LESS,
        CompareFunc::Equal => glow::EQUAL,
        CompareFunc::LessEqual => glow::LEQUAL,
        CompareFunc::Greater => glow::GREATER,
        CompareFunc::NotEqual => glow::NOTEQUAL,
        CompareFunc::GreaterEqual => glow::GEQUAL,
        CompareFunc::Always => glow::ALWAYS,
    }
}

fn internal_format(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgba8 => glow::RGBA8,
        TextureFormat::Srgb8Alpha8 => glow::SRGB8_ALPHA8,
        TextureFormat::Rgba16F => glow::RGBA16F,
        TextureFormat::Depth24Stencil8 => glow::DEPTH24_STENCIL8,
    }
}

/// ### English
/// `(format, type)` pair for pixel transfers into a texture of `format`.
///
/// ### 中文
/// 向 `format` 纹理传输像素时使用的 `(format, type)` 组合。
fn transfer_format(format: TextureFormat) -> (u32, u32) {
    match format {
        TextureFormat::Rgba8 | TextureFormat::Srgb8Alpha8 => (glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16F => (glow::RGBA, glow::HALF_FLOAT),
        TextureFormat::Depth24Stencil8 => (glow::DEPTH_STENCIL, glow::UNSIGNED_INT_24_8),
    }
}

impl GpuDevice for GlowDevice {
    fn create_mapped_buffer(&self, target_kind: BufferTarget, size: usize) -> Result<MappedBuffer> {
        let gl = &self.gl;
        let gl_target = target(target_kind);
        let size_i32 = i32::try_from(size)
            .map_err(|_| RenderError::GpuObject(format!("buffer of {size} bytes is too large")))?;
        let flags = glow::MAP_WRITE_BIT | glow::MAP_PERSISTENT_BIT | glow::MAP_COHERENT_BIT;
        unsafe {
            let native = gl.create_buffer().map_err(RenderError::GpuObject)?;
            gl.bind_buffer(gl_target, Some(native));
            gl.buffer_storage(gl_target, size_i32, None, flags);
            let ptr = gl.map_buffer_range(gl_target, 0, size_i32, flags);
            gl.bind_buffer(gl_target, None);
            let Some(ptr) = NonNull::new(ptr) else {
                gl.delete_buffer(native);
                return Err(RenderError::GpuObject(format!(
                    "persistent mapping of {size} bytes failed for {target_kind:?}"
                )));
            };
            Ok(MappedBuffer::from_raw(BufferId(native.0.get()), ptr, size))
        }
    }

    fn delete_buffer(&self, id: BufferId) {
        if let Some(native) = buffer(id) {
            unsafe { self.gl.delete_buffer(native) };
        }
    }

    fn create_vertex_array(&self, format: &VertexFormat) -> Result<VertexArrayId> {
        let gl = &self.gl;
        unsafe {
            let vao = gl.create_vertex_array().map_err(RenderError::GpuObject)?;
            gl.bind_vertex_array(Some(vao));
            for (index, attribute) in format.attributes().iter().enumerate() {
                let index = index as u32;
                let ty = attribute_type(attribute.ty);
                let size = i32::from(attribute.components);
                gl.enable_vertex_attrib_array(index);
                if attribute.ty.is_float() || attribute.normalized {
                    gl.vertex_attrib_format_f32(index, size, ty, attribute.normalized, attribute.offset);
                } else {
                    gl.vertex_attrib_format_i32(index, size, ty, attribute.offset);
                }
                gl.vertex_attrib_binding(index, 0);
            }
            gl.bind_vertex_array(None);
            Ok(VertexArrayId(vao.0.get()))
        }
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        if let Some(id) = NonZeroU32::new(vertex_array.0) {
            unsafe { self.gl.delete_vertex_array(glow::NativeVertexArray(id)) };
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        let gl = &self.gl;
        unsafe {
            let native = gl.create_texture().map_err(RenderError::GpuObject)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(native));
            gl.tex_storage_2d(
                glow::TEXTURE_2D,
                1,
                internal_format(desc.format),
                desc.size.width.max(1) as i32,
                desc.size.height.max(1) as i32,
            );
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.bind_texture(glow::TEXTURE_2D, None);
            Ok(TextureId(native.0.get()))
        }
    }

    fn delete_texture(&self, id: TextureId) {
        if let Some(native) = texture(id) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn create_framebuffer(&self, desc: &RenderTargetDesc) -> Result<FramebufferId> {
        let gl = &self.gl;
        unsafe {
            let fbo = gl.create_framebuffer().map_err(RenderError::GpuObject)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            let mut draw_buffers = Vec::with_capacity(desc.colors.len());
            for (index, color) in desc.colors.iter().enumerate() {
                let attachment = glow::COLOR_ATTACHMENT0 + index as u32;
                gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    attachment,
                    glow::TEXTURE_2D,
                    texture(*color),
                    0,
                );
                draw_buffers.push(attachment);
            }
            if let Some(depth) = desc.depth_stencil {
                gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    glow::DEPTH_STENCIL_ATTACHMENT,
                    glow::TEXTURE_2D,
                    texture(depth),
                    0,
                );
            }
            gl.draw_buffers(&draw_buffers);
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                return Err(RenderError::IncompleteFramebuffer { status });
            }
            Ok(FramebufferId(fbo.0.get()))
        }
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        if let Some(id) = NonZeroU32::new(framebuffer.0) {
            unsafe { self.gl.delete_framebuffer(glow::NativeFramebuffer(id)) };
        }
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        let gl = &self.gl;
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        unsafe {
            let shader = gl.create_shader(kind).map_err(RenderError::GpuObject)?;
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                return Err(RenderError::ShaderCompile {
                    stage: stage.label(),
                    log,
                });
            }
            Ok(ShaderId(shader.0.get()))
        }
    }

    fn delete_shader(&self, shader: ShaderId) {
        if let Some(id) = NonZeroU32::new(shader.0) {
            unsafe { self.gl.delete_shader(glow::NativeShader(id)) };
        }
    }

    fn link_program(&self, label: &str, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId> {
        let gl = &self.gl;
        let (Some(vs), Some(fs)) = (NonZeroU32::new(vertex.0), NonZeroU32::new(fragment.0)) else {
            return Err(RenderError::ProgramLink {
                material: label.to_owned(),
                log: "missing shader stage".to_owned(),
            });
        };
        let (vs, fs) = (glow::NativeShader(vs), glow::NativeShader(fs));
        unsafe {
            let program = gl.create_program().map_err(RenderError::GpuObject)?;
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.link_program(program);
            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(RenderError::ProgramLink {
                    material: label.to_owned(),
                    log,
                });
            }
            Ok(ProgramId(program.0.get()))
        }
    }

    fn delete_program(&self, program: ProgramId) {
        if let Some(id) = NonZeroU32::new(program.0) {
            unsafe { self.gl.delete_program(glow::NativeProgram(id)) };
        }
    }

    fn bind_framebuffer(&self, framebuffer: FramebufferId) {
        let fbo = NonZeroU32::new(framebuffer.0).map(glow::NativeFramebuffer);
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, fbo) };
    }

    fn bind_input_textures(&self, textures: &[TextureId]) {
        let gl = &self.gl;
        for (unit, id) in textures.iter().enumerate() {
            unsafe {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                gl.bind_texture(glow::TEXTURE_2D, texture(*id));
            }
        }
        unsafe { gl.active_texture(glow::TEXTURE0) };
    }

    fn apply_state(&self, state: &FixedFunctionState, viewport: PhysicalSize<u32>) {
        let gl = &self.gl;
        unsafe {
            gl.viewport(0, 0, viewport.width as i32, viewport.height as i32);
            gl.color_mask(state.color_write, state.color_write, state.color_write, state.color_write);
            gl.depth_mask(state.depth_write);

            match state.depth_test {
                Some(func) => {
                    gl.enable(glow::DEPTH_TEST);
                    gl.depth_func(compare(func));
                }
                None => gl.disable(glow::DEPTH_TEST),
            }

            match state.cull {
                CullMode::None => gl.disable(glow::CULL_FACE),
                CullMode::Front | CullMode::Back => {
                    gl.enable(glow::CULL_FACE);
                    gl.cull_face(if state.cull == CullMode::Front {
                        glow::FRONT
                    } else {
                        glow::BACK
                    });
                }
            }

            match state.blend {
                BlendMode::Opaque => gl.disable(glow::BLEND),
                BlendMode::Alpha => {
                    gl.enable(glow::BLEND);
                    gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
                }
                BlendMode::Premultiplied => {
                    gl.enable(glow::BLEND);
                    gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);
                }
                BlendMode::Additive => {
                    gl.enable(glow::BLEND);
                    gl.blend_func(glow::ONE, glow::ONE);
                }
            }

            match state.stencil {
                Some(stencil) => {
                    gl.enable(glow::STENCIL_TEST);
                    gl.stencil_func(compare(stencil.func), stencil.reference, stencil.mask);
                    gl.stencil_mask(stencil.write_mask);
                }
                None => {
                    gl.disable(glow::STENCIL_TEST);
                    gl.stencil_mask(0);
                }
            }

            if state.srgb {
                gl.enable(glow::FRAMEBUFFER_SRGB);
            } else {
                gl.disable(glow::FRAMEBUFFER_SRGB);
            }
        }
    }

    fn clear(&self, clear: &ClearValues) {
        let gl = &self.gl;
        let mut mask = 0;
        unsafe {
            if let Some([r, g, b, a]) = clear.color {
                gl.clear_color(r, g, b, a);
                gl.color_mask(true, true, true, true);
                mask |= glow::COLOR_BUFFER_BIT;
            }
            if let Some(depth) = clear.depth {
                gl.clear_depth_f32(depth);
                gl.depth_mask(true);
                mask |= glow::DEPTH_BUFFER_BIT;
            }
            if let Some(stencil) = clear.stencil {
                gl.clear_stencil(stencil);
                gl.stencil_mask(!0);
                mask |= glow::STENCIL_BUFFER_BIT;
            }
            if mask != 0 {
                gl.clear(mask);
            }
        }
    }

    fn use_program(&self, program: ProgramId) {
        let native = NonZeroU32::new(program.0).map(glow::NativeProgram);
        unsafe { self.gl.use_program(native) };
    }

    fn bind_vertex_array(&self, vertex_array: VertexArrayId) {
        let native = NonZeroU32::new(vertex_array.0).map(glow::NativeVertexArray);
        unsafe { self.gl.bind_vertex_array(native) };
    }

    fn bind_vertex_buffer(&self, id: BufferId, offset: usize, stride: u32) {
        unsafe {
            self.gl
                .bind_vertex_buffer(0, buffer(id), offset as i32, stride as i32)
        };
    }

    fn bind_buffer_range(
        &self,
        target_kind: BufferTarget,
        index: u32,
        id: BufferId,
        offset: usize,
        size: usize,
    ) {
        unsafe {
            self.gl.bind_buffer_range(
                target(target_kind),
                index,
                buffer(id),
                offset as i32,
                size as i32,
            )
        };
    }

    fn bind_indirect_buffer(&self, id: BufferId) {
        unsafe { self.gl.bind_buffer(glow::DRAW_INDIRECT_BUFFER, buffer(id)) };
    }

    fn multi_draw_arrays_indirect(
        &self,
        primitive_type: PrimitiveType,
        offset: usize,
        draw_count: u32,
        stride: u32,
    ) {
        // glow exposes only the single-command entry point; one batch is still one call here.
        let mode = primitive(primitive_type);
        for command in indirect_offsets(offset, draw_count, stride) {
            unsafe { self.gl.draw_arrays_indirect_offset(mode, command) };
        }
    }

    fn upload_texture_from_buffer(
        &self,
        id: TextureId,
        format: TextureFormat,
        region: TextureRegion,
        staging: BufferId,
        offset: usize,
    ) {
        let gl = &self.gl;
        let (pixel_format, pixel_type) = transfer_format(format);
        unsafe {
            gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, buffer(staging));
            gl.bind_texture(glow::TEXTURE_2D, texture(id));
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                region.x as i32,
                region.y as i32,
                region.width as i32,
                region.height as i32,
                pixel_format,
                pixel_type,
                glow::PixelUnpackData::BufferOffset(offset as u32),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
        }
    }

    fn flush(&self) {
        unsafe { self.gl.flush() };
    }
}

/// ### English
/// Byte offsets of `draw_count` indirect commands starting at `offset`. A `stride` of 0 means
/// tightly packed, as in `glMultiDrawArraysIndirect`.
///
/// ### 中文
/// 从 `offset` 起 `draw_count` 条间接命令的字节偏移。`stride` 为 0 表示紧密排列，
/// 与 `glMultiDrawArraysIndirect` 一致。
fn indirect_offsets(offset: usize, draw_count: u32, stride: u32) -> impl Iterator<Item = i32> {
    let stride = if stride == 0 {
        INDIRECT_COMMAND_SIZE
    } else {
        stride as usize
    };
    (0..draw_count as usize).map(move |index| (offset + index * stride) as i32)
}
