//! ### English
//! GPU device seam.
//!
//! The core never calls GL directly; it talks to a `GpuDevice` bound to one pooled context.
//! `GlowDevice` issues real OpenGL 4.5 calls, `HeadlessDevice` runs the same paths in memory.
//!
//! ### 中文
//! GPU 设备接口层。
//!
//! 核心逻辑不直接调用 GL，而是通过绑定到某个池化上下文的 `GpuDevice` 完成。
//! `GlowDevice` 发出真实的 OpenGL 4.5 调用，`HeadlessDevice` 在内存中执行相同路径。

mod glow_device;
mod headless;

use std::ptr::NonNull;

use bytemuck::{Pod, Zeroable};
use dpi::PhysicalSize;

use crate::engine::error::Result;
use crate::engine::pass::{ClearValues, FixedFunctionState};
use crate::engine::target::RenderTargetDesc;
use crate::engine::vertex_format::VertexFormat;

pub use glow_device::GlowDevice;
pub use headless::{DeviceCommand, HeadlessDevice, HeadlessNamespace};

macro_rules! gpu_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

gpu_handle!(
    /// ### English
    /// Buffer object name (shared across contexts).
    ///
    /// ### 中文
    /// 缓冲区对象名（跨上下文共享）。
    BufferId,
    /// ### English
    /// Vertex array object name (local to one context).
    ///
    /// ### 中文
    /// 顶点数组对象名（仅属于单个上下文）。
    VertexArrayId,
    /// ### English
    /// Framebuffer object name (local to one context).
    ///
    /// ### 中文
    /// framebuffer 对象名（仅属于单个上下文）。
    FramebufferId,
    TextureId,
    ShaderId,
    ProgramId,
);

/// ### English
/// Binding point of the per-instance metadata storage buffer.
///
/// ### 中文
/// 每实例元数据 storage buffer 的绑定点。
pub const DRAW_INFO_BINDING: u32 = 0;
/// ### English
/// Binding point of the transform storage buffer.
///
/// ### 中文
/// 变换矩阵 storage buffer 的绑定点。
pub const TRANSFORM_BINDING: u32 = 1;
/// ### English
/// Uniform block binding of the per-viewpoint camera block.
///
/// ### 中文
/// 每视点相机 uniform block 的绑定点。
pub const CAMERA_BINDING: u32 = 0;
/// ### English
/// Uniform block binding of the per-material parameters.
///
/// ### 中文
/// 每材质参数 uniform block 的绑定点。
pub const MATERIAL_BINDING: u32 = 1;

/// ### English
/// Buffer binding targets used by the streaming buffers.
///
/// ### 中文
/// 流式缓冲区使用的缓冲区绑定目标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
    DrawIndirect,
    ShaderStorage,
    Uniform,
    PixelUnpack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// ### English
/// Index element type of a draw. Only `None` (non-indexed) is supported by the batcher.
///
/// ### 中文
/// 绘制的索引类型。批处理器只支持 `None`（非索引绘制）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexType {
    #[default]
    None,
    U16,
    U32,
}

impl IndexType {
    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Srgb8Alpha8,
    Rgba16F,
    Depth24Stencil8,
}

impl TextureFormat {
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }

    /// ### English
    /// Bytes per texel when uploaded from a staging buffer.
    ///
    /// ### 中文
    /// 从暂存缓冲区上传时每个像素的字节数。
    pub const fn texel_size(self) -> usize {
        match self {
            Self::Rgba8 | Self::Srgb8Alpha8 | Self::Depth24Stencil8 => 4,
            Self::Rgba16F => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub format: TextureFormat,
    pub size: PhysicalSize<u32>,
}

/// ### English
/// Sub-rectangle of a texture, in texels.
///
/// ### 中文
/// 纹理的子矩形区域（单位：像素）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub fn byte_len(&self, format: TextureFormat) -> usize {
        self.width as usize * self.height as usize * format.texel_size()
    }
}

/// ### English
/// GPU-visible indirect draw record (`DrawArraysIndirectCommand` layout).
///
/// ### 中文
/// GPU 可见的间接绘制记录（`DrawArraysIndirectCommand` 布局）。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArraysIndirectCommand {
    pub count: u32,
    pub instance_count: u32,
    pub first: u32,
    pub base_instance: u32,
}

/// ### English
/// Size in bytes of one indirect draw record.
///
/// ### 中文
/// 单条间接绘制记录的字节大小。
pub const INDIRECT_COMMAND_SIZE: usize = std::mem::size_of::<DrawArraysIndirectCommand>();

/// ### English
/// A persistently-mapped buffer: the object name plus the CPU pointer to its whole range.
///
/// The mapping stays valid until the buffer is deleted through the device that created it.
///
/// ### 中文
/// 持久映射的缓冲区：对象名加上覆盖整个范围的 CPU 指针。
///
/// 映射在通过创建它的设备删除缓冲区之前一直有效。
#[derive(Debug)]
pub struct MappedBuffer {
    id: BufferId,
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for MappedBuffer {}
unsafe impl Sync for MappedBuffer {}

impl MappedBuffer {
    /// ### English
    /// Wraps a mapped range.
    ///
    /// # Safety
    /// `ptr` must point to `len` writable bytes that stay mapped until `id` is deleted.
    ///
    /// ### 中文
    /// 封装一段已映射的内存范围。
    ///
    /// # Safety
    /// `ptr` 必须指向 `len` 个可写字节，并在 `id` 被删除前保持映射。
    pub unsafe fn from_raw(id: BufferId, ptr: NonNull<u8>, len: usize) -> Self {
        Self { id, ptr, len }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

/// ### English
/// Operations the core issues against one graphics context.
///
/// Shared objects (buffers, textures, shaders, programs) may be created on any context in the
/// pool; container objects (vertex arrays, framebuffers) belong to the context that created
/// them and must only be used and deleted there. Calls are only valid while the owning context
/// is current on the calling thread.
///
/// ### 中文
/// 核心针对单个图形上下文发出的操作。
///
/// 共享对象（缓冲区、纹理、着色器、程序）可在池中任一上下文上创建；容器对象（VAO、FBO）
/// 属于创建它的上下文，只能在该上下文中使用与删除。仅当所属上下文在调用线程上为 current 时
/// 调用才有效。
pub trait GpuDevice: Send + Sync {
    /// ### English
    /// Allocates immutable storage of `size` bytes and maps it persistently for writing.
    ///
    /// ### 中文
    /// 分配 `size` 字节的不可变存储并持久映射以供写入。
    fn create_mapped_buffer(&self, target: BufferTarget, size: usize) -> Result<MappedBuffer>;
    fn delete_buffer(&self, buffer: BufferId);

    /// ### English
    /// Creates a vertex array with `format` bound to vertex buffer binding 0.
    ///
    /// ### 中文
    /// 创建 VAO，并将 `format` 绑定到顶点缓冲绑定点 0。
    fn create_vertex_array(&self, format: &VertexFormat) -> Result<VertexArrayId>;
    fn delete_vertex_array(&self, vertex_array: VertexArrayId);

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId>;
    fn delete_texture(&self, texture: TextureId);

    /// ### English
    /// Creates a framebuffer with colour attachments `0..N` and the optional depth/stencil
    /// attachment, then verifies completeness.
    ///
    /// ### 中文
    /// 创建 framebuffer：绑定颜色附件 `0..N` 与可选的深度/模板附件，并校验完整性。
    fn create_framebuffer(&self, desc: &RenderTargetDesc) -> Result<FramebufferId>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderId>;
    fn delete_shader(&self, shader: ShaderId);

    /// ### English
    /// Links a program from two compiled stages. `label` names the material in errors.
    ///
    /// ### 中文
    /// 由两个已编译阶段链接程序。`label` 用于在错误中标识材质。
    fn link_program(&self, label: &str, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId>;
    fn delete_program(&self, program: ProgramId);

    fn bind_framebuffer(&self, framebuffer: FramebufferId);
    /// ### English
    /// Binds `textures` to texture units `0..N` for sampling.
    ///
    /// ### 中文
    /// 将 `textures` 绑定到纹理单元 `0..N` 以供采样。
    fn bind_input_textures(&self, textures: &[TextureId]);
    fn apply_state(&self, state: &FixedFunctionState, viewport: PhysicalSize<u32>);
    fn clear(&self, clear: &ClearValues);

    fn use_program(&self, program: ProgramId);
    fn bind_vertex_array(&self, vertex_array: VertexArrayId);
    fn bind_vertex_buffer(&self, buffer: BufferId, offset: usize, stride: u32);
    fn bind_buffer_range(
        &self,
        target: BufferTarget,
        index: u32,
        buffer: BufferId,
        offset: usize,
        size: usize,
    );
    fn bind_indirect_buffer(&self, buffer: BufferId);
    fn multi_draw_arrays_indirect(
        &self,
        primitive: PrimitiveType,
        offset: usize,
        draw_count: u32,
        stride: u32,
    );

    /// ### English
    /// Copies pixels from a staging (pixel-unpack) buffer range into a texture region.
    ///
    /// ### 中文
    /// 从暂存（pixel-unpack）缓冲区范围拷贝像素到纹理区域。
    fn upload_texture_from_buffer(
        &self,
        texture: TextureId,
        format: TextureFormat,
        region: TextureRegion,
        staging: BufferId,
        offset: usize,
    );

    /// ### English
    /// Flushes queued commands so objects created here become visible to other contexts.
    ///
    /// ### 中文
    /// 刷新已排队命令，使此处创建的对象对其它上下文可见。
    fn flush(&self);
}
