//! ### English
//! In-memory [`GpuDevice`] used for headless runs and tests.
//!
//! Shared objects live in a [`HeadlessNamespace`] shared by every device of one pool, mirroring
//! GL share groups. Vertex arrays and framebuffers are tracked per device. Every state-changing
//! call is appended to a command log that tests inspect.
//!
//! ### 中文
//! 用于无头运行与测试的内存版 [`GpuDevice`]。
//!
//! 共享对象存放在同一池内所有设备共用的 [`HeadlessNamespace`] 中，对应 GL 的共享组。
//! VAO 与 FBO 按设备单独记录。所有改变状态的调用都会追加到命令日志，供测试检查。

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dpi::PhysicalSize;
use parking_lot::Mutex;

use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{
    BufferId, BufferTarget, FramebufferId, GpuDevice, MappedBuffer, PrimitiveType, ProgramId,
    ShaderId, ShaderStage, TextureDesc, TextureFormat, TextureId, TextureRegion, VertexArrayId,
};
use crate::engine::pass::{ClearValues, FixedFunctionState};
use crate::engine::target::RenderTargetDesc;
use crate::engine::vertex_format::VertexFormat;

/// GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT
const INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;
/// GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT
const INCOMPLETE_MISSING_ATTACHMENT: u32 = 0x8CD7;
/// GL_FRAMEBUFFER_INCOMPLETE_DIMENSIONS
const INCOMPLETE_DIMENSIONS: u32 = 0x8CD9;

/// ### English
/// One recorded device call. `context` is the pool slot of the issuing device.
///
/// ### 中文
/// 一条被记录的设备调用。`context` 为发出调用的设备所在池槽位。
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    BindFramebuffer {
        context: usize,
        framebuffer: FramebufferId,
    },
    BindInputTextures {
        context: usize,
        textures: Vec<TextureId>,
    },
    ApplyState {
        context: usize,
        state: FixedFunctionState,
        viewport: PhysicalSize<u32>,
    },
    Clear {
        context: usize,
        clear: ClearValues,
    },
    UseProgram {
        context: usize,
        program: ProgramId,
    },
    BindVertexArray {
        context: usize,
        vertex_array: VertexArrayId,
    },
    BindVertexBuffer {
        context: usize,
        buffer: BufferId,
        offset: usize,
        stride: u32,
    },
    BindBufferRange {
        context: usize,
        target: BufferTarget,
        index: u32,
        buffer: BufferId,
        offset: usize,
        size: usize,
    },
    BindIndirectBuffer {
        context: usize,
        buffer: BufferId,
    },
    MultiDrawArraysIndirect {
        context: usize,
        primitive: PrimitiveType,
        offset: usize,
        draw_count: u32,
        stride: u32,
    },
    UploadTexture {
        context: usize,
        texture: TextureId,
        region: TextureRegion,
        staging: BufferId,
        offset: usize,
    },
    Flush {
        context: usize,
    },
}

struct HeadlessBuffer {
    target: BufferTarget,
    memory: Box<[u8]>,
}

/// ### English
/// Share-group state: object names and the backing memory of mapped buffers.
///
/// ### 中文
/// 共享组状态：对象名以及映射缓冲区的底层内存。
#[derive(Default)]
pub struct HeadlessNamespace {
    next_name: AtomicU32,
    buffers: Mutex<HashMap<BufferId, HeadlessBuffer>>,
    textures: Mutex<HashMap<TextureId, TextureDesc>>,
    shaders: Mutex<HashMap<ShaderId, ShaderStage>>,
    programs: Mutex<HashSet<ProgramId>>,
    commands: Mutex<Vec<DeviceCommand>>,
}

impl HeadlessNamespace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn name(&self) -> u32 {
        self.next_name.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, command: DeviceCommand) {
        self.commands.lock().push(command);
    }

    /// ### English
    /// Snapshot of every recorded command, in issue order.
    ///
    /// ### 中文
    /// 按发出顺序返回全部已记录命令的快照。
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().clear();
    }

    /// ### English
    /// Copies `len` bytes at `offset` out of a live buffer.
    ///
    /// ### 中文
    /// 从存活缓冲区的 `offset` 处拷贝出 `len` 字节。
    pub fn read_buffer(&self, buffer: BufferId, offset: usize, len: usize) -> Option<Vec<u8>> {
        let buffers = self.buffers.lock();
        let memory = &buffers.get(&buffer)?.memory;
        memory.get(offset..offset.checked_add(len)?).map(<[u8]>::to_vec)
    }

    /// ### English
    /// Binding target the buffer was created for.
    ///
    /// ### 中文
    /// 缓冲区创建时的绑定目标。
    pub fn buffer_target(&self, buffer: BufferId) -> Option<BufferTarget> {
        self.buffers.lock().get(&buffer).map(|b| b.target)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.lock().len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.lock().len()
    }
}

/// ### English
/// Headless device for one pool slot.
///
/// ### 中文
/// 某个池槽位对应的无头设备。
pub struct HeadlessDevice {
    context: usize,
    shared: Arc<HeadlessNamespace>,
    next_container: AtomicU32,
    vertex_arrays: Mutex<HashSet<VertexArrayId>>,
    framebuffers: Mutex<HashSet<FramebufferId>>,
}

impl HeadlessDevice {
    pub fn new(context: usize, shared: Arc<HeadlessNamespace>) -> Self {
        Self {
            context,
            shared,
            next_container: AtomicU32::new(0),
            vertex_arrays: Mutex::new(HashSet::new()),
            framebuffers: Mutex::new(HashSet::new()),
        }
    }

    fn container_name(&self) -> u32 {
        self.next_container.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn context(&self) -> usize {
        self.context
    }

    pub fn namespace(&self) -> &Arc<HeadlessNamespace> {
        &self.shared
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.lock().len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.lock().len()
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_mapped_buffer(&self, target: BufferTarget, size: usize) -> Result<MappedBuffer> {
        let id = BufferId(self.shared.name());
        let mut memory = vec![0u8; size].into_boxed_slice();
        let ptr = NonNull::new(memory.as_mut_ptr()).ok_or_else(|| {
            RenderError::GpuObject(format!("headless buffer of {size} bytes has no storage"))
        })?;
        self.shared
            .buffers
            .lock()
            .insert(id, HeadlessBuffer { target, memory });
        // SAFETY: the boxed slice is never reallocated and lives until `delete_buffer(id)`.
        Ok(unsafe { MappedBuffer::from_raw(id, ptr, size) })
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.shared.buffers.lock().remove(&buffer);
    }

    fn create_vertex_array(&self, _format: &VertexFormat) -> Result<VertexArrayId> {
        let id = VertexArrayId(self.container_name());
        self.vertex_arrays.lock().insert(id);
        Ok(id)
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        self.vertex_arrays.lock().remove(&vertex_array);
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        let id = TextureId(self.shared.name());
        self.shared.textures.lock().insert(id, *desc);
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.shared.textures.lock().remove(&texture);
    }

    fn create_framebuffer(&self, desc: &RenderTargetDesc) -> Result<FramebufferId> {
        let textures = self.shared.textures.lock();
        if desc.colors.is_empty() && desc.depth_stencil.is_none() {
            return Err(RenderError::IncompleteFramebuffer {
                status: INCOMPLETE_MISSING_ATTACHMENT,
            });
        }
        let mut size = None;
        for (texture, wants_depth) in desc
            .colors
            .iter()
            .map(|t| (t, false))
            .chain(desc.depth_stencil.iter().map(|t| (t, true)))
        {
            let Some(found) = textures.get(texture) else {
                return Err(RenderError::IncompleteFramebuffer {
                    status: INCOMPLETE_ATTACHMENT,
                });
            };
            if found.format.is_depth() != wants_depth {
                return Err(RenderError::IncompleteFramebuffer {
                    status: INCOMPLETE_ATTACHMENT,
                });
            }
            if *size.get_or_insert(found.size) != found.size {
                return Err(RenderError::IncompleteFramebuffer {
                    status: INCOMPLETE_DIMENSIONS,
                });
            }
        }
        drop(textures);

        let id = FramebufferId(self.container_name());
        self.framebuffers.lock().insert(id);
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        self.framebuffers.lock().remove(&framebuffer);
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        if source.trim().is_empty() || source.contains("#error") {
            return Err(RenderError::ShaderCompile {
                stage: stage.label(),
                log: "0:1(1): error: empty or rejected shader source".to_owned(),
            });
        }
        let id = ShaderId(self.shared.name());
        self.shared.shaders.lock().insert(id, stage);
        Ok(id)
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.shared.shaders.lock().remove(&shader);
    }

    fn link_program(&self, label: &str, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId> {
        let shaders = self.shared.shaders.lock();
        let stages = (shaders.get(&vertex), shaders.get(&fragment));
        if stages != (Some(&ShaderStage::Vertex), Some(&ShaderStage::Fragment)) {
            return Err(RenderError::ProgramLink {
                material: label.to_owned(),
                log: "missing or mismatched shader stages".to_owned(),
            });
        }
        drop(shaders);
        let id = ProgramId(self.shared.name());
        self.shared.programs.lock().insert(id);
        Ok(id)
    }

    fn delete_program(&self, program: ProgramId) {
        self.shared.programs.lock().remove(&program);
    }

    fn bind_framebuffer(&self, framebuffer: FramebufferId) {
        self.shared.record(DeviceCommand::BindFramebuffer {
            context: self.context,
            framebuffer,
        });
    }

    fn bind_input_textures(&self, textures: &[TextureId]) {
        self.shared.record(DeviceCommand::BindInputTextures {
            context: self.context,
            textures: textures.to_vec(),
        });
    }

    fn apply_state(&self, state: &FixedFunctionState, viewport: PhysicalSize<u32>) {
        self.shared.record(DeviceCommand::ApplyState {
            context: self.context,
            state: *state,
            viewport,
        });
    }

    fn clear(&self, clear: &ClearValues) {
        self.shared.record(DeviceCommand::Clear {
            context: self.context,
            clear: *clear,
        });
    }

    fn use_program(&self, program: ProgramId) {
        self.shared.record(DeviceCommand::UseProgram {
            context: self.context,
            program,
        });
    }

    fn bind_vertex_array(&self, vertex_array: VertexArrayId) {
        self.shared.record(DeviceCommand::BindVertexArray {
            context: self.context,
            vertex_array,
        });
    }

    fn bind_vertex_buffer(&self, buffer: BufferId, offset: usize, stride: u32) {
        self.shared.record(DeviceCommand::BindVertexBuffer {
            context: self.context,
            buffer,
            offset,
            stride,
        });
    }

    fn bind_buffer_range(
        &self,
        target: BufferTarget,
        index: u32,
        buffer: BufferId,
        offset: usize,
        size: usize,
    ) {
        self.shared.record(DeviceCommand::BindBufferRange {
            context: self.context,
            target,
            index,
            buffer,
            offset,
            size,
        });
    }

    fn bind_indirect_buffer(&self, buffer: BufferId) {
        self.shared.record(DeviceCommand::BindIndirectBuffer {
            context: self.context,
            buffer,
        });
    }

    fn multi_draw_arrays_indirect(
        &self,
        primitive: PrimitiveType,
        offset: usize,
        draw_count: u32,
        stride: u32,
    ) {
        self.shared.record(DeviceCommand::MultiDrawArraysIndirect {
            context: self.context,
            primitive,
            offset,
            draw_count,
            stride,
        });
    }

    fn upload_texture_from_buffer(
        &self,
        texture: TextureId,
        _format: TextureFormat,
        region: TextureRegion,
        staging: BufferId,
        offset: usize,
    ) {
        self.shared.record(DeviceCommand::UploadTexture {
            context: self.context,
            texture,
            region,
            staging,
            offset,
        });
    }

    fn flush(&self) {
        self.shared.record(DeviceCommand::Flush {
            context: self.context,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::TextureFormat;

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(0, HeadlessNamespace::new())
    }

    fn texture(device: &HeadlessDevice, format: TextureFormat, w: u32, h: u32) -> TextureId {
        device
            .create_texture(&TextureDesc {
                format,
                size: PhysicalSize::new(w, h),
            })
            .unwrap()
    }

    #[test]
    fn mapped_writes_are_visible_through_read_buffer() {
        let device = device();
        let mapped = device
            .create_mapped_buffer(BufferTarget::DrawIndirect, 32)
            .unwrap();
        unsafe { mapped.as_ptr().add(4).write(0xAB) };
        let bytes = device.namespace().read_buffer(mapped.id(), 4, 1).unwrap();
        assert_eq!(bytes, vec![0xAB]);
        assert_eq!(
            device.namespace().buffer_target(mapped.id()),
            Some(BufferTarget::DrawIndirect)
        );
        device.delete_buffer(mapped.id());
        assert_eq!(device.namespace().live_buffers(), 0);
    }

    #[test]
    fn framebuffer_without_attachments_is_incomplete() {
        let err = device()
            .create_framebuffer(&RenderTargetDesc::default())
            .unwrap_err();
        assert_eq!(
            err,
            RenderError::IncompleteFramebuffer {
                status: INCOMPLETE_MISSING_ATTACHMENT
            }
        );
    }

    #[test]
    fn framebuffer_rejects_mismatched_sizes_and_depth_as_color() {
        let device = device();
        let color = texture(&device, TextureFormat::Rgba8, 64, 64);
        let small_depth = texture(&device, TextureFormat::Depth24Stencil8, 32, 32);
        let mismatched = RenderTargetDesc {
            colors: vec![color],
            depth_stencil: Some(small_depth),
        };
        assert!(matches!(
            device.create_framebuffer(&mismatched),
            Err(RenderError::IncompleteFramebuffer { status: INCOMPLETE_DIMENSIONS })
        ));

        let depth_as_color = RenderTargetDesc {
            colors: vec![small_depth],
            depth_stencil: None,
        };
        assert!(device.create_framebuffer(&depth_as_color).is_err());
        assert_eq!(device.live_framebuffers(), 0);
    }

    #[test]
    fn containers_are_per_device_but_programs_are_shared() {
        let shared = HeadlessNamespace::new();
        let a = HeadlessDevice::new(0, shared.clone());
        let b = HeadlessDevice::new(1, shared.clone());

        let format = VertexFormat::default();
        assert_eq!(a.create_vertex_array(&format).unwrap(), VertexArrayId(1));
        assert_eq!(b.create_vertex_array(&format).unwrap(), VertexArrayId(1));
        assert_eq!(a.live_vertex_arrays(), 1);

        let vs = a.compile_shader(ShaderStage::Vertex, "void main() {}").unwrap();
        let fs = a.compile_shader(ShaderStage::Fragment, "void main() {}").unwrap();
        b.link_program("shared", vs, fs).unwrap();
        assert_eq!(shared.live_programs(), 1);
    }

    #[test]
    fn empty_source_fails_and_swapped_stages_fail_to_link() {
        let device = device();
        assert!(matches!(
            device.compile_shader(ShaderStage::Fragment, "   "),
            Err(RenderError::ShaderCompile { stage: "fragment", .. })
        ));
        let vs = device.compile_shader(ShaderStage::Vertex, "void main() {}").unwrap();
        let fs = device.compile_shader(ShaderStage::Fragment, "void main() {}").unwrap();
        assert!(matches!(
            device.link_program("swapped", fs, vs),
            Err(RenderError::ProgramLink { material, .. }) if material == "swapped"
        ));
    }
}
