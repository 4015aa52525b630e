//! ### English
//! Frame orchestration.
//!
//! One `render_frame` call:
//! 1. holds the main context, refreshes viewpoint targets, uploads transforms and camera blocks,
//!    and flushes the batch hierarchy into the current ring slices;
//! 2. dispatches one render pass per enabled viewpoint to the worker pool (concurrent when both
//!    eyes are enabled) and joins all of them;
//! 3. hands the final textures to the [`Output`];
//! 4. resets per-material frame counts and advances the frame counter.
//!
//! ### 中文
//! 帧编排。
//!
//! 一次 `render_frame` 调用：
//! 1. 持有主上下文，刷新视点渲染目标，上传变换矩阵与相机块，并把批次层级刷新到当前环形切片；
//! 2. 为每个启用的视点向工作线程池派发一个渲染 pass（双眼都启用时并发执行），并等待全部完成；
//! 3. 把最终纹理交给 [`Output`]；
//! 4. 重置每材质的帧计数并推进帧计数器。

mod plan;
mod render_pass;
mod workers;

use std::sync::Arc;

use glam::Mat4;

use crate::engine::batch::{
    BatchRegistry, DrawDescriptor, DrawHandle, ElementRange, FlushStats, InstanceData,
    InstanceHandle, MaterialId, VertexRange,
};
use crate::engine::config::RendererConfig;
use crate::engine::context::{ContextPlatform, ContextPool, ScopedContext};
use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{
    GpuDevice, IndexType, ShaderStage, TextureDesc, TextureFormat, TextureId, TextureRegion,
};
use crate::engine::output::{FrameTextures, Output};
use crate::engine::pass::{PassDescriptor, PassId};
use crate::engine::streaming::{BufferClass, StreamAllocation, StreamingBuffers};
use crate::engine::target::ViewpointTargets;
use crate::engine::viewpoint::{CameraBlock, Viewpoint, ViewpointId};

use plan::{FramePlan, PlannedViewpoint};
use workers::RenderWorkers;

pub use render_pass::PassReport;

/// ### English
/// Summary of the last completed frame.
///
/// ### 中文
/// 最近一次完成的帧的摘要。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub flush: FlushStats,
    pub passes: Vec<PassReport>,
}

impl FrameReport {
    pub fn draw_calls(&self) -> u32 {
        self.passes.iter().map(|pass| pass.draw_calls).sum()
    }
}

pub struct Renderer {
    config: RendererConfig,
    workers: RenderWorkers,
    pool: Arc<ContextPool>,
    passes: Arc<[PassDescriptor]>,
    registry: BatchRegistry,
    streams: StreamingBuffers,
    viewpoints: [Viewpoint; 2],
    transforms: Vec<Mat4>,
    textures: Vec<TextureId>,
    output: Output,
    frame: u64,
    last_report: Option<FrameReport>,
}

impl Renderer {
    /// ### English
    /// Creates the context pool, the render workers and the streaming buffers.
    ///
    /// The renderer starts with a single forward pass; the left viewpoint is enabled, the right
    /// one only when `config.stereo` is set.
    ///
    /// #### Parameters
    /// - `config`: Renderer settings.
    /// - `platform`: Context factory (surfman or headless).
    /// - `output`: Where finished frames are delivered.
    ///
    /// ### 中文
    /// 创建上下文池、渲染工作线程与流式缓冲区。
    ///
    /// 渲染器初始只有一个前向 pass；左视点默认启用，右视点仅在设置 `config.stereo` 时启用。
    ///
    /// #### 参数
    /// - `config`：渲染器设置。
    /// - `platform`：上下文工厂（surfman 或无头）。
    /// - `output`：完成帧的交付目标。
    pub fn new(
        config: RendererConfig,
        platform: Arc<dyn ContextPlatform>,
        output: Output,
    ) -> Result<Self> {
        if config.streams.draw_indirect < config.min_indirect_slice() {
            log::warn!(
                "indirect slice of {} bytes holds fewer than {} draws",
                config.streams.draw_indirect,
                config.max_draws_per_frame
            );
        }
        let pool = Arc::new(ContextPool::create(
            platform,
            config.context_size_hint,
            config.acquire_timeout,
        )?);
        let workers = RenderWorkers::spawn(pool.worker_count())?;
        let size = config.default_viewport;
        let viewpoints = [Viewpoint::new(size, true), Viewpoint::new(size, config.stereo)];
        log::info!(
            "renderer ready: {} render workers, stereo {}",
            workers.len(),
            config.stereo
        );

        Ok(Self {
            streams: StreamingBuffers::new(&config.streams),
            config,
            workers,
            pool,
            passes: Arc::from(vec![PassDescriptor::forward()]),
            registry: BatchRegistry::new(),
            viewpoints,
            transforms: Vec::new(),
            textures: Vec::new(),
            output,
            frame: 0,
            last_report: None,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    pub fn streams(&self) -> &StreamingBuffers {
        &self.streams
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// ### English
    /// Frame number the next `render_frame` records. Monotonic; the ring slice is
    /// `frame % FRAME_RING_DEPTH`.
    ///
    /// ### 中文
    /// 下一次 `render_frame` 录制的帧号。单调递增；环形切片为 `frame % FRAME_RING_DEPTH`。
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    /// ### English
    /// Appends a pass after the existing ones. Viewpoint targets are rebuilt on the next frame.
    ///
    /// ### 中文
    /// 在现有 pass 之后追加一个 pass。视点渲染目标会在下一帧重建。
    pub fn add_pass(&mut self, pass: PassDescriptor) -> Result<PassId> {
        let id = PassId(self.passes.len() as u32);
        let mut passes = self.passes.to_vec();
        passes.push(pass);
        self.passes = Arc::from(passes);

        let scope = ScopedContext::main(&self.pool)?;
        let device = scope.device();
        for viewpoint in &mut self.viewpoints {
            release_targets(&self.pool, device, viewpoint);
        }
        Ok(id)
    }

    /// ### English
    /// Compiles and links a material on the main context and registers it under `name`.
    ///
    /// Worker contexts link their own pipeline object lazily on first use.
    ///
    /// #### Parameters
    /// - `name`: Unique material name.
    /// - `vertex_source`: GLSL vertex stage.
    /// - `fragment_source`: GLSL fragment stage.
    /// - `pass`: Pass that draws this material's batches.
    ///
    /// ### 中文
    /// 在主上下文上编译并链接材质，并以 `name` 注册。
    ///
    /// 工作上下文在首次使用时惰性地链接各自的管线对象。
    ///
    /// #### 参数
    /// - `name`：唯一的材质名称。
    /// - `vertex_source`：GLSL 顶点阶段源码。
    /// - `fragment_source`：GLSL 片元阶段源码。
    /// - `pass`：绘制该材质批次的 pass。
    pub fn register_material(
        &mut self,
        name: &str,
        vertex_source: &str,
        fragment_source: &str,
        pass: PassId,
    ) -> Result<MaterialId> {
        if self.registry.contains_material(name) {
            return Err(RenderError::DuplicateMaterial(name.to_owned()));
        }
        if pass.index() >= self.passes.len() {
            return Err(RenderError::UnknownPass(pass.0));
        }

        let scope = ScopedContext::main(&self.pool)?;
        let device = scope.device();
        let vertex = device.compile_shader(ShaderStage::Vertex, vertex_source)?;
        let fragment = match device.compile_shader(ShaderStage::Fragment, fragment_source) {
            Ok(fragment) => fragment,
            Err(err) => {
                device.delete_shader(vertex);
                return Err(err);
            }
        };
        let program = match device.link_program(name, vertex, fragment) {
            Ok(program) => program,
            Err(err) => {
                device.delete_shader(vertex);
                device.delete_shader(fragment);
                return Err(err);
            }
        };
        let id = match self.registry.insert_material(name, pass, vertex, fragment) {
            Ok(id) => id,
            Err(err) => {
                device.delete_program(program);
                device.delete_shader(vertex);
                device.delete_shader(fragment);
                return Err(err);
            }
        };
        scope.caches().insert_pipeline(id, program);
        log::info!("material `{name}` registered for pass {}", pass.0);
        Ok(id)
    }

    pub fn material(&self, name: &str) -> Result<MaterialId> {
        self.registry.material_id(name)
    }

    pub fn set_material_uniforms(&mut self, material: MaterialId, bytes: &[u8]) -> Result<()> {
        self.registry.set_material_uniforms(material, bytes)
    }

    /// ### English
    /// Submits a draw whose `vertices` were returned by [`Self::stream_vertices`] in the current
    /// frame.
    ///
    /// ### 中文
    /// 提交一个绘制，其 `vertices` 须为当前帧 [`Self::stream_vertices`] 的返回值。
    pub fn submit_draw(&mut self, material: MaterialId, desc: DrawDescriptor) -> Result<DrawHandle> {
        self.registry.submit_draw(material, desc, self.frame)
    }

    pub fn remove_draw(&mut self, draw: DrawHandle) -> Result<()> {
        self.registry.remove_draw(draw)
    }

    /// ### English
    /// Re-points a draw at vertices streamed this frame. Every draw with instances must be
    /// re-pointed each frame before [`Self::render_frame`], otherwise it fails with
    /// `StaleGeometry`.
    ///
    /// ### 中文
    /// 让绘制指向本帧流入的顶点。每个带实例的绘制都必须在 [`Self::render_frame`] 之前逐帧
    /// 重新指定，否则会返回 `StaleGeometry`。
    pub fn set_draw_geometry(&mut self, draw: DrawHandle, vertices: VertexRange) -> Result<()> {
        self.registry.set_draw_geometry(draw, vertices, self.frame)
    }

    pub fn add_instance(&mut self, draw: DrawHandle, data: InstanceData) -> Result<InstanceHandle> {
        self.registry.add_instance(draw, data)
    }

    pub fn update_instance(&mut self, instance: InstanceHandle, data: InstanceData) -> Result<()> {
        self.registry.update_instance(instance, data)
    }

    pub fn remove_instance(&mut self, instance: InstanceHandle) -> Result<InstanceData> {
        self.registry.remove_instance(instance)
    }

    pub fn viewpoint(&self, id: ViewpointId) -> &Viewpoint {
        &self.viewpoints[id.index()]
    }

    pub fn set_viewpoint_transform(&mut self, id: ViewpointId, view: Mat4) {
        self.viewpoints[id.index()].view = view;
    }

    pub fn set_viewpoint_projection(&mut self, id: ViewpointId, projection: Mat4) {
        self.viewpoints[id.index()].projection = projection;
    }

    /// ### English
    /// Resizes a viewpoint. Zero dimensions fall back to the configured default viewport.
    /// Targets are recreated on the next frame.
    ///
    /// ### 中文
    /// 调整视点尺寸。宽或高为 0 时使用配置中的默认视口。渲染目标在下一帧重建。
    pub fn set_viewpoint_viewport(&mut self, id: ViewpointId, width: u32, height: u32) {
        let size = if width == 0 || height == 0 {
            self.config.default_viewport
        } else {
            dpi::PhysicalSize::new(width, height)
        };
        self.viewpoints[id.index()].size = size;
    }

    pub fn set_viewpoint_enabled(&mut self, id: ViewpointId, enabled: bool) {
        self.viewpoints[id.index()].enabled = enabled;
    }

    /// ### English
    /// Replaces the transform array re-uploaded each frame and bound at `TRANSFORM_BINDING`.
    ///
    /// ### 中文
    /// 替换每帧重新上传并绑定到 `TRANSFORM_BINDING` 的变换矩阵数组。
    pub fn set_transforms(&mut self, transforms: &[Mat4]) {
        self.transforms.clear();
        self.transforms.extend_from_slice(transforms);
    }

    /// ### English
    /// Streams vertex bytes into the current frame's vertex slice.
    ///
    /// The returned range is valid for draws recorded in this frame only.
    ///
    /// #### Parameters
    /// - `stride`: Byte stride of one vertex; the data length must be a multiple of it.
    /// - `bytes`: Packed vertex data.
    ///
    /// ### 中文
    /// 把顶点字节流式写入当前帧的顶点切片。
    ///
    /// 返回的范围仅对本帧录制的绘制有效。
    ///
    /// #### 参数
    /// - `stride`：单个顶点的字节步长；数据长度必须是它的整数倍。
    /// - `bytes`：紧凑排列的顶点数据。
    pub fn stream_vertices(&mut self, stride: u32, bytes: &[u8]) -> Result<VertexRange> {
        let stride_bytes = stride as usize;
        if stride_bytes == 0 || bytes.len() % stride_bytes != 0 {
            return Err(RenderError::InvalidVertexFormat(format!(
                "{} bytes are not a whole number of {stride}-byte vertices",
                bytes.len()
            )));
        }
        let allocation = self.stream(BufferClass::Vertex, bytes, stride_bytes)?;
        Ok(VertexRange {
            first: (allocation.offset / stride_bytes) as u32,
            count: (bytes.len() / stride_bytes) as u32,
        })
    }

    /// ### English
    /// Streams index bytes into the current frame's index slice.
    ///
    /// ### 中文
    /// 把索引字节流式写入当前帧的索引切片。
    pub fn stream_indices(&mut self, index_type: IndexType, bytes: &[u8]) -> Result<ElementRange> {
        let size = index_type.size();
        if size == 0 || bytes.len() % size != 0 {
            return Err(RenderError::InvalidUpload {
                expected: bytes.len().next_multiple_of(size.max(1)),
                actual: bytes.len(),
            });
        }
        let allocation = self.stream(BufferClass::Index, bytes, size)?;
        Ok(ElementRange {
            index_type,
            first: (allocation.offset / size) as u32,
            count: (bytes.len() / size) as u32,
        })
    }

    fn stream(&mut self, class: BufferClass, bytes: &[u8], align: usize) -> Result<StreamAllocation> {
        let scope = ScopedContext::main(&self.pool)?;
        let stream = self.streams.get_mut(class);
        let allocation = stream.allocate_aligned(scope.device(), self.frame, bytes.len(), align)?;
        stream.write(&allocation, 0, bytes)?;
        Ok(allocation)
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> Result<TextureId> {
        let scope = ScopedContext::main(&self.pool)?;
        let texture = scope.device().create_texture(&desc)?;
        self.textures.push(texture);
        Ok(texture)
    }

    pub fn delete_texture(&mut self, texture: TextureId) -> Result<()> {
        let index = self
            .textures
            .iter()
            .position(|t| *t == texture)
            .ok_or(RenderError::StaleHandle)?;
        let scope = ScopedContext::main(&self.pool)?;
        scope.device().delete_texture(self.textures.swap_remove(index));
        Ok(())
    }

    /// ### English
    /// Copies `pixels` into the pixel staging slice and uploads them to `region` of `texture`.
    ///
    /// ### 中文
    /// 把 `pixels` 拷贝进像素暂存切片，并上传到 `texture` 的 `region` 区域。
    pub fn upload_texture(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        region: TextureRegion,
        pixels: &[u8],
    ) -> Result<()> {
        let expected = region.byte_len(format);
        if pixels.len() != expected {
            return Err(RenderError::InvalidUpload {
                expected,
                actual: pixels.len(),
            });
        }
        if !self.textures.contains(&texture) {
            return Err(RenderError::StaleHandle);
        }
        let scope = ScopedContext::main(&self.pool)?;
        let device = scope.device();
        let staging = self.streams.get_mut(BufferClass::PixelStaging);
        let allocation = staging.allocate(device, self.frame, pixels.len())?;
        staging.write(&allocation, 0, pixels)?;
        let buffer = staging.buffer_id().ok_or(RenderError::StaleHandle)?;
        device.upload_texture_from_buffer(texture, format, region, buffer, allocation.absolute());
        Ok(())
    }

    /// ### English
    /// Records, renders and submits one frame.
    ///
    /// The frame counter advances even when the frame fails, so the next attempt writes into a
    /// fresh slice.
    ///
    /// ### 中文
    /// 录制、渲染并提交一帧。
    ///
    /// 即使该帧失败帧计数器也会推进，使下一次尝试写入新的切片。
    pub fn render_frame(&mut self) -> Result<FrameTextures> {
        let frame = self.frame;
        let result = self.record_frame(frame);
        self.registry.reset_frame_counts();
        self.frame += 1;
        if let Err(err) = &result {
            log::error!("frame {frame} failed: {err}");
        }
        result
    }

    fn record_frame(&mut self, frame: u64) -> Result<FrameTextures> {
        let (plan, flush) = self.prepare(frame)?;
        let plan = Arc::new(plan);

        let pending: Vec<_> = (0..plan.viewpoints.len())
            .map(|index| {
                let pool = self.pool.clone();
                let plan = plan.clone();
                self.workers
                    .dispatch(move || render_pass::execute(&pool, &plan, index))
            })
            .collect();
        let mut passes = Vec::with_capacity(pending.len());
        let mut failure = None;
        for slot in pending {
            match slot.recv() {
                Ok(report) => passes.push(report),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let textures = FrameTextures {
            frame,
            left: self.final_texture(ViewpointId::Left),
            right: self.final_texture(ViewpointId::Right),
        };
        self.output.set_textures(textures);
        let scope = self.output.make_current(&self.pool)?;
        self.output.submit(&scope)?;
        Output::done_current(scope);

        log::trace!(
            "frame {frame}: {} batches over {} passes",
            plan.batch_count(),
            passes.len()
        );
        self.last_report = Some(FrameReport {
            frame,
            flush,
            passes,
        });
        Ok(textures)
    }

    fn prepare(&mut self, frame: u64) -> Result<(FramePlan, FlushStats)> {
        let scope = ScopedContext::main(&self.pool)?;
        let device = scope.device();

        for viewpoint in self.viewpoints.iter_mut().filter(|v| v.enabled) {
            if viewpoint.needs_targets() {
                release_targets(&self.pool, device, viewpoint);
                viewpoint.targets = Some(ViewpointTargets::create(
                    device,
                    &self.passes,
                    viewpoint.size,
                )?);
            }
        }

        let transforms = if self.transforms.is_empty() {
            None
        } else {
            let stream = self.streams.get_mut(BufferClass::Uniform);
            let allocation =
                stream.allocate(device, frame, self.transforms.len() * size_of::<Mat4>())?;
            stream.write_slice(&allocation, &self.transforms)?;
            Some(allocation)
        };

        let flush = self.registry.write_batches(
            &mut self.streams,
            device,
            frame,
            self.config.max_draws_per_frame,
        )?;

        let mut viewpoints = Vec::with_capacity(ViewpointId::ALL.len());
        for id in ViewpointId::ALL {
            let viewpoint = &self.viewpoints[id.index()];
            if !viewpoint.enabled {
                continue;
            }
            let stream = self.streams.get_mut(BufferClass::Uniform);
            let camera = stream.allocate(device, frame, size_of::<CameraBlock>())?;
            stream.write_pod(&camera, 0, &viewpoint.camera_block())?;
            viewpoints.push(PlannedViewpoint {
                id,
                size: viewpoint.size,
                targets: viewpoint
                    .targets
                    .as_ref()
                    .map(|targets| targets.passes().to_vec())
                    .unwrap_or_default(),
                camera: plan::range_of(&self.streams, &camera),
            });
        }
        device.flush();

        let plan = FramePlan::build(
            frame,
            self.passes.clone(),
            &self.registry,
            &self.streams,
            transforms.as_ref(),
            viewpoints,
        );
        Ok((plan, flush))
    }

    fn final_texture(&self, id: ViewpointId) -> Option<TextureId> {
        let viewpoint = &self.viewpoints[id.index()];
        if !viewpoint.enabled {
            return None;
        }
        viewpoint.targets.as_ref()?.output()
    }
}

fn release_targets(pool: &ContextPool, device: &dyn GpuDevice, viewpoint: &mut Viewpoint) {
    if let Some(mut targets) = viewpoint.targets.take() {
        for desc in targets.destroy(device) {
            pool.retire_target(&desc);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let scope = match ScopedContext::main(&self.pool) {
            Ok(scope) => scope,
            Err(err) => {
                log::error!("main context unavailable at renderer teardown: {err}");
                return;
            }
        };
        let device = scope.device();
        for viewpoint in &mut self.viewpoints {
            release_targets(&self.pool, device, viewpoint);
        }
        for texture in self.textures.drain(..) {
            device.delete_texture(texture);
        }
        for material in self.registry.materials() {
            device.delete_shader(material.program().vertex);
            device.delete_shader(material.program().fragment);
        }
        self.streams.destroy(device);
        log::info!("renderer shut down after {} frames", self.frame);
    }
}
