//! ### English
//! Render-pass execution for one viewpoint on one pooled worker context.
//!
//! ### 中文
//! 在一个池化工作上下文上执行某个视点的渲染 pass。

use crate::engine::context::{ContextPool, PipelineCache, ScopedContext};
use crate::engine::error::Result;
use crate::engine::frame::plan::{FramePlan, PlannedViewpoint};
use crate::engine::gpu::{
    BufferTarget, CAMERA_BINDING, DRAW_INFO_BINDING, GpuDevice, INDIRECT_COMMAND_SIZE,
    MATERIAL_BINDING, TRANSFORM_BINDING,
};
use crate::engine::pass::{ClearValues, PassId};
use crate::engine::streaming::BufferRange;
use crate::engine::viewpoint::ViewpointId;

/// ### English
/// What one viewpoint's passes issued.
///
/// ### 中文
/// 某个视点的全部 pass 所发出的调用统计。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassReport {
    pub viewpoint: ViewpointId,
    /// ### English
    /// Pool slot the passes ran on.
    ///
    /// ### 中文
    /// 执行这些 pass 的池槽位。
    pub context: usize,
    pub passes: u32,
    /// ### English
    /// Indirect multi-draw calls, one per batch per pass.
    ///
    /// ### 中文
    /// 间接 multi-draw 调用次数，每个 pass 中每个批次一次。
    pub draw_calls: u32,
    pub draws: u32,
}

/// ### English
/// Render state threaded through one viewpoint's passes: the held context, its caches and the
/// frame plan.
///
/// ### 中文
/// 贯穿某个视点所有 pass 的渲染状态：持有的上下文、其缓存以及帧计划。
struct PassContext<'a> {
    device: &'a dyn GpuDevice,
    caches: &'a mut PipelineCache,
    plan: &'a FramePlan,
    viewpoint: &'a PlannedViewpoint,
    report: PassReport,
}

/// ### English
/// Acquires a worker context and runs every declared pass for `plan.viewpoints[index]`.
///
/// #### Parameters
/// - `pool`: Context pool; an unreserved context is claimed for the duration of the call.
/// - `plan`: Frame snapshot produced after the batch flush.
/// - `index`: Index into `plan.viewpoints`.
///
/// ### 中文
/// 获取一个工作上下文，并为 `plan.viewpoints[index]` 执行所有声明的 pass。
///
/// #### 参数
/// - `pool`：上下文池；调用期间占用一个非保留上下文。
/// - `plan`：批次刷新后生成的帧快照。
/// - `index`：`plan.viewpoints` 中的下标。
pub(crate) fn execute(pool: &ContextPool, plan: &FramePlan, index: usize) -> Result<PassReport> {
    let viewpoint = &plan.viewpoints[index];
    let scope = ScopedContext::acquire(pool, None)?;
    let device = scope.device();
    let mut caches = scope.caches();
    caches.evict_retired(device);

    let mut pass = PassContext {
        device,
        caches: &mut *caches,
        plan,
        viewpoint,
        report: PassReport {
            viewpoint: viewpoint.id,
            context: scope.slot(),
            passes: 0,
            draw_calls: 0,
            draws: 0,
        },
    };
    pass.bind_frame_buffers();
    for pass_index in 0..plan.passes.len() {
        pass.run(pass_index)?;
    }
    device.flush();
    log::trace!(
        "frame {} {:?}: {} draw calls on context {}",
        plan.frame,
        viewpoint.id,
        pass.report.draw_calls,
        pass.report.context
    );
    Ok(pass.report)
}

impl PassContext<'_> {
    fn bind_range(&self, target: BufferTarget, index: u32, range: Option<BufferRange>) {
        if let Some(range) = range {
            self.device
                .bind_buffer_range(target, index, range.buffer, range.offset, range.size);
        }
    }

    fn bind_frame_buffers(&self) {
        let buffers = &self.plan.buffers;
        if let Some(indirect) = buffers.indirect {
            self.device.bind_indirect_buffer(indirect.buffer);
        }
        self.bind_range(BufferTarget::ShaderStorage, DRAW_INFO_BINDING, buffers.draw_info);
        self.bind_range(BufferTarget::ShaderStorage, TRANSFORM_BINDING, buffers.transforms);
        self.bind_range(BufferTarget::Uniform, CAMERA_BINDING, self.viewpoint.camera);
    }

    fn run(&mut self, pass_index: usize) -> Result<()> {
        let descriptor = &self.plan.passes[pass_index];
        let target = &self.viewpoint.targets[pass_index];

        let framebuffer = self.caches.framebuffer(self.device, &target.desc)?;
        self.device.bind_framebuffer(framebuffer);
        if descriptor.sample_previous && !target.inputs.is_empty() {
            self.device.bind_input_textures(&target.inputs);
        }
        self.device.apply_state(&descriptor.state, self.viewpoint.size);
        if descriptor.clear != ClearValues::NONE {
            self.device.clear(&descriptor.clear);
        }
        self.report.passes += 1;

        if self.plan.buffers.indirect.is_none() {
            return Ok(());
        }
        let pass_id = PassId(pass_index as u32);
        for material in self.plan.materials.iter().filter(|m| m.pass == pass_id) {
            let program = self.caches.pipeline(self.device, &material.program)?;
            self.device.use_program(program);
            self.bind_range(BufferTarget::Uniform, MATERIAL_BINDING, material.uniforms);

            for batch in &material.batches {
                let vertex_array = self.caches.vertex_array(self.device, &batch.format)?;
                self.device.bind_vertex_array(vertex_array);
                if let Some(vertices) = self.plan.buffers.vertices {
                    self.device
                        .bind_vertex_buffer(vertices.buffer, vertices.offset, batch.stride);
                }
                self.device.multi_draw_arrays_indirect(
                    batch.primitive,
                    batch.commands,
                    batch.draw_count,
                    INDIRECT_COMMAND_SIZE as u32,
                );
                self.report.draw_calls += 1;
                self.report.draws += batch.draw_count;
            }
        }
        Ok(())
    }
}
