//! ### English
//! Per-context memo of container objects: vertex arrays, framebuffers and linked programs.
//!
//! ### 中文
//! 每上下文的容器对象缓存：VAO、framebuffer 与已链接的程序。

use std::collections::HashMap;

use crate::engine::batch::{MaterialId, MaterialProgram};
use crate::engine::error::Result;
use crate::engine::gpu::{FramebufferId, GpuDevice, ProgramId, VertexArrayId};
use crate::engine::target::RenderTargetDesc;
use crate::engine::vertex_format::VertexFormat;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// ### English
/// Lookup-or-create cache owned by one context slot.
///
/// Framebuffers whose attachments were destroyed are queued with [`retire`](Self::retire) from
/// any thread and deleted by [`evict_retired`](Self::evict_retired) the next time this context
/// is current.
///
/// ### 中文
/// 由单个上下文槽位持有的“查找或创建”缓存。
///
/// 附件已被销毁的 framebuffer 可在任意线程通过 [`retire`](Self::retire) 排队，并在该上下文
/// 下次成为 current 时由 [`evict_retired`](Self::evict_retired) 删除。
#[derive(Debug, Default)]
pub struct PipelineCache {
    vertex_arrays: HashMap<VertexFormat, VertexArrayId>,
    framebuffers: HashMap<RenderTargetDesc, FramebufferId>,
    pipelines: HashMap<MaterialId, ProgramId>,
    retired: Vec<RenderTargetDesc>,
    stats: CacheStats,
}

impl PipelineCache {
    pub fn vertex_array(
        &mut self,
        device: &dyn GpuDevice,
        format: &VertexFormat,
    ) -> Result<VertexArrayId> {
        if let Some(vao) = self.vertex_arrays.get(format) {
            self.stats.hits += 1;
            return Ok(*vao);
        }
        let vao = device.create_vertex_array(format)?;
        log::debug!("vertex array {vao:?} created for {} attributes", format.len());
        self.stats.misses += 1;
        self.vertex_arrays.insert(format.clone(), vao);
        Ok(vao)
    }

    /// ### English
    /// Returns the framebuffer for `desc`, creating and completeness-checking it on first use.
    ///
    /// ### 中文
    /// 返回 `desc` 对应的 framebuffer，首次使用时创建并检查完整性。
    pub fn framebuffer(
        &mut self,
        device: &dyn GpuDevice,
        desc: &RenderTargetDesc,
    ) -> Result<FramebufferId> {
        if let Some(fbo) = self.framebuffers.get(desc) {
            self.stats.hits += 1;
            return Ok(*fbo);
        }
        let fbo = device.create_framebuffer(desc)?;
        log::debug!(
            "framebuffer {fbo:?} created with {} attachments",
            desc.attachment_count()
        );
        self.stats.misses += 1;
        self.framebuffers.insert(desc.clone(), fbo);
        Ok(fbo)
    }

    pub fn pipeline(
        &mut self,
        device: &dyn GpuDevice,
        program: &MaterialProgram,
    ) -> Result<ProgramId> {
        if let Some(linked) = self.pipelines.get(&program.id) {
            self.stats.hits += 1;
            return Ok(*linked);
        }
        let linked = device.link_program(&program.name, program.vertex, program.fragment)?;
        log::debug!("program {linked:?} linked for material `{}`", program.name);
        self.stats.misses += 1;
        self.pipelines.insert(program.id, linked);
        Ok(linked)
    }

    /// ### English
    /// Seeds the cache with a program linked elsewhere on this context.
    ///
    /// ### 中文
    /// 用在本上下文上已链接的程序预填缓存。
    pub fn insert_pipeline(&mut self, material: MaterialId, program: ProgramId) {
        self.pipelines.insert(material, program);
    }

    pub fn retire(&mut self, desc: RenderTargetDesc) {
        if self.framebuffers.contains_key(&desc) {
            self.retired.push(desc);
        }
    }

    pub fn evict_retired(&mut self, device: &dyn GpuDevice) {
        for desc in self.retired.drain(..) {
            if let Some(fbo) = self.framebuffers.remove(&desc) {
                device.delete_framebuffer(fbo);
                self.stats.evictions += 1;
            }
        }
    }

    pub fn vertex_array_count(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// ### English
    /// Deletes every cached object. The owning context must be current.
    ///
    /// ### 中文
    /// 删除全部缓存对象。所属上下文必须为 current。
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for (_, vao) in self.vertex_arrays.drain() {
            device.delete_vertex_array(vao);
        }
        for (_, fbo) in self.framebuffers.drain() {
            device.delete_framebuffer(fbo);
        }
        for (_, program) in self.pipelines.drain() {
            device.delete_program(program);
        }
        self.retired.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dpi::PhysicalSize;

    use super::*;
    use crate::engine::gpu::{
        HeadlessDevice, HeadlessNamespace, ShaderStage, TextureDesc, TextureFormat,
    };
    use crate::engine::vertex_format::{AttributeType, VertexAttribute};

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(0, HeadlessNamespace::new())
    }

    #[test]
    fn equal_formats_share_one_vertex_array() {
        let device = device();
        let mut cache = PipelineCache::default();
        let a = VertexFormat::new([VertexAttribute::new(AttributeType::F32, 3, false, 0)]).unwrap();
        let b = VertexFormat::default()
            .with(AttributeType::F32, 3, false, 0)
            .unwrap();

        let first = cache.vertex_array(&device, &a).unwrap();
        let second = cache.vertex_array(&device, &b).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.vertex_array_count(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, evictions: 0 });
    }

    #[test]
    fn retired_framebuffers_are_deleted_on_eviction() {
        let device = device();
        let mut cache = PipelineCache::default();
        let color = device
            .create_texture(&TextureDesc {
                format: TextureFormat::Rgba8,
                size: PhysicalSize::new(8, 8),
            })
            .unwrap();
        let desc = RenderTargetDesc {
            colors: vec![color],
            depth_stencil: None,
        };
        cache.framebuffer(&device, &desc).unwrap();
        assert_eq!(device.live_framebuffers(), 1);

        cache.retire(desc.clone());
        cache.retire(RenderTargetDesc::default());
        cache.evict_retired(&device);
        assert_eq!(cache.framebuffer_count(), 0);
        assert_eq!(device.live_framebuffers(), 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn pipelines_are_keyed_by_material_and_destroyed_with_the_cache() {
        let device = device();
        let mut cache = PipelineCache::default();
        let program = MaterialProgram {
            id: MaterialId(0),
            name: Arc::from("M"),
            vertex: device.compile_shader(ShaderStage::Vertex, "void main() {}").unwrap(),
            fragment: device
                .compile_shader(ShaderStage::Fragment, "void main() {}")
                .unwrap(),
        };
        let first = cache.pipeline(&device, &program).unwrap();
        assert_eq!(cache.pipeline(&device, &program).unwrap(), first);
        assert_eq!(device.namespace().live_programs(), 1);

        cache.destroy(&device);
        assert_eq!(cache.pipeline_count(), 0);
        assert_eq!(device.namespace().live_programs(), 0);
    }
}
