//! ### English
//! Material → DrawBatch → Draw → DrawInstance hierarchy.
//!
//! Draws sharing a material, vertex format, stride, primitive type and index type coalesce into
//! one [`DrawBatch`], which becomes a single indirect multi-draw call. Each draw's instances are
//! written as consecutive [`InstanceData`] records addressed through `base_instance`.
//!
//! ### 中文
//! Material → DrawBatch → Draw → DrawInstance 层级结构。
//!
//! 共享材质、顶点格式、步长、图元类型与索引类型的绘制会合并为一个 [`DrawBatch`]，
//! 对应一次间接 multi-draw 调用。每个绘制的实例以连续的 [`InstanceData`] 记录写入，
//! 通过 `base_instance` 寻址。

mod flush;
mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::engine::gpu::{IndexType, PrimitiveType, ShaderId};
use crate::engine::pass::PassId;
use crate::engine::streaming::StreamAllocation;
use crate::engine::vertex_format::VertexFormat;

pub use flush::FlushStats;
pub use registry::BatchRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

impl MaterialId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// ### English
/// Generational index of a draw. Using a handle after `remove_draw` yields `StaleHandle`.
///
/// ### 中文
/// 绘制的带代数下标。`remove_draw` 后继续使用该句柄会得到 `StaleHandle`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DrawHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    pub draw: DrawHandle,
    pub(crate) id: u32,
}

/// ### English
/// GPU-visible per-instance metadata (16 bytes, std430 compatible).
///
/// ### 中文
/// GPU 可见的每实例元数据（16 字节，兼容 std430）。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct InstanceData {
    pub transform_index: u32,
    pub material_index: u32,
    pub flags: u32,
    pub _reserved: u32,
}

impl InstanceData {
    pub const fn new(transform_index: u32, material_index: u32, flags: u32) -> Self {
        Self {
            transform_index,
            material_index,
            flags,
            _reserved: 0,
        }
    }
}

pub const INSTANCE_RECORD_SIZE: usize = size_of::<InstanceData>();

/// ### English
/// Vertex range in units of vertices, relative to the vertex slice of the frame it was streamed
/// in. The range is only valid for that frame; drawn geometry must be streamed again each frame.
///
/// ### 中文
/// 以顶点为单位的顶点范围，相对于其流入帧的顶点切片。该范围仅在该帧有效；
/// 需要绘制的几何必须每帧重新流入。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexRange {
    pub first: u32,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementRange {
    pub index_type: IndexType,
    pub first: u32,
    pub count: u32,
}

/// ### English
/// Everything needed to submit one draw.
///
/// ### 中文
/// 提交一个绘制所需的全部信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawDescriptor {
    pub format: VertexFormat,
    /// ### English
    /// Byte stride of one vertex; `0` uses the format's packed stride.
    ///
    /// ### 中文
    /// 单个顶点的字节步长；`0` 表示使用格式的紧凑步长。
    pub stride: u32,
    pub primitive: PrimitiveType,
    pub vertices: VertexRange,
    /// ### English
    /// Indexed geometry. Not supported: submitting `Some` fails with `Unsupported`.
    ///
    /// ### 中文
    /// 索引几何。不支持：传入 `Some` 会返回 `Unsupported`。
    pub elements: Option<ElementRange>,
}

/// ### English
/// Batch key. Ordered so a material iterates its batches deterministically.
///
/// ### 中文
/// 批次键。实现了排序，使材质能以确定顺序遍历批次。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub format: VertexFormat,
    pub stride: u32,
    pub primitive: PrimitiveType,
    pub index_type: IndexType,
}

/// ### English
/// Draws sharing one [`BatchKey`] under one material, plus the indirect-command range written for
/// them in the last flush.
///
/// ### 中文
/// 同一材质下共享一个 [`BatchKey`] 的绘制集合，以及上次 flush 为其写入的间接命令范围。
#[derive(Debug, Default)]
pub struct DrawBatch {
    pub(crate) draws: Vec<DrawHandle>,
    pub(crate) commands: Option<StreamAllocation>,
    pub(crate) written: u32,
    pub(crate) updated: bool,
}

impl DrawBatch {
    pub fn draws(&self) -> &[DrawHandle] {
        &self.draws
    }

    pub fn commands(&self) -> Option<&StreamAllocation> {
        self.commands.as_ref()
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawInstance {
    pub(crate) id: u32,
    pub data: InstanceData,
}

/// ### English
/// One geometry range and its instances, in insertion order.
///
/// ### 中文
/// 一个几何范围及其实例（按插入顺序）。
#[derive(Debug)]
pub struct Draw {
    pub(crate) material: MaterialId,
    pub(crate) key: BatchKey,
    pub(crate) vertices: VertexRange,
    pub(crate) geometry_frame: u64,
    pub(crate) instances: Vec<DrawInstance>,
    pub(crate) next_instance_id: u32,
    pub(crate) instance_range: Option<StreamAllocation>,
    pub(crate) written: u32,
    pub(crate) updated: bool,
}

impl Draw {
    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn vertices(&self) -> VertexRange {
        self.vertices
    }

    /// ### English
    /// Frame whose vertex slice `vertices` indexes into.
    ///
    /// ### 中文
    /// `vertices` 所索引的顶点切片所属的帧。
    pub fn geometry_frame(&self) -> u64 {
        self.geometry_frame
    }

    pub fn instances(&self) -> &[DrawInstance] {
        &self.instances
    }

    pub fn instance_range(&self) -> Option<&StreamAllocation> {
        self.instance_range.as_ref()
    }

    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }
}

/// ### English
/// Program sources a context needs to link a material's pipeline.
///
/// ### 中文
/// 上下文链接材质管线所需的程序信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaterialProgram {
    pub id: MaterialId,
    pub name: Arc<str>,
    pub vertex: ShaderId,
    pub fragment: ShaderId,
}

/// ### English
/// Named shading configuration. Never removed once registered.
///
/// ### 中文
/// 具名着色配置。注册后不会被移除。
#[derive(Debug)]
pub struct Material {
    pub(crate) program: MaterialProgram,
    pub(crate) pass: PassId,
    pub(crate) uniforms: Vec<u8>,
    pub(crate) uniform_range: Option<StreamAllocation>,
    pub(crate) batches: BTreeMap<BatchKey, DrawBatch>,
    pub(crate) frame_batches: u32,
    pub(crate) frame_draws: u32,
}

impl Material {
    pub fn id(&self) -> MaterialId {
        self.program.id
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn pass(&self) -> PassId {
        self.pass
    }

    pub fn program(&self) -> &MaterialProgram {
        &self.program
    }

    pub fn batches(&self) -> impl Iterator<Item = (&BatchKey, &DrawBatch)> {
        self.batches.iter()
    }

    pub fn batch(&self, key: &BatchKey) -> Option<&DrawBatch> {
        self.batches.get(key)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn uniform_range(&self) -> Option<&StreamAllocation> {
        self.uniform_range.as_ref()
    }

    /// ### English
    /// Batches and draws written in the current frame; reset to zero at the end of each frame.
    ///
    /// ### 中文
    /// 当前帧写入的批次数与绘制数；每帧结束时清零。
    pub fn frame_counts(&self) -> (u32, u32) {
        (self.frame_batches, self.frame_draws)
    }
}
