use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::engine::batch::{
    BatchKey, Draw, DrawDescriptor, DrawHandle, DrawInstance, InstanceData,
    InstanceHandle, Material, MaterialId, MaterialProgram, VertexRange,
};
use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{IndexType, ShaderId};
use crate::engine::pass::PassId;
use crate::engine::streaming::StreamAllocation;

#[derive(Debug, Default)]
pub(crate) struct DrawSlot {
    pub(crate) generation: u32,
    pub(crate) draw: Option<Draw>,
}

/// ### English
/// Retained batch hierarchy: materials by name plus an arena of draws.
///
/// ### 中文
/// 保留式批次层级：按名称索引的材质以及绘制的 arena。
#[derive(Debug, Default)]
pub struct BatchRegistry {
    pub(crate) materials: Vec<Material>,
    by_name: HashMap<Arc<str>, MaterialId>,
    pub(crate) draws: Vec<DrawSlot>,
    free_draws: Vec<u32>,
    /// ### English
    /// Instance ranges of removed draws, returned to the stream at the next flush.
    ///
    /// ### 中文
    /// 已移除绘制的实例范围，在下次 flush 时归还给流。
    pub(crate) released: Vec<StreamAllocation>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ### English
    /// Registers a material whose shaders are already compiled.
    ///
    /// ### 中文
    /// 注册一个着色器已编译完成的材质。
    pub fn insert_material(
        &mut self,
        name: &str,
        pass: PassId,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<MaterialId> {
        if self.by_name.contains_key(name) {
            return Err(RenderError::DuplicateMaterial(name.to_owned()));
        }
        let id = MaterialId(self.materials.len() as u32);
        let name: Arc<str> = Arc::from(name);
        self.materials.push(Material {
            program: MaterialProgram {
                id,
                name: name.clone(),
                vertex,
                fragment,
            },
            pass,
            uniforms: Vec::new(),
            uniform_range: None,
            batches: BTreeMap::new(),
            frame_batches: 0,
            frame_draws: 0,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn contains_material(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn material_id(&self, name: &str) -> Result<MaterialId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownMaterial(name.to_owned()))
    }

    pub fn material(&self, id: MaterialId) -> Result<&Material> {
        self.materials.get(id.index()).ok_or(RenderError::StaleHandle)
    }

    fn material_mut(&mut self, id: MaterialId) -> Result<&mut Material> {
        self.materials
            .get_mut(id.index())
            .ok_or(RenderError::StaleHandle)
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// ### English
    /// Replaces the material's uniform block bytes, written to the uniform stream each flush.
    ///
    /// ### 中文
    /// 替换材质的 uniform block 字节，每次 flush 时写入 uniform 流。
    pub fn set_material_uniforms(&mut self, id: MaterialId, bytes: &[u8]) -> Result<()> {
        let material = self.material_mut(id)?;
        material.uniforms.clear();
        material.uniforms.extend_from_slice(bytes);
        Ok(())
    }

    /// ### English
    /// Adds a draw to the batch matching its key, creating the batch on first use.
    /// `frame` is the frame whose vertex slice `desc.vertices` was streamed into.
    ///
    /// ### 中文
    /// 将绘制加入与其键匹配的批次，首次使用时创建该批次。
    /// `frame` 为 `desc.vertices` 流入的顶点切片所属的帧。
    pub fn submit_draw(
        &mut self,
        material: MaterialId,
        desc: DrawDescriptor,
        frame: u64,
    ) -> Result<DrawHandle> {
        if desc.elements.is_some() {
            return Err(RenderError::Unsupported("indexed draws"));
        }
        let packed = desc.format.packed_stride();
        let stride = if desc.stride == 0 { packed } else { desc.stride };
        if desc.format.is_empty() || stride < packed {
            return Err(RenderError::InvalidVertexFormat(format!(
                "stride {stride} cannot hold a {packed}-byte vertex"
            )));
        }
        let key = BatchKey {
            format: desc.format,
            stride,
            primitive: desc.primitive,
            index_type: IndexType::None,
        };
        let draw = Draw {
            material,
            key: key.clone(),
            vertices: desc.vertices,
            geometry_frame: frame,
            instances: Vec::new(),
            next_instance_id: 0,
            instance_range: None,
            written: 0,
            updated: true,
        };

        if material.index() >= self.materials.len() {
            return Err(RenderError::StaleHandle);
        }
        let handle = match self.free_draws.pop() {
            Some(index) => {
                let slot = &mut self.draws[index as usize];
                slot.draw = Some(draw);
                DrawHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.draws.push(DrawSlot {
                    generation: 0,
                    draw: Some(draw),
                });
                DrawHandle {
                    index: (self.draws.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        let batch = self.materials[material.index()]
            .batches
            .entry(key)
            .or_default();
        batch.draws.push(handle);
        batch.updated = true;
        Ok(handle)
    }

    pub fn draw(&self, handle: DrawHandle) -> Result<&Draw> {
        self.draws
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.draw.as_ref())
            .ok_or(RenderError::StaleHandle)
    }

    fn draw_mut(&mut self, handle: DrawHandle) -> Result<&mut Draw> {
        self.draws
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.draw.as_mut())
            .ok_or(RenderError::StaleHandle)
    }

    /// ### English
    /// Removes a draw from its batch. Its handle and instance handles become stale.
    ///
    /// ### 中文
    /// 从所属批次移除一个绘制。其句柄与实例句柄随之失效。
    pub fn remove_draw(&mut self, handle: DrawHandle) -> Result<()> {
        let draw = self.draw(handle)?;
        let (material, key) = (draw.material, draw.key.clone());
        let material = self.material_mut(material)?;
        if let Some(batch) = material.batches.get_mut(&key) {
            batch.draws.retain(|held| *held != handle);
            batch.updated = true;
        }
        let slot = &mut self.draws[handle.index as usize];
        if let Some(range) = slot.draw.take().and_then(|draw| draw.instance_range) {
            self.released.push(range);
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free_draws.push(handle.index);
        Ok(())
    }

    /// ### English
    /// Points a draw at a vertex range streamed in `frame`. Must be called every frame the draw
    /// is rendered, since vertex slices are recycled after the ring wraps.
    ///
    /// ### 中文
    /// 让绘制指向 `frame` 帧流入的顶点范围。绘制每次被渲染的帧都必须调用，
    /// 因为顶点切片会在环形缓冲区回绕后被复用。
    pub fn set_draw_geometry(
        &mut self,
        handle: DrawHandle,
        vertices: VertexRange,
        frame: u64,
    ) -> Result<()> {
        let draw = self.draw_mut(handle)?;
        if draw.vertices != vertices {
            draw.vertices = vertices;
            draw.updated = true;
        }
        draw.geometry_frame = frame;
        Ok(())
    }

    pub fn add_instance(&mut self, handle: DrawHandle, data: InstanceData) -> Result<InstanceHandle> {
        let draw = self.draw_mut(handle)?;
        let id = draw.next_instance_id;
        draw.next_instance_id = draw.next_instance_id.wrapping_add(1);
        draw.instances.push(DrawInstance { id, data });
        draw.updated = true;
        Ok(InstanceHandle { draw: handle, id })
    }

    pub fn update_instance(&mut self, handle: InstanceHandle, data: InstanceData) -> Result<()> {
        let draw = self.draw_mut(handle.draw)?;
        let instance = draw
            .instances
            .iter_mut()
            .find(|instance| instance.id == handle.id)
            .ok_or(RenderError::StaleHandle)?;
        instance.data = data;
        draw.updated = true;
        Ok(())
    }

    /// ### English
    /// Removes one instance, keeping the remaining instances in insertion order.
    ///
    /// ### 中文
    /// 移除一个实例，其余实例保持插入顺序。
    pub fn remove_instance(&mut self, handle: InstanceHandle) -> Result<InstanceData> {
        let draw = self.draw_mut(handle.draw)?;
        let position = draw
            .instances
            .iter()
            .position(|instance| instance.id == handle.id)
            .ok_or(RenderError::StaleHandle)?;
        let removed = draw.instances.remove(position);
        draw.updated = true;
        Ok(removed.data)
    }

    /// ### English
    /// Sum of live instances across all draws.
    ///
    /// ### 中文
    /// 所有绘制的存活实例总数。
    pub fn live_instances(&self) -> usize {
        self.draws
            .iter()
            .filter_map(|slot| slot.draw.as_ref())
            .map(|draw| draw.instances.len())
            .sum()
    }

    pub fn live_draws(&self) -> usize {
        self.materials
            .iter()
            .flat_map(|material| material.batches.values())
            .map(|batch| batch.draws.len())
            .sum()
    }

    /// ### English
    /// Clears per-material frame counters; called once per frame after output submission.
    ///
    /// ### 中文
    /// 清零每材质的帧计数；每帧在输出提交后调用一次。
    pub fn reset_frame_counts(&mut self) {
        for material in &mut self.materials {
            material.frame_batches = 0;
            material.frame_draws = 0;
        }
    }
}
