//! ### English
//! Batch reconciliation: flattens the retained hierarchy into indirect commands and
//! per-instance records for the current frame.
//!
//! Every batch and draw is rewritten each frame. Each frame writes into a fresh ring slice, so a
//! batch skipped because it was not `updated` would leave its commands in a slice the GPU reads
//! `FRAME_RING_DEPTH` frames later with stale contents. `updated` markers are still maintained
//! and reported as `dirty_*` counts.
//!
//! ### 中文
//! 批次协调：把保留式层级展开为当前帧的间接命令与每实例记录。
//!
//! 每帧都会重写所有批次与绘制。每帧写入的是新的环形切片，若因未 `updated` 而跳过某批次，
//! 它的命令会留在 `FRAME_RING_DEPTH` 帧之后才被 GPU 读取的旧切片中，内容已过期。
//! `updated` 标记仍会维护，并以 `dirty_*` 计数形式报告。
//!
//! 顶点范围索引的是其流入帧的顶点切片，因此所有会产生片元的绘制都必须指向本帧切片。
//! 几何过期时 flush 会在写入任何内容之前失败。

use crate::engine::batch::registry::DrawSlot;
use crate::engine::batch::{BatchRegistry, DrawBatch, INSTANCE_RECORD_SIZE, Material};
use crate::engine::error::{RenderError, Result};
use crate::engine::gpu::{DrawArraysIndirectCommand, GpuDevice, INDIRECT_COMMAND_SIZE};
use crate::engine::streaming::{BufferClass, StreamingBuffers};

/// ### English
/// What one `write_batches` call wrote.
///
/// ### 中文
/// 单次 `write_batches` 调用写入的内容统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub materials: u32,
    pub batches: u32,
    pub draws: u32,
    pub instances: u32,
    pub dirty_batches: u32,
    pub dirty_draws: u32,
    pub command_bytes: usize,
    pub instance_bytes: usize,
    pub uniform_bytes: usize,
}

impl BatchRegistry {
    /// ### English
    /// Writes every batch of every material into the current frame's slices.
    ///
    /// Fails with `StaleGeometry` or `GeometryNotStreamed` before writing anything if a draw with
    /// instances and vertices still points at an earlier frame's vertex slice.
    ///
    /// Per batch: free the previous command range, allocate one for the current draw count;
    /// per draw: free the previous instance range, allocate one for the current instance count,
    /// write its indirect command (with `base_instance` pointing at its first record) and copy
    /// its instance records in insertion order.
    ///
    /// #### Parameters
    /// - `streams`: Streaming buffers of the renderer.
    /// - `device`: Device of the context held by the calling thread.
    /// - `frame`: Frame being recorded.
    /// - `max_draws`: Per-frame draw ceiling.
    ///
    /// ### 中文
    /// 将所有材质的所有批次写入当前帧切片。
    ///
    /// 若某个带实例与顶点的绘制仍指向更早帧的顶点切片，会在写入任何内容之前返回
    /// `StaleGeometry` 或 `GeometryNotStreamed`。
    ///
    /// 每个批次：释放旧的命令范围，按当前绘制数分配新范围；每个绘制：释放旧的实例范围，
    /// 按当前实例数分配新范围，写入其间接命令（`base_instance` 指向首条记录），并按插入顺序
    /// 拷贝实例记录。
    ///
    /// #### 参数
    /// - `streams`：渲染器的流式缓冲区。
    /// - `device`：调用线程所持上下文的设备。
    /// - `frame`：正在录制的帧。
    /// - `max_draws`：每帧绘制数上限。
    pub fn write_batches(
        &mut self,
        streams: &mut StreamingBuffers,
        device: &dyn GpuDevice,
        frame: u64,
        max_draws: usize,
    ) -> Result<FlushStats> {
        let requested = self.live_draws();
        if requested > max_draws {
            return Err(RenderError::DrawLimitExceeded {
                requested,
                limit: max_draws,
            });
        }
        self.check_geometry(streams, frame)?;

        let Self {
            materials,
            draws,
            released,
            ..
        } = self;
        for range in released.drain(..) {
            streams.get_mut(BufferClass::DrawInfo).free(&range);
        }

        let mut stats = FlushStats::default();
        for material in materials.iter_mut() {
            write_uniforms(material, streams, device, frame, &mut stats)?;

            material.batches.retain(|_, batch| {
                if !batch.draws.is_empty() {
                    return true;
                }
                if let Some(previous) = batch.commands.take() {
                    streams.get_mut(BufferClass::DrawIndirect).free(&previous);
                }
                false
            });

            material.frame_batches = 0;
            material.frame_draws = 0;
            for batch in material.batches.values_mut() {
                write_batch(batch, draws, streams, device, frame, &mut stats)?;
                material.frame_batches += 1;
                material.frame_draws += batch.written;
            }
            if !material.batches.is_empty() {
                stats.materials += 1;
            }
        }

        log::trace!("frame {frame} batches written: {stats:?}");
        Ok(stats)
    }

    fn check_geometry(&self, streams: &StreamingBuffers, frame: u64) -> Result<()> {
        let mut drawn = self
            .draws
            .iter()
            .filter_map(|slot| slot.draw.as_ref())
            .filter(|draw| !draw.instances.is_empty() && draw.vertices.count > 0)
            .peekable();
        if drawn.peek().is_none() {
            return Ok(());
        }
        if let Some(stale) = drawn.find(|draw| draw.geometry_frame != frame) {
            log::warn!(
                "draw geometry from frame {} reused in frame {frame}",
                stale.geometry_frame
            );
            return Err(RenderError::StaleGeometry {
                streamed: stale.geometry_frame,
                frame,
            });
        }
        if streams.get(BufferClass::Vertex).frame_range(frame).is_none() {
            return Err(RenderError::GeometryNotStreamed { frame });
        }
        Ok(())
    }
}

fn write_uniforms(
    material: &mut Material,
    streams: &mut StreamingBuffers,
    device: &dyn GpuDevice,
    frame: u64,
    stats: &mut FlushStats,
) -> Result<()> {
    let uniform = streams.get_mut(BufferClass::Uniform);
    if let Some(previous) = material.uniform_range.take() {
        uniform.free(&previous);
    }
    if material.uniforms.is_empty() {
        return Ok(());
    }
    let range = uniform.allocate(device, frame, material.uniforms.len())?;
    uniform.write(&range, 0, &material.uniforms)?;
    material.uniform_range = Some(range);
    stats.uniform_bytes += range.size;
    Ok(())
}

fn write_batch(
    batch: &mut DrawBatch,
    draws: &mut [DrawSlot],
    streams: &mut StreamingBuffers,
    device: &dyn GpuDevice,
    frame: u64,
    stats: &mut FlushStats,
) -> Result<()> {
    let indirect = streams.get_mut(BufferClass::DrawIndirect);
    if let Some(previous) = batch.commands.take() {
        indirect.free(&previous);
    }
    let commands = indirect.allocate(device, frame, batch.draws.len() * INDIRECT_COMMAND_SIZE)?;

    for (slot, handle) in batch.draws.iter().enumerate() {
        let draw = draws
            .get_mut(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.draw.as_mut())
            .ok_or(RenderError::StaleHandle)?;

        let info = streams.get_mut(BufferClass::DrawInfo);
        if let Some(previous) = draw.instance_range.take() {
            info.free(&previous);
        }
        let instance_count = draw.instances.len();
        let base_instance = if instance_count == 0 {
            0
        } else {
            let range = info.allocate(device, frame, instance_count * INSTANCE_RECORD_SIZE)?;
            for (index, instance) in draw.instances.iter().enumerate() {
                info.write_pod(&range, index, &instance.data)?;
            }
            draw.instance_range = Some(range);
            stats.instance_bytes += range.size;
            (range.offset / INSTANCE_RECORD_SIZE) as u32
        };

        let command = DrawArraysIndirectCommand {
            count: draw.vertices.count,
            instance_count: instance_count as u32,
            first: draw.vertices.first,
            base_instance,
        };
        streams
            .get_mut(BufferClass::DrawIndirect)
            .write_pod(&commands, slot, &command)?;

        if draw.updated {
            stats.dirty_draws += 1;
        }
        draw.updated = false;
        draw.written = instance_count as u32;
        stats.draws += 1;
        stats.instances += instance_count as u32;
    }

    if batch.updated {
        stats.dirty_batches += 1;
    }
    stats.batches += 1;
    stats.command_bytes += commands.size;
    batch.updated = false;
    batch.written = batch.draws.len() as u32;
    batch.commands = Some(commands);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::batch::{DrawDescriptor, DrawHandle, InstanceData, MaterialId, VertexRange};
    use crate::engine::config::StreamSizes;
    use crate::engine::gpu::{HeadlessDevice, HeadlessNamespace, PrimitiveType, ShaderId};
    use crate::engine::pass::PassId;
    use crate::engine::streaming::{FRAME_RING_DEPTH, StreamAllocation};
    use crate::engine::vertex_format::{AttributeType, VertexFormat};

    struct Fixture {
        device: HeadlessDevice,
        streams: StreamingBuffers,
        registry: BatchRegistry,
        material: MaterialId,
    }

    impl Fixture {
        fn new() -> Self {
            let sizes = StreamSizes {
                vertex: 1024,
                index: 256,
                draw_indirect: 1024,
                draw_info: 4096,
                uniform: 1024,
                pixel_staging: 256,
            };
            let mut registry = BatchRegistry::new();
            let material = registry
                .insert_material("M", PassId::FORWARD, ShaderId(1), ShaderId(2))
                .unwrap();
            Self {
                device: HeadlessDevice::new(0, HeadlessNamespace::new()),
                streams: StreamingBuffers::new(&sizes),
                registry,
                material,
            }
        }

        fn submit(&mut self, count: u32) -> DrawHandle {
            let desc = DrawDescriptor {
                format: VertexFormat::default()
                    .with(AttributeType::F32, 3, false, 0)
                    .unwrap(),
                stride: 12,
                primitive: PrimitiveType::Triangles,
                vertices: VertexRange { first: 0, count },
                elements: None,
            };
            self.registry.submit_draw(self.material, desc, 0).unwrap()
        }

        /// Streams fresh vertices for every live draw into `frame`'s slice.
        fn restream(&mut self, frame: u64) {
            let live: Vec<(DrawHandle, u32)> = self
                .registry
                .draws
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    let draw = slot.draw.as_ref()?;
                    let handle = DrawHandle {
                        index: index as u32,
                        generation: slot.generation,
                    };
                    Some((handle, draw.vertices.count))
                })
                .collect();
            for (handle, count) in live {
                let range = self
                    .streams
                    .get_mut(BufferClass::Vertex)
                    .allocate_aligned(&self.device, frame, count as usize * 12, 12)
                    .unwrap();
                let vertices = VertexRange {
                    first: (range.offset / 12) as u32,
                    count,
                };
                self.registry
                    .set_draw_geometry(handle, vertices, frame)
                    .unwrap();
            }
        }

        fn flush(&mut self, frame: u64) -> FlushStats {
            self.restream(frame);
            self.registry
                .write_batches(&mut self.streams, &self.device, frame, 64)
                .unwrap()
        }

        fn command(&self, batch: &StreamAllocation, slot: usize) -> DrawArraysIndirectCommand {
            let bytes = self
                .streams
                .get(BufferClass::DrawIndirect)
                .read(batch.absolute() + slot * INDIRECT_COMMAND_SIZE, INDIRECT_COMMAND_SIZE)
                .unwrap();
            bytemuck::pod_read_unaligned(bytes)
        }

        fn records(&self, range: &StreamAllocation) -> Vec<InstanceData> {
            let bytes = self
                .streams
                .get(BufferClass::DrawInfo)
                .read(range.absolute(), range.size)
                .unwrap();
            bytes
                .chunks_exact(INSTANCE_RECORD_SIZE)
                .map(bytemuck::pod_read_unaligned)
                .collect()
        }

        fn only_batch(&self) -> &DrawBatch {
            let material = self.registry.material(self.material).unwrap();
            material.batches().next().unwrap().1
        }
    }

    #[test]
    fn single_draw_writes_one_command_and_one_record() {
        let mut fx = Fixture::new();
        let draw = fx.submit(3);
        fx.registry
            .add_instance(draw, InstanceData::new(5, 0, 1))
            .unwrap();
        let stats = fx.flush(0);
        assert_eq!((stats.batches, stats.draws, stats.instances), (1, 1, 1));

        let commands = *fx.only_batch().commands().unwrap();
        assert_eq!(commands.size, INDIRECT_COMMAND_SIZE);
        let range = *fx.registry.draw(draw).unwrap().instance_range().unwrap();
        assert_eq!(
            fx.command(&commands, 0),
            DrawArraysIndirectCommand {
                count: 3,
                instance_count: 1,
                first: 0,
                base_instance: (range.offset / INSTANCE_RECORD_SIZE) as u32,
            }
        );
        assert_eq!(fx.records(&range), vec![InstanceData::new(5, 0, 1)]);
    }

    #[test]
    fn base_instance_addresses_each_draws_records() {
        let mut fx = Fixture::new();
        let a = fx.submit(3);
        let b = fx.submit(6);
        for i in 0..2 {
            fx.registry.add_instance(a, InstanceData::new(i, 0, 0)).unwrap();
        }
        for i in 10..13 {
            fx.registry.add_instance(b, InstanceData::new(i, 0, 0)).unwrap();
        }
        fx.flush(0);

        let commands = *fx.only_batch().commands().unwrap();
        let second = fx.command(&commands, 1);
        assert_eq!((second.count, second.instance_count), (6, 3));
        let records_b = fx.records(fx.registry.draw(b).unwrap().instance_range().unwrap());
        assert_eq!(second.base_instance as usize * INSTANCE_RECORD_SIZE, {
            fx.registry.draw(b).unwrap().instance_range().unwrap().offset
        });
        assert_eq!(records_b[0].transform_index, 10);
    }

    #[test]
    fn removing_an_instance_shrinks_the_range() {
        let mut fx = Fixture::new();
        let draw = fx.submit(3);
        let handles: Vec<_> = (0..3)
            .map(|i| fx.registry.add_instance(draw, InstanceData::new(i, 0, 0)).unwrap())
            .collect();
        fx.flush(0);
        assert_eq!(
            fx.registry.draw(draw).unwrap().instance_range().unwrap().size,
            3 * INSTANCE_RECORD_SIZE
        );

        fx.registry.remove_instance(handles[1]).unwrap();
        fx.flush(1);
        let range = *fx.registry.draw(draw).unwrap().instance_range().unwrap();
        assert_eq!(range.size, 2 * INSTANCE_RECORD_SIZE);
        assert_eq!(
            fx.records(&range),
            vec![InstanceData::new(0, 0, 0), InstanceData::new(2, 0, 0)]
        );
        assert_eq!(fx.registry.draw(draw).unwrap().written(), 2);
    }

    #[test]
    fn unchanged_batches_are_still_rewritten_but_not_dirty() {
        let mut fx = Fixture::new();
        let draw = fx.submit(3);
        fx.registry.add_instance(draw, InstanceData::default()).unwrap();
        let first = fx.flush(0);
        assert_eq!((first.dirty_batches, first.dirty_draws), (1, 1));

        let second = fx.flush(1);
        assert_eq!((second.dirty_batches, second.dirty_draws), (0, 0));
        assert_eq!(second.draws, 1);
        let commands = fx.only_batch().commands().unwrap();
        assert_eq!(commands.frame, 1);
        assert!(!fx.registry.draw(draw).unwrap().is_updated());
    }

    #[test]
    fn emptied_batches_are_dropped_and_their_ranges_freed() {
        let mut fx = Fixture::new();
        let draw = fx.submit(3);
        fx.registry.add_instance(draw, InstanceData::default()).unwrap();
        fx.flush(0);
        fx.registry.remove_draw(draw).unwrap();
        let stats = fx.flush(1);
        assert_eq!(stats.batches, 0);
        assert_eq!(fx.registry.material(fx.material).unwrap().batch_count(), 0);
        assert_eq!(
            fx.streams.get(BufferClass::DrawInfo).stats().retired_bytes,
            INSTANCE_RECORD_SIZE as u64
        );
        assert_eq!(
            fx.streams.get(BufferClass::DrawIndirect).stats().retired_bytes,
            INDIRECT_COMMAND_SIZE as u64
        );
    }

    #[test]
    fn geometry_left_over_from_an_earlier_frame_fails_before_writing() {
        let mut fx = Fixture::new();
        let draw = fx.submit(3);
        fx.registry.add_instance(draw, InstanceData::default()).unwrap();
        fx.flush(0);
        let before = fx.streams.get(BufferClass::DrawIndirect).stats();

        for frame in [1, FRAME_RING_DEPTH as u64] {
            let err = fx
                .registry
                .write_batches(&mut fx.streams, &fx.device, frame, 64)
                .unwrap_err();
            assert_eq!(err, RenderError::StaleGeometry { streamed: 0, frame });
        }
        assert_eq!(fx.streams.get(BufferClass::DrawIndirect).stats(), before);
        assert_eq!(fx.only_batch().commands().unwrap().frame, 0);

        fx.flush(FRAME_RING_DEPTH as u64);
        assert_eq!(
            fx.only_batch().commands().unwrap().frame,
            FRAME_RING_DEPTH as u64
        );
    }

    #[test]
    fn drawn_geometry_requires_vertices_streamed_this_frame() {
        let mut fx = Fixture::new();
        let draw = fx.submit(3);
        fx.registry.add_instance(draw, InstanceData::default()).unwrap();
        let err = fx
            .registry
            .write_batches(&mut fx.streams, &fx.device, 0, 64)
            .unwrap_err();
        assert_eq!(err, RenderError::GeometryNotStreamed { frame: 0 });
    }

    #[test]
    fn draws_without_instances_need_no_fresh_geometry() {
        let mut fx = Fixture::new();
        fx.submit(3);
        let stats = fx
            .registry
            .write_batches(&mut fx.streams, &fx.device, 5, 64)
            .unwrap();
        assert_eq!((stats.draws, stats.instances), (1, 0));
    }

    #[test]
    fn draw_ceiling_is_enforced() {
        let mut fx = Fixture::new();
        fx.submit(3);
        fx.submit(3);
        let err = fx
            .registry
            .write_batches(&mut fx.streams, &fx.device, 0, 1)
            .unwrap_err();
        assert_eq!(err, RenderError::DrawLimitExceeded { requested: 2, limit: 1 });
    }

    #[test]
    fn material_uniforms_and_frame_counts() {
        let mut fx = Fixture::new();
        fx.registry
            .set_material_uniforms(fx.material, &[1, 2, 3, 4])
            .unwrap();
        fx.submit(3);
        fx.submit(3);
        let stats = fx.flush(0);
        assert_eq!(stats.uniform_bytes, 4);

        let material = fx.registry.material(fx.material).unwrap();
        let range = material.uniform_range().unwrap();
        assert_eq!(
            fx.streams.get(BufferClass::Uniform).read(range.absolute(), 4).unwrap(),
            &[1, 2, 3, 4]
        );
        assert_eq!(material.frame_counts(), (1, 2));
        fx.registry.reset_frame_counts();
        assert_eq!(
            fx.registry.material(fx.material).unwrap().frame_counts(),
            (0, 0)
        );
    }
}
